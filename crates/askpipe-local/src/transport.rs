//! Retrying HTTP transport for the search and language-model backends.
//!
//! Retries are restricted to transient classes: connect/timeout errors and
//! HTTP 408/500/502/503/504. Everything else is returned to the caller on
//! the first attempt. The content fetcher does not go through this path;
//! its failures are swallowed by contract, so retrying would only stall a
//! run for a page it is allowed to skip.

use std::time::Duration;

const MAX_ATTEMPTS: u32 = 5;
const BASE_DELAY: Duration = Duration::from_millis(250);
const MAX_DELAY: Duration = Duration::from_secs(4);

pub fn is_transient_status(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 500 | 502 | 503 | 504)
}

fn is_transient_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// Send a request with bounded exponential backoff (up to [`MAX_ATTEMPTS`]).
///
/// A response with a transient status is retried; any other response is
/// returned as-is and the caller decides what a non-2xx means. Requests
/// with non-cloneable bodies get a single attempt.
pub async fn send_with_retry(rb: reqwest::RequestBuilder) -> reqwest::Result<reqwest::Response> {
    let mut delay = BASE_DELAY;
    for attempt in 1..MAX_ATTEMPTS {
        let Some(this_attempt) = rb.try_clone() else {
            break;
        };
        match this_attempt.send().await {
            Ok(resp) => {
                if !is_transient_status(resp.status()) {
                    return Ok(resp);
                }
                tracing::warn!(
                    attempt,
                    status = resp.status().as_u16(),
                    "transient HTTP status, backing off"
                );
            }
            Err(e) => {
                if !is_transient_error(&e) {
                    return Err(e);
                }
                tracing::warn!(attempt, error = %e, "transient transport error, backing off");
            }
        }
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(MAX_DELAY);
    }
    rb.send().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode, routing::get, Router};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn transient_statuses_are_the_documented_set() {
        for code in [408u16, 500, 502, 503, 504] {
            assert!(is_transient_status(
                reqwest::StatusCode::from_u16(code).unwrap()
            ));
        }
        for code in [200u16, 301, 400, 401, 403, 404, 418, 429] {
            assert!(!is_transient_status(
                reqwest::StatusCode::from_u16(code).unwrap()
            ));
        }
    }

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn retries_through_transient_statuses() {
        let hits = Arc::new(AtomicU32::new(0));
        let app = Router::new()
            .route(
                "/",
                get(|State(hits): State<Arc<AtomicU32>>| async move {
                    let n = hits.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        (StatusCode::SERVICE_UNAVAILABLE, "busy")
                    } else {
                        (StatusCode::OK, "ok")
                    }
                }),
            )
            .with_state(hits.clone());
        let addr = serve(app).await;

        let client = reqwest::Client::new();
        let resp = send_with_retry(client.get(format!("http://{addr}/")))
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_status_is_not_retried() {
        let hits = Arc::new(AtomicU32::new(0));
        let app = Router::new()
            .route(
                "/",
                get(|State(hits): State<Arc<AtomicU32>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::NOT_FOUND, "nope")
                }),
            )
            .with_state(hits.clone());
        let addr = serve(app).await;

        let client = reqwest::Client::new();
        let resp = send_with_retry(client.get(format!("http://{addr}/")))
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
