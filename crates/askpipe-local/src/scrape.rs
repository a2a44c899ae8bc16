//! Page content fetcher: bounded GET + visible-text extraction.
//!
//! Fetch failures are swallowed here on purpose (empty string, logged at
//! `warn`) because a single unreachable page must not abort a whole
//! search-augmented run.

use askpipe_core::{PageFetcher, Result};
use std::time::Duration;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Extract visible text from HTML: script/style/noscript/template subtrees
/// are dropped, remaining text chunks are trimmed and joined with newlines.
pub fn extract_visible_text(html: &str) -> String {
    let doc = scraper::Html::parse_document(html);
    let mut chunks: Vec<String> = Vec::new();
    for node in doc.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .map(|e| matches!(e.name(), "script" | "style" | "noscript" | "template"))
                .unwrap_or(false)
        });
        if hidden {
            continue;
        }
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }
    }
    chunks.join("\n")
}

#[derive(Debug, Clone)]
pub struct PageScraper {
    client: reqwest::Client,
}

impl PageScraper {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl PageFetcher for PageScraper {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        let resp = match self
            .client
            .get(url)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(url, error = %e, "page fetch failed, skipping");
                return Ok(String::new());
            }
        };

        let status = resp.status();
        if !status.is_success() {
            tracing::warn!(url, status = status.as_u16(), "page fetch non-2xx, skipping");
            return Ok(String::new());
        }

        match resp.text().await {
            Ok(body) => Ok(extract_visible_text(&body)),
            Err(e) => {
                tracing::warn!(url, error = %e, "page body read failed, skipping");
                Ok(String::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};
    use std::net::SocketAddr;

    #[test]
    fn extraction_drops_script_and_style() {
        let html = r#"
        <html>
          <head><style>body { color: red }</style><title>Title</title></head>
          <body>
            <script>var hidden = 1;</script>
            <h1>Heading</h1>
            <p>First paragraph.</p>
            <div>Second <b>bold</b> block</div>
          </body>
        </html>
        "#;
        let text = extract_visible_text(html);
        assert!(!text.contains("hidden"));
        assert!(!text.contains("color: red"));
        assert_eq!(
            text,
            "Title\nHeading\nFirst paragraph.\nSecond\nbold\nblock"
        );
    }

    #[test]
    fn extraction_of_empty_document_is_empty() {
        assert_eq!(extract_visible_text(""), "");
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
    async fn fetches_and_extracts_text() {
        let app = Router::new().route(
            "/page",
            get(|| async {
                axum::response::Html("<body><script>x()</script><p>Visible text</p></body>")
            }),
        );
        let addr = serve(app).await;

        let scraper = PageScraper::new(reqwest::Client::new());
        let text = scraper
            .fetch_text(&format!("http://{addr}/page"))
            .await
            .unwrap();
        assert_eq!(text, "Visible text");
    }

    #[tokio::test]
    async fn unreachable_url_yields_empty_text() {
        let scraper = PageScraper::new(reqwest::Client::new());
        let text = scraper
            .fetch_text("http://127.0.0.1:9/unreachable")
            .await
            .unwrap();
        assert_eq!(text, "");
    }

    #[tokio::test]
    async fn non_2xx_yields_empty_text() {
        let app = Router::new().route(
            "/gone",
            get(|| async { (StatusCode::NOT_FOUND, "nothing here") }),
        );
        let addr = serve(app).await;

        let scraper = PageScraper::new(reqwest::Client::new());
        let text = scraper
            .fetch_text(&format!("http://{addr}/gone"))
            .await
            .unwrap();
        assert_eq!(text, "");
    }
}
