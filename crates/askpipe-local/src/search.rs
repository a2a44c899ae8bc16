//! Web-search providers and the primary/secondary fallback wrapper.
//!
//! Primary: Google Custom Search (keyed REST). Secondary: DuckDuckGo's html
//! endpoint (keyless), parsed with `scraper`. Both normalize to the shared
//! `SearchResult` shape; relevance order is backend-native, re-ranking
//! happens later in the pipeline.

use crate::{env, transport};
use askpipe_core::{Error, Result, SearchBackend, SearchQuery, SearchResult};
use serde::Deserialize;

const DEFAULT_RESULT_COUNT: usize = 6;
const MAX_RESULT_COUNT: usize = 10;

fn timeout_ms_from_query(q: &SearchQuery) -> u64 {
    // Provider requests can hang indefinitely without an explicit timeout.
    // Keep a conservative cap even if callers pass something huge.
    q.timeout_ms.unwrap_or(20_000).clamp(1_000, 60_000)
}

fn result_count(q: &SearchQuery) -> usize {
    q.max_results
        .unwrap_or(DEFAULT_RESULT_COUNT)
        .clamp(1, MAX_RESULT_COUNT)
}

fn google_api_key_from_env() -> Option<String> {
    env("ASKPIPE_GOOGLE_API_KEY")
}

fn google_cx_from_env() -> Option<String> {
    env("ASKPIPE_GOOGLE_CX")
}

fn google_endpoint_from_env() -> String {
    env("ASKPIPE_GOOGLE_ENDPOINT")
        .unwrap_or_else(|| "https://www.googleapis.com/customsearch/v1".to_string())
}

fn ddg_endpoint_from_env() -> String {
    env("ASKPIPE_DDG_ENDPOINT").unwrap_or_else(|| "https://html.duckduckgo.com/html/".to_string())
}

#[derive(Debug, Clone)]
pub struct GoogleCseProvider {
    client: reqwest::Client,
    api_key: String,
    cx: String,
    endpoint: String,
}

impl GoogleCseProvider {
    pub fn new(client: reqwest::Client, api_key: String, cx: String, endpoint: String) -> Self {
        Self {
            client,
            api_key,
            cx,
            endpoint,
        }
    }

    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let api_key = google_api_key_from_env()
            .ok_or_else(|| Error::NotConfigured("missing ASKPIPE_GOOGLE_API_KEY".to_string()))?;
        let cx = google_cx_from_env()
            .ok_or_else(|| Error::NotConfigured("missing ASKPIPE_GOOGLE_CX".to_string()))?;
        Ok(Self::new(client, api_key, cx, google_endpoint_from_env()))
    }
}

#[derive(Debug, Deserialize)]
struct GoogleSearchResponse {
    items: Option<Vec<GoogleItem>>,
}

#[derive(Debug, Deserialize)]
struct GoogleItem {
    title: Option<String>,
    link: Option<String>,
    snippet: Option<String>,
}

#[async_trait::async_trait]
impl SearchBackend for GoogleCseProvider {
    fn name(&self) -> &'static str {
        "google-cse"
    }

    async fn search(&self, q: &SearchQuery) -> Result<Vec<SearchResult>> {
        let timeout_ms = timeout_ms_from_query(q);
        let num = result_count(q);

        let rb = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.cx.as_str()),
                ("q", q.query.as_str()),
                ("num", &num.to_string()),
            ])
            .timeout(std::time::Duration::from_millis(timeout_ms));

        let resp = transport::send_with_retry(rb)
            .await
            .map_err(|e| Error::SearchUnavailable(format!("google-cse: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::SearchUnavailable(format!(
                "google-cse HTTP {status}"
            )));
        }

        let parsed: GoogleSearchResponse = resp
            .json()
            .await
            .map_err(|e| Error::SearchUnavailable(format!("google-cse: {e}")))?;

        let mut out = Vec::new();
        for item in parsed.items.unwrap_or_default().into_iter().take(num) {
            let Some(url) = item.link.filter(|u| !u.is_empty()) else {
                continue;
            };
            out.push(SearchResult {
                title: item.title.unwrap_or_default(),
                url,
                snippet: item.snippet.unwrap_or_default(),
            });
        }
        Ok(out)
    }
}

#[derive(Debug, Clone)]
pub struct DuckDuckGoProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl DuckDuckGoProvider {
    pub fn new(client: reqwest::Client, endpoint: String) -> Self {
        Self { client, endpoint }
    }

    pub fn from_env(client: reqwest::Client) -> Self {
        Self::new(client, ddg_endpoint_from_env())
    }
}

/// Unwrap DuckDuckGo's redirect links (`//duckduckgo.com/l/?uddg=<target>`)
/// back to the target URL; pass anything else through untouched.
fn unwrap_ddg_redirect(href: &str) -> String {
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };
    if let Ok(u) = url::Url::parse(&absolute) {
        if u.path() == "/l/" {
            if let Some((_, target)) = u.query_pairs().find(|(k, _)| k == "uddg") {
                return target.to_string();
            }
        }
    }
    absolute
}

fn parse_ddg_html(html: &str, max: usize) -> Vec<SearchResult> {
    let doc = scraper::Html::parse_document(html);
    let (Ok(result_sel), Ok(title_sel), Ok(snippet_sel)) = (
        scraper::Selector::parse("div.result"),
        scraper::Selector::parse("a.result__a"),
        scraper::Selector::parse(".result__snippet"),
    ) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for result in doc.select(&result_sel) {
        if out.len() >= max {
            break;
        }
        let Some(anchor) = result.select(&title_sel).next() else {
            continue;
        };
        let Some(href) = anchor.value().attr("href").filter(|h| !h.is_empty()) else {
            continue;
        };
        let title = anchor.text().collect::<String>().trim().to_string();
        let snippet = result
            .select(&snippet_sel)
            .next()
            .map(|s| s.text().collect::<String>().trim().to_string())
            .unwrap_or_default();
        out.push(SearchResult {
            title,
            url: unwrap_ddg_redirect(href),
            snippet,
        });
    }
    out
}

#[async_trait::async_trait]
impl SearchBackend for DuckDuckGoProvider {
    fn name(&self) -> &'static str {
        "duckduckgo"
    }

    async fn search(&self, q: &SearchQuery) -> Result<Vec<SearchResult>> {
        let timeout_ms = timeout_ms_from_query(q);
        let max = result_count(q);

        let rb = self
            .client
            .get(&self.endpoint)
            .query(&[("q", q.query.as_str())])
            .timeout(std::time::Duration::from_millis(timeout_ms));

        let resp = transport::send_with_retry(rb)
            .await
            .map_err(|e| Error::SearchUnavailable(format!("duckduckgo: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::SearchUnavailable(format!(
                "duckduckgo HTTP {status}"
            )));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| Error::SearchUnavailable(format!("duckduckgo: {e}")))?;
        Ok(parse_ddg_html(&body, max))
    }
}

/// Primary/secondary search composition: tries the primary backend first and
/// transparently retries the same logical query against the secondary on any
/// primary error. Only when both fail does the caller see an error.
pub struct FallbackSearch {
    primary: Box<dyn SearchBackend>,
    secondary: Box<dyn SearchBackend>,
}

impl FallbackSearch {
    pub fn new(primary: Box<dyn SearchBackend>, secondary: Box<dyn SearchBackend>) -> Self {
        Self { primary, secondary }
    }

    /// Google as primary, DuckDuckGo as the keyless fallback.
    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let google = GoogleCseProvider::from_env(client.clone())?;
        let ddg = DuckDuckGoProvider::from_env(client);
        Ok(Self::new(Box::new(google), Box::new(ddg)))
    }
}

#[async_trait::async_trait]
impl SearchBackend for FallbackSearch {
    fn name(&self) -> &'static str {
        "fallback"
    }

    async fn search(&self, q: &SearchQuery) -> Result<Vec<SearchResult>> {
        if q.query.trim().is_empty() {
            return Err(Error::InvalidQuery("empty search query".to_string()));
        }

        let primary_err = match self.primary.search(q).await {
            Ok(results) => return Ok(results),
            Err(e) => e,
        };
        tracing::warn!(
            provider = self.primary.name(),
            error = %primary_err,
            "primary search failed, trying secondary"
        );

        self.secondary.search(q).await.map_err(|secondary_err| {
            Error::SearchUnavailable(format!(
                "{}: {primary_err}; {}: {secondary_err}",
                self.primary.name(),
                self.secondary.name()
            ))
        })
    }
}
