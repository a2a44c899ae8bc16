//! OpenAI-compatible language-model client and the four structured
//! operations the pipeline needs: query rewriting, result re-ranking,
//! per-page summarization, and direct knowledge answering.
//!
//! Each operation is a single request/response round trip; retry lives in
//! the transport. Models wrap JSON in prose or code fences often enough
//! that every JSON-expecting operation strips a non-JSON wrapper once
//! before giving up.

use crate::{env, transport};
use askpipe_core::{DirectAnswer, Error, LanguageModel, RankedResult, Result, SearchResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const LLM_TIMEOUT: Duration = Duration::from_secs(60);
const RANK_TOP_K: usize = 3;

const REWRITE_SYSTEM_PROMPT: &str = "You are an expert at writing search-engine queries. \
    From the user's question, produce one effective, relevant search query. \
    Keep it simple and precise, with no quotation marks or extra symbols. \
    Reply with the query only.";

const RANK_SYSTEM_PROMPT: &str = "You rank web search results by relevance to a query. \
    Weigh keyword overlap with title and snippet, snippet usefulness, domain \
    trustworthiness, freshness, and specificity. Reply strictly as a JSON array: \
    [{\"title\": \"...\", \"url\": \"...\", \"snippet\": \"...\"}, ...] \
    with every key and value double-quoted. No commentary outside the JSON.";

const SUMMARIZE_SYSTEM_PROMPT: &str = "You summarize web page content. Summarize the \
    provided text so it answers the user's question. Aim for about 200 characters.";

const DIRECT_SYSTEM_PROMPT: &str = "You answer questions concisely and accurately from \
    your own knowledge. Also produce exactly 4 related keywords. Reply strictly as a \
    JSON object: {\"message\": \"the answer\", \"related_words\": [\"w1\", \"w2\", \"w3\", \"w4\"]} \
    with every key and string double-quoted. No commentary outside the JSON.";

fn base_url_from_env() -> Option<String> {
    env("ASKPIPE_OPENAI_BASE_URL")
}

fn api_key_from_env() -> Option<String> {
    env("ASKPIPE_OPENAI_API_KEY")
}

fn model_from_env() -> Option<String> {
    env("ASKPIPE_OPENAI_MODEL")
}

#[derive(Debug, Clone)]
pub struct OpenAiCompatLm {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiCompatLm {
    pub fn new(
        client: reqwest::Client,
        base_url: String,
        api_key: Option<String>,
        model: String,
    ) -> Self {
        Self {
            client,
            base_url,
            api_key,
            model,
        }
    }

    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let base_url = base_url_from_env()
            .ok_or_else(|| Error::NotConfigured("missing ASKPIPE_OPENAI_BASE_URL".to_string()))?;
        let model = model_from_env()
            .ok_or_else(|| Error::NotConfigured("missing ASKPIPE_OPENAI_MODEL".to_string()))?;
        Ok(Self::new(client, base_url, api_key_from_env(), model))
    }

    fn endpoint_chat_completions(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }

    async fn chat(&self, system: &str, user: &str, max_tokens: u64) -> Result<String> {
        let req = ChatCompletionsRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            max_tokens: Some(max_tokens),
            temperature: Some(0.7),
            stream: Some(false),
        };

        let mut rb = self
            .client
            .post(self.endpoint_chat_completions())
            .timeout(LLM_TIMEOUT)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(k) = &self.api_key {
            rb = rb.header(reqwest::header::AUTHORIZATION, format!("Bearer {k}"));
        }

        let resp = transport::send_with_retry(rb.json(&req))
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Llm(format!("chat.completions HTTP {status}")));
        }

        let parsed: ChatCompletionsResponse =
            resp.json().await.map_err(|e| Error::Llm(e.to_string()))?;
        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();
        if content.is_empty() {
            return Err(Error::Llm("empty completion".to_string()));
        }
        Ok(content)
    }
}

/// Slice out the first balanced-looking JSON block, discarding any prose or
/// code-fence wrapper the model added around it.
fn strip_json_wrapper(s: &str, open: char, close: char) -> Option<&str> {
    let start = s.find(open)?;
    let end = s.rfind(close)?;
    if end <= start {
        return None;
    }
    Some(&s[start..=end])
}

fn parse_ranked(content: &str) -> Result<Vec<RankedResult>> {
    let candidate = strip_json_wrapper(content, '[', ']').unwrap_or(content);
    if let Ok(entries) = serde_json::from_str::<Vec<RankedResult>>(candidate) {
        return Ok(entries.into_iter().take(RANK_TOP_K).collect());
    }

    // One repair pass: models sometimes break string literals across lines.
    let repaired: String = candidate.lines().collect();
    serde_json::from_str::<Vec<RankedResult>>(&repaired)
        .map(|entries| entries.into_iter().take(RANK_TOP_K).collect())
        .map_err(|e| Error::MalformedModelOutput(format!("ranking response: {e}")))
}

fn parse_direct(content: &str) -> Result<DirectAnswer> {
    let candidate = strip_json_wrapper(content, '{', '}').unwrap_or(content);
    serde_json::from_str::<DirectAnswer>(candidate)
        .map_err(|e| Error::MalformedModelOutput(format!("direct answer response: {e}")))
}

#[async_trait::async_trait]
impl LanguageModel for OpenAiCompatLm {
    async fn rewrite_query(&self, question: &str) -> Result<String> {
        self.chat(REWRITE_SYSTEM_PROMPT, question, 60).await
    }

    async fn rank_results(
        &self,
        query: &str,
        results: &[SearchResult],
    ) -> Result<Vec<RankedResult>> {
        let listing =
            serde_json::to_string_pretty(results).map_err(|e| Error::Llm(e.to_string()))?;
        let user = format!(
            "Reorder these search results for the query below, most relevant first.\n\n\
             Query: {query}\n\
             Results:\n{listing}"
        );
        let content = self.chat(RANK_SYSTEM_PROMPT, &user, 1_000).await?;
        parse_ranked(&content)
    }

    async fn summarize_page(&self, page_text: &str, question: &str) -> Result<String> {
        let user = format!(
            "Page content:\n{page_text}\n\n\
             Question: {question}\n\n\
             Produce a summary that helps answer this question."
        );
        self.chat(SUMMARIZE_SYSTEM_PROMPT, &user, 500).await
    }

    async fn answer_directly(&self, question: &str) -> Result<DirectAnswer> {
        let content = self.chat(DIRECT_SYSTEM_PROMPT, question, 250).await?;
        parse_direct(&content)
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use std::net::SocketAddr;

    #[test]
    fn wrapper_stripping_handles_prose_and_fences() {
        let fenced = "Here you go:\n```json\n[{\"a\":1}]\n```\nHope that helps!";
        assert_eq!(strip_json_wrapper(fenced, '[', ']'), Some("[{\"a\":1}]"));

        let prose = "The answer is {\"message\": \"hi\"} as requested.";
        assert_eq!(
            strip_json_wrapper(prose, '{', '}'),
            Some("{\"message\": \"hi\"}")
        );

        assert_eq!(strip_json_wrapper("no json here", '[', ']'), None);
    }

    #[test]
    fn ranked_parse_keeps_model_order_and_truncates_to_three() {
        let content = r#"[
            {"title":"t1","url":"u1","snippet":"s1"},
            {"title":"t2","url":"u2","snippet":"s2"},
            {"title":"t3","url":"u3","snippet":"s3"},
            {"title":"t4","url":"u4","snippet":"s4"}
        ]"#;
        let ranked = parse_ranked(content).unwrap();
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].title, "t1");
        assert_eq!(ranked[2].url, "u3");
    }

    #[test]
    fn ranked_parse_rejects_missing_fields() {
        let content = r#"[{"title":"t1","url":"u1"}]"#;
        let err = parse_ranked(content).unwrap_err();
        assert!(matches!(err, Error::MalformedModelOutput(_)), "got {err:?}");
    }

    #[test]
    fn ranked_parse_rejects_non_string_fields() {
        let content = r#"[{"title":"t1","url":"u1","snippet":3}]"#;
        assert!(parse_ranked(content).is_err());
    }

    #[test]
    fn ranked_parse_repairs_line_broken_strings() {
        // A literal newline inside a JSON string is invalid; joining lines
        // once recovers it.
        let content = "[{\"title\":\"broken\nacross lines\",\"url\":\"u\",\"snippet\":\"s\"}]";
        let ranked = parse_ranked(content).unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].title, "brokenacross lines");
    }

    #[test]
    fn ranked_parse_fails_after_one_repair_attempt() {
        let err = parse_ranked("[{not json at all").unwrap_err();
        assert!(matches!(err, Error::MalformedModelOutput(_)), "got {err:?}");
    }

    #[test]
    fn direct_parse_validates_shape() {
        let ok = r#"{"message":"Tokyo.","related_words":["Tokyo","Japan","capital","Honshu"]}"#;
        let parsed = parse_direct(ok).unwrap();
        assert_eq!(parsed.message, "Tokyo.");
        assert_eq!(parsed.related_words.len(), 4);

        let missing = r#"{"message":"Tokyo."}"#;
        assert!(parse_direct(missing).is_err());

        let wrong_type = r#"{"message":"Tokyo.","related_words":"Japan"}"#;
        assert!(parse_direct(wrong_type).is_err());
    }

    fn completion(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        })
    }

    async fn serve_completion(content: &'static str) -> SocketAddr {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move || async move { Json(completion(content)) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn lm_at(addr: SocketAddr) -> OpenAiCompatLm {
        OpenAiCompatLm::new(
            reqwest::Client::new(),
            format!("http://{addr}"),
            Some("test-key".to_string()),
            "test-model".to_string(),
        )
    }

    #[tokio::test]
    async fn rewrite_query_returns_trimmed_completion() {
        let addr = serve_completion("  tokushima governor 2024  ").await;
        let query = lm_at(addr)
            .rewrite_query("Who is the current governor of Tokushima?")
            .await
            .unwrap();
        assert_eq!(query, "tokushima governor 2024");
    }

    #[tokio::test]
    async fn rank_results_round_trip_through_mock_backend() {
        let addr = serve_completion(
            r#"Sure! [{"title":"best","url":"https://a","snippet":"sa"},
                     {"title":"next","url":"https://b","snippet":"sb"}]"#,
        )
        .await;
        let input = vec![
            SearchResult {
                title: "next".into(),
                url: "https://b".into(),
                snippet: "sb".into(),
            },
            SearchResult {
                title: "best".into(),
                url: "https://a".into(),
                snippet: "sa".into(),
            },
        ];
        let ranked = lm_at(addr).rank_results("q", &input).await.unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].url, "https://a");
    }

    #[tokio::test]
    async fn answer_directly_parses_strict_object() {
        let addr = serve_completion(
            r#"{"message":"Tokyo.","related_words":["Tokyo","Japan","capital","Honshu"]}"#,
        )
        .await;
        let answer = lm_at(addr)
            .answer_directly("What is the capital of Japan?")
            .await
            .unwrap();
        assert_eq!(answer.message, "Tokyo.");
        assert_eq!(answer.related_words.len(), 4);
    }

    #[tokio::test]
    async fn backend_error_surfaces_as_llm_error() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (StatusCode::UNAUTHORIZED, "bad key") }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let err = lm_at(addr).rewrite_query("anything").await.unwrap_err();
        assert!(matches!(err, Error::Llm(_)), "got {err:?}");
    }
}
