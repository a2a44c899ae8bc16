use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("search unavailable: {0}")]
    SearchUnavailable(String),
    #[error("malformed model output: {0}")]
    MalformedModelOutput(String),
    #[error("no usable evidence for synthesis")]
    EmptyEvidence,
    #[error("question not found: {0}")]
    QuestionNotFound(String),
    #[error("persistence failed: {0}")]
    Persistence(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("llm failed: {0}")]
    Llm(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Processing strategy selected per question.
///
/// This is a closed set: dispatch matches exhaustively and there is no
/// "unknown mode" runtime branch. An unparsable stored value fails at
/// row-decode time instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// The model answers from internal knowledge and suggests related terms.
    DirectKnowledge,
    /// Web search + per-page summarization with cited references.
    SearchAugmented,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::DirectKnowledge => "direct-knowledge",
            Mode::SearchAugmented => "search-augmented",
        }
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "direct-knowledge" => Ok(Mode::DirectKnowledge),
            "search-augmented" => Ok(Mode::SearchAugmented),
            other => Err(Error::Persistence(format!("unknown question mode: {other:?}"))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Question lifecycle status. Monotonic: PENDING -> {SUCCESS, FAILURE},
/// written exactly once by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Pending,
    Success,
    Failure,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "PENDING",
            Status::Success => "SUCCESS",
            Status::Failure => "FAILURE",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::Pending)
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "PENDING" => Ok(Status::Pending),
            "SUCCESS" => Ok(Status::Success),
            "FAILURE" => Ok(Status::Failure),
            other => Err(Error::Persistence(format!(
                "unknown question status: {other:?}"
            ))),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub message: String,
    pub user_id: String,
    pub mode: Mode,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    pub max_results: Option<usize>,
    pub timeout_ms: Option<u64>,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            max_results: None,
            timeout_ms: None,
        }
    }
}

/// One normalized search hit, backend-native relevance order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// A search result after LLM re-ranking and truncation to top-K.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Direct-knowledge answer as produced by the language model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectAnswer {
    pub message: String,
    pub related_words: Vec<String>,
}

/// A cited source attached to a search-augmented answer, ranking order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub title: String,
    pub url: String,
}

/// What a mode handler hands to persistence. The variant is mode-shaped:
/// an answer carries related terms xor references, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnswerPayload {
    Direct {
        message: String,
        related_terms: Vec<String>,
    },
    Search {
        message: String,
        references: Vec<Reference>,
    },
}

impl AnswerPayload {
    pub fn message(&self) -> &str {
        match self {
            AnswerPayload::Direct { message, .. } => message,
            AnswerPayload::Search { message, .. } => message,
        }
    }

    /// The mode this payload is shaped for.
    pub fn mode(&self) -> Mode {
        match self {
            AnswerPayload::Direct { .. } => Mode::DirectKnowledge,
            AnswerPayload::Search { .. } => Mode::SearchAugmented,
        }
    }
}

#[async_trait::async_trait]
pub trait SearchBackend: Send + Sync {
    fn name(&self) -> &'static str;
    async fn search(&self, q: &SearchQuery) -> Result<Vec<SearchResult>>;
}

#[async_trait::async_trait]
pub trait PageFetcher: Send + Sync {
    /// Retrieve and extract readable text from a URL.
    ///
    /// Fetch failures are non-fatal by contract: implementations return an
    /// empty string for unreachable/non-2xx/unparsable pages instead of an
    /// error, so a single dead page cannot abort a whole run.
    async fn fetch_text(&self, url: &str) -> Result<String>;
}

#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    /// Produce a concise search-engine query from free-form question text.
    async fn rewrite_query(&self, question: &str) -> Result<String>;

    /// Re-rank results by relevance to `query`; returns at most the top 3.
    async fn rank_results(
        &self,
        query: &str,
        results: &[SearchResult],
    ) -> Result<Vec<RankedResult>>;

    /// Summarize one page's extracted text against the question.
    async fn summarize_page(&self, page_text: &str, question: &str) -> Result<String>;

    /// Answer from internal knowledge with related terms.
    async fn answer_directly(&self, question: &str) -> Result<DirectAnswer>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_round_trips_through_str() {
        for m in [Mode::DirectKnowledge, Mode::SearchAugmented] {
            assert_eq!(m.as_str().parse::<Mode>().unwrap(), m);
        }
    }

    #[test]
    fn unknown_mode_is_a_persistence_error() {
        let err = "latest".parse::<Mode>().unwrap_err();
        assert!(matches!(err, Error::Persistence(_)), "got {err:?}");
    }

    #[test]
    fn status_round_trips_and_terminality() {
        for s in [Status::Pending, Status::Success, Status::Failure] {
            assert_eq!(s.as_str().parse::<Status>().unwrap(), s);
        }
        assert!(!Status::Pending.is_terminal());
        assert!(Status::Success.is_terminal());
        assert!(Status::Failure.is_terminal());
    }

    #[test]
    fn payload_mode_matches_variant() {
        let direct = AnswerPayload::Direct {
            message: "Tokyo.".to_string(),
            related_terms: vec!["Japan".to_string()],
        };
        assert_eq!(direct.mode(), Mode::DirectKnowledge);
        assert_eq!(direct.message(), "Tokyo.");

        let search = AnswerPayload::Search {
            message: "summary".to_string(),
            references: vec![Reference {
                title: "Example".to_string(),
                url: "https://example.com".to_string(),
            }],
        };
        assert_eq!(search.mode(), Mode::SearchAugmented);
    }
}
