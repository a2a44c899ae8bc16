//! The question-answering pipeline: load a stored question, drive it
//! through its mode's external-service sequence, and persist the outcome
//! with exactly one terminal status write.
//!
//! Clients are injected at construction (no process-wide singletons), so
//! tests substitute fakes at the [`SearchBackend`] / [`PageFetcher`] /
//! [`LanguageModel`] seams.

pub mod synthesize;
pub mod worker;

use askpipe_core::{
    AnswerPayload, Error, LanguageModel, Mode, PageFetcher, Question, Result, SearchBackend,
    SearchQuery, Status,
};
use askpipe_store::Store;
use std::sync::Arc;

pub use synthesize::{synthesize, FinalAnswer};
pub use worker::{JobQueue, QueueClosed};

pub struct Pipeline {
    store: Arc<Store>,
    search: Arc<dyn SearchBackend>,
    fetcher: Arc<dyn PageFetcher>,
    lm: Arc<dyn LanguageModel>,
}

impl Pipeline {
    pub fn new(
        store: Arc<Store>,
        search: Arc<dyn SearchBackend>,
        fetcher: Arc<dyn PageFetcher>,
        lm: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            store,
            search,
            fetcher,
            lm,
        }
    }

    /// Process one question to a terminal state.
    ///
    /// Handler errors never escape: they are logged with the question id
    /// and converted into a `FAILURE` write. The only `Err` returns are a
    /// missing question (nothing to flip) and a persistence layer that
    /// refuses the failure write itself.
    pub async fn run(&self, question_id: &str) -> Result<Status> {
        let question = match self.store.find_question(question_id).await {
            Ok(Some(q)) => q,
            Ok(None) => {
                tracing::error!(question_id, "question not found");
                return Err(Error::QuestionNotFound(question_id.to_string()));
            }
            Err(e) => {
                // Undecodable row (e.g. corrupt stored mode): the question
                // exists but cannot be dispatched.
                tracing::error!(question_id, error = %e, "question row unusable");
                self.store.mark_failure(question_id).await?;
                return Ok(Status::Failure);
            }
        };

        if question.status.is_terminal() {
            tracing::warn!(question_id, status = %question.status, "already terminal, skipping");
            return Ok(question.status);
        }

        match self.handle(&question).await {
            Ok(payload) => match self.store.save_answer(&question, &payload).await {
                Ok(()) => {
                    tracing::info!(question_id, "answer persisted");
                    Ok(Status::Success)
                }
                Err(e) => {
                    tracing::error!(question_id, error = %e, "answer write failed");
                    self.store.mark_failure(question_id).await?;
                    Ok(Status::Failure)
                }
            },
            Err(e) => {
                tracing::error!(question_id, mode = %question.mode, error = %e, "pipeline failed");
                self.store.mark_failure(question_id).await?;
                Ok(Status::Failure)
            }
        }
    }

    async fn handle(&self, question: &Question) -> Result<AnswerPayload> {
        match question.mode {
            Mode::DirectKnowledge => self.handle_direct(question).await,
            Mode::SearchAugmented => self.handle_search(question).await,
        }
    }

    async fn handle_direct(&self, question: &Question) -> Result<AnswerPayload> {
        let answer = self.lm.answer_directly(&question.message).await?;
        Ok(AnswerPayload::Direct {
            message: answer.message,
            related_terms: answer.related_words,
        })
    }

    async fn handle_search(&self, question: &Question) -> Result<AnswerPayload> {
        let query = self.lm.rewrite_query(&question.message).await?;
        let results = self.search.search(&SearchQuery::new(query.clone())).await?;
        if results.is_empty() {
            return Err(Error::SearchUnavailable(
                "no results from any backend".to_string(),
            ));
        }
        let ranked = self.lm.rank_results(&query, &results).await?;
        let answer = synthesize(
            self.fetcher.as_ref(),
            self.lm.as_ref(),
            &question.message,
            &ranked,
        )
        .await?;
        Ok(AnswerPayload::Search {
            message: answer.message,
            references: answer.references,
        })
    }
}
