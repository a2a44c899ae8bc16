//! Result synthesis for search-augmented answers: fetch each ranked page,
//! summarize the readable ones against the question, then condense the
//! per-page summaries into one final answer with references in rank order.

use askpipe_core::{Error, LanguageModel, PageFetcher, RankedResult, Reference, Result};

#[derive(Debug, Clone)]
pub struct FinalAnswer {
    pub message: String,
    pub references: Vec<Reference>,
}

/// Ranked entries whose fetch comes back empty are skipped without a
/// summary attempt and without their reference. Zero usable pages is
/// [`Error::EmptyEvidence`]: summarizing an empty evidence string would
/// invite a fabricated answer.
pub async fn synthesize(
    fetcher: &dyn PageFetcher,
    lm: &dyn LanguageModel,
    question: &str,
    ranked: &[RankedResult],
) -> Result<FinalAnswer> {
    let mut page_summaries: Vec<(Reference, String)> = Vec::new();
    for entry in ranked {
        let text = fetcher.fetch_text(&entry.url).await?;
        if text.trim().is_empty() {
            tracing::warn!(url = %entry.url, "no readable content, skipping ranked entry");
            continue;
        }
        let summary = lm.summarize_page(&text, question).await?;
        page_summaries.push((
            Reference {
                title: entry.title.clone(),
                url: entry.url.clone(),
            },
            summary,
        ));
    }

    if page_summaries.is_empty() {
        return Err(Error::EmptyEvidence);
    }

    let combined = page_summaries
        .iter()
        .map(|(_, s)| s.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let message = lm.summarize_page(&combined, question).await?;
    let references = page_summaries.into_iter().map(|(r, _)| r).collect();

    Ok(FinalAnswer {
        message,
        references,
    })
}
