//! Grounded prompt construction and citation extraction.
//!
//! Evidence is labelled with `[source_id]` tags and the model is told to
//! cite with those tags. Citations are read back from the answer and split
//! into tags naming a retrieved source and tags that name nothing retrieved.

use std::collections::{BTreeSet, HashSet};

use papertrail_core::models::SearchHit;

/// Answer returned when retrieval finds nothing. The generator is not called.
pub const NO_EVIDENCE_ANSWER: &str =
    "No supporting evidence found in the indexed corpus for this question.";

const MAX_TAG_CHARS: usize = 256;

pub fn build_prompt(query: &str, hits: &[SearchHit]) -> String {
    let mut context = String::new();
    for hit in hits {
        if !context.is_empty() {
            context.push_str("\n\n");
        }
        context.push_str(&format!(
            "[{}] {}\n{}",
            hit.chunk.source_id,
            hit.chunk.provenance.title,
            hit.chunk.text.trim()
        ));
    }

    format!(
        "You are a research assistant answering questions about academic literature.\n\
         \n\
         Answer the question using only the passages under Context.\n\
         Each passage starts with its source id in square brackets.\n\
         Cite the source id in square brackets after every claim it supports, e.g. [{example}].\n\
         Cite only source ids that appear under Context.\n\
         If the passages do not answer the question, say so plainly.\n\
         \n\
         Context:\n\
         {context}\n\
         \n\
         Question:\n\
         {query}\n\
         \n\
         Answer:",
        example = hits
            .first()
            .map(|h| h.chunk.source_id.as_str())
            .unwrap_or("source_id"),
        context = context,
        query = query.trim(),
    )
}

/// Every tag id `answer` declares, whether or not it was retrieved.
///
/// Accepts single tags (`[a]`) and lists separated by commas or
/// semicolons (`[a, b; c]`). Bracketed prose (anything containing
/// whitespace) is not a tag.
pub fn declared_citations(answer: &str) -> BTreeSet<String> {
    let mut declared = BTreeSet::new();

    let mut rest = answer;
    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        let Some(close) = after.find(']') else {
            break;
        };
        let inner = &after[..close];
        // A nested '[' means the outer bracket was not a tag; resume at the inner one.
        if let Some(nested) = inner.rfind('[') {
            rest = &after[nested..];
            continue;
        }
        if inner.chars().count() <= MAX_TAG_CHARS {
            for id in inner.split([',', ';']).map(str::trim) {
                if !id.is_empty() && !id.contains(char::is_whitespace) {
                    declared.insert(id.to_string());
                }
            }
        }
        rest = &after[close + 1..];
    }
    declared
}

/// Source ids cited in `answer` that name one of the retrieved sources.
pub fn extract_citations(answer: &str, hits: &[SearchHit]) -> BTreeSet<String> {
    let known = retrieved_ids(hits);
    declared_citations(answer)
        .into_iter()
        .filter(|id| known.contains(id.as_str()))
        .collect()
}

/// Tag ids in `answer` that name no retrieved source.
pub fn unverified_citations(answer: &str, hits: &[SearchHit]) -> BTreeSet<String> {
    let known = retrieved_ids(hits);
    declared_citations(answer)
        .into_iter()
        .filter(|id| !known.contains(id.as_str()))
        .collect()
}

fn retrieved_ids(hits: &[SearchHit]) -> HashSet<&str> {
    hits.iter().map(|h| h.chunk.source_id.as_str()).collect()
}
