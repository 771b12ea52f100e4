//! Match decision for a single Audible row.
//!
//! Precedence, first hit wins:
//! 1. ASIN already recorded on a Calibre book
//! 2. Unique book with the same normalized title and an overlapping author token
//! 3. Fuzzy token similarity against every book, classified by threshold and margin

use crate::config::Thresholds;
use crate::models::{CatalogSnapshot, ExternalRecord, MatchCandidate, MatchMethod, MatchResult};
use crate::normalize::{normalize_text, tokenize};
use crate::scoring::{token_overlap, token_similarity};

/// Score reported for an ASIN hit.
pub const ASIN_SCORE: u8 = 100;

/// Score reported for a unique exact title + author hit.
pub const EXACT_TITLE_AUTHOR_SCORE: u8 = 95;

/// Minimum lead over the runner-up for a fuzzy auto-match.
pub const MIN_MARGIN: i16 = 3;

/// Candidates kept for human review.
pub const MAX_REVIEW_CANDIDATES: usize = 5;

/// Classify one Audible row. Never fails: every row gets exactly one result.
pub fn find_match<'a>(
    external: &ExternalRecord,
    catalog: &'a CatalogSnapshot,
    thresholds: Thresholds,
) -> MatchResult<'a> {
    if !external.asin.is_empty() {
        if let Some(record) = catalog.by_asin(&external.asin) {
            return MatchResult::linked(MatchMethod::AsinExact, record, ASIN_SCORE);
        }
    }

    let author_tokens = external.author_tokens();
    let normalized_title = normalize_text(&external.title);

    // Several books sharing title and author fall through to fuzzy scoring.
    let mut exact = catalog.records().iter().filter(|record| {
        record.normalized_title == normalized_title
            && token_overlap(&record.author_tokens, &author_tokens)
    });
    if let (Some(record), None) = (exact.next(), exact.next()) {
        return MatchResult::linked(MatchMethod::ExactTitleAuthor, record, EXACT_TITLE_AUTHOR_SCORE);
    }

    let mut external_tokens = tokenize(&external.title);
    external_tokens.extend(author_tokens);

    let mut scored: Vec<MatchCandidate<'a>> = catalog
        .records()
        .iter()
        .map(|record| MatchCandidate {
            record,
            score: token_similarity(&external_tokens, &record.combined_tokens),
        })
        .collect();
    // Stable: equal scores keep library order.
    scored.sort_by(|a, b| b.score.cmp(&a.score));

    classify(scored, thresholds)
}

/// Turn a best-first candidate list into a decision.
fn classify(mut scored: Vec<MatchCandidate<'_>>, thresholds: Thresholds) -> MatchResult<'_> {
    let Some(top) = scored.first().copied() else {
        return MatchResult::unmatched(0);
    };
    let second = scored.get(1).map_or(-1, |c| i16::from(c.score));
    let margin = i16::from(top.score) - second;

    if top.score >= thresholds.match_threshold() && margin >= MIN_MARGIN {
        return MatchResult::linked(MatchMethod::FuzzyAuto, top.record, top.score);
    }

    if top.score >= thresholds.review_threshold() && top.score < thresholds.match_threshold() {
        scored.truncate(MAX_REVIEW_CANDIDATES);
        return MatchResult::ambiguous(top.score, scored);
    }

    MatchResult::unmatched(top.score)
}
