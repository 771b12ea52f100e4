//! CSV tables read and written by the sync and resolution tools.
//!
//! Every report is written with its header even when empty, so a later
//! `resolve-ambiguous` run can always read it back.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::models::{ExportRow, ExternalRecord, MatchCandidate};

pub const MATCHED_CSV: &str = "matched.csv";
pub const AMBIGUOUS_CSV: &str = "ambiguous.csv";
pub const AUDIBLE_ONLY_CSV: &str = "audible_only.csv";
pub const SUMMARY_TXT: &str = "summary.txt";

/// Separator between serialized candidates.
const CANDIDATE_SEPARATOR: &str = "; ";

/// A row type with a fixed column order.
pub trait ReportRow: Serialize {
    const HEADER: &'static [&'static str];
}

// ============================================================================
// Row Types
// ============================================================================

/// A purchase linked to a Calibre book.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedRow {
    pub asin: String,
    pub audible_title: String,
    pub audible_authors: String,
    pub calibre_id: i64,
    pub calibre_title: String,
    pub calibre_authors: String,
    pub calibre_audible_asin: String,
    pub score: u8,
    pub method: String,
}

impl ReportRow for MatchedRow {
    const HEADER: &'static [&'static str] = &[
        "asin",
        "audible_title",
        "audible_authors",
        "calibre_id",
        "calibre_title",
        "calibre_authors",
        "calibre_audible_asin",
        "score",
        "method",
    ];
}

/// A purchase waiting for a human decision.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmbiguousEntry {
    #[serde(default)]
    pub asin: String,
    #[serde(default)]
    pub audible_title: String,
    #[serde(default)]
    pub audible_authors: String,
    /// Blank or garbage in a hand-edited report reads as `None`.
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub top_score: Option<u8>,
    #[serde(default)]
    pub candidates: String,
}

impl ReportRow for AmbiguousEntry {
    const HEADER: &'static [&'static str] =
        &["asin", "audible_title", "audible_authors", "top_score", "candidates"];
}

impl AmbiguousEntry {
    /// Score recorded for a resolution of this entry.
    pub fn score(&self) -> u8 {
        self.top_score.unwrap_or(0)
    }
}

/// A purchase with no Calibre counterpart.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudibleOnlyRow {
    pub asin: String,
    pub audible_title: String,
    pub audible_authors: String,
    pub method: String,
}

impl ReportRow for AudibleOnlyRow {
    const HEADER: &'static [&'static str] = &["asin", "audible_title", "audible_authors", "method"];
}

/// Editable decision row: fill exactly one of `calibre_id`, `calibre_title`,
/// `audible_only` and feed the file to `batch-resolve`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingRow {
    pub asin: String,
    pub audible_title: String,
    pub audible_authors: String,
    pub calibre_id: String,
    pub calibre_title: String,
    pub audible_only: String,
    pub top_score: String,
    pub candidates: String,
}

impl ReportRow for MappingRow {
    const HEADER: &'static [&'static str] = &[
        "asin",
        "audible_title",
        "audible_authors",
        "calibre_id",
        "calibre_title",
        "audible_only",
        "top_score",
        "candidates",
    ];
}

impl MappingRow {
    /// Blank template row for an ambiguous entry.
    pub fn template(entry: &AmbiguousEntry) -> Self {
        Self {
            asin: entry.asin.trim().to_string(),
            audible_title: entry.audible_title.trim().to_string(),
            audible_authors: entry.audible_authors.trim().to_string(),
            top_score: entry.top_score.map(|s| s.to_string()).unwrap_or_default(),
            candidates: entry.candidates.trim().to_string(),
            ..Default::default()
        }
    }
}

// ============================================================================
// Candidate Serialization
// ============================================================================

/// `"<id>:<score>:<title>"` per candidate, joined by `"; "`.
pub fn format_candidates(candidates: &[MatchCandidate<'_>]) -> String {
    candidates
        .iter()
        .map(|c| format!("{}:{}:{}", c.record.id, c.score, c.record.title))
        .collect::<Vec<_>>()
        .join(CANDIDATE_SEPARATOR)
}

/// A candidate read back from a report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidateRef {
    pub book_id: i64,
    pub score: u8,
    pub title: String,
}

/// Inverse of [`format_candidates`]. A part that does not start with
/// `<id>:<score>:` belongs to the previous title, which contained the
/// separator itself. Leading parts with nothing to attach to are dropped.
pub fn parse_candidates(text: &str) -> Vec<CandidateRef> {
    let mut parsed: Vec<CandidateRef> = Vec::new();
    for part in text.split(CANDIDATE_SEPARATOR) {
        match parse_candidate(part) {
            Some(candidate) => parsed.push(candidate),
            None => {
                if let Some(last) = parsed.last_mut() {
                    last.title.push_str(CANDIDATE_SEPARATOR);
                    last.title.push_str(part);
                }
            }
        }
    }
    parsed
}

fn parse_candidate(part: &str) -> Option<CandidateRef> {
    let mut pieces = part.trim().splitn(3, ':');
    let book_id = pieces.next()?.trim().parse().ok()?;
    let score = pieces.next()?.trim().parse().ok()?;
    let title = pieces.next()?.to_string();
    Some(CandidateRef {
        book_id,
        score,
        title,
    })
}

// ============================================================================
// CSV Input / Output
// ============================================================================

/// Read every row of a CSV file with headers.
pub fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

/// Load the Audible export, converting each row at the boundary.
pub fn load_export(path: &Path) -> Result<Vec<ExternalRecord>> {
    let rows: Vec<ExportRow> = read_rows(path)?;
    Ok(rows.into_iter().map(ExternalRecord::from).collect())
}

/// Write a report with its header, even when `rows` is empty.
pub fn write_rows<R: ReportRow>(path: &Path, rows: &[R]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    writer.write_record(R::HEADER)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

// ============================================================================
// Run Summary
// ============================================================================

/// Counts and settings of one sync run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub timestamp: String,
    pub audible_rows: usize,
    pub matched: usize,
    pub ambiguous: usize,
    pub audible_only: usize,
    pub dry_run: bool,
    pub create_placeholders: bool,
    pub match_threshold: u8,
    pub review_threshold: u8,
    pub calibre_library: String,
    pub audible_csv: String,
}

impl RunSummary {
    /// Log the summary in JSON format
    pub fn log(&self) {
        if let Ok(json) = serde_json::to_string_pretty(self) {
            log::info!("[SUMMARY]\n{}", json);
        }
    }

    pub fn to_text(&self) -> String {
        format!(
            "Timestamp: {}\n\
             Audible rows: {}\n\
             Matched: {}\n\
             Ambiguous: {}\n\
             Audible only: {}\n\
             Dry run: {}\n\
             Create placeholders: {}\n\
             Match threshold: {}\n\
             Review threshold: {}\n\
             Calibre library: {}\n\
             Audible CSV: {}\n",
            self.timestamp,
            self.audible_rows,
            self.matched,
            self.ambiguous,
            self.audible_only,
            self.dry_run,
            self.create_placeholders,
            self.match_threshold,
            self.review_threshold,
            self.calibre_library,
            self.audible_csv,
        )
    }

    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_text())?;
        Ok(())
    }
}

/// Everything a sync run reports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncReport {
    pub matched: Vec<MatchedRow>,
    pub ambiguous: Vec<AmbiguousEntry>,
    pub audible_only: Vec<AudibleOnlyRow>,
    pub summary: RunSummary,
}

impl SyncReport {
    /// Write the three tables and the summary into `dir`, creating it.
    pub fn write_to_dir(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        write_rows(&dir.join(MATCHED_CSV), &self.matched)?;
        write_rows(&dir.join(AMBIGUOUS_CSV), &self.ambiguous)?;
        write_rows(&dir.join(AUDIBLE_ONLY_CSV), &self.audible_only)?;
        self.summary.write_to_file(&dir.join(SUMMARY_TXT))?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
