//! Core data models for Audible → Calibre matching.
//!
//! Loosely-typed rows (`CatalogRow` from calibredb JSON, `ExportRow` from the
//! Audible CSV) are converted here into the validated records the matcher and
//! the resolution workflow operate on.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::fmt;

use crate::error::InputFormatError;
use crate::normalize::{normalize_text, split_authors, tokenize, tokenize_authors};

// ============================================================================
// Calibre Models
// ============================================================================

/// Raw book row from `calibredb list --for-machine`.
/// Custom columns come back as `*audible_asin` unless already resolved.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CatalogRow {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub authors: Option<String>,
    #[serde(default)]
    pub formats: Option<Vec<String>>,
    #[serde(default, alias = "*audible_asin")]
    pub audible_asin: Option<String>,
    #[serde(default, alias = "*format_status")]
    pub format_status: Option<String>,
}

/// Calibre book with precomputed match keys.
#[derive(Clone, Debug)]
pub struct CatalogRecord {
    pub id: i64,
    pub title: String,
    pub authors: String,
    pub formats: Vec<String>,
    pub audible_asin: Option<String>,
    pub format_status: Option<String>,
    pub normalized_title: String,
    pub author_tokens: Vec<String>,
    pub combined_tokens: Vec<String>, // title tokens followed by author tokens
}

impl From<CatalogRow> for CatalogRecord {
    fn from(row: CatalogRow) -> Self {
        let title = row.title.unwrap_or_default();
        let authors = row.authors.unwrap_or_default();
        let author_tokens = tokenize_authors(&split_authors(&authors));
        let mut combined_tokens = tokenize(&title);
        combined_tokens.extend(author_tokens.iter().cloned());

        Self {
            id: row.id,
            normalized_title: normalize_text(&title),
            title,
            authors,
            formats: row.formats.unwrap_or_default(),
            audible_asin: non_empty(row.audible_asin),
            format_status: non_empty(row.format_status),
            author_tokens,
            combined_tokens,
        }
    }
}

/// Immutable view of the whole library for one run, indexed by ASIN.
#[derive(Clone, Debug, Default)]
pub struct CatalogSnapshot {
    records: Vec<CatalogRecord>,
    by_asin: FxHashMap<String, usize>,
}

impl CatalogSnapshot {
    pub fn from_rows(rows: Vec<CatalogRow>) -> Self {
        Self::from_records(rows.into_iter().map(CatalogRecord::from).collect())
    }

    pub fn from_records(records: Vec<CatalogRecord>) -> Self {
        let mut by_asin = FxHashMap::default();
        for (idx, record) in records.iter().enumerate() {
            if let Some(asin) = &record.audible_asin {
                by_asin.insert(asin.clone(), idx);
            }
        }
        Self { records, by_asin }
    }

    /// Records in library order. Fuzzy ties keep this order.
    pub fn records(&self) -> &[CatalogRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn by_asin(&self, asin: &str) -> Option<&CatalogRecord> {
        self.by_asin.get(asin).map(|&idx| &self.records[idx])
    }

    pub fn contains_asin(&self, asin: &str) -> bool {
        self.by_asin.contains_key(asin)
    }

    pub fn by_id(&self, id: i64) -> Option<&CatalogRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Case-insensitive exact title lookup (no punctuation folding).
    pub fn by_title(&self, title: &str) -> Vec<&CatalogRecord> {
        let wanted = title.trim().to_lowercase();
        self.records
            .iter()
            .filter(|r| r.title.trim().to_lowercase() == wanted)
            .collect()
    }
}

/// Calibre `format_status` enum column values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatStatus {
    EbookOnly,
    AudibleOnly,
    Both,
    Unknown,
}

impl FormatStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FormatStatus::EbookOnly => "Ebook only",
            FormatStatus::AudibleOnly => "Audible only",
            FormatStatus::Both => "Both",
            FormatStatus::Unknown => "Unknown",
        }
    }

    /// Status for a book about to be linked to an Audible purchase.
    pub fn for_linked(record: &CatalogRecord) -> Self {
        if record.formats.is_empty() {
            FormatStatus::AudibleOnly
        } else {
            FormatStatus::Both
        }
    }

    /// True for statuses that mean the book is already tied to Audible.
    pub fn is_audible_linked(status: Option<&str>) -> bool {
        matches!(status, Some(s) if s == Self::Both.as_str() || s == Self::AudibleOnly.as_str())
    }
}

impl fmt::Display for FormatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Audible Models
// ============================================================================

/// Raw row from the Audible library export. Unknown columns are ignored,
/// missing ones read as empty.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExportRow {
    pub asin: String,
    pub title: String,
    pub authors: String,
    pub narrators: String,
    pub runtime_length_min: String,
    pub purchase_date: String,
    pub series_title: String,
    pub series_sequence: String,
    pub release_date: String,
}

/// One purchased title.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExternalRecord {
    pub asin: String,
    pub title: String,
    pub authors: String,
    pub narrators: Vec<String>,
    pub runtime_minutes: Option<u32>,
    pub purchase_date: Option<NaiveDate>,
    pub series_title: Option<String>,
    pub series_sequence: Option<String>,
    pub release_date: Option<NaiveDate>,
}

impl From<ExportRow> for ExternalRecord {
    fn from(row: ExportRow) -> Self {
        let asin = row.asin.trim().to_string();
        Self {
            runtime_minutes: absent_on_error(&asin, parse_minutes(&row.runtime_length_min)),
            purchase_date: absent_on_error(&asin, parse_iso_date(&row.purchase_date)),
            release_date: absent_on_error(&asin, parse_iso_date(&row.release_date)),
            narrators: split_authors(&row.narrators),
            series_title: non_empty(Some(row.series_title)),
            series_sequence: non_empty(Some(row.series_sequence)),
            title: row.title,
            authors: row.authors,
            asin,
        }
    }
}

impl ExternalRecord {
    /// Author tokens in credit order.
    pub fn author_tokens(&self) -> Vec<String> {
        tokenize_authors(&split_authors(&self.authors))
    }
}

// ============================================================================
// Literal Parsing
// ============================================================================

/// Runtime in whole minutes. Decimal strings truncate ("412.9" → 412).
/// Blank → `Ok(None)`; negative or non-numeric → error.
pub fn parse_minutes(value: &str) -> Result<Option<u32>, InputFormatError> {
    let stripped = value.trim();
    if stripped.is_empty() {
        return Ok(None);
    }
    let parsed: f64 = stripped
        .parse()
        .map_err(|_| InputFormatError::Number(stripped.to_string()))?;
    if !parsed.is_finite() || parsed < 0.0 || parsed > u32::MAX as f64 {
        return Err(InputFormatError::Number(stripped.to_string()));
    }
    Ok(Some(parsed.trunc() as u32))
}

/// Calendar date from `YYYY-MM-DD` or an ISO date-time (optionally with `Z`
/// or an offset). Date-times keep their own calendar day; no UTC shift.
pub fn parse_iso_date(value: &str) -> Result<Option<NaiveDate>, InputFormatError> {
    let stripped = value.trim();
    if stripped.is_empty() {
        return Ok(None);
    }
    let invalid = || InputFormatError::Date(stripped.to_string());

    if stripped.contains('T') {
        if let Ok(dt) = DateTime::parse_from_rfc3339(stripped) {
            return Ok(Some(dt.date_naive()));
        }
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
            if let Ok(dt) = NaiveDateTime::parse_from_str(stripped, format) {
                return Ok(Some(dt.date()));
            }
        }
        return Err(invalid());
    }

    NaiveDate::parse_from_str(stripped, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| invalid())
}

fn absent_on_error<T>(asin: &str, parsed: Result<Option<T>, InputFormatError>) -> Option<T> {
    parsed.unwrap_or_else(|e| {
        log::debug!("{}: {}, treating as absent", asin, e);
        None
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ============================================================================
// Match Models
// ============================================================================

/// How an Audible row was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMethod {
    AsinExact,
    ExactTitleAuthor,
    FuzzyAuto,
    Ambiguous,
    Unmatched,
}

impl MatchMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchMethod::AsinExact => "asin_exact",
            MatchMethod::ExactTitleAuthor => "exact_title_author",
            MatchMethod::FuzzyAuto => "fuzzy_auto",
            MatchMethod::Ambiguous => "ambiguous",
            MatchMethod::Unmatched => "unmatched",
        }
    }
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scored catalog record (score 0-100).
#[derive(Clone, Copy, Debug)]
pub struct MatchCandidate<'a> {
    pub record: &'a CatalogRecord,
    pub score: u8,
}

/// Classification of one Audible row against the catalog.
///
/// `record` is set only for `AsinExact`, `ExactTitleAuthor` and `FuzzyAuto`;
/// `candidates` (best first, at most five) only for `Ambiguous`.
#[derive(Clone, Debug)]
pub struct MatchResult<'a> {
    pub method: MatchMethod,
    pub record: Option<&'a CatalogRecord>,
    pub score: u8,
    pub candidates: Vec<MatchCandidate<'a>>,
}

impl<'a> MatchResult<'a> {
    pub fn linked(method: MatchMethod, record: &'a CatalogRecord, score: u8) -> Self {
        Self {
            method,
            record: Some(record),
            score,
            candidates: Vec::new(),
        }
    }

    pub fn ambiguous(score: u8, candidates: Vec<MatchCandidate<'a>>) -> Self {
        Self {
            method: MatchMethod::Ambiguous,
            record: None,
            score,
            candidates,
        }
    }

    pub fn unmatched(score: u8) -> Self {
        Self {
            method: MatchMethod::Unmatched,
            record: None,
            score,
            candidates: Vec::new(),
        }
    }
}

// ============================================================================
// Resolution Models
// ============================================================================

/// A human decision for one ambiguous ASIN.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolutionMapping {
    pub asin: String,
    pub decision: Decision,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Link to this Calibre book id.
    CatalogId(i64),
    /// Link to the single book with this title.
    CatalogTitle(String),
    /// Not in the library: create an Audible-only placeholder.
    AudibleOnly,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, title: &str, authors: &str) -> CatalogRow {
        CatalogRow {
            id,
            title: Some(title.to_string()),
            authors: Some(authors.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_catalog_record_keys() {
        let record = CatalogRecord::from(row(7, "The Hobbit", "J. R. R. Tolkien"));
        assert_eq!(record.normalized_title, "the hobbit");
        assert_eq!(record.author_tokens, vec!["j", "r", "r", "tolkien"]);
        assert_eq!(record.combined_tokens, vec!["the", "hobbit", "j", "r", "r", "tolkien"]);
        assert!(record.audible_asin.is_none());
    }

    #[test]
    fn test_catalog_row_from_calibredb_json() {
        let json = r#"[
            {"id": 3, "title": "Dune", "authors": "Frank Herbert", "formats": ["/lib/dune.epub"], "*audible_asin": "B002V1OF70", "*format_status": "Both"},
            {"id": 4, "title": "Emma", "authors": "Jane Austen", "*audible_asin": "  "},
            {"id": 5, "title": null, "authors": null}
        ]"#;
        let rows: Vec<CatalogRow> = serde_json::from_str(json).unwrap();
        let snapshot = CatalogSnapshot::from_rows(rows);
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.by_asin("B002V1OF70").map(|r| r.id), Some(3));
        assert_eq!(snapshot.by_id(3).unwrap().format_status.as_deref(), Some("Both"));
        assert!(snapshot.by_id(4).unwrap().audible_asin.is_none());
        assert_eq!(snapshot.by_id(5).unwrap().title, "");
    }

    #[test]
    fn test_snapshot_by_title() {
        let snapshot = CatalogSnapshot::from_rows(vec![
            row(1, "Dune", "Frank Herbert"),
            row(2, " dune ", "Brian Herbert"),
            row(3, "Dune Messiah", "Frank Herbert"),
        ]);
        let ids: Vec<i64> = snapshot.by_title("DUNE").iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(snapshot.by_title("Children of Dune").is_empty());
    }

    #[test]
    fn test_parse_minutes() {
        assert_eq!(parse_minutes("412"), Ok(Some(412)));
        assert_eq!(parse_minutes(" 412.9 "), Ok(Some(412)));
        assert_eq!(parse_minutes(""), Ok(None));
        assert!(parse_minutes("abc").is_err());
        assert!(parse_minutes("-5").is_err());
        assert!(parse_minutes("NaN").is_err());
    }

    #[test]
    fn test_parse_iso_date() {
        let d = |y, m, day| Some(NaiveDate::from_ymd_opt(y, m, day).unwrap());
        assert_eq!(parse_iso_date("2023-04-05"), Ok(d(2023, 4, 5)));
        assert_eq!(parse_iso_date("2023-04-05T23:10:00Z"), Ok(d(2023, 4, 5)));
        assert_eq!(parse_iso_date("2023-04-05T23:10:00.123+02:00"), Ok(d(2023, 4, 5)));
        assert_eq!(parse_iso_date("2023-04-05T08:15:30"), Ok(d(2023, 4, 5)));
        assert_eq!(parse_iso_date(""), Ok(None));
        assert!(parse_iso_date("05/04/2023").is_err());
        assert!(parse_iso_date("2023-02-30").is_err());
    }

    #[test]
    fn test_external_record_from_row() {
        let record = ExternalRecord::from(ExportRow {
            asin: " B001 ".to_string(),
            title: "The Hobbit".to_string(),
            authors: "J.R.R. Tolkien".to_string(),
            narrators: "Andy Serkis, Rob Inglis".to_string(),
            runtime_length_min: "not a number".to_string(),
            purchase_date: "2021-11-02T10:00:00Z".to_string(),
            series_title: "  ".to_string(),
            series_sequence: "1".to_string(),
            release_date: "garbage".to_string(),
        });
        assert_eq!(record.asin, "B001");
        assert_eq!(record.narrators, vec!["Andy Serkis", "Rob Inglis"]);
        assert_eq!(record.runtime_minutes, None);
        assert_eq!(record.purchase_date, NaiveDate::from_ymd_opt(2021, 11, 2));
        assert_eq!(record.series_title, None);
        assert_eq!(record.series_sequence.as_deref(), Some("1"));
        assert_eq!(record.release_date, None);
        assert_eq!(record.author_tokens(), vec!["j", "r", "r", "tolkien"]);
    }

    #[test]
    fn test_format_status() {
        let mut record = CatalogRecord::from(row(1, "Dune", "Frank Herbert"));
        assert_eq!(FormatStatus::for_linked(&record), FormatStatus::AudibleOnly);
        record.formats.push("/lib/dune.epub".to_string());
        assert_eq!(FormatStatus::for_linked(&record), FormatStatus::Both);
        assert!(FormatStatus::is_audible_linked(Some("Both")));
        assert!(FormatStatus::is_audible_linked(Some("Audible only")));
        assert!(!FormatStatus::is_audible_linked(Some("Ebook only")));
        assert!(!FormatStatus::is_audible_linked(None));
    }
}
