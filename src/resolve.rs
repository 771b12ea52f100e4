//! Human adjudication of ambiguous matches.
//!
//! Entries come from a previous run's `ambiguous.csv`. A decision names a
//! Calibre book (by id or unique title) or marks the purchase as Audible-only.
//! Decisions go through the same payload builder and [`CatalogWriter`] the
//! sync uses, so simulate mode behaves identically here.

use rustc_hash::FxHashMap;
use std::fmt;
use std::path::Path;

use crate::catalog::{Catalog, CatalogWriter};
use crate::config::parse_bool;
use crate::error::{LookupError, Result, SyncError};
use crate::fields::{build_metadata_fields, FieldNames};
use crate::models::{
    CatalogRecord, CatalogSnapshot, Decision, ExternalRecord, FormatStatus, ResolutionMapping,
};
use crate::report::{self, parse_candidates, AmbiguousEntry, CandidateRef, MappingRow};
use crate::safety::validate_output_path;

/// Default file name for `export-mapping`.
pub const DEFAULT_MAPPING_FILE: &str = "mapping_template.csv";

/// Word every mapping file name must contain.
pub const MAPPING_NAME_PATTERN: &str = "mapping";

// ============================================================================
// Ambiguous Set
// ============================================================================

/// Pending decisions from `ambiguous.csv`, indexed by ASIN.
#[derive(Clone, Debug, Default)]
pub struct AmbiguousSet {
    entries: Vec<AmbiguousEntry>,
    by_asin: FxHashMap<String, usize>,
}

impl AmbiguousSet {
    /// A repeated ASIN resolves to its last row.
    pub fn new(entries: Vec<AmbiguousEntry>) -> Self {
        let by_asin = entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| (entry.asin.trim().to_string(), idx))
            .collect();
        Self { entries, by_asin }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let entries: Vec<AmbiguousEntry> = report::read_rows(path)?;
        log::info!("Loaded {} ambiguous entries from {}", entries.len(), path.display());
        Ok(Self::new(entries))
    }

    pub fn get(&self, asin: &str) -> Option<&AmbiguousEntry> {
        self.by_asin.get(asin.trim()).map(|&idx| &self.entries[idx])
    }

    /// Entries in report order.
    pub fn entries(&self) -> &[AmbiguousEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// List
// ============================================================================

/// One entry as shown by `list`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListedEntry {
    pub asin: String,
    pub top_score: Option<u8>,
    pub title: String,
    pub authors: String,
    pub candidates: Vec<CandidateRef>,
}

impl fmt::Display for ListedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let score = self.top_score.map(|s| s.to_string()).unwrap_or_default();
        write!(f, "{} | {} | {} | {}", self.asin, score, self.title, self.authors)?;
        for candidate in &self.candidates {
            write!(
                f,
                "\n  - id {} (score {}): {}",
                candidate.book_id, candidate.score, candidate.title
            )?;
        }
        Ok(())
    }
}

/// First `limit` entries (all when `None`), without side effects.
pub fn list(set: &AmbiguousSet, limit: Option<usize>) -> Vec<ListedEntry> {
    let limit = limit.unwrap_or(set.len());
    set.entries()
        .iter()
        .take(limit)
        .map(|entry| ListedEntry {
            asin: entry.asin.trim().to_string(),
            top_score: entry.top_score,
            title: entry.audible_title.trim().to_string(),
            authors: entry.audible_authors.trim().to_string(),
            candidates: parse_candidates(entry.candidates.trim()),
        })
        .collect()
}

// ============================================================================
// Export Mapping
// ============================================================================

/// One editable template row per entry that has an ASIN.
pub fn export_mapping(set: &AmbiguousSet) -> Vec<MappingRow> {
    set.entries()
        .iter()
        .filter(|entry| !entry.asin.trim().is_empty())
        .map(MappingRow::template)
        .collect()
}

/// Write the template for `ambiguous_csv` to `output`. Returns the row count.
pub fn export_mapping_file(ambiguous_csv: &Path, output: &Path) -> Result<usize> {
    validate_output_path(output, MAPPING_NAME_PATTERN, &[ambiguous_csv])?;
    let rows = export_mapping(&AmbiguousSet::load(ambiguous_csv)?);
    report::write_rows(output, &rows)?;
    log::info!("Wrote mapping template with {} rows: {}", rows.len(), output.display());
    Ok(rows.len())
}

// ============================================================================
// Decisions
// ============================================================================

impl TryFrom<&MappingRow> for ResolutionMapping {
    type Error = LookupError;

    /// Audible-only flag wins over a catalog id, which wins over a title.
    fn try_from(row: &MappingRow) -> std::result::Result<Self, Self::Error> {
        let asin = row.asin.trim();
        if asin.is_empty() {
            return Err(LookupError::MissingAsin);
        }

        let flag = row.audible_only.trim();
        let audible_only = if flag.is_empty() {
            false
        } else {
            parse_bool(flag).map_err(|_| LookupError::InvalidFlag(flag.to_string()))?
        };

        let calibre_id = row.calibre_id.trim();
        let calibre_title = row.calibre_title.trim();
        let decision = if audible_only {
            Decision::AudibleOnly
        } else if !calibre_id.is_empty() {
            let id = calibre_id
                .parse()
                .map_err(|_| LookupError::InvalidRecordId(calibre_id.to_string()))?;
            Decision::CatalogId(id)
        } else if !calibre_title.is_empty() {
            Decision::CatalogTitle(calibre_title.to_string())
        } else {
            return Err(LookupError::MissingDecision);
        };

        Ok(ResolutionMapping {
            asin: asin.to_string(),
            decision,
        })
    }
}

/// What a decision did to the library.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Metadata written to an existing book.
    Linked { record_id: i64 },
    /// Placeholder created; no id in simulate mode.
    PlaceholderCreated { record_id: Option<i64> },
    /// A book already carries the ASIN; nothing written.
    AlreadyPresent { record_id: i64 },
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Linked { record_id } => write!(f, "linked to Calibre id {}", record_id),
            Resolution::PlaceholderCreated { record_id: Some(id) } => {
                write!(f, "created placeholder id {}", id)
            }
            Resolution::PlaceholderCreated { record_id: None } => {
                f.write_str("would create a placeholder (dry run)")
            }
            Resolution::AlreadyPresent { record_id } => {
                write!(f, "already present in Calibre (id {})", record_id)
            }
        }
    }
}

/// Per-row result of a batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOutcome {
    Resolved { asin: String, resolution: Resolution },
    Skipped { asin: String, reason: String },
}

impl BatchOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, BatchOutcome::Skipped { .. })
    }
}

impl fmt::Display for BatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchOutcome::Resolved { asin, resolution } => write!(f, "{}: {}", asin, resolution),
            BatchOutcome::Skipped { asin, reason } if asin.is_empty() => {
                write!(f, "Skipping row: {}", reason)
            }
            BatchOutcome::Skipped { asin, reason } => write!(f, "Skipping {}: {}", asin, reason),
        }
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Applies decisions against one loaded library snapshot.
pub struct Resolver<'a, C: Catalog + ?Sized> {
    ambiguous: &'a AmbiguousSet,
    purchases: &'a [ExternalRecord],
    snapshot: &'a CatalogSnapshot,
    names: &'a FieldNames,
    writer: CatalogWriter<'a, C>,
}

impl<'a, C: Catalog + ?Sized> Resolver<'a, C> {
    pub fn new(
        catalog: &'a mut C,
        ambiguous: &'a AmbiguousSet,
        purchases: &'a [ExternalRecord],
        snapshot: &'a CatalogSnapshot,
        names: &'a FieldNames,
        simulate: bool,
    ) -> Self {
        Self {
            ambiguous,
            purchases,
            snapshot,
            names,
            writer: CatalogWriter::new(catalog, simulate),
        }
    }

    /// Apply one decision. Lookup failures come back as `SyncError::Lookup`.
    pub fn resolve_one(&mut self, mapping: &ResolutionMapping) -> Result<Resolution> {
        let asin = mapping.asin.trim();
        let entry = self
            .ambiguous
            .get(asin)
            .ok_or_else(|| LookupError::NotAmbiguous(asin.to_string()))?;
        let purchase = self.purchase(asin)?;
        let score = entry.score();

        let record = match &mapping.decision {
            Decision::AudibleOnly => return self.create_placeholder(purchase, score),
            Decision::CatalogId(id) => self
                .snapshot
                .by_id(*id)
                .ok_or(LookupError::RecordNotFound(*id))?,
            Decision::CatalogTitle(title) => self.unique_title(title)?,
        };

        let fields =
            build_metadata_fields(purchase, score, FormatStatus::for_linked(record), self.names);
        self.writer.set_metadata(record.id, &fields)?;
        Ok(Resolution::Linked {
            record_id: record.id,
        })
    }

    /// Apply every row; lookup failures skip the row, anything else aborts.
    pub fn batch_resolve(&mut self, rows: &[MappingRow]) -> Result<Vec<BatchOutcome>> {
        let mut outcomes = Vec::with_capacity(rows.len());
        for row in rows {
            let asin = row.asin.trim().to_string();
            let outcome = match self.resolve_row(row) {
                Ok(Resolution::AlreadyPresent { record_id }) => BatchOutcome::Skipped {
                    asin,
                    reason: Resolution::AlreadyPresent { record_id }.to_string(),
                },
                Ok(resolution) => BatchOutcome::Resolved { asin, resolution },
                Err(SyncError::Lookup(e)) => BatchOutcome::Skipped {
                    asin,
                    reason: e.to_string(),
                },
                Err(e) => return Err(e),
            };
            if outcome.is_skipped() {
                log::warn!("{}", outcome);
            } else {
                log::info!("{}", outcome);
            }
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    fn resolve_row(&mut self, row: &MappingRow) -> Result<Resolution> {
        let asin = row.asin.trim();
        if asin.is_empty() {
            return Err(LookupError::MissingAsin.into());
        }
        // Membership is checked before the decision columns are parsed.
        if self.ambiguous.get(asin).is_none() {
            return Err(LookupError::NotAmbiguous(asin.to_string()).into());
        }
        self.purchase(asin)?;
        let mapping = ResolutionMapping::try_from(row)?;
        self.resolve_one(&mapping)
    }

    fn purchase(&self, asin: &str) -> Result<&'a ExternalRecord> {
        self.purchases
            .iter()
            .find(|p| p.asin == asin)
            .ok_or_else(|| LookupError::NotInExport(asin.to_string()).into())
    }

    fn unique_title(&self, title: &str) -> Result<&'a CatalogRecord> {
        let matches = self.snapshot.by_title(title);
        match matches.as_slice() {
            [] => Err(LookupError::NoTitleMatch(title.to_string()).into()),
            [record] => Ok(*record),
            _ => Err(LookupError::MultipleTitleMatches {
                title: title.to_string(),
                ids: matches.iter().map(|r| r.id).collect(),
            }
            .into()),
        }
    }

    fn create_placeholder(&mut self, purchase: &ExternalRecord, score: u8) -> Result<Resolution> {
        if let Some(existing) = self.snapshot.by_asin(&purchase.asin) {
            return Ok(Resolution::AlreadyPresent {
                record_id: existing.id,
            });
        }
        let record_id = self.writer.add_placeholder(purchase)?;
        if let Some(id) = record_id {
            let fields =
                build_metadata_fields(purchase, score, FormatStatus::AudibleOnly, self.names);
            self.writer.set_metadata(id, &fields)?;
        }
        Ok(Resolution::PlaceholderCreated { record_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldUpdate;
    use crate::models::CatalogRow;

    #[derive(Default)]
    struct Library {
        updates: Vec<(i64, Vec<String>)>,
        added: usize,
    }

    impl Catalog for Library {
        fn list_books(&self) -> Result<Vec<CatalogRow>> {
            Ok(Vec::new())
        }

        fn custom_columns(&self) -> Result<FieldNames> {
            Ok(FieldNames::default())
        }

        fn set_metadata(&mut self, book_id: i64, fields: &[FieldUpdate]) -> Result<()> {
            self.updates
                .push((book_id, fields.iter().map(|f| f.to_string()).collect()));
            Ok(())
        }

        fn add_empty(&mut self, _title: &str, _authors: &str, _tags: &str) -> Result<i64> {
            self.added += 1;
            Ok(77)
        }
    }

    fn snapshot() -> CatalogSnapshot {
        let row = |id: i64, title: &str, formats: bool, asin: Option<&str>| CatalogRow {
            id,
            title: Some(title.to_string()),
            authors: Some("Frank Herbert".to_string()),
            formats: formats.then(|| vec![format!("/lib/{}.epub", id)]),
            audible_asin: asin.map(str::to_string),
            format_status: None,
        };
        CatalogSnapshot::from_rows(vec![
            row(1, "Dune", true, None),
            row(2, "Dune Messiah", false, None),
            row(3, "Children of Dune", true, None),
            row(4, "children of dune", true, None),
            row(5, "Heretics of Dune", true, Some("B-HERETICS")),
        ])
    }

    fn entry(asin: &str, top_score: Option<u8>) -> AmbiguousEntry {
        AmbiguousEntry {
            asin: asin.to_string(),
            audible_title: format!("Title {}", asin),
            audible_authors: "Frank Herbert".to_string(),
            top_score,
            candidates: "1:82:Dune; 2:80:Dune Messiah".to_string(),
        }
    }

    fn purchases() -> Vec<ExternalRecord> {
        ["B1", "B2", "B-HERETICS"]
            .iter()
            .map(|asin| ExternalRecord {
                asin: asin.to_string(),
                title: format!("Title {}", asin),
                authors: "Frank Herbert".to_string(),
                ..Default::default()
            })
            .collect()
    }

    fn mapping(asin: &str, decision: Decision) -> ResolutionMapping {
        ResolutionMapping {
            asin: asin.to_string(),
            decision,
        }
    }

    fn ambiguous() -> AmbiguousSet {
        AmbiguousSet::new(vec![
            entry("B1", Some(82)),
            entry(" B2 ", None),
            entry("B-HERETICS", Some(78)),
            entry("B-NOT-IN-EXPORT", Some(76)),
        ])
    }

    #[test]
    fn test_mapping_row_precedence() {
        let row = MappingRow {
            asin: " B1 ".to_string(),
            calibre_id: "3".to_string(),
            calibre_title: "Dune".to_string(),
            audible_only: "yes".to_string(),
            ..Default::default()
        };
        let m = ResolutionMapping::try_from(&row).unwrap();
        assert_eq!(m, mapping("B1", Decision::AudibleOnly));

        let row = MappingRow { audible_only: "no".to_string(), ..row };
        assert_eq!(ResolutionMapping::try_from(&row).unwrap().decision, Decision::CatalogId(3));

        let row = MappingRow { calibre_id: String::new(), ..row };
        assert_eq!(
            ResolutionMapping::try_from(&row).unwrap().decision,
            Decision::CatalogTitle("Dune".to_string())
        );
    }

    #[test]
    fn test_mapping_row_errors() {
        let base = MappingRow {
            asin: "B1".to_string(),
            ..Default::default()
        };
        assert_eq!(ResolutionMapping::try_from(&base), Err(LookupError::MissingDecision));
        assert_eq!(
            ResolutionMapping::try_from(&MappingRow { asin: " ".to_string(), ..base.clone() }),
            Err(LookupError::MissingAsin)
        );
        assert_eq!(
            ResolutionMapping::try_from(&MappingRow { calibre_id: "12a".to_string(), ..base.clone() }),
            Err(LookupError::InvalidRecordId("12a".to_string()))
        );
        assert_eq!(
            ResolutionMapping::try_from(&MappingRow { audible_only: "maybe".to_string(), ..base }),
            Err(LookupError::InvalidFlag("maybe".to_string()))
        );
    }

    #[test]
    fn test_resolve_by_id_and_title() {
        let (set, purchases, snapshot, names) = (ambiguous(), purchases(), snapshot(), FieldNames::default());
        let mut library = Library::default();
        let mut resolver = Resolver::new(&mut library, &set, &purchases, &snapshot, &names, false);

        assert_eq!(
            resolver.resolve_one(&mapping("B1", Decision::CatalogId(1))).unwrap(),
            Resolution::Linked { record_id: 1 }
        );
        assert_eq!(
            resolver
                .resolve_one(&mapping("B2", Decision::CatalogTitle(" DUNE MESSIAH ".to_string())))
                .unwrap(),
            Resolution::Linked { record_id: 2 }
        );

        assert_eq!(library.updates.len(), 2);
        assert!(library.updates[0].1.contains(&"#format_status:Both".to_string()));
        assert!(library.updates[0].1.contains(&"#audible_match_score:82".to_string()));
        // No formats on book 2; blank top score records 0.
        assert!(library.updates[1].1.contains(&"#format_status:Audible only".to_string()));
        assert!(library.updates[1].1.contains(&"#audible_match_score:0".to_string()));
    }

    #[test]
    fn test_resolve_lookup_failures() {
        let (set, purchases, snapshot, names) = (ambiguous(), purchases(), snapshot(), FieldNames::default());
        let mut library = Library::default();
        let mut resolver = Resolver::new(&mut library, &set, &purchases, &snapshot, &names, false);

        let lookup = |r: Result<Resolution>| match r {
            Err(SyncError::Lookup(e)) => e,
            other => panic!("expected lookup failure, got {:?}", other),
        };
        assert_eq!(
            lookup(resolver.resolve_one(&mapping("B9", Decision::CatalogId(1)))),
            LookupError::NotAmbiguous("B9".to_string())
        );
        assert_eq!(
            lookup(resolver.resolve_one(&mapping("B-NOT-IN-EXPORT", Decision::CatalogId(1)))),
            LookupError::NotInExport("B-NOT-IN-EXPORT".to_string())
        );
        assert_eq!(
            lookup(resolver.resolve_one(&mapping("B1", Decision::CatalogId(404)))),
            LookupError::RecordNotFound(404)
        );
        assert_eq!(
            lookup(resolver.resolve_one(&mapping("B1", Decision::CatalogTitle("Dune Chronicles".to_string())))),
            LookupError::NoTitleMatch("Dune Chronicles".to_string())
        );
        assert_eq!(
            lookup(resolver.resolve_one(&mapping("B1", Decision::CatalogTitle("Children of Dune".to_string())))),
            LookupError::MultipleTitleMatches {
                title: "Children of Dune".to_string(),
                ids: vec![3, 4]
            }
        );
        drop(resolver);
        assert!(library.updates.is_empty());
    }

    #[test]
    fn test_audible_only_placeholder() {
        let (set, purchases, snapshot, names) = (ambiguous(), purchases(), snapshot(), FieldNames::default());
        let mut library = Library::default();
        let mut resolver = Resolver::new(&mut library, &set, &purchases, &snapshot, &names, false);

        assert_eq!(
            resolver.resolve_one(&mapping("B1", Decision::AudibleOnly)).unwrap(),
            Resolution::PlaceholderCreated { record_id: Some(77) }
        );
        assert_eq!(
            resolver.resolve_one(&mapping("B-HERETICS", Decision::AudibleOnly)).unwrap(),
            Resolution::AlreadyPresent { record_id: 5 }
        );
        drop(resolver);
        assert_eq!(library.added, 1);
        assert_eq!(library.updates.len(), 1);
        assert_eq!(library.updates[0].0, 77);
        assert!(library.updates[0].1.contains(&"#format_status:Audible only".to_string()));
    }

    #[test]
    fn test_simulated_placeholder_has_no_id() {
        let (set, purchases, snapshot, names) = (ambiguous(), purchases(), snapshot(), FieldNames::default());
        let mut library = Library::default();
        let mut resolver = Resolver::new(&mut library, &set, &purchases, &snapshot, &names, true);
        assert_eq!(
            resolver.resolve_one(&mapping("B1", Decision::AudibleOnly)).unwrap(),
            Resolution::PlaceholderCreated { record_id: None }
        );
        drop(resolver);
        assert_eq!(library.added, 0);
        assert!(library.updates.is_empty());
    }

    #[test]
    fn test_batch_skips_and_continues() {
        let (set, purchases, snapshot, names) = (ambiguous(), purchases(), snapshot(), FieldNames::default());
        let mut library = Library::default();
        let mut resolver = Resolver::new(&mut library, &set, &purchases, &snapshot, &names, false);

        let row = |asin: &str, id: &str, title: &str, only: &str| MappingRow {
            asin: asin.to_string(),
            calibre_id: id.to_string(),
            calibre_title: title.to_string(),
            audible_only: only.to_string(),
            ..Default::default()
        };
        let outcomes = resolver
            .batch_resolve(&[
                row("", "1", "", ""),
                row("B9", "1", "", ""),
                row("B1", "abc", "", ""),
                row("B-HERETICS", "", "", "true"),
                row("B2", "", "Children of Dune", ""),
                row("B2", "", "", ""),
                row("B1", "3", "", ""),
            ])
            .unwrap();

        let skipped: Vec<bool> = outcomes.iter().map(BatchOutcome::is_skipped).collect();
        assert_eq!(skipped, vec![true, true, true, true, true, true, false]);
        assert_eq!(
            outcomes[4].to_string(),
            "Skipping B2: multiple Calibre titles matched 'Children of Dune' (3, 4)"
        );
        assert_eq!(outcomes[3].to_string(), "Skipping B-HERETICS: already present in Calibre (id 5)");
        assert_eq!(outcomes[6].to_string(), "B1: linked to Calibre id 3");
        drop(resolver);
        assert_eq!(library.added, 0);
        assert_eq!(library.updates.len(), 1);
    }

    #[test]
    fn test_list_and_export() {
        let set = ambiguous();
        let listed = list(&set, Some(2));
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[1].asin, "B2");
        assert_eq!(listed[0].candidates.len(), 2);
        assert_eq!(
            listed[0].to_string(),
            "B1 | 82 | Title B1 | Frank Herbert\n  - id 1 (score 82): Dune\n  - id 2 (score 80): Dune Messiah"
        );
        assert_eq!(list(&set, None).len(), 4);

        let with_blank = AmbiguousSet::new(vec![entry("", Some(80)), entry("B1", Some(82))]);
        let rows = export_mapping(&with_blank);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].asin, "B1");
        assert_eq!(rows[0].top_score, "82");
    }

    #[test]
    fn test_list_keeps_titles_containing_separator() {
        let set = AmbiguousSet::new(vec![AmbiguousEntry {
            candidates: "1:80:Dune; Messiah; 2:70:Emma".to_string(),
            ..entry("B1", Some(80))
        }]);
        assert_eq!(
            list(&set, None)[0].to_string(),
            "B1 | 80 | Title B1 | Frank Herbert\n  - id 1 (score 80): Dune; Messiah\n  - id 2 (score 70): Emma"
        );
    }
}
