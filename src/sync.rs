//! One full sync run: classify every Audible purchase, write the metadata
//! payloads, and collect the three report tables.
//!
//! All decisions are made against the snapshot loaded at the start; nothing
//! written during the run feeds back into matching. Simulate mode produces the
//! same tables while the [`CatalogWriter`] drops every mutation.

use chrono::Local;
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::time::Instant;

use crate::catalog::{load_library, Catalog, CatalogWriter};
use crate::config::SyncConfig;
use crate::error::Result;
use crate::fields::{build_metadata_fields, FieldNames, FieldUpdate};
use crate::matcher::find_match;
use crate::models::{CatalogRecord, CatalogSnapshot, ExternalRecord, FormatStatus, MatchMethod};
use crate::progress::{create_progress_bar, format_duration, log_progress};
use crate::report::{
    format_candidates, AmbiguousEntry, AudibleOnlyRow, MatchedRow, RunSummary, SyncReport,
};

const PROGRESS_INTERVAL: u64 = 100;

/// Suffix on the method of a match left alone because the book is already
/// linked to another ASIN.
pub const SKIP_EXISTING_SUFFIX: &str = "_skip_existing";

/// Catalog writes a run requested (or, in simulate mode, would have).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MutationStats {
    pub linked: usize,
    pub skipped_existing: usize,
    pub placeholders_created: usize,
    pub ebook_only_marked: usize,
}

impl MutationStats {
    /// Log the stats in JSON format
    pub fn log(&self) {
        if let Ok(json) = serde_json::to_string_pretty(self) {
            log::info!("[MUTATIONS]\n{}", json);
        }
    }
}

#[derive(Clone, Debug)]
pub struct SyncOutcome {
    pub report: SyncReport,
    pub mutations: MutationStats,
}

/// Run a sync over `purchases` against the library behind `catalog`.
pub fn run_sync<C: Catalog + ?Sized>(
    catalog: &mut C,
    purchases: &[ExternalRecord],
    config: &SyncConfig,
) -> Result<SyncOutcome> {
    let start = Instant::now();
    let (snapshot, names) = load_library(&*catalog)?;
    let mut writer = CatalogWriter::new(catalog, config.simulate);

    let mut matched = Vec::new();
    let mut ambiguous = Vec::new();
    let mut audible_only = Vec::new();
    let mut claimed: FxHashSet<i64> = FxHashSet::default();
    let mut mutations = MutationStats::default();

    let total = purchases.len() as u64;
    let pb = create_progress_bar(total, "Matching Audible titles");

    for (idx, purchase) in purchases.iter().enumerate() {
        let result = find_match(purchase, &snapshot, config.thresholds);

        if let Some(record) = result.record {
            claimed.insert(record.id);
            let mut method = result.method.as_str().to_string();
            if is_linked_elsewhere(record, purchase) {
                log::warn!(
                    "{}: book {} already carries ASIN {}, leaving it unchanged",
                    purchase.asin,
                    record.id,
                    record.audible_asin.as_deref().unwrap_or_default()
                );
                method.push_str(SKIP_EXISTING_SUFFIX);
                mutations.skipped_existing += 1;
            } else {
                let fields = build_metadata_fields(
                    purchase,
                    result.score,
                    FormatStatus::for_linked(record),
                    &names,
                );
                writer.set_metadata(record.id, &fields)?;
                mutations.linked += 1;
            }
            matched.push(matched_row(purchase, record, result.score, method));
        } else if result.method == MatchMethod::Ambiguous {
            ambiguous.push(AmbiguousEntry {
                asin: purchase.asin.clone(),
                audible_title: purchase.title.clone(),
                audible_authors: purchase.authors.clone(),
                top_score: Some(result.score),
                candidates: format_candidates(&result.candidates),
            });
        } else {
            audible_only.push(AudibleOnlyRow {
                asin: purchase.asin.clone(),
                audible_title: purchase.title.clone(),
                audible_authors: purchase.authors.clone(),
                method: result.method.as_str().to_string(),
            });
            if config.create_placeholders && !snapshot.contains_asin(&purchase.asin) {
                if let Some(id) = writer.add_placeholder(purchase)? {
                    let fields =
                        build_metadata_fields(purchase, result.score, FormatStatus::AudibleOnly, &names);
                    writer.set_metadata(id, &fields)?;
                }
                mutations.placeholders_created += 1;
            }
        }

        pb.inc(1);
        log_progress("match", idx as u64 + 1, total, PROGRESS_INTERVAL);
    }
    pb.finish_with_message(format!("Matched {} Audible titles", purchases.len()));

    mutations.ebook_only_marked = mark_ebook_only(&mut writer, &snapshot, &claimed, &names)?;

    let summary = RunSummary {
        timestamp: Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
        audible_rows: purchases.len(),
        matched: matched.len(),
        ambiguous: ambiguous.len(),
        audible_only: audible_only.len(),
        dry_run: config.simulate,
        create_placeholders: config.create_placeholders,
        match_threshold: config.thresholds.match_threshold(),
        review_threshold: config.thresholds.review_threshold(),
        calibre_library: config.library.display().to_string(),
        audible_csv: config.audible_csv.display().to_string(),
    };

    log::info!("Sync finished in {}", format_duration(start.elapsed()));

    Ok(SyncOutcome {
        report: SyncReport {
            matched,
            ambiguous,
            audible_only,
            summary,
        },
        mutations,
    })
}

/// The book already belongs to a different purchase.
fn is_linked_elsewhere(record: &CatalogRecord, purchase: &ExternalRecord) -> bool {
    record
        .audible_asin
        .as_deref()
        .is_some_and(|existing| existing != purchase.asin)
}

fn matched_row(
    purchase: &ExternalRecord,
    record: &CatalogRecord,
    score: u8,
    method: String,
) -> MatchedRow {
    MatchedRow {
        asin: purchase.asin.clone(),
        audible_title: purchase.title.clone(),
        audible_authors: purchase.authors.clone(),
        calibre_id: record.id,
        calibre_title: record.title.clone(),
        calibre_authors: record.authors.clone(),
        calibre_audible_asin: record.audible_asin.clone().unwrap_or_default(),
        score,
        method,
    }
}

/// Mark every unclaimed book not already tied to Audible as "Ebook only".
fn mark_ebook_only<C: Catalog + ?Sized>(
    writer: &mut CatalogWriter<'_, C>,
    snapshot: &CatalogSnapshot,
    claimed: &FxHashSet<i64>,
    names: &FieldNames,
) -> Result<usize> {
    let update = [FieldUpdate::format_status(names, FormatStatus::EbookOnly)];
    let mut marked = 0;
    for record in snapshot.records() {
        if claimed.contains(&record.id)
            || FormatStatus::is_audible_linked(record.format_status.as_deref())
        {
            continue;
        }
        writer.set_metadata(record.id, &update)?;
        marked += 1;
    }
    if writer.is_simulated() {
        log::info!("Would mark {} books as {}", marked, FormatStatus::EbookOnly);
    } else {
        log::info!("Marked {} books as {}", marked, FormatStatus::EbookOnly);
    }
    Ok(marked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CatalogRow;

    #[derive(Default)]
    struct Library {
        rows: Vec<CatalogRow>,
        updates: Vec<(i64, Vec<String>)>,
        added: Vec<String>,
    }

    impl Catalog for Library {
        fn list_books(&self) -> Result<Vec<CatalogRow>> {
            Ok(self.rows.clone())
        }

        fn custom_columns(&self) -> Result<FieldNames> {
            Ok(FieldNames::default())
        }

        fn set_metadata(&mut self, book_id: i64, fields: &[FieldUpdate]) -> Result<()> {
            self.updates
                .push((book_id, fields.iter().map(|f| f.to_string()).collect()));
            Ok(())
        }

        fn add_empty(&mut self, title: &str, _authors: &str, _tags: &str) -> Result<i64> {
            self.added.push(title.to_string());
            Ok(900)
        }
    }

    fn book(id: i64, title: &str, authors: &str, asin: Option<&str>) -> CatalogRow {
        CatalogRow {
            id,
            title: Some(title.to_string()),
            authors: Some(authors.to_string()),
            formats: Some(vec![format!("/lib/{}.epub", id)]),
            audible_asin: asin.map(str::to_string),
            format_status: None,
        }
    }

    fn purchase(asin: &str, title: &str, authors: &str) -> ExternalRecord {
        ExternalRecord {
            asin: asin.to_string(),
            title: title.to_string(),
            authors: authors.to_string(),
            ..Default::default()
        }
    }

    fn live() -> SyncConfig {
        SyncConfig {
            simulate: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_skip_existing_asin() {
        let mut library = Library {
            rows: vec![book(1, "Dune", "Frank Herbert", Some("B-OTHER"))],
            ..Default::default()
        };
        let outcome = run_sync(&mut library, &[purchase("B1", "Dune", "Frank Herbert")], &live()).unwrap();
        let row = &outcome.report.matched[0];
        assert_eq!(row.method, "exact_title_author_skip_existing");
        assert_eq!(row.calibre_audible_asin, "B-OTHER");
        assert_eq!(outcome.mutations.skipped_existing, 1);
        // Claimed, so not marked ebook-only either.
        assert!(library.updates.is_empty());
    }

    #[test]
    fn test_same_asin_is_reapplied() {
        let mut library = Library {
            rows: vec![book(1, "Dune", "Frank Herbert", Some("B1"))],
            ..Default::default()
        };
        let outcome = run_sync(&mut library, &[purchase("B1", "Dune", "Frank Herbert")], &live()).unwrap();
        assert_eq!(outcome.report.matched[0].method, "asin_exact");
        assert_eq!(library.updates.len(), 1);
        assert!(library.updates[0].1.contains(&"#format_status:Both".to_string()));
        assert!(library.updates[0].1.contains(&"#audible_match_score:100".to_string()));
    }

    #[test]
    fn test_placeholders_and_ebook_only_pass() {
        let mut library = Library {
            rows: vec![
                book(1, "Dune", "Frank Herbert", None),
                book(2, "Emma", "Jane Austen", None),
            ],
            ..Default::default()
        };
        let config = SyncConfig {
            create_placeholders: true,
            ..live()
        };
        let outcome = run_sync(
            &mut library,
            &[
                purchase("B1", "Dune", "Frank Herbert"),
                purchase("B2", "Cooking Under Pressure", "Someone New"),
            ],
            &config,
        )
        .unwrap();

        assert_eq!(outcome.report.audible_only.len(), 1);
        assert_eq!(outcome.report.audible_only[0].method, "unmatched");
        assert_eq!(library.added, vec!["Cooking Under Pressure"]);
        assert_eq!(outcome.mutations.placeholders_created, 1);
        assert_eq!(outcome.mutations.ebook_only_marked, 1);

        let ids: Vec<i64> = library.updates.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 900, 2]);
        assert!(library.updates[1].1.contains(&"#format_status:Audible only".to_string()));
        assert_eq!(library.updates[2].1, vec!["#format_status:Ebook only"]);
    }

    #[test]
    fn test_simulate_suppresses_all_writes() {
        let mut library = Library {
            rows: vec![book(1, "Dune", "Frank Herbert", None), book(2, "Emma", "Jane Austen", None)],
            ..Default::default()
        };
        let config = SyncConfig {
            create_placeholders: true,
            ..Default::default()
        };
        let outcome = run_sync(
            &mut library,
            &[purchase("B1", "Dune", "Frank Herbert"), purchase("B2", "Unknown Book", "Nobody")],
            &config,
        )
        .unwrap();
        assert_eq!(outcome.report.matched.len(), 1);
        assert_eq!(outcome.report.audible_only.len(), 1);
        assert!(outcome.report.summary.dry_run);
        assert!(library.updates.is_empty());
        assert!(library.added.is_empty());
        assert_eq!(
            outcome.mutations,
            MutationStats {
                linked: 1,
                skipped_existing: 0,
                placeholders_created: 1,
                ebook_only_marked: 1,
            }
        );
    }

    #[test]
    fn test_ambiguous_entry_carries_candidates() {
        let mut library = Library {
            rows: vec![book(10, "Foundation", "Isaac Asimov", None)],
            ..Default::default()
        };
        let config = SyncConfig {
            thresholds: crate::config::Thresholds::new(100, 60).unwrap(),
            ..live()
        };
        let outcome = run_sync(
            &mut library,
            &[purchase("B1", "Foundation and Empire", "Isaac Asimov")],
            &config,
        )
        .unwrap();
        let entry = &outcome.report.ambiguous[0];
        assert_eq!(entry.top_score, Some(81));
        assert_eq!(entry.candidates, "10:81:Foundation");
        // Unclaimed, so the ebook-only pass reaches it.
        assert_eq!(library.updates, vec![(10, vec!["#format_status:Ebook only".to_string()])]);
    }
}
