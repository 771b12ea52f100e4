#![allow(dead_code)]

use std::path::PathBuf;

use audible_calibre_sync::catalog::Catalog;
use audible_calibre_sync::error::Result;
use audible_calibre_sync::fields::{FieldNames, FieldUpdate};
use audible_calibre_sync::models::{CatalogRow, ExternalRecord};
use audible_calibre_sync::report::load_export;

pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

pub fn fixture_export() -> PathBuf {
    fixtures_dir().join("audible_library.csv")
}

pub fn purchases() -> Vec<ExternalRecord> {
    load_export(&fixture_export()).unwrap()
}

/// In-memory library that records every mutation it receives.
pub struct FakeCatalog {
    pub rows: Vec<CatalogRow>,
    pub columns: Vec<String>,
    pub updates: Vec<(i64, Vec<String>)>,
    pub added: Vec<(String, String, String)>,
    next_id: i64,
}

impl FakeCatalog {
    pub fn new(rows: Vec<CatalogRow>) -> Self {
        Self {
            rows,
            columns: Vec::new(),
            updates: Vec::new(),
            added: Vec::new(),
            next_id: 1000,
        }
    }

    pub fn with_columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn mutation_count(&self) -> usize {
        self.updates.len() + self.added.len()
    }

    pub fn updates_for(&self, book_id: i64) -> Vec<&Vec<String>> {
        self.updates
            .iter()
            .filter(|(id, _)| *id == book_id)
            .map(|(_, fields)| fields)
            .collect()
    }
}

impl Catalog for FakeCatalog {
    fn list_books(&self) -> Result<Vec<CatalogRow>> {
        Ok(self.rows.clone())
    }

    fn custom_columns(&self) -> Result<FieldNames> {
        Ok(FieldNames::from_lookup_names(self.columns.iter().cloned()))
    }

    fn set_metadata(&mut self, book_id: i64, fields: &[FieldUpdate]) -> Result<()> {
        self.updates
            .push((book_id, fields.iter().map(|f| f.to_string()).collect()));
        Ok(())
    }

    fn add_empty(&mut self, title: &str, authors: &str, tags: &str) -> Result<i64> {
        self.added
            .push((title.to_string(), authors.to_string(), tags.to_string()));
        self.next_id += 1;
        Ok(self.next_id)
    }
}

pub fn book(id: i64, title: &str, authors: &str, has_ebook: bool) -> CatalogRow {
    CatalogRow {
        id,
        title: Some(title.to_string()),
        authors: Some(authors.to_string()),
        formats: Some(if has_ebook {
            vec![format!("/library/{}/book.epub", id)]
        } else {
            Vec::new()
        }),
        audible_asin: None,
        format_status: None,
    }
}

/// Library matching `fixtures/audible_library.csv`:
/// - 2 already carries the Dune ASIN
/// - 3 and 4 are two Foundation editions
/// - 7 is linked to a different Emma purchase
/// - 9 is an Audible-only book from an earlier run
pub fn library_rows() -> Vec<CatalogRow> {
    let mut rows = vec![
        book(1, "The Hobbit", "J. R. R. Tolkien", true),
        book(2, "Dune", "Frank Herbert", true),
        book(3, "Foundation", "Isaac Asimov", true),
        book(4, "Foundation", "Isaac Asimov", false),
        book(5, "Pride and Prejudice", "Jane Austen", true),
        book(6, "The Name of the Wind", "Patrick Rothfuss", true),
        book(7, "Emma", "Jane Austen", true),
        book(8, "Cooking Basics", "Ann Chef", true),
        book(9, "The Martian", "Andy Weir", false),
    ];
    rows[1].audible_asin = Some("B002V1OF70".to_string());
    rows[1].format_status = Some("Both".to_string());
    rows[6].audible_asin = Some("B-EMMA-OLD".to_string());
    rows[8].format_status = Some("Audible only".to_string());
    rows
}
