//! Access to the Calibre library.
//!
//! The matcher and the resolution workflow only see the [`Catalog`] trait;
//! [`CalibreDb`] implements it by shelling out to `calibredb`.
//! [`CatalogWriter`] is the single place where simulate mode suppresses writes.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use std::process::Command;

use crate::error::{Result, SyncError};
use crate::fields::{FieldNames, FieldUpdate};
use crate::models::{CatalogRow, CatalogSnapshot, ExternalRecord};
use crate::normalize::split_authors;

/// Tag applied to placeholder books.
pub const PLACEHOLDER_TAG: &str = "Audible";

/// Columns requested from `calibredb list`.
pub const LIST_FIELDS: &str = "id,title,authors,formats,*audible_asin,*format_status";

/// First standalone integer in `calibredb add` output ("Added book ids: 42").
static ADDED_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d+)\b").unwrap());

/// Query and mutation capabilities the sync needs from a library.
pub trait Catalog {
    /// Every book in the library, in library order.
    fn list_books(&self) -> Result<Vec<CatalogRow>>;

    /// Custom column lookup names.
    fn custom_columns(&self) -> Result<FieldNames>;

    /// Apply `name:value` updates to one book.
    fn set_metadata(&mut self, book_id: i64, fields: &[FieldUpdate]) -> Result<()>;

    /// Create an empty book and return its id.
    fn add_empty(&mut self, title: &str, authors: &str, tags: &str) -> Result<i64>;
}

/// Load the snapshot and column names a run works from.
pub fn load_library<C: Catalog + ?Sized>(catalog: &C) -> Result<(CatalogSnapshot, FieldNames)> {
    let snapshot = CatalogSnapshot::from_rows(catalog.list_books()?);
    let names = catalog.custom_columns()?;
    log::info!(
        "Loaded {} Calibre books, {} custom columns",
        snapshot.len(),
        names.len()
    );
    Ok((snapshot, names))
}

// ============================================================================
// calibredb
// ============================================================================

/// `calibredb` bound to one library.
#[derive(Clone, Debug)]
pub struct CalibreDb {
    program: PathBuf,
    library: PathBuf,
}

impl CalibreDb {
    pub fn new(library: impl Into<PathBuf>) -> Self {
        Self::with_program("calibredb", library)
    }

    pub fn with_program(program: impl Into<PathBuf>, library: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            library: library.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let command_line = format!(
            "{} {} --with-library {}",
            self.program.display(),
            args.join(" "),
            self.library.display()
        );
        log::debug!("Running {}", command_line);

        let output = Command::new(&self.program)
            .args(args)
            .arg("--with-library")
            .arg(&self.library)
            .output()
            .map_err(|e| SyncError::Collaborator {
                command: command_line.clone(),
                status: -1,
                stderr: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(SyncError::Collaborator {
                command: command_line,
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Catalog for CalibreDb {
    fn list_books(&self) -> Result<Vec<CatalogRow>> {
        let output = self.run(&["list", "--for-machine", "--fields", LIST_FIELDS])?;
        serde_json::from_str(&output)
            .map_err(|e| SyncError::CatalogOutput(format!("book list is not valid JSON: {}", e)))
    }

    fn custom_columns(&self) -> Result<FieldNames> {
        let output = self.run(&["custom_columns", "--for-machine"])?;
        Ok(FieldNames::from_custom_columns_json(&output))
    }

    fn set_metadata(&mut self, book_id: i64, fields: &[FieldUpdate]) -> Result<()> {
        let book_id = book_id.to_string();
        let rendered: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        let mut args = vec!["set_metadata", book_id.as_str()];
        for field in &rendered {
            args.push("--field");
            args.push(field);
        }
        self.run(&args)?;
        Ok(())
    }

    fn add_empty(&mut self, title: &str, authors: &str, tags: &str) -> Result<i64> {
        let output = self.run(&[
            "add", "--empty", "--title", title, "--authors", authors, "--tags", tags,
        ])?;
        parse_added_id(&output)
    }
}

/// Book id from `calibredb add` output.
pub fn parse_added_id(output: &str) -> Result<i64> {
    ADDED_ID
        .captures(output)
        .and_then(|caps| caps[1].parse().ok())
        .ok_or_else(|| {
            SyncError::CatalogOutput(format!("unable to parse new book id from: {}", output.trim()))
        })
}

// ============================================================================
// Simulate-aware Writer
// ============================================================================

/// Routes every mutation; in simulate mode nothing reaches the catalog.
pub struct CatalogWriter<'c, C: Catalog + ?Sized> {
    catalog: &'c mut C,
    simulate: bool,
}

impl<'c, C: Catalog + ?Sized> CatalogWriter<'c, C> {
    pub fn new(catalog: &'c mut C, simulate: bool) -> Self {
        Self { catalog, simulate }
    }

    pub fn is_simulated(&self) -> bool {
        self.simulate
    }

    pub fn set_metadata(&mut self, book_id: i64, fields: &[FieldUpdate]) -> Result<()> {
        if self.simulate {
            log::debug!("[dry-run] set_metadata {} ({} fields)", book_id, fields.len());
            return Ok(());
        }
        self.catalog.set_metadata(book_id, fields)
    }

    /// Create an Audible-only placeholder. `None` in simulate mode.
    pub fn add_placeholder(&mut self, purchase: &ExternalRecord) -> Result<Option<i64>> {
        let title = if purchase.title.is_empty() {
            "Untitled"
        } else {
            purchase.title.as_str()
        };
        let authors = split_authors(&purchase.authors).join(", ");
        let authors = if authors.is_empty() { "Unknown" } else { authors.as_str() };

        if self.simulate {
            log::debug!("[dry-run] add placeholder '{}' by {}", title, authors);
            return Ok(None);
        }
        self.catalog
            .add_empty(title, authors, PLACEHOLDER_TAG)
            .map(Some)
    }
}
