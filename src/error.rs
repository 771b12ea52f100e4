//! Error types shared by the sync and resolution workflows.

use thiserror::Error;

/// A lookup that a single resolution depends on could not be satisfied.
///
/// Fatal to a single `resolve` call; batch resolution reports the message and
/// moves on to the next mapping row.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("ASIN {0} is not in the ambiguous report")]
    NotAmbiguous(String),

    #[error("ASIN {0} is not in the Audible export")]
    NotInExport(String),

    #[error("mapping row has no asin")]
    MissingAsin,

    #[error("Calibre book id not found: {0}")]
    RecordNotFound(i64),

    #[error("invalid calibre_id '{0}'")]
    InvalidRecordId(String),

    #[error("invalid audible_only value '{0}'")]
    InvalidFlag(String),

    #[error("no Calibre title matched '{0}'")]
    NoTitleMatch(String),

    #[error("multiple Calibre titles matched '{title}' ({})", format_ids(.ids))]
    MultipleTitleMatches { title: String, ids: Vec<i64> },

    #[error("no calibre_id, calibre_title, or audible_only given")]
    MissingDecision,
}

fn format_ids(ids: &[i64]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A date or number literal in the export that could not be parsed.
/// Never fatal: the caller treats the value as absent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputFormatError {
    #[error("invalid date '{0}'")]
    Date(String),

    #[error("invalid number '{0}'")]
    Number(String),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Lookup(#[from] LookupError),

    /// The catalog command reported non-success.
    #[error("calibredb failed (exit {status}): {command}\n{stderr}")]
    Collaborator {
        command: String,
        status: i32,
        stderr: String,
    },

    /// The catalog command succeeded but its output could not be understood.
    #[error("unexpected calibredb output: {0}")]
    CatalogOutput(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unsafe output path: {0}")]
    UnsafeOutput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;
