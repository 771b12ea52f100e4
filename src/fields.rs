//! Calibre custom columns and the metadata payload written for a linked book.

use rustc_hash::FxHashMap;
use serde_json::Value;
use std::fmt;

use crate::models::{ExternalRecord, FormatStatus};

// ============================================================================
// Column Catalogue
// ============================================================================

pub const AUDIBLE_OWNED: &str = "audible_owned";
pub const AUDIBLE_ASIN: &str = "audible_asin";
pub const AUDIBLE_NARRATORS: &str = "audible_narrators";
pub const AUDIBLE_MINUTES: &str = "audible_minutes";
pub const AUDIBLE_PURCHASE_DATE: &str = "audible_purchase_date";
pub const AUDIBLE_MATCH_SCORE: &str = "audible_match_score";
pub const FORMAT_STATUS: &str = "format_status";
pub const AUDIBLE_SERIES: &str = "audible_series";
pub const AUDIBLE_SERIES_SEQUENCE: &str = "audible_series_sequence";
pub const AUDIBLE_RELEASE_DATE: &str = "audible_release_date";

/// Columns every library needs, with their Calibre types.
pub const REQUIRED_COLUMNS: [(&str, &str); 7] = [
    (AUDIBLE_OWNED, "Yes/No"),
    (AUDIBLE_ASIN, "Text"),
    (AUDIBLE_NARRATORS, "Text"),
    (AUDIBLE_MINUTES, "Int"),
    (AUDIBLE_PURCHASE_DATE, "Date"),
    (AUDIBLE_MATCH_SCORE, "Int"),
    (FORMAT_STATUS, "Enum: Ebook only, Audible only, Both, Unknown"),
];

/// Columns written only when the library has them.
pub const OPTIONAL_COLUMNS: [(&str, &str); 3] = [
    (AUDIBLE_SERIES, "Text"),
    (AUDIBLE_SERIES_SEQUENCE, "Text"),
    (AUDIBLE_RELEASE_DATE, "Date"),
];

fn is_custom_field(name: &str) -> bool {
    REQUIRED_COLUMNS
        .iter()
        .chain(OPTIONAL_COLUMNS.iter())
        .any(|(column, _)| *column == name)
}

// ============================================================================
// Field Name Resolution
// ============================================================================

/// Logical column name → the lookup name `calibredb set_metadata` expects.
/// Read once per run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldNames {
    lookup: FxHashMap<String, String>,
}

impl FieldNames {
    /// Build from lookup names such as `#audible_asin`.
    pub fn from_lookup_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lookup = names
            .into_iter()
            .map(Into::into)
            .map(|lookup: String| (lookup.trim_start_matches('#').to_string(), lookup))
            .collect();
        Self { lookup }
    }

    /// Parse `calibredb custom_columns --for-machine` output: either an object
    /// keyed by lookup name or a list of objects with a `label`.
    pub fn from_custom_columns_json(output: &str) -> Self {
        let data: Value = match serde_json::from_str(output) {
            Ok(data) => data,
            Err(e) => {
                log::warn!("Could not parse custom column list ({}); using default names", e);
                return Self::default();
            }
        };
        match data {
            Value::Object(map) => Self::from_lookup_names(map.keys().cloned()),
            Value::Array(entries) => Self::from_lookup_names(
                entries
                    .iter()
                    .filter_map(|entry| entry.get("label").and_then(Value::as_str))
                    .map(str::to_string),
            ),
            _ => Self::default(),
        }
    }

    /// True if the library actually has this column.
    pub fn is_known(&self, name: &str) -> bool {
        self.lookup.contains_key(name)
    }

    /// Lookup name for `name`. Unlisted custom fields fall back to `#name`;
    /// anything else (e.g. `title`) passes through.
    pub fn resolve(&self, name: &str) -> String {
        if let Some(lookup) = self.lookup.get(name) {
            return lookup.clone();
        }
        if is_custom_field(name) {
            return format!("#{}", name);
        }
        name.to_string()
    }

    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }
}

// ============================================================================
// Metadata Payload
// ============================================================================

/// One `--field name:value` argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldUpdate {
    pub field: String,
    pub value: String,
}

impl FieldUpdate {
    fn new(names: &FieldNames, name: &str, value: impl Into<String>) -> Self {
        Self {
            field: names.resolve(name),
            value: value.into(),
        }
    }

    /// `format_status` alone, used to mark untouched books as ebook-only.
    pub fn format_status(names: &FieldNames, status: FormatStatus) -> Self {
        Self::new(names, FORMAT_STATUS, status.as_str())
    }
}

impl fmt::Display for FieldUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.field, self.value)
    }
}

/// Everything written to a book linked to (or created for) an Audible purchase.
/// Runtime and dates only when they parsed; series columns only when the
/// library defines them.
pub fn build_metadata_fields(
    purchase: &ExternalRecord,
    match_score: u8,
    format_status: FormatStatus,
    names: &FieldNames,
) -> Vec<FieldUpdate> {
    let mut fields = vec![
        FieldUpdate::new(names, AUDIBLE_OWNED, "Yes"),
        FieldUpdate::new(names, AUDIBLE_ASIN, purchase.asin.as_str()),
        FieldUpdate::new(names, AUDIBLE_NARRATORS, purchase.narrators.join(", ")),
        FieldUpdate::new(names, AUDIBLE_MATCH_SCORE, match_score.to_string()),
        FieldUpdate::format_status(names, format_status),
    ];

    if let Some(minutes) = purchase.runtime_minutes {
        fields.push(FieldUpdate::new(names, AUDIBLE_MINUTES, minutes.to_string()));
    }
    if let Some(date) = purchase.purchase_date {
        fields.push(FieldUpdate::new(names, AUDIBLE_PURCHASE_DATE, date.to_string()));
    }

    if names.is_known(AUDIBLE_SERIES) {
        if let Some(series) = &purchase.series_title {
            fields.push(FieldUpdate::new(names, AUDIBLE_SERIES, series.as_str()));
        }
    }
    if names.is_known(AUDIBLE_SERIES_SEQUENCE) {
        if let Some(sequence) = &purchase.series_sequence {
            fields.push(FieldUpdate::new(names, AUDIBLE_SERIES_SEQUENCE, sequence.as_str()));
        }
    }
    if names.is_known(AUDIBLE_RELEASE_DATE) {
        if let Some(date) = purchase.release_date {
            fields.push(FieldUpdate::new(names, AUDIBLE_RELEASE_DATE, date.to_string()));
        }
    }

    fields
}

// ============================================================================
// TESTS
// ============================================================================
