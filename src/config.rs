//! Run configuration: score thresholds and mutation policy.

use std::path::PathBuf;

use crate::error::{Result, SyncError};

/// Default auto-match threshold.
pub const DEFAULT_MATCH_THRESHOLD: u8 = 90;

/// Default lower bound of the human review band.
pub const DEFAULT_REVIEW_THRESHOLD: u8 = 75;

/// Score thresholds, both 0-100 with `review <= match`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    match_threshold: u8,
    review_threshold: u8,
}

impl Thresholds {
    pub fn new(match_threshold: u8, review_threshold: u8) -> Result<Self> {
        if match_threshold > 100 || review_threshold > 100 {
            return Err(SyncError::Config(format!(
                "thresholds must be within 0-100 (match={}, review={})",
                match_threshold, review_threshold
            )));
        }
        if review_threshold > match_threshold {
            return Err(SyncError::Config(format!(
                "review threshold {} exceeds match threshold {}",
                review_threshold, match_threshold
            )));
        }
        Ok(Self {
            match_threshold,
            review_threshold,
        })
    }

    pub fn match_threshold(&self) -> u8 {
        self.match_threshold
    }

    pub fn review_threshold(&self) -> u8 {
        self.review_threshold
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            review_threshold: DEFAULT_REVIEW_THRESHOLD,
        }
    }
}

/// Settings for one sync run.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub thresholds: Thresholds,
    /// Compute everything, change nothing in Calibre.
    pub simulate: bool,
    /// Create Audible-only placeholders for unmatched purchases.
    pub create_placeholders: bool,
    pub library: PathBuf,
    pub audible_csv: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            simulate: true,
            create_placeholders: false,
            library: default_library(),
            audible_csv: PathBuf::new(),
        }
    }
}

/// `~/Calibre`, or `./Calibre` when there is no home directory.
pub fn default_library() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Calibre")
}

/// Parse a boolean literal: true/false, 1/0, yes/no, y/n (any case).
pub fn parse_bool(value: &str) -> std::result::Result<bool, String> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => Err(format!("Invalid boolean value: {}", value)),
    }
}
