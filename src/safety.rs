//! Guards against overwriting a report with a generated file.
//!
//! `export-mapping` writes next to the reports it reads; these checks keep a
//! typo in `--output` from clobbering `ambiguous.csv` and friends.

use std::path::Path;

use crate::error::{Result, SyncError};
use crate::report::{AMBIGUOUS_CSV, AUDIBLE_ONLY_CSV, MATCHED_CSV};

/// Validates that an output path is safe to overwrite.
///
/// Checks:
/// - Output filename must contain the required pattern (e.g. "mapping")
/// - Output cannot be the same as any of the provided source paths
/// - Output cannot be named like one of the sync reports
pub fn validate_output_path(
    output: &Path,
    required_pattern: &str,
    source_paths: &[&Path],
) -> Result<()> {
    let output_name = output.file_name().and_then(|n| n.to_str()).unwrap_or("");

    if !output_name.contains(required_pattern) {
        return Err(SyncError::UnsafeOutput(format!(
            "output file '{}' must contain '{}' in the name",
            output.display(),
            required_pattern
        )));
    }

    for source in source_paths {
        if output == *source {
            return Err(SyncError::UnsafeOutput(format!(
                "output '{}' cannot be the same as source '{}'",
                output.display(),
                source.display()
            )));
        }
    }

    for report in [MATCHED_CSV, AMBIGUOUS_CSV, AUDIBLE_ONLY_CSV] {
        if output_name == report {
            return Err(SyncError::UnsafeOutput(format!(
                "output '{}' would overwrite the {} report",
                output.display(),
                report
            )));
        }
    }

    Ok(())
}
