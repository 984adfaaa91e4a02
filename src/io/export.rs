//! JSON exports of run summaries and models.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::error::CalError;

/// Pretty-print any serializable value to `path`.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), CalError> {
    let file = File::create(path)
        .map_err(|e| CalError::io(format!("Failed to create JSON '{}'", path.display()), e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .map_err(|e| CalError::io(format!("Failed to write JSON '{}'", path.display()), e))?;
    writer
        .flush()
        .map_err(|e| CalError::io(format!("Failed to flush '{}'", path.display()), e))?;
    tracing::debug!(file = %path.display(), "wrote JSON export");
    Ok(())
}

/// Serialize to a pretty JSON string for stdout.
pub fn to_json_string<T: Serialize + ?Sized>(value: &T) -> Result<String, CalError> {
    serde_json::to_string_pretty(value).map_err(|e| CalError::io("Failed to serialize result", e))
}
