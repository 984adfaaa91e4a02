//! CSV sample files.
//!
//! A sample file holds one numeric column, one sample per row. A leading
//! header row is optional. Extra columns are ignored; rows whose first field
//! does not parse are skipped and reported.

use std::fs::File;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::error::CalError;
use crate::store::Channel;

/// A row that could not be used.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

/// Read a single-column sample CSV into a [`Channel`].
pub fn read_channel_csv(
    path: &Path,
    name: &str,
    interval: f64,
    start: DateTime<Utc>,
) -> Result<Channel, CalError> {
    let file = File::open(path)
        .map_err(|e| CalError::io(format!("Failed to open sample CSV '{}'", path.display()), e))?;
    let (samples, row_errors) = parse_samples(file)?;

    if !row_errors.is_empty() {
        tracing::warn!(
            file = %path.display(),
            skipped = row_errors.len(),
            first_line = row_errors[0].line,
            "skipped unreadable sample rows: {}",
            row_errors[0].message
        );
    }
    if samples.is_empty() {
        return Err(CalError::InsufficientData(format!(
            "no numeric samples in '{}'",
            path.display()
        )));
    }
    tracing::debug!(file = %path.display(), samples = samples.len(), "read channel");

    Channel::new(name, samples, interval, start)
}

fn parse_samples<R: std::io::Read>(reader: R) -> Result<(Vec<f64>, Vec<RowError>), CalError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut samples = Vec::new();
    let mut row_errors = Vec::new();

    for (idx, result) in reader.records().enumerate() {
        let line = idx + 1;
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        let field = record.get(0).unwrap_or("").trim_start_matches('\u{feff}');
        if field.is_empty() {
            continue;
        }
        match field.parse::<f64>() {
            Ok(v) if v.is_finite() => samples.push(v),
            Ok(v) => row_errors.push(RowError {
                line,
                message: format!("non-finite sample {v}"),
            }),
            // A non-numeric first row is a header.
            Err(_) if line == 1 => {}
            Err(e) => row_errors.push(RowError {
                line,
                message: format!("'{field}' is not a number: {e}"),
            }),
        }
    }

    Ok((samples, row_errors))
}

/// Write a channel as a single-column CSV with a `sample` header.
pub fn write_channel_csv(path: &Path, samples: &[f64]) -> Result<(), CalError> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| CalError::io(format!("Failed to create sample CSV '{}'", path.display()), e))?;
    writer
        .write_record(["sample"])
        .map_err(|e| CalError::io("Failed to write sample CSV header", e))?;
    for v in samples {
        writer
            .write_record([format!("{v:.12e}")])
            .map_err(|e| CalError::io("Failed to write sample CSV row", e))?;
    }
    writer
        .flush()
        .map_err(|e| CalError::io(format!("Failed to flush '{}'", path.display()), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_optional_and_bad_rows_are_skipped() {
        let with_header = "sample\n1.5\n-2\nabc\n3e-1,ignored\n";
        let (samples, errors) = parse_samples(with_header.as_bytes()).unwrap();
        assert_eq!(samples, vec![1.5, -2.0, 0.3]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].line, 4);

        let (samples, errors) = parse_samples("4\n5\n".as_bytes()).unwrap();
        assert_eq!(samples, vec![4.0, 5.0]);
        assert!(errors.is_empty());
    }

    #[test]
    fn csv_roundtrip_through_channel() {
        let path = std::env::temp_dir().join(format!("scal-samples-{}.csv", std::process::id()));
        write_channel_csv(&path, &[0.25, -1.0, 3.5]).unwrap();
        let ch = read_channel_csv(&path, "cal", 0.1, DateTime::<Utc>::default()).unwrap();
        assert_eq!(ch.samples(), &[0.25, -1.0, 3.5]);
        assert_eq!(ch.name(), "cal");
        std::fs::remove_file(&path).unwrap();
    }
}
