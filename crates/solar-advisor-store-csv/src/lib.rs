use std::fs;
use std::mem;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use solar_advisor_core::{Record, RecordStore};
use time::OffsetDateTime;

pub const LOCATION_COLUMN: &str = "Location";
pub const SUNLIGHT_HOURS_COLUMN: &str = "Sunlight_Hours";
pub const BUDGET_PKR_COLUMN: &str = "Budget_PKR";
pub const USAGE_KWH_COLUMN: &str = "Usage_kWh_per_month";
pub const RECOMMENDED_SYSTEM_COLUMN: &str = "Recommended_System";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DatasetInfo {
    pub source: String,
    pub sha256: String,
    pub record_count: usize,
    pub locations: Vec<String>,
    pub loaded_at: String,
}

/// A validated dataset loaded from CSV, plus metadata describing where it came from.
#[derive(Debug, Clone)]
pub struct CsvDataset {
    store: RecordStore,
    info: DatasetInfo,
}

#[derive(Debug, Clone, Copy)]
struct Column {
    name: &'static str,
    index: usize,
}

#[derive(Debug, Clone, Copy)]
struct Columns {
    location: Column,
    sunlight_hours: Column,
    budget_pkr: Column,
    usage_kwh_per_month: Column,
    recommended_system: Column,
}

impl CsvDataset {
    /// Read and validate a CSV dataset from disk.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read, is not UTF-8, lacks a required column,
    /// contains a non-numeric value in a numeric column, or has no data rows.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("failed to read dataset at {}", path.display()))?;
        let body = std::str::from_utf8(&bytes)
            .with_context(|| format!("dataset at {} is not valid UTF-8", path.display()))?;
        Self::parse(&path.display().to_string(), body)
    }

    /// Validate an in-memory CSV document. `source` is recorded in [`DatasetInfo`].
    ///
    /// # Errors
    /// Returns an error under the same conditions as [`CsvDataset::load`].
    pub fn parse(source: &str, body: &str) -> Result<Self> {
        let records = parse_records(body)
            .with_context(|| format!("failed to parse dataset from {source}"))?;
        let store = RecordStore::new(records)
            .with_context(|| format!("dataset from {source} failed validation"))?;

        let info = DatasetInfo {
            source: source.to_string(),
            sha256: format!("{:x}", Sha256::digest(body.as_bytes())),
            record_count: store.len(),
            locations: store.locations().to_vec(),
            loaded_at: now_rfc3339()?,
        };
        tracing::info!(
            source = %info.source,
            records = info.record_count,
            locations = info.locations.len(),
            "loaded solar dataset"
        );

        Ok(Self { store, info })
    }

    #[must_use]
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    #[must_use]
    pub fn info(&self) -> &DatasetInfo {
        &self.info
    }

    #[must_use]
    pub fn into_parts(self) -> (RecordStore, DatasetInfo) {
        (self.store, self.info)
    }
}

/// Parse dataset rows into records, locating columns by header name.
///
/// # Errors
/// Returns an error when the header lacks a required column or a row cannot be converted.
pub fn parse_records(body: &str) -> Result<Vec<Record>> {
    let mut rows = parse_rows(body.strip_prefix('\u{feff}').unwrap_or(body))?.into_iter();
    let header = rows.next().ok_or_else(|| anyhow!("dataset is empty: missing header row"))?;
    let columns = resolve_columns(&header)?;

    rows.enumerate()
        .map(|(index, row)| {
            record_from_row(&row, &columns).with_context(|| format!("data row {}", index + 1))
        })
        .collect()
}

fn resolve_columns(header: &[String]) -> Result<Columns> {
    let column = |name: &'static str| -> Result<Column> {
        header
            .iter()
            .position(|title| title.trim() == name)
            .map(|index| Column { name, index })
            .ok_or_else(|| anyhow!("dataset is missing required column `{name}`"))
    };

    Ok(Columns {
        location: column(LOCATION_COLUMN)?,
        sunlight_hours: column(SUNLIGHT_HOURS_COLUMN)?,
        budget_pkr: column(BUDGET_PKR_COLUMN)?,
        usage_kwh_per_month: column(USAGE_KWH_COLUMN)?,
        recommended_system: column(RECOMMENDED_SYSTEM_COLUMN)?,
    })
}

fn record_from_row(row: &[String], columns: &Columns) -> Result<Record> {
    Ok(Record {
        location: text_cell(row, columns.location)?.to_string(),
        sunlight_hours: numeric_cell(row, columns.sunlight_hours)?,
        budget_pkr: numeric_cell(row, columns.budget_pkr)?,
        usage_kwh_per_month: numeric_cell(row, columns.usage_kwh_per_month)?,
        recommended_system: text_cell(row, columns.recommended_system)?.to_string(),
    })
}

fn text_cell(row: &[String], column: Column) -> Result<&str> {
    row.get(column.index)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing value for `{}`", column.name))
}

fn numeric_cell(row: &[String], column: Column) -> Result<f64> {
    let raw = text_cell(row, column)?;
    raw.trim()
        .parse::<f64>()
        .with_context(|| format!("`{}` is not numeric: {raw:?}", column.name))
}

/// Split a CSV document into rows of fields.
///
/// Handles quoted fields with embedded commas, newlines and doubled quotes. Blank lines are
/// skipped.
fn parse_rows(body: &str) -> Result<Vec<Vec<String>>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut quoted_since_line = 0;
    let mut line = 1_usize;
    let mut chars = body.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(ch);
                }
                _ => field.push(ch),
            }
            continue;
        }

        match ch {
            '"' if field.is_empty() => {
                in_quotes = true;
                quoted_since_line = line;
            }
            ',' => row.push(mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                line += 1;
                row.push(mem::take(&mut field));
                push_row(&mut rows, mem::take(&mut row));
            }
            _ => field.push(ch),
        }
    }

    if in_quotes {
        bail!("unterminated quoted field starting on line {quoted_since_line}");
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        push_row(&mut rows, row);
    }
    Ok(rows)
}

fn push_row(rows: &mut Vec<Vec<String>>, row: Vec<String>) {
    let blank = row.len() == 1 && row[0].trim().is_empty();
    if !blank {
        rows.push(row);
    }
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    const SAMPLE: &str = "Location,Sunlight_Hours,Budget_PKR,Usage_kWh_per_month,Recommended_System\n\
                          Karachi,6,100000,300,3kW Hybrid\n\
                          Lahore,5,150000,400,5kW Hybrid\n";

    fn unique_temp_csv_path() -> PathBuf {
        std::env::temp_dir().join(format!("solar-advisor-store-{}.csv", ulid::Ulid::new()))
    }

    fn parse_ok(body: &str) -> CsvDataset {
        match CsvDataset::parse("inline", body) {
            Ok(dataset) => dataset,
            Err(err) => panic!("dataset should parse: {err:#}"),
        }
    }

    fn parse_err(body: &str) -> String {
        match CsvDataset::parse("inline", body) {
            Ok(dataset) => panic!("dataset should be rejected, got {:?}", dataset.info()),
            Err(err) => format!("{err:#}"),
        }
    }

    #[test]
    fn parses_records_in_file_order() {
        let dataset = parse_ok(SAMPLE);
        let records = dataset.store().records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].location, "Karachi");
        assert_eq!(records[0].sunlight_hours, 6.0);
        assert_eq!(records[0].budget_pkr, 100_000.0);
        assert_eq!(records[1].usage_kwh_per_month, 400.0);
        assert_eq!(records[1].recommended_system, "5kW Hybrid");
        assert_eq!(dataset.info().record_count, 2);
        assert_eq!(dataset.info().locations, vec!["Karachi".to_string(), "Lahore".to_string()]);
    }

    #[test]
    fn columns_are_resolved_by_header_name() {
        let body = "Recommended_System,Notes,Usage_kWh_per_month,Location,Budget_PKR,Sunlight_Hours\r\n\
                    \"4kW Hybrid, net-metered\",\"said \"\"ok\"\"\",350,Quetta,125000,8.5\r\n";
        let dataset = parse_ok(body);
        let record = &dataset.store().records()[0];
        assert_eq!(record.location, "Quetta");
        assert_eq!(record.recommended_system, "4kW Hybrid, net-metered");
        assert_eq!(record.sunlight_hours, 8.5);
        assert_eq!(record.budget_pkr, 125_000.0);
    }

    #[test]
    fn byte_order_mark_and_blank_lines_are_ignored() {
        let body = format!("\u{feff}{SAMPLE}\n\n");
        let dataset = parse_ok(&body);
        assert_eq!(dataset.store().len(), 2);
    }

    #[test]
    fn quoted_field_may_span_lines() {
        let rows = match parse_rows("a,b\n\"multi\nline\",2\n") {
            Ok(rows) => rows,
            Err(err) => panic!("rows should parse: {err}"),
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][0], "multi\nline");
    }

    #[test]
    fn missing_column_is_rejected() {
        let message = parse_err("Location,Sunlight_Hours,Budget_PKR,Recommended_System\nKarachi,6,1,x\n");
        assert!(message.contains("Usage_kWh_per_month"), "unexpected error: {message}");
    }

    #[test]
    fn non_numeric_cell_names_row_and_column() {
        let body = "Location,Sunlight_Hours,Budget_PKR,Usage_kWh_per_month,Recommended_System\n\
                    Karachi,6,100000,300,3kW Hybrid\n\
                    Lahore,5,lots,400,5kW Hybrid\n";
        let message = parse_err(body);
        assert!(message.contains("data row 2"), "unexpected error: {message}");
        assert!(message.contains("Budget_PKR"), "unexpected error: {message}");
    }

    #[test]
    fn short_row_is_rejected() {
        let message = parse_err(
            "Location,Sunlight_Hours,Budget_PKR,Usage_kWh_per_month,Recommended_System\nKarachi,6,100000\n",
        );
        assert!(message.contains("missing value"), "unexpected error: {message}");
    }

    #[test]
    fn header_only_dataset_is_rejected() {
        let message =
            parse_err("Location,Sunlight_Hours,Budget_PKR,Usage_kWh_per_month,Recommended_System\n");
        assert!(message.contains("no records"), "unexpected error: {message}");
    }

    #[test]
    fn unterminated_quote_is_rejected() {
        let message = parse_err("Location,Sunlight_Hours\n\"Karachi,6\n");
        assert!(message.contains("unterminated"), "unexpected error: {message}");
    }

    #[test]
    fn load_reads_file_and_fingerprints_contents() {
        let path = unique_temp_csv_path();
        if let Err(err) = fs::write(&path, SAMPLE) {
            panic!("failed to write fixture {}: {err}", path.display());
        }

        let first = match CsvDataset::load(&path) {
            Ok(dataset) => dataset,
            Err(err) => panic!("dataset should load: {err:#}"),
        };
        let second = match CsvDataset::load(&path) {
            Ok(dataset) => dataset,
            Err(err) => panic!("dataset should load: {err:#}"),
        };
        assert_eq!(first.info().sha256, second.info().sha256);
        assert_eq!(first.info().sha256.len(), 64);
        assert_eq!(first.info().source, path.display().to_string());
        assert_eq!(first.store(), second.store());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn load_missing_file_reports_path() {
        let path = unique_temp_csv_path();
        let message = match CsvDataset::load(&path) {
            Ok(_) => panic!("missing dataset should not load"),
            Err(err) => format!("{err:#}"),
        };
        assert!(message.contains("failed to read dataset"), "unexpected error: {message}");
    }

    #[test]
    fn dataset_info_serializes_with_snake_case_fields() {
        let dataset = parse_ok(SAMPLE);
        let value = match serde_json::to_value(dataset.info()) {
            Ok(value) => value,
            Err(err) => panic!("info should serialize: {err}"),
        };
        assert_eq!(value["record_count"], serde_json::json!(2));
        assert!(value["loaded_at"].as_str().is_some_and(|loaded_at| loaded_at.contains('T')));
    }
}
