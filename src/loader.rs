// 📂 Tabular interchange - header mapping, per-year union, stage tables
// Reading resolves varying source headers to the five canonical columns;
// writing emits one CSV per pipeline stage plus the JSON trend report.

use crate::aggregator::{IntegrityFlag, OrgYearAggregate, OrgYearCount, YearlyTopOrg};
use crate::annual::AnnualProportion;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::record::{MarkedRecord, RawAppointment};
use anyhow::{Context, Result};
use csv::{ReaderBuilder, StringRecord, Writer};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const REQUIRED_COLUMNS: [&str; 5] = ["reappointed", "name", "position", "org", "year"];

// ============================================================================
// READING
// ============================================================================

/// Read the combined table (stage 2 -> 3 input)
pub fn read_combined(path: &Path, config: &PipelineConfig) -> Result<Vec<RawAppointment>> {
    let rows = read_table(path, config, None)?;
    if rows.is_empty() {
        return Err(PipelineError::EmptyInput {
            what: format!("no data rows in {}", path.display()),
        }
        .into());
    }
    info!(rows = rows.len(), file = %path.display(), "loaded combined table");
    Ok(rows)
}

/// Read one per-year source table, stamping `year` where the file has none
pub fn read_yearly_file(
    path: &Path,
    year: i32,
    config: &PipelineConfig,
) -> Result<Vec<RawAppointment>> {
    read_table(path, config, Some(year))
}

/// Union every `*_YYYY.csv` (any stem ending in a 4-digit year) in `dir`,
/// ordered by year then file name
pub fn combine_yearly_files(dir: &Path, config: &PipelineConfig) -> Result<Vec<RawAppointment>> {
    let mut sources: Vec<(i32, PathBuf)> = Vec::new();

    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?;
    for entry in entries {
        let path = entry.with_context(|| format!("Failed to list {}", dir.display()))?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("csv") {
            continue;
        }
        match year_from_file_name(&path) {
            Some(year) => sources.push((year, path)),
            None => warn!(file = %path.display(), "skipping CSV without a year in its name"),
        }
    }

    if sources.is_empty() {
        return Err(PipelineError::EmptyInput {
            what: format!("no yearly CSV files in {}", dir.display()),
        }
        .into());
    }

    sources.sort();

    let mut combined = Vec::new();
    for (year, path) in &sources {
        let rows = read_yearly_file(path, *year, config)?;
        info!(year, rows = rows.len(), file = %path.display(), "loaded yearly table");
        combined.extend(rows);
    }

    if combined.is_empty() {
        return Err(PipelineError::EmptyInput {
            what: format!("yearly files in {} contain no rows", dir.display()),
        }
        .into());
    }

    Ok(combined)
}

/// Trailing 4-digit year of the file stem: "appointments_2015.csv" -> 2015
pub fn year_from_file_name(path: &Path) -> Option<i32> {
    let stem = path.file_stem()?.to_str()?;
    let digits: String = stem.chars().rev().take_while(|c| c.is_ascii_digit()).collect();
    if digits.len() != 4 {
        return None;
    }
    digits.chars().rev().collect::<String>().parse().ok()
}

fn read_table(
    path: &Path,
    config: &PipelineConfig,
    stamp_year: Option<i32>,
) -> Result<Vec<RawAppointment>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file);

    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read headers of {}", path.display()))?
        .clone();
    let columns = map_columns(&headers, config);

    for column in REQUIRED_COLUMNS {
        if column == "year" && stamp_year.is_some() {
            continue;
        }
        if !columns.contains_key(column) {
            return Err(PipelineError::MissingColumn {
                column: column.to_string(),
                source_name: path.display().to_string(),
            }
            .into());
        }
    }

    let mut rows = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let record = result.with_context(|| {
            format!("Failed to parse CSV line {} in {}", line + 2, path.display())
        })?;

        let field = |column: &str| columns.get(column).and_then(|&i| cell(&record, i));
        // Exported blanks in the flag and year columns; text columns keep "Nan" as a name
        let coded = |column: &str| field(column).filter(|v| !v.eq_ignore_ascii_case("nan"));

        let year = coded("year").or_else(|| stamp_year.map(|y| y.to_string()));

        rows.push(RawAppointment {
            reappointed: coded("reappointed"),
            name: field("name"),
            position: field("position"),
            org: field("org"),
            year,
        });
    }

    Ok(rows)
}

/// Canonical column -> index; the first header mapping to a column wins
fn map_columns(headers: &StringRecord, config: &PipelineConfig) -> HashMap<String, usize> {
    let mut columns = HashMap::new();
    for (i, header) in headers.iter().enumerate() {
        if let Some(canonical) = config.canonical_column(header) {
            columns.entry(canonical.to_string()).or_insert(i);
        }
    }
    columns
}

/// Blank cells are absent
fn cell(record: &StringRecord, index: usize) -> Option<String> {
    let value = record.get(index)?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

// ============================================================================
// WRITING
// ============================================================================

#[derive(Serialize)]
struct MarkedRow<'a> {
    reappointed: bool,
    name: Option<&'a str>,
    position: Option<&'a str>,
    org: Option<&'a str>,
    year: Option<i32>,
    identity_status: &'static str,
}

#[derive(Serialize)]
struct RateRow<'a> {
    org: &'a str,
    year: i32,
    total_appointments: u64,
    reappointment_count: u64,
    reappointment_rate: f64,
    integrity_flags: String,
}

#[derive(Serialize)]
struct TopOrgRow<'a> {
    year: i32,
    top_org: Option<&'a str>,
    max_rate: f64,
}

#[derive(Serialize)]
struct AnnualRow {
    year: i32,
    total_appointments: u64,
    total_reappointments: u64,
    reappointment_proportion: f64,
}

fn write_rows<T: Serialize>(path: &Path, rows: impl IntoIterator<Item = T>) -> Result<()> {
    let mut writer = Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("Failed to write row to {}", path.display()))?;
    }
    writer.flush().with_context(|| format!("Failed to flush {}", path.display()))?;
    Ok(())
}

/// Combined table in canonical column order
pub fn write_combined(path: &Path, rows: &[RawAppointment]) -> Result<()> {
    write_rows(path, rows)
}

/// Stage 3: reappointed, name, position, org, year (+ identity status)
pub fn write_marked(path: &Path, marked: &[MarkedRecord]) -> Result<()> {
    write_rows(
        path,
        marked.iter().map(|m| MarkedRow {
            reappointed: m.reappointed,
            name: m.record.name.as_deref(),
            position: m.record.position.as_deref(),
            org: m.record.org.as_deref(),
            year: m.record.year,
            identity_status: m.status.as_str(),
        }),
    )
}

/// Stages 4 and 5: org, year, `<count_column>`
pub fn write_counts(path: &Path, counts: &[OrgYearCount], count_column: &str) -> Result<()> {
    let mut writer = Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record(["org", "year", count_column])?;
    for c in counts {
        writer.write_record([c.org.clone(), c.year.to_string(), c.count.to_string()])?;
    }
    writer.flush().with_context(|| format!("Failed to flush {}", path.display()))?;
    Ok(())
}

/// Stage 6: org, year, total_appointments, reappointment_count, reappointment_rate
pub fn write_rates(
    path: &Path,
    aggregates: &[OrgYearAggregate],
    clamp_for_display: bool,
) -> Result<()> {
    write_rows(
        path,
        aggregates.iter().map(|a| RateRow {
            org: &a.org,
            year: a.year,
            total_appointments: a.total_appointments,
            reappointment_count: a.reappointment_count,
            reappointment_rate: a.display_rate(clamp_for_display),
            integrity_flags: a
                .flags
                .iter()
                .map(IntegrityFlag::as_str)
                .collect::<Vec<_>>()
                .join(";"),
        }),
    )
}

/// Stage 7: year, top_org, max_rate
pub fn write_top_orgs(path: &Path, top: &[YearlyTopOrg]) -> Result<()> {
    write_rows(
        path,
        top.iter().map(|t| TopOrgRow {
            year: t.year,
            top_org: t.org.as_deref(),
            max_rate: t.max_rate,
        }),
    )
}

/// Stage 8: year, total_appointments, total_reappointments, reappointment_proportion
pub fn write_annual(path: &Path, annual: &[AnnualProportion]) -> Result<()> {
    write_rows(
        path,
        annual.iter().map(|a| AnnualRow {
            year: a.year,
            total_appointments: a.total_appointments,
            total_reappointments: a.total_reappointments,
            reappointment_proportion: a.proportion,
        }),
    )
}

/// Stage 9: pretty-printed JSON
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize report")?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_read_combined_maps_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "combined.csv",
            "Name,Position,Organization,Reappointed,Year,Extra\n\
             J Smith,Board Member,Dept X,No,2015,a\n\
             A Lee,Chair,Dept Y,,2016,b\n",
        );

        let rows = read_combined(&path, &PipelineConfig::default()).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name.as_deref(), Some("J Smith"));
        assert_eq!(rows[0].org.as_deref(), Some("Dept X"));
        assert_eq!(rows[0].reappointed.as_deref(), Some("No"));
        assert_eq!(rows[1].reappointed, None);
        assert_eq!(rows[1].year.as_deref(), Some("2016"));
    }

    #[test]
    fn test_nan_is_blank_only_in_coded_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "combined.csv",
            "reappointed,name,position,org,year\n\
             NaN,Nan,Chair,Org,nan\n\
             no,,Chair,Org,2017\n",
        );

        let rows = read_combined(&path, &PipelineConfig::default()).unwrap();

        assert_eq!(rows[0].name.as_deref(), Some("Nan"));
        assert_eq!(rows[0].reappointed, None);
        assert_eq!(rows[0].year, None);
        assert_eq!(rows[1].name, None);
    }

    #[test]
    fn test_missing_column_is_structural_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "combined.csv", "name,position,org,year\nA,B,C,2015\n");

        let err = read_combined(&path, &PipelineConfig::default()).unwrap_err();

        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::MissingColumn { column, .. }) => assert_eq!(column, "reappointed"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_empty_input_is_structural_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "combined.csv", "reappointed,name,position,org,year\n");

        let err = read_combined(&path, &PipelineConfig::default()).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::EmptyInput { .. })
        ));
    }

    #[test]
    fn test_year_from_file_name() {
        assert_eq!(year_from_file_name(Path::new("appointments_2015.csv")), Some(2015));
        assert_eq!(year_from_file_name(Path::new("data/2021.csv")), Some(2021));
        assert_eq!(year_from_file_name(Path::new("notes.csv")), None);
        assert_eq!(year_from_file_name(Path::new("run_12015.csv")), None);
    }

    #[test]
    fn test_combine_yearly_files_stamps_year() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "appointments_2016.csv",
            "name,position,org,reappointed\nB,Chair,Org,yes\n",
        );
        write_file(
            dir.path(),
            "appointments_2015.csv",
            "name,position,org,reappointed\nA,Chair,Org,no\nC,Member,Org,\n",
        );
        write_file(dir.path(), "readme.txt", "ignored");

        let rows = combine_yearly_files(dir.path(), &PipelineConfig::default()).unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].year.as_deref(), Some("2015"));
        assert_eq!(rows[1].name.as_deref(), Some("C"));
        assert_eq!(rows[2].year.as_deref(), Some("2016"));
        assert_eq!(rows[2].reappointed.as_deref(), Some("yes"));
    }

    #[test]
    fn test_combine_empty_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(combine_yearly_files(dir.path(), &PipelineConfig::default()).is_err());
    }

    #[test]
    fn test_write_annual_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("annual.csv");
        let annual = vec![AnnualProportion {
            year: 2015,
            total_appointments: 4,
            total_reappointments: 1,
            proportion: 0.25,
        }];

        write_annual(&path, &annual).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next(),
            Some("year,total_appointments,total_reappointments,reappointment_proportion")
        );
        assert_eq!(lines.next(), Some("2015,4,1,0.25"));
    }

    #[test]
    fn test_write_counts_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counts.csv");
        let counts = vec![OrgYearCount {
            org: "Dept X".to_string(),
            year: 2015,
            count: 3,
        }];

        write_counts(&path, &counts, "total_appointments").unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "org,year,total_appointments\nDept X,2015,3\n");
    }

    #[test]
    fn test_write_rates_flags_match_report_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rates.csv");
        let rates = vec![OrgYearAggregate {
            org: "Dept X".to_string(),
            year: 2015,
            total_appointments: 2,
            reappointment_count: 3,
            reappointment_rate: 1.5,
            flags: vec![IntegrityFlag::CountExceedsTotal, IntegrityFlag::RateAboveOne],
        }];

        write_rates(&path, &rates, true).unwrap();

        let rows: Vec<StringRecord> = csv::Reader::from_path(&path)
            .unwrap()
            .records()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(&rows[0][4], "1.0");
        assert_eq!(&rows[0][5], "count_exceeds_total;rate_above_one");

        let json = serde_json::to_string(&rates[0].flags).unwrap();
        assert_eq!(json, r#"["count_exceeds_total","rate_above_one"]"#);
    }
}
