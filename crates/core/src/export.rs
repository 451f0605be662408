#![allow(missing_docs)]

//! Writing the final table of games.

use std::{
    fs::{self, File},
    io::BufWriter,
    path::Path,
};

use anyhow::{bail, Context, Result};
use rust_xlsxwriter::{Format, FormatAlign, Workbook};
use serde::Serialize;
use tracing::info;

use crate::{models::LocalRecord, overrides::OverrideRegistry};

const LINK_TEMPLATE: &str = "https://www.databaze-her.cz/h";
const SHEET_NAME: &str = "stats";
const HEADERS: [&str; 10] = [
    "Title",
    "Year",
    "Main",
    "Extra",
    "Complete",
    "All styles",
    "Want to play",
    "Finished",
    "Owned",
    "Link",
];
const COLUMN_WIDTHS: [f64; 10] = [45.0, 8.0, 14.0, 14.0, 18.0, 14.0, 13.0, 12.0, 13.0, 35.0];
/// Playtime columns summed in the totals row (C to F).
const HOURS_COLUMNS: std::ops::RangeInclusive<u16> = 2..=5;

/// Supported output formats, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Comma separated values.
    Csv,
    /// JSON array of row objects.
    Json,
    /// Excel workbook with links, filters and a totals row.
    Xlsx,
}

impl ExportFormat {
    /// Pick the format from the output path's extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        match extension.as_deref() {
            Some("csv") => Ok(Self::Csv),
            Some("json") => Ok(Self::Json),
            Some("xlsx") => Ok(Self::Xlsx),
            _ => bail!(
                "unsupported output extension for {} (expected .xlsx, .csv or .json)",
                path.display()
            ),
        }
    }
}

/// One line of the exported table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRow {
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Year")]
    pub year: Option<i32>,
    #[serde(rename = "Main")]
    pub main: Option<f64>,
    #[serde(rename = "Extra")]
    pub extra: Option<f64>,
    #[serde(rename = "Complete")]
    pub complete: Option<f64>,
    #[serde(rename = "All styles")]
    pub all_styles: Option<f64>,
    #[serde(rename = "Want to play")]
    pub wants_to_play: String,
    #[serde(rename = "Finished")]
    pub finished: String,
    #[serde(rename = "Owned")]
    pub owned: String,
    #[serde(rename = "Link")]
    pub link: String,
}

impl ExportRow {
    /// Build a row, substituting the closest known estimate for missing playtimes.
    pub fn from_record(record: &LocalRecord) -> Self {
        let times = &record.playtimes;
        let (main, extra, complete) = (
            times.main_hours,
            times.extra_hours,
            times.completionist_hours,
        );
        let finished = record
            .finished_on
            .map(|date| date.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| yes_no(record.finished));

        Self {
            title: record.title.clone(),
            year: record.release_year,
            main: main.or(extra).or(complete),
            extra: extra.or(main).or(complete),
            complete: complete.or(extra).or(main),
            all_styles: times.all_styles_hours.or(extra).or(main).or(complete),
            wants_to_play: yes_no(record.wants_to_play),
            finished,
            owned: yes_no(record.owned),
            link: format!("{LINK_TEMPLATE}{}", record.identity),
        }
    }
}

fn yes_no(value: Option<bool>) -> String {
    match value {
        Some(true) => "yes".to_string(),
        Some(false) => "no".to_string(),
        None => String::new(),
    }
}

/// Rows for every record, omitting ignored ones unless `include_ignored` is set.
pub fn table_rows(
    records: &[LocalRecord],
    overrides: &OverrideRegistry,
    include_ignored: bool,
) -> Vec<ExportRow> {
    records
        .iter()
        .filter(|record| include_ignored || !overrides.is_ignored(&record.identity))
        .map(ExportRow::from_record)
        .collect()
}

/// Write the table to `path` in the format implied by its extension.
pub fn export(
    records: &[LocalRecord],
    overrides: &OverrideRegistry,
    include_ignored: bool,
    path: &Path,
) -> Result<()> {
    let format = ExportFormat::from_path(path)?;
    let rows = table_rows(records, overrides, include_ignored);

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    match format {
        ExportFormat::Csv => {
            info!("writing results as CSV ...");
            let file = create_file(path)?;
            let mut writer = csv::Writer::from_writer(file);
            for row in &rows {
                writer.serialize(row).context("failed to write CSV row")?;
            }
            writer
                .flush()
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
        ExportFormat::Json => {
            info!("writing results as JSON ...");
            let file = create_file(path)?;
            serde_json::to_writer_pretty(BufWriter::new(file), &rows)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
        ExportFormat::Xlsx => {
            info!("writing results as XLSX ...");
            write_xlsx(&rows, path)?;
        }
    }

    info!("results saved to {} ({} games)", path.display(), rows.len());
    Ok(())
}

fn create_file(path: &Path) -> Result<File> {
    File::create(path).with_context(|| format!("failed to create {}", path.display()))
}

/// Single sheet with a bold frozen header, an autofilter, clickable links and
/// a `SUBTOTAL` row under the playtime columns, so totals follow the filter.
fn write_xlsx(rows: &[ExportRow], path: &Path) -> Result<()> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(SHEET_NAME)?;

    let header = Format::new().set_bold().set_align(FormatAlign::Center);
    let bold = Format::new().set_bold();
    let hours = Format::new().set_num_format("0.0");

    for (col, (title, width)) in (0u16..).zip(HEADERS.iter().zip(COLUMN_WIDTHS)) {
        sheet.write_string_with_format(0, col, *title, &header)?;
        sheet.set_column_width(col, width)?;
    }

    let mut last_row = 0u32;
    for (row, data) in (1u32..).zip(rows) {
        last_row = row;
        sheet.write_string(row, 0, data.title.as_str())?;
        if let Some(year) = data.year {
            sheet.write_number(row, 1, year)?;
        }
        let playtimes = [data.main, data.extra, data.complete, data.all_styles];
        for (col, value) in HOURS_COLUMNS.zip(playtimes) {
            if let Some(value) = value {
                sheet.write_number_with_format(row, col, value, &hours)?;
            }
        }
        for (col, text) in (6u16..).zip([&data.wants_to_play, &data.finished, &data.owned]) {
            if !text.is_empty() {
                sheet.write_string(row, col, text.as_str())?;
            }
        }
        sheet.write_url(row, 9, data.link.as_str())?;
    }

    sheet.set_freeze_panes(1, 0)?;
    sheet.autofilter(0, 0, last_row, (HEADERS.len() - 1) as u16)?;

    if !rows.is_empty() {
        let totals_row = last_row + 2;
        sheet.write_string_with_format(totals_row, 0, "Total (hours):", &bold)?;
        for col in HOURS_COLUMNS {
            let letter = char::from(b'A' + col as u8);
            let formula = format!("=SUBTOTAL(109,{letter}2:{letter}{})", last_row + 1);
            sheet.write_formula_with_format(totals_row, col, formula.as_str(), &hours)?;
        }
    }

    workbook
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use chrono::NaiveDate;
    use tempfile::tempdir;

    use super::*;
    use crate::models::Playtimes;

    fn sample() -> Vec<LocalRecord> {
        vec![
            LocalRecord {
                release_year: Some(2015),
                wants_to_play: Some(false),
                finished: Some(true),
                owned: Some(true),
                finished_on: NaiveDate::from_ymd_opt(2020, 3, 14),
                playtimes: Playtimes {
                    extra_hours: Some(20.5),
                    ..Playtimes::default()
                },
                ..LocalRecord::new("42", "Foo, Bar")
            },
            LocalRecord {
                wants_to_play: Some(true),
                ..LocalRecord::new("7", "Ignored One")
            },
        ]
    }

    fn ignoring_seven() -> OverrideRegistry {
        OverrideRegistry::new(HashMap::new(), HashSet::from(["7".to_string()]))
    }

    #[test]
    fn missing_playtimes_fall_back_to_closest_estimate() {
        let row = ExportRow::from_record(&sample()[0]);
        assert_eq!(row.main, Some(20.5));
        assert_eq!(row.extra, Some(20.5));
        assert_eq!(row.complete, Some(20.5));
        assert_eq!(row.finished, "2020-03-14");
        assert_eq!(row.wants_to_play, "no");
        assert_eq!(row.link, "https://www.databaze-her.cz/h42");
    }

    #[test]
    fn ignored_rows_are_filtered_unless_included() {
        let records = sample();
        assert_eq!(table_rows(&records, &ignoring_seven(), false).len(), 1);
        assert_eq!(table_rows(&records, &ignoring_seven(), true).len(), 2);
    }

    #[test]
    fn writes_csv_with_header() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("stats.csv");
        export(&sample(), &ignoring_seven(), false, &path)?;

        let written = fs::read_to_string(&path)?;
        let mut lines = written.lines();
        assert_eq!(
            lines.next(),
            Some("Title,Year,Main,Extra,Complete,All styles,Want to play,Finished,Owned,Link")
        );
        assert_eq!(
            lines.next(),
            Some("\"Foo, Bar\",2015,20.5,20.5,20.5,20.5,no,2020-03-14,yes,https://www.databaze-her.cz/h42")
        );
        assert_eq!(lines.next(), None);
        Ok(())
    }

    #[test]
    fn writes_json_rows() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("out").join("stats.json");
        export(&sample(), &ignoring_seven(), true, &path)?;

        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
        assert_eq!(value.as_array().map(Vec::len), Some(2));
        assert_eq!(value[1]["Title"], "Ignored One");
        assert!(value[1]["Main"].is_null());
        Ok(())
    }

    #[test]
    fn writes_xlsx_with_links_and_totals() -> Result<()> {
        use calamine::{open_workbook, Data, Reader, Xlsx};

        let dir = tempdir()?;
        let path = dir.path().join("stats.xlsx");
        export(&sample(), &ignoring_seven(), true, &path)?;

        let mut workbook: Xlsx<_> = open_workbook(&path)?;
        let values = workbook.worksheet_range(SHEET_NAME)?;
        assert!(matches!(values.get_value((0, 0)), Some(Data::String(text)) if text == "Title"));
        assert!(matches!(values.get_value((1, 0)), Some(Data::String(text)) if text == "Foo, Bar"));
        assert!(matches!(values.get_value((1, 2)), Some(Data::Float(hours)) if *hours == 20.5));
        assert!(matches!(
            values.get_value((1, 9)),
            Some(Data::String(link)) if link == "https://www.databaze-her.cz/h42"
        ));
        assert!(matches!(values.get_value((4, 0)), Some(Data::String(text)) if text == "Total (hours):"));

        let formulas = workbook.worksheet_formula(SHEET_NAME)?;
        let formulas: Vec<&String> = formulas.rows().flatten().filter(|f| !f.is_empty()).collect();
        assert_eq!(formulas.len(), 4);
        assert!(formulas[0].contains("SUBTOTAL(109,C2:C3)"));
        Ok(())
    }

    #[test]
    fn rejects_unknown_extension() {
        assert!(ExportFormat::from_path(Path::new("stats.ods")).is_err());
        assert_eq!(
            ExportFormat::from_path(Path::new("stats.xlsx")).unwrap(),
            ExportFormat::Xlsx
        );
        assert_eq!(
            ExportFormat::from_path(Path::new("STATS.CSV")).unwrap(),
            ExportFormat::Csv
        );
    }
}
