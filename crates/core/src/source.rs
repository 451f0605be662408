//! Reading collection rows from saved catalog pages.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::models::LocalRecord;

const SOURCE_EXTENSIONS: &[&str] = &["html", "htm", "json"];

static ROW_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("tr[data-id]").expect("invalid row selector"));
static HEADER_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("thead tr").expect("invalid header selector"));
static TITLE_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a.game-title").expect("invalid title selector"));
static SPAN_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("span[class]").expect("invalid span selector"));

/// Expand the given paths into source files, walking directories in name order.
pub fn discover_sources(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|path| is_source_file(path))
                .collect();
            if found.is_empty() {
                warn!("no saved pages found in {}", path.display());
            }
            files.append(&mut found);
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            anyhow::bail!("input {} does not exist", path.display());
        }
    }
    Ok(files)
}

fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SOURCE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Read every input in order and return the tracked rows, unmerged.
pub fn load_sources(paths: &[PathBuf]) -> Result<Vec<LocalRecord>> {
    let mut records = Vec::new();
    for path in discover_sources(paths)? {
        records.extend(load_source(&path)?);
    }
    Ok(records)
}

/// Read one saved page (or JSON export) and return its tracked rows.
pub fn load_source(path: &Path) -> Result<Vec<LocalRecord>> {
    info!("reading {} ...", path.display());
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let records = if is_json {
        let records: Vec<LocalRecord> = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        records.into_iter().filter(LocalRecord::is_tracked).collect()
    } else {
        parse_catalog_page(&content)
    };

    info!("found {} games", records.len());
    Ok(records)
}

/// Extract tracked games from a saved user game list page.
pub fn parse_catalog_page(html: &str) -> Vec<LocalRecord> {
    let document = Html::parse_document(html);
    let finish_column = document
        .select(&HEADER_SEL)
        .next()
        .and_then(|header| {
            child_elements(header, "th").position(|cell| {
                let text = element_text(cell);
                text.contains("Datum") && text.contains("dohrání")
            })
        });

    let mut records = Vec::new();
    for row in document.select(&ROW_SEL) {
        let identity = row.value().attr("data-id").unwrap_or_default().trim().to_string();

        let Some(title) = row.select(&TITLE_SEL).next() else {
            warn!("skipping row {identity}: no title");
            continue;
        };
        let release_year = title
            .next_siblings()
            .find_map(|node| {
                node.value()
                    .as_text()
                    .map(|text| text.trim().to_string())
                    .filter(|text| !text.is_empty())
            })
            .map(|text| text.trim_matches(|ch| ch == '(' || ch == ')').trim().to_string())
            .filter(|year| !year.is_empty() && year.chars().all(|ch| ch.is_ascii_digit()))
            .and_then(|year| year.parse().ok());

        let mut record = LocalRecord {
            release_year,
            ..LocalRecord::new(identity, element_text(title))
        };
        for span in row.select(&SPAN_SEL) {
            let classes: Vec<&str> = span.value().classes().collect();
            let active = !classes.contains(&"-inactive");
            if classes.contains(&"-own") {
                record.owned = Some(active);
            } else if classes.contains(&"-wish") {
                record.wants_to_play = Some(active);
            } else if classes.contains(&"-finished") {
                record.finished = Some(active);
            }
        }

        if let Some(column) = finish_column {
            record.finished_on = child_elements(row, "td")
                .nth(column)
                .and_then(|cell| NaiveDate::parse_from_str(&element_text(cell), "%d.%m.%Y").ok());
        }

        if record.is_tracked() {
            records.push(record);
        }
    }
    records
}

fn child_elements<'a>(
    parent: ElementRef<'a>,
    name: &'a str,
) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    parent
        .children()
        .filter_map(ElementRef::wrap)
        .filter(move |child| child.value().name() == name)
}

/// Text content with whitespace collapsed. Entities are already decoded by the parser.
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const FINISHED_PAGE: &str = r#"
<div id="user-games"><table>
<thead><tr><th>Hra</th><th>Stav</th><th>Datum<br>dohrání</th></tr></thead>
<tbody>
<tr data-id="42">
  <td><a class="game-title" href="/h42">Foo: Bar</a> (2015)</td>
  <td><span class="icon -own"></span><span class="icon -wish -inactive"></span><span class="icon -finished"></span></td>
  <td>14.03.2020</td>
</tr>
<tr data-id="43">
  <td><a class="game-title" href="/h43">Tom &amp; Jerry&#39;s &quot;Quest&quot;</a> (TBA)</td>
  <td><span class="icon -own -inactive"></span><span class="icon -wish"></span><span class="icon -finished -inactive"></span></td>
  <td></td>
</tr>
<tr data-id="44">
  <td><a class="game-title" href="/h44">Shelved</a> (1999)</td>
  <td><span class="icon -own"></span><span class="icon -wish -inactive"></span><span class="icon -finished -inactive"></span></td>
  <td></td>
</tr>
</tbody></table></div>"#;

    #[test]
    fn parses_rows_and_flags() {
        let records = parse_catalog_page(FINISHED_PAGE);
        assert_eq!(records.len(), 2, "untracked rows are dropped");

        let foo = &records[0];
        assert_eq!(foo.identity, "42");
        assert_eq!(foo.title, "Foo: Bar");
        assert_eq!(foo.release_year, Some(2015));
        assert_eq!(foo.owned, Some(true));
        assert_eq!(foo.wants_to_play, Some(false));
        assert_eq!(foo.finished, Some(true));
        assert_eq!(foo.finished_on, NaiveDate::from_ymd_opt(2020, 3, 14));

        let quest = &records[1];
        assert_eq!(quest.title, "Tom & Jerry's \"Quest\"");
        assert_eq!(quest.release_year, None);
        assert_eq!(quest.wants_to_play, Some(true));
        assert_eq!(quest.finished_on, None);
    }

    #[test]
    fn named_entities_are_decoded() {
        let page = FINISHED_PAGE.replace("Foo: Bar", "Foo &ndash; Bar&hellip; Pok&eacute;mon");
        let records = parse_catalog_page(&page);
        assert_eq!(records[0].title, "Foo \u{2013} Bar\u{2026} Pok\u{e9}mon");
    }

    #[test]
    fn finish_date_is_read_from_its_own_column() {
        let page = r#"
<div id="user-games"><table>
<thead><tr><th>Hra</th><th>Stav</th><th>Datum přidání</th><th>Datum<br>dohrání</th></tr></thead>
<tbody>
<tr data-id="42">
  <td><a class="game-title" href="/h42">Foo</a> (2015)</td>
  <td><span class="icon -finished"></span></td>
  <td>01.01.2010</td>
  <td>14.03.2020</td>
</tr>
</tbody></table></div>"#;
        let records = parse_catalog_page(page);
        assert_eq!(records[0].finished_on, NaiveDate::from_ymd_opt(2020, 3, 14));
    }

    #[test]
    fn finish_date_needs_header() {
        let page = FINISHED_PAGE.replace("Datum<br>dohrání", "Hodnocení");
        let records = parse_catalog_page(&page);
        assert_eq!(records[0].finished_on, None);
    }

    #[test]
    fn loads_directories_and_json_in_order() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("b.html"), FINISHED_PAGE)?;
        fs::write(
            dir.path().join("a.json"),
            r#"[{"identity": "7", "title": "Seven", "finished": true},
                {"identity": "8", "title": "Eight"}]"#,
        )?;
        fs::write(dir.path().join("notes.txt"), "ignored")?;

        let records = load_sources(&[dir.path().to_path_buf()])?;
        let ids: Vec<_> = records.iter().map(|record| record.identity.as_str()).collect();
        assert_eq!(ids, vec!["7", "42", "43"]);
        Ok(())
    }

    #[test]
    fn missing_input_is_an_error() {
        let err = load_sources(&[PathBuf::from("/definitely/not/here.html")]).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
