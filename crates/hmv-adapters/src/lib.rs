//! Record extraction for HackMyVM machine listings, writeup tables and the
//! achievement dataset, plus listing pagination.
//!
//! Every extractor is pure: it takes an already fetched document and turns
//! each row into a [`RowOutcome`]. A malformed row is counted in
//! [`Extraction::skipped`] and never fails the whole document; only
//! [`parse_document`] and the dataset header read can fail.

use hmv_core::{AchievementRecord, Difficulty, MachineRecord, WriteupRecord, SITE_ORIGIN};
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::debug;
use url::Url;

pub const CRATE_NAME: &str = "hmv-adapters";

const UNKNOWN_FIELD: &str = "?";
const NEXT_GLYPH: char = '»';
const ACHIEVEMENT_COLUMNS: usize = 6;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unparseable document: {0}")]
    Parse(String),
    #[error("invalid selector `{selector}`: {reason}")]
    Selector { selector: String, reason: String },
}

/// Result of extracting a single row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome<T> {
    Record(T),
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction<T> {
    pub records: Vec<T>,
    pub skipped: usize,
}

impl<T> Default for Extraction<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            skipped: 0,
        }
    }
}

impl<T> FromIterator<RowOutcome<T>> for Extraction<T> {
    fn from_iter<I: IntoIterator<Item = RowOutcome<T>>>(iter: I) -> Self {
        let mut out = Self::default();
        for outcome in iter {
            match outcome {
                RowOutcome::Record(record) => out.records.push(record),
                RowOutcome::Skipped => out.skipped += 1,
            }
        }
        out
    }
}

/// Parses a fetched page. Only a body with no markup at all is rejected.
pub fn parse_document(text: &str) -> Result<Html, ExtractError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ExtractError::Parse("empty response body".to_string()));
    }
    if !trimmed.contains('<') {
        return Err(ExtractError::Parse("response body contains no markup".to_string()));
    }
    Ok(Html::parse_document(text))
}

fn selector(css: &str) -> Result<Selector, ExtractError> {
    Selector::parse(css).map_err(|e| ExtractError::Selector {
        selector: css.to_string(),
        reason: e.to_string(),
    })
}

fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Concatenated, individually trimmed text nodes of an element.
fn element_text(element: ElementRef<'_>) -> Option<String> {
    text_or_none(element.text().map(str::trim).collect::<String>())
}

fn first_text(scope: ElementRef<'_>, sel: &Selector) -> Option<String> {
    scope.select(sel).next().and_then(element_text)
}

/// Last whitespace-separated token of the `border-top` declaration.
fn border_top_color(style: &str) -> Option<&str> {
    style
        .split(';')
        .filter_map(|decl| decl.split_once(':'))
        .find(|(property, _)| property.trim().eq_ignore_ascii_case("border-top"))
        .and_then(|(_, value)| value.split_whitespace().last())
}

pub fn difficulty_from_style(style: Option<&str>) -> Difficulty {
    style
        .and_then(border_top_color)
        .map(Difficulty::from_border_color)
        .unwrap_or(Difficulty::Unknown)
}

/// Classifies the platform icon title.
pub fn platform_from_title(title: Option<&str>) -> String {
    match title {
        Some(t) if t.contains("Linux") => "Linux".to_string(),
        Some(t) if t.contains("Windows") => "Windows".to_string(),
        Some(t) => t.to_string(),
        None => UNKNOWN_FIELD.to_string(),
    }
}

/// Field selectors for one machine listing row.
struct MachineRowSchema {
    row: Selector,
    cell: Selector,
    name: Selector,
    difficulty: Selector,
    status: Selector,
    icon: Selector,
    creator: Selector,
    size: Selector,
}

impl MachineRowSchema {
    fn compile() -> Result<Self, ExtractError> {
        Ok(Self {
            row: selector("tr")?,
            cell: selector("td")?,
            name: selector("h4.vmname")?,
            difficulty: selector(r#"div[style*="border-top"]"#)?,
            status: selector("span.badge")?,
            icon: selector("img")?,
            creator: selector("a.creator")?,
            size: selector("p.size")?,
        })
    }

    fn extract_row(&self, row: ElementRef<'_>) -> RowOutcome<MachineRecord> {
        let Some(name) = first_text(row, &self.name) else {
            return RowOutcome::Skipped;
        };

        let difficulty = difficulty_from_style(
            row.select(&self.difficulty)
                .next()
                .and_then(|div| div.value().attr("style")),
        );
        let status = first_text(row, &self.status).unwrap_or_else(|| UNKNOWN_FIELD.to_string());

        let cells: Vec<ElementRef<'_>> = row.select(&self.cell).collect();
        let platform = cells
            .first()
            .and_then(|cell| cell.select(&self.icon).nth(1))
            .map(|icon| platform_from_title(icon.value().attr("title")))
            .unwrap_or_else(|| UNKNOWN_FIELD.to_string());
        let author = cells
            .get(1)
            .and_then(|cell| first_text(*cell, &self.creator).or_else(|| element_text(*cell)))
            .unwrap_or_else(|| UNKNOWN_FIELD.to_string());
        let size = cells
            .get(2)
            .and_then(|cell| first_text(*cell, &self.size))
            .unwrap_or_else(|| UNKNOWN_FIELD.to_string());

        RowOutcome::Record(MachineRecord {
            name,
            difficulty,
            platform,
            author,
            size,
            status,
        })
    }
}

/// Machine rows of a listing page, in page order.
pub fn extract_machines(document: &Html) -> Result<Extraction<MachineRecord>, ExtractError> {
    let schema = MachineRowSchema::compile()?;
    let extraction: Extraction<MachineRecord> = document
        .select(&schema.row)
        .map(|row| schema.extract_row(row))
        .collect();
    debug!(
        records = extraction.records.len(),
        skipped = extraction.skipped,
        "extracted machine rows"
    );
    Ok(extraction)
}

struct WriteupRowSchema {
    row: Selector,
    cell: Selector,
    link: Selector,
    base: Url,
}

impl WriteupRowSchema {
    fn compile() -> Result<Self, ExtractError> {
        Ok(Self {
            row: selector("tr")?,
            cell: selector("td")?,
            link: selector("a")?,
            base: Url::parse(SITE_ORIGIN).map_err(|e| ExtractError::Parse(e.to_string()))?,
        })
    }

    fn extract_row(&self, row: ElementRef<'_>) -> RowOutcome<WriteupRecord> {
        let cells: Vec<ElementRef<'_>> = row.select(&self.cell).collect();
        if cells.len() < 4 {
            return RowOutcome::Skipped;
        }
        let Some(vm_title) = cells[0].select(&self.link).next().and_then(element_text) else {
            return RowOutcome::Skipped;
        };
        let Some(href) = cells[3]
            .select(&self.link)
            .next()
            .and_then(|a| a.value().attr("href"))
        else {
            return RowOutcome::Skipped;
        };
        let Ok(writeup_url) = self.base.join(href.trim()) else {
            return RowOutcome::Skipped;
        };

        RowOutcome::Record(WriteupRecord {
            vm_title,
            author: element_text(cells[1]).unwrap_or_default(),
            language: element_text(cells[2]).unwrap_or_default(),
            writeup_url: writeup_url.to_string(),
        })
    }
}

/// Writeup rows of the writeup table page.
pub fn extract_writeups(document: &Html) -> Result<Extraction<WriteupRecord>, ExtractError> {
    let schema = WriteupRowSchema::compile()?;
    let extraction: Extraction<WriteupRecord> = document
        .select(&schema.row)
        .map(|row| schema.extract_row(row))
        .collect();
    debug!(
        records = extraction.records.len(),
        skipped = extraction.skipped,
        "extracted writeup rows"
    );
    Ok(extraction)
}

fn achievement_row(row: csv::Result<csv::StringRecord>) -> RowOutcome<AchievementRecord> {
    let Ok(row) = row else {
        return RowOutcome::Skipped;
    };
    if row.len() < ACHIEVEMENT_COLUMNS {
        return RowOutcome::Skipped;
    }
    let Ok(id) = row[0].trim().parse::<u64>() else {
        return RowOutcome::Skipped;
    };
    let field = |idx: usize| row[idx].trim().to_string();
    RowOutcome::Record(AchievementRecord {
        id,
        nickname: field(1),
        date: field(2),
        vm_title: field(3),
        difficulty: field(4),
        rank: field(5),
    })
}

/// Achievement rows of the tabular dataset.
///
/// Columns are positional: `id, nickname, date, vm_title, difficulty, rank`.
pub fn extract_achievements(text: &str) -> Result<Extraction<AchievementRecord>, ExtractError> {
    if text.trim().is_empty() {
        return Err(ExtractError::Parse("empty achievement dataset".to_string()));
    }
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());
    reader
        .headers()
        .map_err(|e| ExtractError::Parse(format!("achievement dataset header: {e}")))?;

    let extraction: Extraction<AchievementRecord> =
        reader.records().map(achievement_row).collect();
    debug!(
        records = extraction.records.len(),
        skipped = extraction.skipped,
        "extracted achievement rows"
    );
    Ok(extraction)
}

fn pagination_link_text(document: &Html, from_end: usize) -> Option<String> {
    let sel = selector(&format!("nav ul li:nth-last-child({from_end}) a")).ok()?;
    document
        .select(&sel)
        .next()
        .map(|a| a.text().collect::<String>().trim().to_string())
}

fn parse_page_fraction(text: &str) -> Option<u32> {
    text.split('/')
        .nth(1)
        .and_then(|total| total.trim().parse::<u32>().ok())
        .filter(|total| *total >= 1)
}

/// Total listing pages from the `current/total` pagination link; 1 when absent or unreadable.
pub fn resolve_page_count(document: &Html) -> u32 {
    let text = match pagination_link_text(document, 2) {
        Some(text) if !text.is_empty() && !text.contains(NEXT_GLYPH) => Some(text),
        _ => pagination_link_text(document, 3),
    };
    text.as_deref().and_then(parse_page_fraction).unwrap_or(1)
}
