//! Session export
//!
//! One output row per session row slot in row order: item fields,
//! classification fields, tier, review status and note. Output depends only
//! on stored data, so exporting the same session twice gives identical rows.

use rust_xlsxwriter::{Color, Format, Workbook, XlsxError};
use thiserror::Error;

use crate::models::{BatchSession, ConfidenceTier, SessionRow};

/// Widest column in the XLSX output, in characters
const MAX_COLUMN_WIDTH: usize = 50;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

const HEADERS: [&str; 15] = [
    "row",
    "description",
    "quantity",
    "unit",
    "attributes",
    "status",
    "suggested_code",
    "code_description",
    "confidence",
    "confidence_tier",
    "rationale",
    "alternative_codes",
    "exclusion_reason",
    "review_status",
    "note",
];

/// Column holding the numeric confidence
const CONFIDENCE_COLUMN: usize = 8;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("CSV export failed: {0}")]
    Csv(String),

    #[error("XLSX export failed: {0}")]
    Xlsx(#[from] XlsxError),

    #[error("Unsupported export format: {0} (expected csv or xlsx)")]
    UnsupportedFormat(String),
}

impl From<csv::Error> for ExportError {
    fn from(err: csv::Error) -> Self {
        ExportError::Csv(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    Csv,
    #[default]
    Xlsx,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "xlsx" => Ok(ExportFormat::Xlsx),
            other => Err(ExportError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Download name: `<upload stem>_classified_<session prefix>.<ext>`
///
/// Non-ASCII characters in the stem become `_` so the name fits a header.
pub fn export_filename(session: &BatchSession, format: ExportFormat) -> String {
    let stem: String = session
        .filename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(&session.filename)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let stem = if stem.is_empty() { "batch".to_string() } else { stem };
    let id = session.session_id.simple().to_string();
    format!("{}_classified_{}.{}", stem, &id[..8], format.extension())
}

pub fn export(session: &BatchSession, format: ExportFormat) -> Result<Vec<u8>, ExportError> {
    match format {
        ExportFormat::Csv => export_csv(session),
        ExportFormat::Xlsx => export_xlsx(session),
    }
}

/// UTF-8 CSV with BOM (opens correctly in Excel)
pub fn export_csv(session: &BatchSession) -> Result<Vec<u8>, ExportError> {
    let mut writer = csv::Writer::from_writer(UTF8_BOM.to_vec());
    writer.write_record(HEADERS)?;
    for row in &session.rows {
        writer.write_record(row_values(row))?;
    }
    writer.into_inner().map_err(|e| ExportError::Csv(e.to_string()))
}

/// XLSX with tier-coloured confidence cells
pub fn export_xlsx(session: &BatchSession) -> Result<Vec<u8>, ExportError> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name("Classification")?;

    let header_format = Format::new().set_bold().set_background_color(Color::RGB(0xD9E1F2));
    let tier_format = |tier: ConfidenceTier| match tier {
        ConfidenceTier::High => Format::new()
            .set_background_color(Color::RGB(0xC6EFCE))
            .set_font_color(Color::RGB(0x006100)),
        ConfidenceTier::Medium => Format::new()
            .set_background_color(Color::RGB(0xFFEB9C))
            .set_font_color(Color::RGB(0x9C6500)),
        ConfidenceTier::Low => Format::new()
            .set_background_color(Color::RGB(0xFFC7CE))
            .set_font_color(Color::RGB(0x9C0006)),
    };

    let mut widths: Vec<usize> = HEADERS.iter().map(|h| h.chars().count()).collect();
    for (col, header) in HEADERS.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, *header, &header_format)?;
    }

    for (i, row) in session.rows.iter().enumerate() {
        let xl_row = (i + 1) as u32;
        for (col, value) in row_values(row).into_iter().enumerate() {
            widths[col] = widths[col].max(value.chars().count());
            let xl_col = col as u16;

            match (col, row.result.as_ref()) {
                (0, _) => {
                    worksheet.write_number(xl_row, xl_col, (row.row_index + 1) as f64)?;
                }
                (2, _) if row.item.quantity.is_some() => {
                    worksheet.write_number(xl_row, xl_col, row.item.quantity.unwrap_or_default())?;
                }
                (CONFIDENCE_COLUMN, Some(result)) => {
                    worksheet.write_number_with_format(
                        xl_row,
                        xl_col,
                        result.confidence,
                        &tier_format(result.tier()),
                    )?;
                }
                _ if value.is_empty() => {}
                _ => {
                    worksheet.write_string(xl_row, xl_col, value)?;
                }
            }
        }
    }

    for (col, width) in widths.into_iter().enumerate() {
        worksheet.set_column_width(col as u16, (width + 2).min(MAX_COLUMN_WIDTH) as f64)?;
    }
    worksheet.set_freeze_panes(1, 0)?;

    Ok(workbook.save_to_buffer()?)
}

/// Cell text for one row, aligned with `HEADERS`
fn row_values(row: &SessionRow) -> Vec<String> {
    let result = row.result.as_ref();
    let attributes = row
        .item
        .attributes
        .iter()
        .map(|(k, v)| format!("{}: {}", k, v))
        .collect::<Vec<_>>()
        .join("; ");

    vec![
        (row.row_index + 1).to_string(),
        row.item.description.clone(),
        row.item.quantity.map(|q| q.to_string()).unwrap_or_default(),
        row.item.unit.clone().unwrap_or_default(),
        attributes,
        row.status.as_str().to_string(),
        result.map(|r| r.suggested_code.clone()).unwrap_or_default(),
        result.map(|r| r.code_description.clone()).unwrap_or_default(),
        result.map(|r| r.confidence.to_string()).unwrap_or_default(),
        row.tier().map(|t| t.as_str().to_string()).unwrap_or_default(),
        result.map(|r| r.rationale.clone()).unwrap_or_default(),
        result.map(|r| r.alternative_codes.join(", ")).unwrap_or_default(),
        row.exclusion_reason.clone().unwrap_or_default(),
        row.review_status.as_str().to_string(),
        row.note.clone().unwrap_or_default(),
    ]
}
