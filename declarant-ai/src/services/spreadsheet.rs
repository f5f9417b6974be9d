//! Spreadsheet reading
//!
//! Turns an uploaded CSV or Excel file into a header row plus data rows of
//! trimmed cell text. Fully empty rows are dropped here, so they never occupy
//! a row slot or count toward the batch cap.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::InputRow;

/// Upload file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Xlsx,
    Xls,
}

impl FileFormat {
    pub const SUPPORTED_EXTENSIONS: [&'static str; 3] = ["csv", "xlsx", "xls"];

    /// Detect format from the file extension (case-insensitive)
    pub fn from_filename(filename: &str) -> Result<Self, SpreadsheetError> {
        let extension = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "csv" => Ok(FileFormat::Csv),
            "xlsx" => Ok(FileFormat::Xlsx),
            "xls" => Ok(FileFormat::Xls),
            _ => Err(SpreadsheetError::UnsupportedFormat(filename.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum SpreadsheetError {
    #[error("Unsupported file type: {0} (supported: csv, xlsx, xls)")]
    UnsupportedFormat(String),

    #[error("File too large ({size} bytes). Maximum size: {max} bytes")]
    FileTooLarge { size: u64, max: u64 },

    #[error("File contains no data")]
    Empty,

    #[error("CSV parse error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Excel read error: {0}")]
    Workbook(String),
}

/// Parsed sheet
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    /// Non-blank data rows, `row_index` assigned in file order
    pub rows: Vec<InputRow>,
}

impl Table {
    /// Build from raw records: first record is the header
    fn from_records(records: Vec<Vec<String>>) -> Result<Self, SpreadsheetError> {
        let mut records = records.into_iter();
        let header_record = records.next().ok_or(SpreadsheetError::Empty)?;

        let headers: Vec<String> = header_record
            .iter()
            .enumerate()
            .map(|(i, h)| {
                let h = h.trim();
                if h.is_empty() {
                    format!("column_{}", i + 1)
                } else {
                    h.to_string()
                }
            })
            .collect();

        let mut rows = Vec::new();
        for (record_index, mut cells) in records.enumerate() {
            if cells.len() > headers.len() && cells[headers.len()..].iter().any(|c| !c.trim().is_empty()) {
                // Header is file row 1
                warn!(
                    file_row = record_index + 2,
                    columns = cells.len(),
                    header_columns = headers.len(),
                    "Dropping cells beyond the header width"
                );
            }
            cells.resize(headers.len(), String::new());
            let row = InputRow {
                row_index: rows.len(),
                cells: cells.into_iter().map(|c| c.trim().to_string()).collect(),
            };
            if !row.is_blank() {
                rows.push(row);
            }
        }

        if rows.is_empty() {
            return Err(SpreadsheetError::Empty);
        }

        Ok(Self { headers, rows })
    }

    /// Column position of a header
    pub fn column(&self, header: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == header)
    }

    /// First `limit` rows as header → value maps, for upload previews
    pub fn preview(&self, limit: usize) -> Vec<serde_json::Map<String, serde_json::Value>> {
        self.rows
            .iter()
            .take(limit)
            .map(|row| {
                self.headers
                    .iter()
                    .zip(&row.cells)
                    .map(|(h, c)| (h.clone(), serde_json::Value::String(c.clone())))
                    .collect()
            })
            .collect()
    }
}

/// Check name and size before any parsing
pub fn validate_upload(filename: &str, size: u64, max_bytes: u64) -> Result<FileFormat, SpreadsheetError> {
    if size > max_bytes {
        return Err(SpreadsheetError::FileTooLarge { size, max: max_bytes });
    }
    if size == 0 {
        return Err(SpreadsheetError::Empty);
    }
    FileFormat::from_filename(filename)
}

/// Validate and parse an uploaded file
pub fn read_table(filename: &str, bytes: &[u8], max_bytes: u64) -> Result<Table, SpreadsheetError> {
    let format = validate_upload(filename, bytes.len() as u64, max_bytes)?;
    let table = match format {
        FileFormat::Csv => read_csv(bytes)?,
        FileFormat::Xlsx | FileFormat::Xls => read_workbook(bytes)?,
    };
    debug!(
        filename = %filename,
        columns = table.headers.len(),
        rows = table.rows.len(),
        "Spreadsheet parsed"
    );
    Ok(table)
}

/// UTF-8 first, Windows-1251 otherwise (Cyrillic exports from Excel)
fn decode_text(bytes: &[u8]) -> String {
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let (decoded, _, had_errors) = encoding_rs::WINDOWS_1251.decode(bytes);
            if had_errors {
                warn!("CSV is neither valid UTF-8 nor Windows-1251; some characters were replaced");
            } else {
                debug!("CSV decoded as Windows-1251");
            }
            decoded.into_owned()
        }
    };
    match text.strip_prefix('\u{feff}') {
        Some(stripped) => stripped.to_string(),
        None => text,
    }
}

/// Pick `;`, `,` or tab by frequency in the header line, ignoring quoted text
fn sniff_delimiter(text: &str) -> u8 {
    let header = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let mut counts = [(b',', 0usize), (b';', 0), (b'\t', 0)];
    let mut in_quotes = false;

    for ch in header.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => counts[0].1 += 1,
            ';' if !in_quotes => counts[1].1 += 1,
            '\t' if !in_quotes => counts[2].1 += 1,
            _ => {}
        }
    }

    // Ties go to the earlier entry, so comma wins by default
    counts
        .iter()
        .fold((b',', 0), |best, &(d, n)| if n > best.1 { (d, n) } else { best })
        .0
}

fn read_csv(bytes: &[u8]) -> Result<Table, SpreadsheetError> {
    let text = decode_text(bytes);
    let delimiter = sniff_delimiter(&text);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record?;
        records.push(record.iter().map(str::to_string).collect());
    }

    Table::from_records(records)
}

fn read_workbook(bytes: &[u8]) -> Result<Table, SpreadsheetError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| SpreadsheetError::Workbook(e.to_string()))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or(SpreadsheetError::Empty)?
        .map_err(|e| SpreadsheetError::Workbook(e.to_string()))?;

    let records = range
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect();

    Table::from_records(records)
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        // Whole numbers without the trailing ".0" Excel stores them with
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_format_detection() {
        assert_eq!(FileFormat::from_filename("goods.CSV").unwrap(), FileFormat::Csv);
        assert_eq!(FileFormat::from_filename("a.b.xlsx").unwrap(), FileFormat::Xlsx);
        assert!(matches!(
            FileFormat::from_filename("goods.pdf"),
            Err(SpreadsheetError::UnsupportedFormat(_))
        ));
        assert!(FileFormat::from_filename("noextension").is_err());
    }

    #[test]
    fn test_size_limit() {
        let err = validate_upload("goods.csv", 51 * MB, 50 * MB).unwrap_err();
        assert!(matches!(err, SpreadsheetError::FileTooLarge { .. }));
    }

    #[test]
    fn test_read_csv_with_bom_and_semicolons() {
        let data = "\u{feff}Наименование;Количество\nТелефон; 2 \n;\nНоутбук;1\n";
        let table = read_table("items.csv", data.as_bytes(), MB).unwrap();

        assert_eq!(table.headers, vec!["Наименование", "Количество"]);
        // Blank ";" row skipped, indices stay contiguous
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].cells, vec!["Телефон", "2"]);
        assert_eq!(table.rows[1].row_index, 1);
        assert_eq!(table.rows[1].cells[0], "Ноутбук");
    }

    #[test]
    fn test_read_csv_windows_1251() {
        let (encoded, _, _) = encoding_rs::WINDOWS_1251.encode("Товар,Ед\nЧай,кг\n");
        let table = read_table("items.csv", &encoded, MB).unwrap();

        assert_eq!(table.headers, vec!["Товар", "Ед"]);
        assert_eq!(table.rows[0].cells, vec!["Чай", "кг"]);
    }

    #[test]
    fn test_short_records_padded_and_empty_headers_named() {
        let table = read_table("items.csv", b"Description,\nBolt\n", MB).unwrap();

        assert_eq!(table.headers, vec!["Description", "column_2"]);
        assert_eq!(table.rows[0].cells, vec!["Bolt", ""]);
    }

    #[test]
    fn test_cells_beyond_header_width_dropped() {
        let table = read_table("items.csv", b"Description,Qty\nBolt,2,extra\n", MB).unwrap();

        assert_eq!(table.rows[0].cells, vec!["Bolt", "2"]);
    }

    #[test]
    fn test_read_xlsx_workbook() {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "Description").unwrap();
        sheet.write_string(0, 1, "Qty").unwrap();
        sheet.write_string(1, 0, "Green tea").unwrap();
        sheet.write_number(1, 1, 3.0).unwrap();
        // Row 2 left empty
        sheet.write_string(3, 0, " Steel bolts ").unwrap();
        sheet.write_number(3, 1, 2.5).unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let table = read_table("goods.xlsx", &bytes, MB).unwrap();

        assert_eq!(table.headers, vec!["Description", "Qty"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].cells, vec!["Green tea", "3"]);
        assert_eq!(table.rows[1].row_index, 1);
        assert_eq!(table.rows[1].cells, vec!["Steel bolts", "2.5"]);
    }

    #[test]
    fn test_corrupt_workbook_rejected() {
        assert!(matches!(
            read_table("goods.xlsx", b"not a zip archive", MB),
            Err(SpreadsheetError::Workbook(_))
        ));
    }

    #[test]
    fn test_quoted_delimiters_ignored_by_sniffer() {
        assert_eq!(sniff_delimiter("\"a;b;c\",d\n"), b',');
        assert_eq!(sniff_delimiter("a\tb\tc\n"), b'\t');
        assert_eq!(sniff_delimiter("single\n"), b',');
    }

    #[test]
    fn test_header_only_file_is_empty() {
        assert!(matches!(
            read_table("items.csv", b"Description\n", MB),
            Err(SpreadsheetError::Empty)
        ));
    }

    #[test]
    fn test_preview() {
        let table = read_table("items.csv", b"A,B\n1,2\n3,4\n", MB).unwrap();
        let preview = table.preview(1);
        assert_eq!(preview.len(), 1);
        assert_eq!(preview[0]["B"], "2");
    }
}
