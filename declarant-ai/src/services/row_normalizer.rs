//! Row normalization
//!
//! Maps a parsed table onto the canonical item schema. Oversized uploads are
//! rejected whole; rows without a description are excluded individually and
//! reported, never silently dropped.

use declarant_common::config::ClassifierConfig;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{CanonicalField, ColumnMapping, InputRow, NormalizedItem, RowError};
use crate::services::spreadsheet::Table;

/// Structural problems that reject the whole upload
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("Batch too large: {rows} rows, maximum is {max}")]
    BatchTooLarge { rows: usize, max: usize },

    #[error("No column mapped to required field '{0}'")]
    MissingMapping(&'static str),

    #[error("Mapped column '{0}' not found in file")]
    UnknownColumn(String),
}

/// Row-level report: required field empty
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Row {}: required field '{}' is empty", .row_index + 1, .field.as_str())]
pub struct MissingFieldError {
    pub row_index: usize,
    pub field: CanonicalField,
}

impl From<&MissingFieldError> for RowError {
    fn from(err: &MissingFieldError) -> Self {
        RowError::missing_field(err.row_index, err.field.as_str())
    }
}

/// Row kept as a slot in the session but not sent to the classifier
#[derive(Debug, Clone, PartialEq)]
pub struct ExcludedRow {
    /// Whatever fields the row did have; description is empty
    pub item: NormalizedItem,
    pub error: MissingFieldError,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizationOutcome {
    /// Classifiable items in row order
    pub items: Vec<NormalizedItem>,
    /// Excluded rows in row order
    pub excluded: Vec<ExcludedRow>,
    /// Row slots (items + excluded)
    pub total_rows: usize,
}

impl NormalizationOutcome {
    /// Per-row error summary for excluded rows
    pub fn row_errors(&self) -> Vec<RowError> {
        self.excluded.iter().map(|e| RowError::from(&e.error)).collect()
    }
}

/// Maps uploaded rows to `NormalizedItem`s under a batch-size cap
#[derive(Debug, Clone)]
pub struct RowNormalizer {
    max_batch_size: usize,
}

impl RowNormalizer {
    pub fn new(max_batch_size: usize) -> Self {
        Self { max_batch_size }
    }

    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self::new(config.max_batch_size)
    }

    /// Explicit mapping when supplied and non-empty, otherwise inferred from headers
    pub fn resolve_mapping(table: &Table, explicit: Option<ColumnMapping>) -> ColumnMapping {
        match explicit {
            Some(mapping) if !mapping.is_empty() => mapping,
            _ => {
                let inferred = ColumnMapping::infer(&table.headers);
                debug!(mapping = ?inferred, "Inferred column mapping");
                inferred
            }
        }
    }

    pub fn normalize(
        &self,
        table: &Table,
        mapping: &ColumnMapping,
    ) -> Result<NormalizationOutcome, NormalizeError> {
        if table.rows.len() > self.max_batch_size {
            return Err(NormalizeError::BatchTooLarge {
                rows: table.rows.len(),
                max: self.max_batch_size,
            });
        }

        let columns = MappedColumns::resolve(table, mapping)?;
        let mut outcome = NormalizationOutcome {
            total_rows: table.rows.len(),
            ..Default::default()
        };

        for row in &table.rows {
            let item = columns.build_item(table, row);
            if item.description.is_empty() {
                outcome.excluded.push(ExcludedRow {
                    error: MissingFieldError {
                        row_index: row.row_index,
                        field: CanonicalField::Description,
                    },
                    item,
                });
            } else {
                outcome.items.push(item);
            }
        }

        if !outcome.excluded.is_empty() {
            warn!(
                excluded = outcome.excluded.len(),
                total = outcome.total_rows,
                "Rows without description excluded from classification"
            );
        }

        Ok(outcome)
    }
}

/// Column positions for each mapped canonical field
struct MappedColumns {
    description: usize,
    quantity: Option<usize>,
    unit: Option<usize>,
    /// Category and brand, forwarded as attributes
    extra: Vec<(CanonicalField, usize)>,
    /// Columns not claimed by any field
    unmapped: Vec<usize>,
}

impl MappedColumns {
    fn resolve(table: &Table, mapping: &ColumnMapping) -> Result<Self, NormalizeError> {
        let position = |field: CanonicalField| -> Result<Option<usize>, NormalizeError> {
            match mapping.get(field) {
                None => Ok(None),
                Some(header) if header.trim().is_empty() => Ok(None),
                Some(header) => table
                    .column(header)
                    .map(Some)
                    .ok_or_else(|| NormalizeError::UnknownColumn(header.to_string())),
            }
        };

        let description = position(CanonicalField::Description)?
            .ok_or(NormalizeError::MissingMapping(CanonicalField::Description.as_str()))?;

        let mut extra = Vec::new();
        for field in [CanonicalField::Category, CanonicalField::Brand] {
            if let Some(i) = position(field)? {
                extra.push((field, i));
            }
        }

        let quantity = position(CanonicalField::Quantity)?;
        let unit = position(CanonicalField::Unit)?;

        let claimed: Vec<usize> = [Some(description), quantity, unit]
            .into_iter()
            .flatten()
            .chain(extra.iter().map(|(_, i)| *i))
            .collect();
        let unmapped = (0..table.headers.len()).filter(|i| !claimed.contains(i)).collect();

        Ok(Self {
            description,
            quantity,
            unit,
            extra,
            unmapped,
        })
    }

    fn build_item(&self, table: &Table, row: &InputRow) -> NormalizedItem {
        let cell = |i: usize| row.cells.get(i).map(String::as_str).unwrap_or("");

        let mut item = NormalizedItem::new(row.row_index, cell(self.description));

        if let Some(i) = self.quantity {
            let raw = cell(i);
            item.quantity = parse_quantity(raw);
            if item.quantity.is_none() && !raw.is_empty() {
                // Keep unparseable quantities as context rather than losing them
                item.attributes.insert("quantity".to_string(), raw.to_string());
            }
        }

        if let Some(i) = self.unit {
            let unit = cell(i);
            if !unit.is_empty() {
                item.unit = Some(unit.to_string());
            }
        }

        for (field, i) in &self.extra {
            let value = cell(*i);
            if !value.is_empty() {
                item.attributes.insert(field.as_str().to_string(), value.to_string());
            }
        }

        for &i in &self.unmapped {
            let value = cell(i);
            if is_meaningful(value) {
                item.attributes.insert(attribute_key(&table.headers[i]), value.to_string());
            }
        }

        item
    }
}

/// Parse "1 234,5" / "1234.5" style quantities
pub fn parse_quantity(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|q| q.is_finite())
}

fn is_meaningful(value: &str) -> bool {
    !value.is_empty() && !matches!(value.to_lowercase().as_str(), "nan" | "none" | "null")
}

fn attribute_key(header: &str) -> String {
    header.trim().to_lowercase().replace([' ', '-'], "_")
}
