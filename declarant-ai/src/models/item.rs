//! Upload rows, canonical fields and column mapping

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Canonical fields an uploaded column can be mapped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    /// Goods description (required)
    Description,
    Quantity,
    Unit,
    Category,
    Brand,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 5] = [
        CanonicalField::Description,
        CanonicalField::Quantity,
        CanonicalField::Unit,
        CanonicalField::Category,
        CanonicalField::Brand,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalField::Description => "description",
            CanonicalField::Quantity => "quantity",
            CanonicalField::Unit => "unit",
            CanonicalField::Category => "category",
            CanonicalField::Brand => "brand",
        }
    }

    /// Lower-case header fragments recognised when inferring a mapping
    ///
    /// Returns `(strong, weak)`. Weak synonyms are generic words that also
    /// show up in headers belonging to other fields ("Item No", "Brand name").
    fn synonyms(&self) -> (&'static [&'static str], &'static [&'static str]) {
        match self {
            CanonicalField::Description => (
                &["description", "наименование", "описание", "товар", "goods"],
                &["product", "item", "name"],
            ),
            CanonicalField::Quantity => (&["quantity", "qty", "количество", "кол-во"], &["amount"]),
            CanonicalField::Unit => (&["unit", "uom", "единица", "ед."], &["measure"]),
            CanonicalField::Category => (&["category", "категория"], &["group", "группа"]),
            CanonicalField::Brand => (&["brand", "manufacturer", "бренд", "производитель"], &["make"]),
        }
    }

    /// How well `header` (trimmed, lower-case) names this field; lower is better
    fn match_rank(&self, header: &str) -> Option<u8> {
        let (strong, weak) = self.synonyms();
        if strong.iter().any(|s| *s == header) {
            Some(0)
        } else if strong.iter().any(|s| header.contains(s)) {
            Some(1)
        } else if weak.iter().any(|s| *s == header) {
            Some(2)
        } else if weak.iter().any(|s| header.contains(s)) {
            Some(3)
        } else {
            None
        }
    }
}

/// Canonical field → source header
///
/// Serialized as a JSON object, e.g. `{"description": "Наименование товара"}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnMapping {
    fields: BTreeMap<CanonicalField, String>,
}

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: CanonicalField, header: impl Into<String>) -> Self {
        self.fields.insert(field, header.into());
        self
    }

    pub fn get(&self, field: CanonicalField) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Source headers claimed by some canonical field
    pub fn mapped_headers(&self) -> impl Iterator<Item = &str> {
        self.fields.values().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (CanonicalField, &str)> {
        self.fields.iter().map(|(field, header)| (*field, header.as_str()))
    }

    /// Guess a mapping from header names
    ///
    /// Candidates are ranked across all headers: exact synonym, then a header
    /// containing a strong synonym, then weak ones. The best pairs are
    /// assigned first and each header goes to at most one field.
    pub fn infer(headers: &[String]) -> Self {
        let normalized: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();

        let mut candidates: Vec<(u8, usize, usize)> = Vec::new();
        for (field_order, field) in CanonicalField::ALL.iter().enumerate() {
            for (i, header) in normalized.iter().enumerate() {
                if header.is_empty() {
                    continue;
                }
                if let Some(rank) = field.match_rank(header) {
                    candidates.push((rank, field_order, i));
                }
            }
        }
        candidates.sort_unstable();

        let mut mapping = Self::new();
        let mut claimed = vec![false; headers.len()];
        for (_, field_order, i) in candidates {
            let field = CanonicalField::ALL[field_order];
            if claimed[i] || mapping.fields.contains_key(&field) {
                continue;
            }
            claimed[i] = true;
            mapping.fields.insert(field, headers[i].clone());
        }

        mapping
    }
}

/// Raw row as read from the spreadsheet (discarded after normalization)
#[derive(Debug, Clone, PartialEq)]
pub struct InputRow {
    /// Position among data rows (header excluded), 0-based
    pub row_index: usize,
    /// Cell text aligned with the table headers
    pub cells: Vec<String>,
}

impl InputRow {
    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|c| c.trim().is_empty())
    }
}

/// Row in canonical form, ready for classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedItem {
    /// Stable position in the upload; reconciles results to rows
    pub row_index: usize,
    pub description: String,
    pub quantity: Option<f64>,
    pub unit: Option<String>,
    /// Category, brand and unmapped columns, forwarded to the classifier as context
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl NormalizedItem {
    pub fn new(row_index: usize, description: impl Into<String>) -> Self {
        Self {
            row_index,
            description: description.into(),
            quantity: None,
            unit: None,
            attributes: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_infer_english_headers() {
        let mapping = ColumnMapping::infer(&headers(&["Product Name", "Qty", "Unit", "Brand"]));

        assert_eq!(mapping.get(CanonicalField::Description), Some("Product Name"));
        assert_eq!(mapping.get(CanonicalField::Quantity), Some("Qty"));
        assert_eq!(mapping.get(CanonicalField::Unit), Some("Unit"));
        assert_eq!(mapping.get(CanonicalField::Brand), Some("Brand"));
        assert_eq!(mapping.get(CanonicalField::Category), None);
    }

    #[test]
    fn test_infer_russian_headers() {
        let mapping = ColumnMapping::infer(&headers(&["Наименование товара", "Кол-во", "Категория"]));

        assert_eq!(mapping.get(CanonicalField::Description), Some("Наименование товара"));
        assert_eq!(mapping.get(CanonicalField::Quantity), Some("Кол-во"));
        assert_eq!(mapping.get(CanonicalField::Category), Some("Категория"));
    }

    #[test]
    fn test_infer_does_not_claim_a_header_twice() {
        // "Product description" matches description; "Product group" must not steal it
        let mapping = ColumnMapping::infer(&headers(&["Product description", "Product group"]));

        assert_eq!(mapping.get(CanonicalField::Description), Some("Product description"));
        assert_eq!(mapping.get(CanonicalField::Category), Some("Product group"));
    }

    #[test]
    fn test_infer_prefers_exact_description_over_generic_item_column() {
        let mapping = ColumnMapping::infer(&headers(&["Item No", "Description", "Qty"]));

        assert_eq!(mapping.get(CanonicalField::Description), Some("Description"));
        assert_eq!(mapping.get(CanonicalField::Quantity), Some("Qty"));
    }

    #[test]
    fn test_infer_keeps_brand_column_for_brand() {
        let mapping = ColumnMapping::infer(&headers(&["Brand name", "Description"]));

        assert_eq!(mapping.get(CanonicalField::Description), Some("Description"));
        assert_eq!(mapping.get(CanonicalField::Brand), Some("Brand name"));
    }

    #[test]
    fn test_infer_falls_back_to_weak_synonym() {
        let mapping = ColumnMapping::infer(&headers(&["Item", "Amount"]));

        assert_eq!(mapping.get(CanonicalField::Description), Some("Item"));
        assert_eq!(mapping.get(CanonicalField::Quantity), Some("Amount"));
    }

    #[test]
    fn test_mapping_json_shape() {
        let mapping = ColumnMapping::new()
            .with(CanonicalField::Description, "Goods")
            .with(CanonicalField::Unit, "UoM");
        let json = serde_json::to_value(&mapping).unwrap();

        assert_eq!(json, serde_json::json!({"description": "Goods", "unit": "UoM"}));
        let back: ColumnMapping = serde_json::from_value(json).unwrap();
        assert_eq!(back, mapping);
    }

    #[test]
    fn test_blank_row_detection() {
        let blank = InputRow { row_index: 0, cells: vec!["".into(), "  ".into()] };
        let filled = InputRow { row_index: 1, cells: vec!["".into(), "x".into()] };
        assert!(blank.is_blank());
        assert!(!filled.is_blank());
    }
}
