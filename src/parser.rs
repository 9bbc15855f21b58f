// 📄 Extract Parser - per-year budget line-item CSV → BudgetRecord
//
// Raw extracts are messy: column counts drift between years, flags are
// spelled "TRUE"/"true", amounts carry thousands separators. Parsing is
// lenient: a malformed cell becomes None, it never aborts the row.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Maximum depth of the expenditure-category hierarchy in the extracts.
pub const CATEGORY_LEVELS: usize = 6;

// ============================================================================
// RAW ROW (exactly as it appears in the CSV)
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractRow {
    #[serde(rename = "MINISTRY", default)]
    pub ministry: Option<String>,

    #[serde(rename = "BUDGETARY_UNIT", default)]
    pub budgetary_unit: Option<String>,

    #[serde(rename = "BUDGET_PLAN", default)]
    pub budget_plan: Option<String>,

    #[serde(rename = "CROSS_FUNC", alias = "CROSS_FUNC?", default)]
    pub cross_func: Option<String>,

    #[serde(rename = "OUTPUT", default)]
    pub output: Option<String>,

    #[serde(rename = "PROJECT", default)]
    pub project: Option<String>,

    #[serde(rename = "CATEGORY_LV1", default)]
    pub category_lv1: Option<String>,

    #[serde(rename = "CATEGORY_LV2", default)]
    pub category_lv2: Option<String>,

    #[serde(rename = "CATEGORY_LV3", default)]
    pub category_lv3: Option<String>,

    #[serde(rename = "CATEGORY_LV4", default)]
    pub category_lv4: Option<String>,

    #[serde(rename = "CATEGORY_LV5", default)]
    pub category_lv5: Option<String>,

    #[serde(rename = "CATEGORY_LV6", default)]
    pub category_lv6: Option<String>,

    #[serde(rename = "ITEM_DESCRIPTION", default)]
    pub item_description: Option<String>,

    #[serde(rename = "AMOUNT", default)]
    pub amount: Option<String>,

    #[serde(rename = "FISCAL_YEAR", default)]
    pub fiscal_year: Option<String>,

    #[serde(rename = "OBLIGED", alias = "OBLIGED?", default)]
    pub obliged: Option<String>,

    #[serde(rename = "REF_DOC", default)]
    pub ref_doc: Option<String>,

    #[serde(rename = "REF_PAGE_NO", default)]
    pub ref_page_no: Option<String>,
}

// ============================================================================
// BUDGET RECORD (typed, one line item for one fiscal year)
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetRecord {
    pub ministry: Option<String>,
    pub budgetary_unit: Option<String>,
    pub budget_plan: Option<String>,
    pub output: Option<String>,
    pub project: Option<String>,
    /// Level 1 first. Gaps are allowed; see `key::compact_categories`.
    pub categories: [Option<String>; CATEGORY_LEVELS],
    pub item_description: Option<String>,
    pub amount: Option<f64>,
    /// Gregorian year as written in the extract.
    pub fiscal_year: Option<i32>,
    pub cross_func: Option<bool>,
    pub obliged: Option<bool>,
    pub ref_doc: Option<String>,
    pub ref_page_no: Option<i64>,
}

impl From<ExtractRow> for BudgetRecord {
    fn from(row: ExtractRow) -> Self {
        BudgetRecord {
            ministry: clean_text(row.ministry.as_deref()),
            budgetary_unit: clean_text(row.budgetary_unit.as_deref()),
            budget_plan: clean_text(row.budget_plan.as_deref()),
            output: clean_text(row.output.as_deref()),
            project: clean_text(row.project.as_deref()),
            categories: [
                clean_text(row.category_lv1.as_deref()),
                clean_text(row.category_lv2.as_deref()),
                clean_text(row.category_lv3.as_deref()),
                clean_text(row.category_lv4.as_deref()),
                clean_text(row.category_lv5.as_deref()),
                clean_text(row.category_lv6.as_deref()),
            ],
            item_description: clean_text(row.item_description.as_deref()),
            amount: row.amount.as_deref().and_then(parse_amount),
            fiscal_year: row
                .fiscal_year
                .as_deref()
                .and_then(parse_integer)
                .and_then(|y| i32::try_from(y).ok()),
            cross_func: row.cross_func.as_deref().and_then(parse_bool),
            obliged: row.obliged.as_deref().and_then(parse_bool),
            ref_doc: clean_text(row.ref_doc.as_deref()),
            ref_page_no: row.ref_page_no.as_deref().and_then(parse_integer),
        }
    }
}

impl BudgetRecord {
    /// True when the record carries at least one category level.
    pub fn has_category(&self) -> bool {
        self.categories.iter().any(|c| c.is_some())
    }

    /// Amount with a missing/malformed value counted as zero.
    pub fn amount_or_zero(&self) -> f64 {
        self.amount.unwrap_or(0.0)
    }
}

// ============================================================================
// LOADING
// ============================================================================

/// Load every row of one extract file.
pub fn load_extract(path: &Path) -> Result<Vec<BudgetRecord>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open extract: {}", path.display()))?;
    read_extract(file).with_context(|| format!("Failed to read extract: {}", path.display()))
}

/// Read extract rows from any reader (header row required).
pub fn read_extract<R: std::io::Read>(reader: R) -> Result<Vec<BudgetRecord>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut records = Vec::new();
    for (line_num, result) in rdr.deserialize::<ExtractRow>().enumerate() {
        // +2: 1-indexed plus header row
        let row = result.with_context(|| format!("Failed to parse CSV line {}", line_num + 2))?;
        records.push(BudgetRecord::from(row));
    }

    Ok(records)
}

// ============================================================================
// CELL PARSERS
// ============================================================================

/// Trimmed text, or None when blank.
pub fn clean_text(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parse a separator-formatted decimal ("1,234,500.50"). Malformed → None.
pub fn parse_amount(value: &str) -> Option<f64> {
    let cleaned: String = value.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// "true"/"false" in any case. Anything else → None.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

pub fn parse_integer(value: &str) -> Option<i64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<i64>().ok()
}

// ============================================================================
// TESTS
// ============================================================================
