// 📊 Drill-down Query Surface - request/response types for breakdowns
//
// A breakdown request is a navigation path (dimension picks, possibly
// "no value") plus the dimension to group by next and the fiscal years to
// show. `None` as a step key always means the no-value bucket; wire
// encodings such as -1 live in the server adapter only.

pub mod builder;
pub mod drilldown;

pub use builder::QueryBuilder;
pub use drilldown::{DrilldownEngine, MAX_COLLAPSE_DEPTH, COLLAPSE_SEPARATOR};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::QueryError;
use crate::key::UNSPECIFIED_CATEGORY;

// ============================================================================
// DIMENSIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Ministry,
    BudgetaryUnit,
    BudgetPlan,
    Output,
    Project,
    Category,
    /// Item description (leaf level)
    Item,
    Obliged,
}

impl Dimension {
    pub const ALL: [Dimension; 8] = [
        Dimension::Ministry,
        Dimension::BudgetaryUnit,
        Dimension::BudgetPlan,
        Dimension::Output,
        Dimension::Project,
        Dimension::Category,
        Dimension::Item,
        Dimension::Obliged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Ministry => "ministry",
            Dimension::BudgetaryUnit => "budgetary_unit",
            Dimension::BudgetPlan => "budget_plan",
            Dimension::Output => "output",
            Dimension::Project => "project",
            Dimension::Category => "category",
            Dimension::Item => "item",
            Dimension::Obliged => "obliged",
        }
    }

    /// Fact column holding this dimension's value.
    pub fn fact_column(&self) -> &'static str {
        match self {
            Dimension::Ministry => "f.ministry_id",
            Dimension::BudgetaryUnit => "f.budgetary_unit_id",
            Dimension::BudgetPlan => "f.budget_plan_id",
            Dimension::Output => "f.output_id",
            Dimension::Project => "f.project_id",
            Dimension::Category => "f.category_id",
            Dimension::Item => "f.item_description",
            Dimension::Obliged => "f.obliged",
        }
    }

    /// Dimension table for id-keyed dimensions.
    pub fn table(&self) -> Option<&'static str> {
        match self {
            Dimension::Ministry => Some("dim_ministry"),
            Dimension::BudgetaryUnit => Some("dim_budgetary_unit"),
            Dimension::BudgetPlan => Some("dim_budget_plan"),
            Dimension::Output => Some("dim_output"),
            Dimension::Project => Some("dim_project"),
            Dimension::Category => Some("dim_category"),
            Dimension::Item | Dimension::Obliged => None,
        }
    }

    /// Label of the no-value bucket.
    pub fn no_value_label(&self) -> &'static str {
        match self {
            Dimension::Ministry => "ไม่ระบุกระทรวง",
            Dimension::BudgetaryUnit => "ไม่ระบุหน่วยรับงบประมาณ",
            Dimension::BudgetPlan => "ไม่ระบุแผนงาน",
            Dimension::Output => "ไม่ระบุผลผลิต",
            Dimension::Project => "ไม่ระบุโครงการ",
            Dimension::Category => UNSPECIFIED_CATEGORY,
            Dimension::Item => "ไม่ระบุรายการ",
            Dimension::Obliged => "ไม่ระบุ",
        }
    }

    /// Parse a grouping name; unknown names are an unsupported group.
    pub fn parse_group(name: &str) -> Result<Dimension, QueryError> {
        name.parse()
            .map_err(|_| QueryError::UnsupportedGroup(name.to_string()))
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dimension::ALL
            .iter()
            .copied()
            .find(|d| d.as_str() == s.trim())
            .ok_or_else(|| QueryError::UnknownDimension(s.to_string()))
    }
}

// ============================================================================
// KEYS + PATH
// ============================================================================

/// A selected value. Ids for dimension tables, a flag for `obliged`, the
/// description text for `item`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DimensionKey {
    Id(i64),
    Flag(bool),
    Text(String),
}

impl DimensionKey {
    pub fn as_id(&self) -> Option<i64> {
        match self {
            DimensionKey::Id(id) => Some(*id),
            _ => None,
        }
    }
}

/// One pick on the navigation path. `key: None` selects the no-value bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathStep {
    pub dimension: Dimension,
    pub key: Option<DimensionKey>,
}

impl PathStep {
    pub fn pick(dimension: Dimension, key: DimensionKey) -> Self {
        PathStep { dimension, key: Some(key) }
    }

    pub fn id(dimension: Dimension, id: i64) -> Self {
        Self::pick(dimension, DimensionKey::Id(id))
    }

    pub fn no_value(dimension: Dimension) -> Self {
        PathStep { dimension, key: None }
    }
}

// ============================================================================
// REQUEST
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownRequest {
    pub years: Vec<i32>,
    pub group: Dimension,
    #[serde(default)]
    pub path: Vec<PathStep>,
    /// Explicit category depth, overriding the automatic choice
    #[serde(default)]
    pub category_level: Option<i64>,
    #[serde(default)]
    pub collapse: bool,
}

impl BreakdownRequest {
    pub fn new(years: Vec<i32>, group: Dimension) -> Self {
        BreakdownRequest {
            years,
            group,
            path: Vec::new(),
            category_level: None,
            collapse: false,
        }
    }

    pub fn with_step(mut self, step: PathStep) -> Self {
        self.path.push(step);
        self
    }

    pub fn with_category_level(mut self, level: i64) -> Self {
        self.category_level = Some(level);
        self
    }

    pub fn collapsed(mut self, collapse: bool) -> Self {
        self.collapse = collapse;
        self
    }
}

// ============================================================================
// RESPONSE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowBucket {
    /// A real dimension value
    Value,
    /// Facts lacking this dimension
    NoValue,
    /// Facts posted on an ancestor above the target category level
    UnspecifiedFurther,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollapsedChain {
    /// Root-most first
    pub labels: Vec<String>,
    pub ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownRow {
    /// None for the no-value and unspecified-further buckets
    pub key: Option<DimensionKey>,
    pub name: String,
    pub bucket: RowBucket,
    /// Category level (category grouping only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<i64>,
    pub amounts: BTreeMap<i32, f64>,
    pub shares: BTreeMap<i32, f64>,
    /// No further category below this row
    pub is_terminal: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collapsed: Option<CollapsedChain>,
}

impl BreakdownRow {
    pub fn amount_for(&self, year: i32) -> f64 {
        self.amounts.get(&year).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownResponse {
    pub years: Vec<i32>,
    pub group: Dimension,
    pub totals: BTreeMap<i32, f64>,
    pub rows: Vec<BreakdownRow>,
    pub is_leaf_level: bool,
    /// Target depth used for category grouping
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_level: Option<i64>,
}

impl BreakdownResponse {
    pub fn total_for(&self, year: i32) -> f64 {
        self.totals.get(&year).copied().unwrap_or(0.0)
    }

    pub fn row_named(&self, name: &str) -> Option<&BreakdownRow> {
        self.rows.iter().find(|r| r.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_names() {
        for dimension in Dimension::ALL {
            assert_eq!(dimension.as_str().parse::<Dimension>().unwrap(), dimension);
        }
        assert!(matches!("planet".parse::<Dimension>(), Err(QueryError::UnknownDimension(_))));
        assert!(matches!(Dimension::parse_group("planet"), Err(QueryError::UnsupportedGroup(_))));
    }

    #[test]
    fn test_dimension_key_json() {
        assert_eq!(serde_json::to_string(&DimensionKey::Id(5)).unwrap(), "5");
        assert_eq!(serde_json::to_string(&DimensionKey::Flag(true)).unwrap(), "true");
        let key: DimensionKey = serde_json::from_str("\"ค่าจ้าง\"").unwrap();
        assert_eq!(key, DimensionKey::Text("ค่าจ้าง".to_string()));
    }

    #[test]
    fn test_request_from_json() {
        let req: BreakdownRequest = serde_json::from_str(
            r#"{"years":[2569],"group":"category","path":[{"dimension":"ministry","key":3},{"dimension":"category","key":null}]}"#,
        )
        .unwrap();

        assert_eq!(req.group, Dimension::Category);
        assert_eq!(req.path[0], PathStep::id(Dimension::Ministry, 3));
        assert_eq!(req.path[1], PathStep::no_value(Dimension::Category));
        assert!(!req.collapse);
    }
}
