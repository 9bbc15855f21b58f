use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::import::ImportStrategy;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Contents of `budget-ledger.toml`.
///
/// ```toml
/// calendar_offset = 543
/// reconciled_path = "data/data-all-years.csv"
/// database_path = "data/budget.db"
///
/// [[years]]
/// label = 2568
/// path = "data/data-68.csv"
///
/// [[years]]
/// label = 2569
/// path = "data/data-69.csv"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub years: Vec<YearSource>,
    #[serde(default = "default_calendar_offset")]
    pub calendar_offset: i32,
    #[serde(default = "default_reconciled_path")]
    pub reconciled_path: PathBuf,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub normalization: NormalizationConfig,
}

/// One fiscal year's extract. `label` is the Buddhist Era year (e.g. 2569).
#[derive(Debug, Clone, Deserialize)]
pub struct YearSource {
    pub label: i32,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub strategy: ImportStrategy,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            strategy: ImportStrategy::default(),
        }
    }
}

/// Extra curated rules appended to the built-in tables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NormalizationConfig {
    #[serde(default)]
    pub renames: BTreeMap<String, String>,
    /// Applied in file order, after the built-in corrections.
    #[serde(default)]
    pub corrections: Vec<CorrectionRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CorrectionRule {
    pub find: String,
    pub replace: String,
}

fn default_calendar_offset() -> i32 {
    543
}

fn default_reconciled_path() -> PathBuf {
    PathBuf::from("data-all-years.csv")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("budget.db")
}

fn default_batch_size() -> usize {
    2000
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.years.is_empty() {
            return Err(ConfigError::Validation(
                "at least one [[years]] entry is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for year in &self.years {
            if !seen.insert(year.label) {
                return Err(ConfigError::Validation(format!(
                    "fiscal year {} listed twice",
                    year.label
                )));
            }
        }

        if self.import.batch_size == 0 {
            return Err(ConfigError::Validation(
                "import.batch_size must be positive".to_string(),
            ));
        }

        if self
            .normalization
            .corrections
            .iter()
            .any(|rule| rule.find.is_empty())
        {
            return Err(ConfigError::Validation(
                "correction rules need a non-empty `find`".to_string(),
            ));
        }

        Ok(())
    }

    /// Year labels in ascending order.
    pub fn year_labels(&self) -> Vec<i32> {
        let mut labels: Vec<i32> = self.years.iter().map(|y| y.label).collect();
        labels.sort_unstable();
        labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = PipelineConfig::parse(
            r#"
            [[years]]
            label = 2569
            path = "data-69.csv"
            "#,
        )
        .unwrap();

        assert_eq!(config.calendar_offset, 543);
        assert_eq!(config.import.batch_size, 2000);
        assert_eq!(config.import.strategy, ImportStrategy::BulkPreload);
        assert_eq!(config.database_path, PathBuf::from("budget.db"));
        assert!(config.normalization.renames.is_empty());
    }

    #[test]
    fn test_full_config() {
        let config = PipelineConfig::parse(
            r#"
            calendar_offset = 543
            reconciled_path = "out/all.csv"
            database_path = "out/budget.db"

            [[years]]
            label = 2569
            path = "data-69.csv"

            [[years]]
            label = 2565
            path = "data-65.csv"

            [import]
            batch_size = 500
            strategy = "per_row"

            [normalization.renames]
            "กรมทางหลวงชนบท(2)" = "กรมทางหลวงชนบท"

            [[normalization.corrections]]
            find = "กรมทางหลวงชนบ"
            replace = "กรมทางหลวงชนบท"
            "#,
        )
        .unwrap();

        assert_eq!(config.year_labels(), vec![2565, 2569]);
        assert_eq!(config.import.batch_size, 500);
        assert_eq!(config.import.strategy, ImportStrategy::PerRow);
        assert_eq!(config.normalization.renames.len(), 1);
        assert_eq!(config.normalization.corrections[0].find, "กรมทางหลวงชนบ");
    }

    #[test]
    fn test_rejects_empty_years() {
        let err = PipelineConfig::parse("years = []").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_rejects_duplicate_years() {
        let err = PipelineConfig::parse(
            r#"
            [[years]]
            label = 2569
            path = "a.csv"

            [[years]]
            label = 2569
            path = "b.csv"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("2569"));
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let err = PipelineConfig::parse(
            r#"
            [[years]]
            label = 2569
            path = "a.csv"

            [import]
            batch_size = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }
}
