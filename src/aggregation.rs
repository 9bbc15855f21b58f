// ➕ Year Aggregator - one extract → one keyed, summed year
//
// Loads one year's extract, keeps only rows for that fiscal year,
// normalizes each record and sums amounts of rows sharing a key.
// Years are independent, so they are loaded in parallel; the join
// barrier is the collect before alias discovery.

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use crate::config::YearSource;
use crate::key::{composite_key, RecordKey};
use crate::normalization::Normalizer;
use crate::parser::{load_extract, BudgetRecord};

// ============================================================================
// TYPES
// ============================================================================

/// Obligation flags observed for one key. Both may be set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObligationFlags {
    pub obligated: bool,
    pub not_obligated: bool,
}

impl ObligationFlags {
    pub fn observe(&mut self, flag: Option<bool>) {
        match flag {
            Some(true) => self.obligated = true,
            Some(false) => self.not_obligated = true,
            None => {}
        }
    }

    pub fn merge(&mut self, other: ObligationFlags) {
        self.obligated |= other.obligated;
        self.not_obligated |= other.not_obligated;
    }

    pub fn is_conflicting(&self) -> bool {
        self.obligated && self.not_obligated
    }
}

/// All rows of one year that share a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRecord {
    /// Descriptive fields from the first row seen
    pub record: BudgetRecord,
    pub amount: f64,
    pub obligation: ObligationFlags,
    pub source_rows: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearStats {
    pub rows_read: usize,
    pub rows_in_year: usize,
    pub rows_other_year: usize,
    pub malformed_amounts: usize,
    pub duplicates_merged: usize,
}

#[derive(Debug, Clone, Default)]
pub struct YearAggregate {
    /// Buddhist Era label, e.g. 2569
    pub label: i32,
    pub entries: BTreeMap<RecordKey, AggregatedRecord>,
    pub stats: YearStats,
}

impl YearAggregate {
    pub fn new(label: i32) -> Self {
        YearAggregate {
            label,
            ..Default::default()
        }
    }

    /// Add a normalized record, summing into an existing entry with the same key.
    /// Returns true when the record merged into an existing entry.
    pub fn insert(&mut self, record: BudgetRecord) -> bool {
        let key = composite_key(&record);
        let amount = record.amount_or_zero();
        let obliged = record.obliged;

        match self.entries.get_mut(&key) {
            Some(existing) => {
                existing.amount += amount;
                existing.obligation.observe(obliged);
                existing.source_rows += 1;
                self.stats.duplicates_merged += 1;
                true
            }
            None => {
                let mut obligation = ObligationFlags::default();
                obligation.observe(obliged);
                self.entries.insert(
                    key,
                    AggregatedRecord {
                        record,
                        amount,
                        obligation,
                        source_rows: 1,
                    },
                );
                false
            }
        }
    }

    /// Merge a whole aggregated entry (used when alias rewriting changes keys).
    pub fn insert_aggregated(&mut self, entry: AggregatedRecord) -> bool {
        let key = composite_key(&entry.record);
        match self.entries.get_mut(&key) {
            Some(existing) => {
                existing.amount += entry.amount;
                existing.obligation.merge(entry.obligation);
                existing.source_rows += entry.source_rows;
                self.stats.duplicates_merged += 1;
                true
            }
            None => {
                self.entries.insert(key, entry);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_amount(&self) -> f64 {
        self.entries.values().map(|e| e.amount).sum()
    }
}

// ============================================================================
// AGGREGATOR
// ============================================================================

pub struct YearAggregator<'a> {
    normalizer: &'a Normalizer,
    /// Buddhist Era − Gregorian (543)
    calendar_offset: i32,
}

impl<'a> YearAggregator<'a> {
    pub fn new(normalizer: &'a Normalizer, calendar_offset: i32) -> Self {
        YearAggregator {
            normalizer,
            calendar_offset,
        }
    }

    /// Extracts write FISCAL_YEAR in the Gregorian calendar; a few use the
    /// Buddhist Era label directly. Both are accepted.
    pub fn belongs_to_year(&self, record: &BudgetRecord, label: i32) -> bool {
        match record.fiscal_year {
            Some(year) => year == label - self.calendar_offset || year == label,
            None => false,
        }
    }

    pub fn aggregate(&self, label: i32, records: Vec<BudgetRecord>) -> YearAggregate {
        let mut year = YearAggregate::new(label);

        for record in records {
            year.stats.rows_read += 1;
            if !self.belongs_to_year(&record, label) {
                year.stats.rows_other_year += 1;
                continue;
            }
            year.stats.rows_in_year += 1;
            if record.amount.is_none() {
                year.stats.malformed_amounts += 1;
            }
            year.insert(self.normalizer.normalize_record(&record));
        }

        info!(
            year = label,
            rows = year.stats.rows_read,
            kept = year.stats.rows_in_year,
            keys = year.len(),
            merged = year.stats.duplicates_merged,
            "aggregated fiscal year"
        );
        year
    }

    pub fn load(&self, source: &YearSource) -> Result<YearAggregate> {
        let records = load_extract(&source.path)
            .with_context(|| format!("Failed to load fiscal year {}", source.label))?;
        Ok(self.aggregate(source.label, records))
    }

    /// Load every configured year in parallel. Output is sorted by label.
    pub fn load_all(&self, sources: &[YearSource]) -> Result<Vec<YearAggregate>> {
        let mut years = sources
            .par_iter()
            .map(|source| self.load(source))
            .collect::<Result<Vec<_>>>()?;
        years.sort_by_key(|y| y.label);
        Ok(years)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn record(ministry: &str, amount: Option<f64>, year: i32, obliged: Option<bool>) -> BudgetRecord {
        BudgetRecord {
            ministry: Some(ministry.to_string()),
            budgetary_unit: Some("กรมทางหลวง".to_string()),
            categories: [Some("งบลงทุน".to_string()), None, None, None, None, None],
            item_description: Some("ค่าก่อสร้าง".to_string()),
            amount,
            fiscal_year: Some(year),
            obliged,
            ..Default::default()
        }
    }

    #[test]
    fn test_duplicate_keys_sum() {
        let normalizer = Normalizer::with_defaults();
        let aggregator = YearAggregator::new(&normalizer, 543);

        let year = aggregator.aggregate(
            2569,
            vec![
                record("กระทรวงคมนาคม", Some(100.0), 2026, None),
                record("กระทรวงคมนาคม", Some(250.5), 2026, None),
            ],
        );

        assert_eq!(year.len(), 1);
        let entry = year.entries.values().next().unwrap();
        assert_eq!(entry.amount, 350.5);
        assert_eq!(entry.source_rows, 2);
        assert_eq!(year.stats.duplicates_merged, 1);
    }

    #[test]
    fn test_filters_other_years() {
        let normalizer = Normalizer::with_defaults();
        let aggregator = YearAggregator::new(&normalizer, 543);

        let year = aggregator.aggregate(
            2569,
            vec![
                record("กระทรวงคมนาคม", Some(100.0), 2026, None),
                record("กระทรวงคมนาคม", Some(999.0), 2025, None),
                record("กระทรวงคมนาคม", Some(7.0), 2569, None),
            ],
        );

        assert_eq!(year.stats.rows_other_year, 1);
        assert_eq!(year.total_amount(), 107.0);
    }

    #[test]
    fn test_normalization_merges_renamed_ministry() {
        let normalizer = Normalizer::with_defaults();
        let aggregator = YearAggregator::new(&normalizer, 543);

        let year = aggregator.aggregate(
            2569,
            vec![
                record("กรมการขนส่งทางบก", Some(1.0), 2026, None),
                record("กรมขนส่งทางบก(1)", Some(2.0), 2026, None),
            ],
        );

        assert_eq!(year.len(), 1);
        assert_eq!(year.total_amount(), 3.0);
    }

    #[test]
    fn test_malformed_amount_counts_as_zero() {
        let normalizer = Normalizer::with_defaults();
        let aggregator = YearAggregator::new(&normalizer, 543);

        let year = aggregator.aggregate(
            2569,
            vec![
                record("กระทรวงคมนาคม", None, 2026, None),
                record("กระทรวงคมนาคม", Some(5.0), 2026, None),
            ],
        );

        assert_eq!(year.stats.malformed_amounts, 1);
        assert_eq!(year.total_amount(), 5.0);
    }

    #[test]
    fn test_obligation_flags_within_year() {
        let normalizer = Normalizer::with_defaults();
        let aggregator = YearAggregator::new(&normalizer, 543);

        let year = aggregator.aggregate(
            2569,
            vec![
                record("กระทรวงคมนาคม", Some(1.0), 2026, Some(true)),
                record("กระทรวงคมนาคม", Some(1.0), 2026, Some(false)),
            ],
        );

        let entry = year.entries.values().next().unwrap();
        assert!(entry.obligation.is_conflicting());
    }

    #[test]
    fn test_load_all_sorted_by_label() {
        let header = "MINISTRY,BUDGETARY_UNIT,CATEGORY_LV1,ITEM_DESCRIPTION,AMOUNT,FISCAL_YEAR";

        let mut f69 = tempfile::NamedTempFile::new().unwrap();
        writeln!(f69, "{header}\nกระทรวงคมนาคม,กรมทางหลวง,งบลงทุน,ถนน,\"1,000\",2026").unwrap();
        let mut f68 = tempfile::NamedTempFile::new().unwrap();
        writeln!(f68, "{header}\nกระทรวงคมนาคม,กรมทางหลวง,งบลงทุน,ถนน,500,2025").unwrap();

        let normalizer = Normalizer::with_defaults();
        let aggregator = YearAggregator::new(&normalizer, 543);
        let years = aggregator
            .load_all(&[
                YearSource { label: 2569, path: f69.path().to_path_buf() },
                YearSource { label: 2568, path: f68.path().to_path_buf() },
            ])
            .unwrap();

        assert_eq!(years.len(), 2);
        assert_eq!(years[0].label, 2568);
        assert_eq!(years[0].total_amount(), 500.0);
        assert_eq!(years[1].total_amount(), 1000.0);
    }
}
