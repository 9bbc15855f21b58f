// ⚖️ Multi-Year Reconciler - outer join of every fiscal year by natural key
//
// One output row per real-world line item:
//   descriptive fields  → latest contributing year
//   AMOUNT_<year>       → that year's summed amount (blank when absent)
//   ROW_SOURCE          → contributing years
//   OBLIGED_*           → span over the years that flagged the item obligated
//
// Obligation flags that disagree are reported, never silently resolved.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};
use std::path::Path;
use tracing::{info, warn};

use crate::aggregation::{ObligationFlags, YearAggregate};
use crate::key::{composite_key, RecordKey};
use crate::parser::{clean_text, parse_amount, parse_bool, parse_integer, BudgetRecord, CATEGORY_LEVELS};

// ============================================================================
// MERGED RECORD
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObligationSpan {
    pub start: Option<i32>,
    pub end: Option<i32>,
    pub total: Option<f64>,
    pub inconsistent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRecord {
    pub key: RecordKey,
    /// Stable row id derived from the key
    pub item_id: String,
    /// Descriptive fields; `amount` and `fiscal_year` are unused here
    pub record: BudgetRecord,
    /// year label → amount, contributing years only
    pub amounts: BTreeMap<i32, f64>,
    pub obligation: ObligationSpan,
    /// Audit trail carried into the fact store ("2568:2;2569:1")
    #[serde(default)]
    pub debug_log: Option<String>,
}

impl MergedRecord {
    /// Contributing years, ascending.
    pub fn sources(&self) -> Vec<i32> {
        self.amounts.keys().copied().collect()
    }

    pub fn amount_for(&self, year: i32) -> Option<f64> {
        self.amounts.get(&year).copied()
    }

    pub fn row_source(&self) -> String {
        self.sources()
            .iter()
            .map(|y| y.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

// ============================================================================
// RECONCILER
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileStats {
    pub rows: usize,
    pub multi_year_rows: usize,
    pub obligation_conflicts: usize,
}

impl ReconcileStats {
    pub fn summary(&self) -> String {
        format!(
            "{} reconciled rows ({} span several years, {} obligation conflicts)",
            self.rows, self.multi_year_rows, self.obligation_conflicts
        )
    }
}

pub struct MultiYearReconciler;

impl MultiYearReconciler {
    pub fn new() -> Self {
        MultiYearReconciler
    }

    /// Outer-join all years. Output is in ascending key order.
    pub fn reconcile(&self, years: &[YearAggregate]) -> (Vec<MergedRecord>, ReconcileStats) {
        let mut ordered: Vec<&YearAggregate> = years.iter().collect();
        ordered.sort_by_key(|y| y.label);

        let keys: BTreeSet<&RecordKey> = ordered.iter().flat_map(|y| y.entries.keys()).collect();
        let mut stats = ReconcileStats::default();
        let mut merged = Vec::with_capacity(keys.len());

        for key in keys {
            let mut amounts = BTreeMap::new();
            let mut flags = ObligationFlags::default();
            let mut span = ObligationSpan::default();
            let mut descriptive: Option<&BudgetRecord> = None;
            let mut trail: Vec<String> = Vec::new();

            for year in &ordered {
                let Some(entry) = year.entries.get(key) else {
                    continue;
                };
                amounts.insert(year.label, entry.amount);
                flags.merge(entry.obligation);
                trail.push(format!("{}:{}", year.label, entry.source_rows));

                if entry.obligation.obligated {
                    span.start = Some(span.start.map_or(year.label, |s| s.min(year.label)));
                    span.end = Some(span.end.map_or(year.label, |e| e.max(year.label)));
                    span.total = Some(span.total.unwrap_or(0.0) + entry.amount);
                }
                // ascending scan: the last hit is the latest year
                descriptive = Some(&entry.record);
            }

            let Some(record) = descriptive else {
                continue;
            };

            if flags.is_conflicting() {
                span.inconsistent = true;
                stats.obligation_conflicts += 1;
                trail.push("obliged-conflict".to_string());
                warn!(key = %key, years = ?amounts.keys().collect::<Vec<_>>(), "obligation status disagrees across years");
            }

            if amounts.len() > 1 {
                stats.multi_year_rows += 1;
            }

            let mut record = record.clone();
            record.amount = None;
            record.fiscal_year = None;

            merged.push(MergedRecord {
                key: key.clone(),
                item_id: key.row_id(),
                record,
                amounts,
                obligation: span,
                debug_log: Some(trail.join(";")),
            });
        }

        stats.rows = merged.len();
        info!("{}", stats.summary());
        (merged, stats)
    }
}

impl Default for MultiYearReconciler {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// RECONCILED EXTRACT (CSV)
// ============================================================================

const DESCRIPTIVE_COLUMNS: &[&str] = &[
    "MINISTRY",
    "BUDGETARY_UNIT",
    "BUDGET_PLAN",
    "CROSS_FUNC",
    "OUTPUT",
    "PROJECT",
    "CATEGORY_LV1",
    "CATEGORY_LV2",
    "CATEGORY_LV3",
    "CATEGORY_LV4",
    "CATEGORY_LV5",
    "CATEGORY_LV6",
    "ITEM_DESCRIPTION",
    "OBLIGED",
    "REF_DOC",
    "REF_PAGE_NO",
];

const SPAN_COLUMNS: &[&str] = &[
    "ROW_SOURCE",
    "OBLIGED_YEAR_START",
    "OBLIGED_YEAR_END",
    "OBLIGED_TOTAL_AMOUNT",
    "OBLIGED_INCONSISTENT",
    "DEBUG_LOG",
];

/// Reconciled rows plus the fiscal years that have an AMOUNT column.
#[derive(Debug, Clone, Default)]
pub struct ReconciledExtract {
    pub years: Vec<i32>,
    pub rows: Vec<MergedRecord>,
}

fn header(years: &[i32]) -> Vec<String> {
    let mut columns = vec!["ITEM_ID".to_string()];
    columns.extend(DESCRIPTIVE_COLUMNS.iter().map(|c| c.to_string()));
    columns.extend(years.iter().map(|y| format!("AMOUNT_{y}")));
    columns.extend(SPAN_COLUMNS.iter().map(|c| c.to_string()));
    columns
}

fn opt_text(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn opt_bool(value: Option<bool>) -> String {
    value.map(|b| b.to_string()).unwrap_or_default()
}

fn opt_display<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

pub fn write_reconciled(path: &Path, extract: &ReconciledExtract) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create reconciled extract: {}", path.display()))?;
    write_reconciled_to(file, extract)
}

pub fn write_reconciled_to<W: Write>(writer: W, extract: &ReconciledExtract) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(header(&extract.years))?;

    for row in &extract.rows {
        let r = &row.record;
        let mut fields = vec![
            row.item_id.clone(),
            opt_text(&r.ministry),
            opt_text(&r.budgetary_unit),
            opt_text(&r.budget_plan),
            opt_bool(r.cross_func),
            opt_text(&r.output),
            opt_text(&r.project),
        ];
        fields.extend(r.categories.iter().map(opt_text));
        fields.push(opt_text(&r.item_description));
        fields.push(opt_bool(r.obliged));
        fields.push(opt_text(&r.ref_doc));
        fields.push(opt_display(r.ref_page_no));
        fields.extend(extract.years.iter().map(|y| opt_display(row.amount_for(*y))));
        fields.push(row.row_source());
        fields.push(opt_display(row.obligation.start));
        fields.push(opt_display(row.obligation.end));
        fields.push(opt_display(row.obligation.total));
        fields.push(row.obligation.inconsistent.to_string());
        fields.push(opt_text(&row.debug_log));

        wtr.write_record(&fields)?;
    }

    wtr.flush().context("Failed to flush reconciled extract")?;
    Ok(())
}

pub fn read_reconciled(path: &Path) -> Result<ReconciledExtract> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open reconciled extract: {}", path.display()))?;
    read_reconciled_from(file)
        .with_context(|| format!("Failed to read reconciled extract: {}", path.display()))
}

pub fn read_reconciled_from<R: Read>(reader: R) -> Result<ReconciledExtract> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let index: BTreeMap<&str, usize> = headers.iter().enumerate().map(|(i, h)| (h, i)).collect();

    let mut year_columns: Vec<(i32, usize)> = headers
        .iter()
        .enumerate()
        .filter_map(|(i, h)| {
            h.strip_prefix("AMOUNT_")
                .and_then(|y| y.parse::<i32>().ok())
                .map(|y| (y, i))
        })
        .collect();
    year_columns.sort_unstable();

    if !index.contains_key("ITEM_ID") {
        return Err(anyhow!("reconciled extract has no ITEM_ID column"));
    }

    let mut rows = Vec::new();
    for (line_num, result) in rdr.records().enumerate() {
        let rec = result.with_context(|| format!("Failed to parse CSV line {}", line_num + 2))?;
        let cell = |name: &str| index.get(name).and_then(|i| rec.get(*i));
        let text = |name: &str| clean_text(cell(name));

        let mut categories: [Option<String>; CATEGORY_LEVELS] = Default::default();
        for (level, slot) in categories.iter_mut().enumerate() {
            *slot = text(format!("CATEGORY_LV{}", level + 1).as_str());
        }

        let record = BudgetRecord {
            ministry: text("MINISTRY"),
            budgetary_unit: text("BUDGETARY_UNIT"),
            budget_plan: text("BUDGET_PLAN"),
            output: text("OUTPUT"),
            project: text("PROJECT"),
            categories,
            item_description: text("ITEM_DESCRIPTION"),
            amount: None,
            fiscal_year: None,
            cross_func: cell("CROSS_FUNC").and_then(parse_bool),
            obliged: cell("OBLIGED").and_then(parse_bool),
            ref_doc: text("REF_DOC"),
            ref_page_no: cell("REF_PAGE_NO").and_then(parse_integer),
        };

        let amounts = year_columns
            .iter()
            .filter_map(|(year, i)| rec.get(*i).and_then(parse_amount).map(|a| (*year, a)))
            .collect();

        let obligation = ObligationSpan {
            start: cell("OBLIGED_YEAR_START")
                .and_then(parse_integer)
                .and_then(|y| i32::try_from(y).ok()),
            end: cell("OBLIGED_YEAR_END")
                .and_then(parse_integer)
                .and_then(|y| i32::try_from(y).ok()),
            total: cell("OBLIGED_TOTAL_AMOUNT").and_then(parse_amount),
            inconsistent: cell("OBLIGED_INCONSISTENT").and_then(parse_bool).unwrap_or(false),
        };

        let key = composite_key(&record);
        let item_id = text("ITEM_ID").unwrap_or_else(|| key.row_id());

        rows.push(MergedRecord {
            key,
            item_id,
            record,
            amounts,
            obligation,
            debug_log: text("DEBUG_LOG"),
        });
    }

    Ok(ReconciledExtract {
        years: year_columns.into_iter().map(|(y, _)| y).collect(),
        rows,
    })
}

// ============================================================================
// TESTS
// ============================================================================
