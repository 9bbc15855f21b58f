// 📥 Fact Importer - reconciled extract → dimensions, category tree, facts
//
// Runs in one SQLite transaction: any failure rolls back every dimension,
// category and fact written so far. Facts are buffered and flushed in
// fixed-size batches.
//
// Two strategies:
//   PerRow      → resolve each dimension value on first sight
//   BulkPreload → collect distinct values up front, upsert each dimension in
//                 one pass, then stream facts from the warm caches

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::db::{insert_import_run, reset_database, ImportRun};
use crate::entities::{
    bulk_upsert_budgetary_units, bulk_upsert_named, get_or_create_category_path, upsert_budgetary_unit,
    upsert_named, CategoryCache, NamedDimension,
};
use crate::key::category_path;
use crate::reconciliation::{read_reconciled, MergedRecord, ReconciledExtract};

pub const DEFAULT_BATCH_SIZE: usize = 2000;

/// Progress log interval, in extract rows.
const PROGRESS_EVERY: usize = 5000;

// ============================================================================
// STRATEGY
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStrategy {
    PerRow,
    #[default]
    #[serde(alias = "bulk")]
    BulkPreload,
}

impl ImportStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStrategy::PerRow => "per_row",
            ImportStrategy::BulkPreload => "bulk_preload",
        }
    }
}

impl fmt::Display for ImportStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "per_row" => Ok(ImportStrategy::PerRow),
            "bulk" | "bulk_preload" => Ok(ImportStrategy::BulkPreload),
            other => Err(anyhow!("unknown import strategy '{}' (expected per-row or bulk)", other)),
        }
    }
}

// ============================================================================
// FACT ROW
// ============================================================================

/// One immutable row of `fact_budget_item`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRow {
    /// "<row id>_<year>"
    pub item_id: String,
    pub ref_doc: Option<String>,
    pub ref_page_no: Option<i64>,
    pub ministry_id: Option<i64>,
    pub budgetary_unit_id: Option<i64>,
    pub cross_func: Option<bool>,
    pub budget_plan_id: Option<i64>,
    pub output_id: Option<i64>,
    pub project_id: Option<i64>,
    pub category_id: Option<i64>,
    pub item_description: Option<String>,
    pub fiscal_year: i32,
    pub amount: f64,
    pub obliged: Option<bool>,
    pub obliged_year_start: Option<i32>,
    pub obliged_year_end: Option<i32>,
    pub obliged_total_amount: Option<f64>,
    pub obliged_inconsistent: bool,
    pub debug_log: Option<String>,
}

// ============================================================================
// STATE + SUMMARY
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub strategy: String,
    pub rows_read: usize,
    pub facts_written: usize,
    pub zero_amounts_skipped: usize,
    pub categories_created: usize,
    pub closure_rows_written: usize,
    pub batches_flushed: usize,
}

/// Memo caches for one import run. Owned by the importer, never shared.
#[derive(Debug, Default)]
pub struct ImportState {
    pub categories: CategoryCache,
    named: HashMap<(NamedDimension, String), i64>,
    units: HashMap<(Option<i64>, String), i64>,
    pending: Vec<FactRow>,
    pub summary: ImportSummary,
}

impl ImportState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_facts(&self) -> usize {
        self.pending.len()
    }
}

// ============================================================================
// IMPORTER
// ============================================================================

pub struct FactImporter {
    pub strategy: ImportStrategy,
    pub batch_size: usize,
    /// Empty every table first (same transaction)
    pub reset: bool,
}

impl FactImporter {
    pub fn new(strategy: ImportStrategy, batch_size: usize) -> Self {
        FactImporter {
            strategy,
            batch_size: batch_size.max(1),
            reset: false,
        }
    }

    pub fn with_reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    /// Read a reconciled extract from disk and import it.
    pub fn import_file(&self, conn: &mut Connection, path: &Path) -> Result<ImportSummary> {
        let extract = read_reconciled(path)?;
        self.import(conn, &extract, &path.display().to_string())
    }

    /// All-or-nothing: on error nothing written by this call persists.
    pub fn import(&self, conn: &mut Connection, extract: &ReconciledExtract, source: &str) -> Result<ImportSummary> {
        let started_at = Utc::now();
        let tx = conn.transaction().context("Failed to start import transaction")?;

        if self.reset {
            reset_database(&tx)?;
            info!("tables reset");
        }

        let mut state = ImportState::new();
        state.summary.strategy = self.strategy.to_string();

        if self.strategy == ImportStrategy::BulkPreload {
            self.preload(&tx, &mut state, &extract.rows)?;
        }

        for row in &extract.rows {
            self.import_row(&tx, &mut state, row)?;
            if state.summary.rows_read % PROGRESS_EVERY == 0 {
                info!(
                    rows = state.summary.rows_read,
                    facts = state.summary.facts_written + state.pending.len(),
                    "import progress"
                );
            }
        }
        self.flush(&tx, &mut state)?;

        state.summary.categories_created = state.categories.nodes_created;
        state.summary.closure_rows_written = state.categories.closure_rows_written;

        insert_import_run(
            &tx,
            &ImportRun {
                started_at,
                finished_at: Utc::now(),
                strategy: self.strategy.to_string(),
                source: source.to_string(),
                summary: serde_json::to_value(&state.summary)?,
            },
        )?;

        tx.commit().context("Failed to commit import")?;

        info!(
            rows = state.summary.rows_read,
            facts = state.summary.facts_written,
            categories = state.summary.categories_created,
            "import complete"
        );
        Ok(state.summary)
    }

    /// Upsert every distinct dimension value before any fact is written.
    fn preload(&self, conn: &Connection, state: &mut ImportState, rows: &[MergedRecord]) -> Result<()> {
        for dimension in NamedDimension::ALL {
            let names: BTreeSet<String> = rows
                .iter()
                .filter_map(|row| named_value(row, dimension))
                .map(str::to_string)
                .collect();
            let ids = bulk_upsert_named(conn, dimension, &names)?;
            debug!(table = dimension.table(), count = ids.len(), "preloaded dimension");
            state
                .named
                .extend(ids.into_iter().map(|(name, id)| ((dimension, name), id)));
        }

        // Units need ministry ids, so they come last
        let mut units = BTreeSet::new();
        for row in rows {
            let Some(unit) = row.record.budgetary_unit.as_deref() else {
                continue;
            };
            let ministry_id = named_value(row, NamedDimension::Ministry)
                .and_then(|m| state.named.get(&(NamedDimension::Ministry, m.to_string())).copied());
            units.insert((ministry_id, unit.to_string()));
        }
        let ids = bulk_upsert_budgetary_units(conn, &units)?;
        debug!(table = "dim_budgetary_unit", count = ids.len(), "preloaded dimension");
        state.units.extend(ids);

        Ok(())
    }

    fn import_row(&self, conn: &Connection, state: &mut ImportState, row: &MergedRecord) -> Result<()> {
        state.summary.rows_read += 1;
        let record = &row.record;

        let ministry_id = resolve_named(conn, state, NamedDimension::Ministry, record.ministry.as_deref())?;
        let budgetary_unit_id = match record.budgetary_unit.as_deref() {
            Some(unit) => Some(resolve_unit(conn, state, ministry_id, unit)?),
            None => None,
        };
        let budget_plan_id = resolve_named(conn, state, NamedDimension::BudgetPlan, record.budget_plan.as_deref())?;
        let output_id = resolve_named(conn, state, NamedDimension::Output, record.output.as_deref())?;
        let project_id = resolve_named(conn, state, NamedDimension::Project, record.project.as_deref())?;

        let levels: Vec<Option<String>> = category_path(record).into_iter().map(Some).collect();
        let category_id = get_or_create_category_path(conn, &mut state.categories, &levels)?;

        for (year, amount) in &row.amounts {
            if *amount == 0.0 {
                state.summary.zero_amounts_skipped += 1;
                continue;
            }

            state.pending.push(FactRow {
                item_id: format!("{}_{}", row.item_id, year),
                ref_doc: record.ref_doc.clone(),
                ref_page_no: record.ref_page_no,
                ministry_id,
                budgetary_unit_id,
                cross_func: record.cross_func,
                budget_plan_id,
                output_id,
                project_id,
                category_id,
                item_description: record.item_description.clone(),
                fiscal_year: *year,
                amount: *amount,
                obliged: record.obliged,
                obliged_year_start: row.obligation.start,
                obliged_year_end: row.obligation.end,
                obliged_total_amount: row.obligation.total,
                obliged_inconsistent: row.obligation.inconsistent,
                debug_log: row.debug_log.clone(),
            });

            if state.pending.len() >= self.batch_size {
                self.flush(conn, state)?;
            }
        }

        Ok(())
    }

    fn flush(&self, conn: &Connection, state: &mut ImportState) -> Result<()> {
        if state.pending.is_empty() {
            return Ok(());
        }

        let mut stmt = conn.prepare_cached(
            "INSERT INTO fact_budget_item (
                item_id, ref_doc, ref_page_no, ministry_id, budgetary_unit_id, cross_func,
                budget_plan_id, output_id, project_id, category_id, item_description,
                fiscal_year, amount, obliged,
                obliged_year_start, obliged_year_end, obliged_total_amount, obliged_inconsistent,
                debug_log
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
        )?;

        let batch_len = state.pending.len();
        for fact in state.pending.drain(..) {
            stmt.execute(params![
                fact.item_id,
                fact.ref_doc,
                fact.ref_page_no,
                fact.ministry_id,
                fact.budgetary_unit_id,
                fact.cross_func,
                fact.budget_plan_id,
                fact.output_id,
                fact.project_id,
                fact.category_id,
                fact.item_description,
                fact.fiscal_year,
                fact.amount,
                fact.obliged,
                fact.obliged_year_start,
                fact.obliged_year_end,
                fact.obliged_total_amount,
                fact.obliged_inconsistent,
                fact.debug_log,
            ])
            .with_context(|| format!("Failed to insert fact {}", fact.item_id))?;
        }

        state.summary.facts_written += batch_len;
        state.summary.batches_flushed += 1;
        debug!(facts = batch_len, "flushed fact batch");
        Ok(())
    }
}

impl Default for FactImporter {
    fn default() -> Self {
        Self::new(ImportStrategy::default(), DEFAULT_BATCH_SIZE)
    }
}

fn named_value(row: &MergedRecord, dimension: NamedDimension) -> Option<&str> {
    let record = &row.record;
    match dimension {
        NamedDimension::Ministry => record.ministry.as_deref(),
        NamedDimension::BudgetPlan => record.budget_plan.as_deref(),
        NamedDimension::Output => record.output.as_deref(),
        NamedDimension::Project => record.project.as_deref(),
    }
}

fn resolve_named(
    conn: &Connection,
    state: &mut ImportState,
    dimension: NamedDimension,
    name: Option<&str>,
) -> Result<Option<i64>> {
    let Some(name) = name else {
        return Ok(None);
    };
    let key = (dimension, name.to_string());
    if let Some(id) = state.named.get(&key) {
        return Ok(Some(*id));
    }
    let id = upsert_named(conn, dimension, name)?;
    state.named.insert(key, id);
    Ok(Some(id))
}

fn resolve_unit(conn: &Connection, state: &mut ImportState, ministry_id: Option<i64>, name: &str) -> Result<i64> {
    let key = (ministry_id, name.to_string());
    if let Some(id) = state.units.get(&key) {
        return Ok(*id);
    }
    let id = upsert_budgetary_unit(conn, ministry_id, name)?;
    state.units.insert(key, id);
    Ok(id)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_import_runs, setup_database, table_counts};
    use crate::entities::{closure_for, incomplete_closures, list_categories};
    use crate::key::{composite_key, UNSPECIFIED_CATEGORY};
    use crate::parser::BudgetRecord;
    use crate::reconciliation::ObligationSpan;
    use std::collections::BTreeMap;

    fn merged(ministry: &str, unit: &str, categories: &[&str], amounts: &[(i32, f64)]) -> MergedRecord {
        let mut levels: [Option<String>; 6] = Default::default();
        for (slot, name) in levels.iter_mut().zip(categories) {
            *slot = Some(name.to_string());
        }
        let record = BudgetRecord {
            ministry: Some(ministry.to_string()),
            budgetary_unit: Some(unit.to_string()),
            budget_plan: Some("แผนงานพื้นฐาน".to_string()),
            categories: levels,
            item_description: Some(format!("รายการ {}", categories.join("/"))),
            ..Default::default()
        };
        let key = composite_key(&record);
        MergedRecord {
            item_id: key.row_id(),
            key,
            record,
            amounts: amounts.iter().copied().collect::<BTreeMap<_, _>>(),
            obligation: ObligationSpan::default(),
            debug_log: Some("2569:1".to_string()),
        }
    }

    fn extract() -> ReconciledExtract {
        ReconciledExtract {
            years: vec![2568, 2569],
            rows: vec![
                merged("กระทรวง ก", "กรม 1", &["งบลงทุน", "ค่าที่ดิน"], &[(2568, 10.0), (2569, 20.0)]),
                merged("กระทรวง ก", "กรม 1", &["งบลงทุน"], &[(2569, 5.0)]),
                merged("กระทรวง ข", "กรม 1", &["งบดำเนินงาน", "ค่าวัสดุ"], &[(2568, 0.0), (2569, 7.0)]),
                merged("กระทรวง ข", "กรม 2", &[], &[(2569, 3.0)]),
            ],
        }
    }

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("per-row".parse::<ImportStrategy>().unwrap(), ImportStrategy::PerRow);
        assert_eq!("bulk".parse::<ImportStrategy>().unwrap(), ImportStrategy::BulkPreload);
        assert_eq!("BULK_PRELOAD".parse::<ImportStrategy>().unwrap(), ImportStrategy::BulkPreload);
        assert!("fast".parse::<ImportStrategy>().is_err());
        assert_eq!(ImportStrategy::default(), ImportStrategy::BulkPreload);
    }

    #[test]
    fn test_import_writes_facts_and_dimensions() {
        let mut conn = conn();
        let summary = FactImporter::default().import(&mut conn, &extract(), "test").unwrap();

        assert_eq!(summary.rows_read, 4);
        assert_eq!(summary.facts_written, 5);
        assert_eq!(summary.zero_amounts_skipped, 1);

        let counts = table_counts(&conn).unwrap();
        assert_eq!(counts.ministries, 2);
        // "กรม 1" under two ministries is two units
        assert_eq!(counts.budgetary_units, 3);
        assert_eq!(counts.budget_plans, 1);
        assert_eq!(counts.facts, 5);
        assert_eq!(get_import_runs(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_item_ids_carry_year() {
        let mut conn = conn();
        let data = extract();
        FactImporter::default().import(&mut conn, &data, "test").unwrap();

        let expected = format!("{}_2568", data.rows[0].item_id);
        let found: i64 = conn
            .query_row("SELECT COUNT(*) FROM fact_budget_item WHERE item_id = ?1", [&expected], |r| r.get(0))
            .unwrap();
        assert_eq!(found, 1);
    }

    #[test]
    fn test_missing_category_uses_sentinel() {
        let mut conn = conn();
        FactImporter::default().import(&mut conn, &extract(), "test").unwrap();

        let sentinel = list_categories(&conn)
            .unwrap()
            .into_iter()
            .find(|c| c.name == UNSPECIFIED_CATEGORY)
            .unwrap();
        assert_eq!(sentinel.level, 1);
        assert_eq!(closure_for(&conn, sentinel.id).unwrap().len(), 1);
    }

    #[test]
    fn test_closure_complete_for_every_fact() {
        let mut conn = conn();
        FactImporter::new(ImportStrategy::PerRow, 2).import(&mut conn, &extract(), "test").unwrap();
        assert!(incomplete_closures(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_strategies_produce_same_store() {
        let mut per_row = conn();
        let mut bulk = conn();
        FactImporter::new(ImportStrategy::PerRow, 2000).import(&mut per_row, &extract(), "a").unwrap();
        FactImporter::new(ImportStrategy::BulkPreload, 2000).import(&mut bulk, &extract(), "b").unwrap();

        assert_eq!(table_counts(&per_row).unwrap(), table_counts(&bulk).unwrap());
    }

    #[test]
    fn test_debug_log_reaches_fact_rows() {
        let mut conn = conn();
        FactImporter::default().import(&mut conn, &extract(), "test").unwrap();

        let logged: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM fact_budget_item WHERE debug_log = '2569:1'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(logged, 5);
    }

    #[test]
    fn test_small_batches_flush_repeatedly() {
        let mut conn = conn();
        let summary = FactImporter::new(ImportStrategy::BulkPreload, 2).import(&mut conn, &extract(), "test").unwrap();

        assert_eq!(summary.facts_written, 5);
        assert_eq!(summary.batches_flushed, 3);
    }

    #[test]
    fn test_reset_reimport_same_counts() {
        let mut conn = conn();
        let importer = FactImporter::default().with_reset(true);

        importer.import(&mut conn, &extract(), "first").unwrap();
        let first = table_counts(&conn).unwrap();
        importer.import(&mut conn, &extract(), "second").unwrap();
        let second = table_counts(&conn).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_failed_batch_rolls_back_everything() {
        let mut conn = conn();
        conn.execute_batch(
            "CREATE TRIGGER reject_fact BEFORE INSERT ON fact_budget_item
             WHEN NEW.amount = 7.0
             BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        )
        .unwrap();

        let result = FactImporter::new(ImportStrategy::PerRow, 1).import(&mut conn, &extract(), "test");

        assert!(result.is_err());
        assert!(table_counts(&conn).unwrap().is_empty());
        assert!(get_import_runs(&conn).unwrap().is_empty());
    }
}
