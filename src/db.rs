// 🗄️ Fact Store - SQLite schema for the reconciled budget
//
// Star schema: one immutable fact row per (line item, fiscal year), five
// name-keyed dimensions, and the category tree stored twice: adjacency
// (dim_category.parent_id) for terminal checks, closure
// (dim_category_path) for subtree filters in a single join.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tables in delete order (children before parents).
pub const TABLES: &[&str] = &[
    "fact_budget_item",
    "dim_category_path",
    "dim_category",
    "dim_project",
    "dim_output",
    "dim_budget_plan",
    "dim_budgetary_unit",
    "dim_ministry",
];

/// Open (or create) the fact store and make sure the schema exists.
pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database: {}", path.display()))?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL so the query server can read while an import runs
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Dimensions
    // ==========================================================================
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS dim_ministry (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS dim_budgetary_unit (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ministry_id INTEGER REFERENCES dim_ministry(id),
            name TEXT NOT NULL,
            UNIQUE (ministry_id, name)
        );

        CREATE TABLE IF NOT EXISTS dim_budget_plan (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS dim_output (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS dim_project (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        );",
    )?;

    // ==========================================================================
    // Category tree + closure
    // ==========================================================================
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS dim_category (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            parent_id INTEGER REFERENCES dim_category(id),
            level INTEGER NOT NULL,
            UNIQUE (name, parent_id, level)
        );

        CREATE TABLE IF NOT EXISTS dim_category_path (
            ancestor_id INTEGER NOT NULL REFERENCES dim_category(id),
            descendant_id INTEGER NOT NULL REFERENCES dim_category(id),
            depth INTEGER NOT NULL,
            PRIMARY KEY (ancestor_id, descendant_id)
        );",
    )?;

    // ==========================================================================
    // Facts (immutable after import)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS fact_budget_item (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            item_id TEXT NOT NULL,
            ref_doc TEXT,
            ref_page_no INTEGER,
            ministry_id INTEGER REFERENCES dim_ministry(id),
            budgetary_unit_id INTEGER REFERENCES dim_budgetary_unit(id),
            cross_func INTEGER,
            budget_plan_id INTEGER REFERENCES dim_budget_plan(id),
            output_id INTEGER REFERENCES dim_output(id),
            project_id INTEGER REFERENCES dim_project(id),
            category_id INTEGER REFERENCES dim_category(id),
            item_description TEXT,
            fiscal_year INTEGER NOT NULL,
            amount REAL NOT NULL,
            obliged INTEGER,
            obliged_year_start INTEGER,
            obliged_year_end INTEGER,
            obliged_total_amount REAL,
            obliged_inconsistent INTEGER NOT NULL DEFAULT 0,
            debug_log TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Import runs (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS import_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            strategy TEXT NOT NULL,
            source TEXT NOT NULL,
            summary TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_fact_year ON fact_budget_item(fiscal_year);
        CREATE INDEX IF NOT EXISTS idx_fact_ministry ON fact_budget_item(ministry_id);
        CREATE INDEX IF NOT EXISTS idx_fact_unit ON fact_budget_item(budgetary_unit_id);
        CREATE INDEX IF NOT EXISTS idx_fact_plan ON fact_budget_item(budget_plan_id);
        CREATE INDEX IF NOT EXISTS idx_fact_output ON fact_budget_item(output_id);
        CREATE INDEX IF NOT EXISTS idx_fact_project ON fact_budget_item(project_id);
        CREATE INDEX IF NOT EXISTS idx_fact_category ON fact_budget_item(category_id);
        CREATE INDEX IF NOT EXISTS idx_category_parent ON dim_category(parent_id);
        CREATE INDEX IF NOT EXISTS idx_category_level ON dim_category(level);
        CREATE INDEX IF NOT EXISTS idx_category_path_descendant ON dim_category_path(descendant_id, depth);",
    )?;

    Ok(())
}

/// Empty every budget table. The import-run log is kept.
pub fn reset_database(conn: &Connection) -> Result<()> {
    for table in TABLES {
        conn.execute(&format!("DELETE FROM {table}"), [])
            .with_context(|| format!("Failed to reset {table}"))?;
    }
    Ok(())
}

// ============================================================================
// COUNTS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounts {
    pub ministries: i64,
    pub budgetary_units: i64,
    pub budget_plans: i64,
    pub outputs: i64,
    pub projects: i64,
    pub categories: i64,
    pub category_paths: i64,
    pub facts: i64,
}

impl TableCounts {
    pub fn is_empty(&self) -> bool {
        *self == TableCounts::default()
    }
}

fn count_rows(conn: &Connection, table: &str) -> Result<i64> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
    Ok(count)
}

pub fn count_facts(conn: &Connection) -> Result<i64> {
    count_rows(conn, "fact_budget_item")
}

pub fn table_counts(conn: &Connection) -> Result<TableCounts> {
    Ok(TableCounts {
        ministries: count_rows(conn, "dim_ministry")?,
        budgetary_units: count_rows(conn, "dim_budgetary_unit")?,
        budget_plans: count_rows(conn, "dim_budget_plan")?,
        outputs: count_rows(conn, "dim_output")?,
        projects: count_rows(conn, "dim_project")?,
        categories: count_rows(conn, "dim_category")?,
        category_paths: count_rows(conn, "dim_category_path")?,
        facts: count_rows(conn, "fact_budget_item")?,
    })
}

/// Distinct fiscal years present in the fact table, ascending.
pub fn fiscal_years(conn: &Connection) -> Result<Vec<i32>> {
    let mut stmt = conn.prepare("SELECT DISTINCT fiscal_year FROM fact_budget_item ORDER BY fiscal_year")?;
    let years = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<i32>, _>>()?;
    Ok(years)
}

// ============================================================================
// IMPORT RUN LOG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRun {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub strategy: String,
    pub source: String,
    pub summary: serde_json::Value,
}

pub fn insert_import_run(conn: &Connection, run: &ImportRun) -> Result<()> {
    let summary_json = serde_json::to_string(&run.summary)?;

    conn.execute(
        "INSERT INTO import_runs (started_at, finished_at, strategy, source, summary)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            run.started_at.to_rfc3339(),
            run.finished_at.to_rfc3339(),
            run.strategy,
            run.source,
            summary_json,
        ],
    )?;

    Ok(())
}

/// Most recent first.
pub fn get_import_runs(conn: &Connection) -> Result<Vec<ImportRun>> {
    let mut stmt = conn.prepare(
        "SELECT started_at, finished_at, strategy, source, summary
         FROM import_runs
         ORDER BY id DESC",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(started, finished, strategy, source, summary)| {
            Ok(ImportRun {
                started_at: DateTime::parse_from_rfc3339(&started)
                    .context("Invalid started_at")?
                    .with_timezone(&Utc),
                finished_at: DateTime::parse_from_rfc3339(&finished)
                    .context("Invalid finished_at")?
                    .with_timezone(&Utc),
                strategy,
                source,
                summary: serde_json::from_str(&summary)?,
            })
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
