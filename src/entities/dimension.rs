// 🏛️ Dimension Entities - ministry, unit, plan, output, project
//
// Every dimension is looked up by its natural key (the canonical name).
// Upserts are idempotent: importing the same name twice yields the same id.
// Budgetary units are scoped within their ministry.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

// ============================================================================
// NAMED DIMENSIONS (globally unique name)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NamedDimension {
    Ministry,
    BudgetPlan,
    Output,
    Project,
}

impl NamedDimension {
    pub const ALL: [NamedDimension; 4] = [
        NamedDimension::Ministry,
        NamedDimension::BudgetPlan,
        NamedDimension::Output,
        NamedDimension::Project,
    ];

    pub fn table(&self) -> &'static str {
        match self {
            NamedDimension::Ministry => "dim_ministry",
            NamedDimension::BudgetPlan => "dim_budget_plan",
            NamedDimension::Output => "dim_output",
            NamedDimension::Project => "dim_project",
        }
    }
}

/// Insert-or-fetch by name. Returns the row id either way.
pub fn upsert_named(conn: &Connection, dimension: NamedDimension, name: &str) -> Result<i64> {
    let sql = format!(
        "INSERT INTO {} (name) VALUES (?1)
         ON CONFLICT(name) DO UPDATE SET name = excluded.name
         RETURNING id",
        dimension.table()
    );
    let id = conn
        .query_row(&sql, params![name], |row| row.get(0))
        .with_context(|| format!("Failed to upsert {} '{}'", dimension.table(), name))?;
    Ok(id)
}

/// Upsert every name in one prepared statement.
pub fn bulk_upsert_named(
    conn: &Connection,
    dimension: NamedDimension,
    names: &BTreeSet<String>,
) -> Result<HashMap<String, i64>> {
    let sql = format!(
        "INSERT INTO {} (name) VALUES (?1)
         ON CONFLICT(name) DO UPDATE SET name = excluded.name
         RETURNING id",
        dimension.table()
    );
    let mut stmt = conn.prepare(&sql)?;

    let mut ids = HashMap::with_capacity(names.len());
    for name in names {
        let id: i64 = stmt
            .query_row(params![name], |row| row.get(0))
            .with_context(|| format!("Failed to upsert {} '{}'", dimension.table(), name))?;
        ids.insert(name.clone(), id);
    }
    Ok(ids)
}

// ============================================================================
// BUDGETARY UNIT (name unique within ministry)
// ============================================================================

/// `IS ?1` so units without a ministry still match each other.
pub fn upsert_budgetary_unit(conn: &Connection, ministry_id: Option<i64>, name: &str) -> Result<i64> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM dim_budgetary_unit WHERE ministry_id IS ?1 AND name = ?2",
            params![ministry_id, name],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(id) = existing {
        return Ok(id);
    }

    conn.execute(
        "INSERT INTO dim_budgetary_unit (ministry_id, name) VALUES (?1, ?2)",
        params![ministry_id, name],
    )
    .with_context(|| format!("Failed to insert budgetary unit '{}'", name))?;
    Ok(conn.last_insert_rowid())
}

pub fn bulk_upsert_budgetary_units(
    conn: &Connection,
    units: &BTreeSet<(Option<i64>, String)>,
) -> Result<HashMap<(Option<i64>, String), i64>> {
    let mut select = conn.prepare("SELECT id FROM dim_budgetary_unit WHERE ministry_id IS ?1 AND name = ?2")?;
    let mut insert = conn.prepare("INSERT INTO dim_budgetary_unit (ministry_id, name) VALUES (?1, ?2)")?;

    let mut ids = HashMap::with_capacity(units.len());
    for (ministry_id, name) in units {
        let existing: Option<i64> = select
            .query_row(params![ministry_id, name], |row| row.get(0))
            .optional()?;
        let id = match existing {
            Some(id) => id,
            None => {
                insert.execute(params![ministry_id, name])?;
                conn.last_insert_rowid()
            }
        };
        ids.insert((*ministry_id, name.clone()), id);
    }
    Ok(ids)
}

// ============================================================================
// LOOKUPS
// ============================================================================

/// True when `table` has a row with this id. `table` must be a schema table name.
pub fn id_exists(conn: &Connection, table: &str, id: i64) -> Result<bool, rusqlite::Error> {
    let found: Option<i64> = conn
        .query_row(&format!("SELECT id FROM {table} WHERE id = ?1"), params![id], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

pub fn find_named(conn: &Connection, dimension: NamedDimension, name: &str) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            &format!("SELECT id FROM {} WHERE name = ?1", dimension.table()),
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

// ============================================================================
// TESTS
// ============================================================================
