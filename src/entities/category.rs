// 🏷️ Category Store - variable-depth expenditure tree + closure table
//
// A node is identified by (name, parent, level): two "ค่าวัสดุ" nodes under
// different parents are different categories. Alongside the adjacency list
// we keep every (ancestor, descendant, depth) pair, so "everything under X"
// is one join instead of a tree walk.
//
// Closure rows are written when a node is first used as a leaf, and only
// once per run (memoized in `CategoryCache`).

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::parser::CATEGORY_LEVELS;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryNode {
    pub id: i64,
    pub name: String,
    /// None at level 1
    pub parent_id: Option<i64>,
    /// 1-based
    pub level: i64,
}

impl CategoryNode {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClosureRow {
    pub ancestor_id: i64,
    pub descendant_id: i64,
    pub depth: i64,
}

/// Per-run memo for category creation.
#[derive(Debug, Default)]
pub struct CategoryCache {
    /// (level, parent, name) → id
    nodes: HashMap<(usize, Option<i64>, String), i64>,
    /// Leaves whose closure rows are already written
    closure_done: HashSet<i64>,
    pub closure_rows_written: usize,
    pub nodes_created: usize,
}

impl CategoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached_nodes(&self) -> usize {
        self.nodes.len()
    }
}

// ============================================================================
// GET-OR-CREATE
// ============================================================================

/// Find or insert one node. `IS ?2` so root nodes (NULL parent) match.
pub fn get_or_create_category(
    conn: &Connection,
    cache: &mut CategoryCache,
    level: usize,
    parent_id: Option<i64>,
    name: &str,
) -> Result<i64> {
    let cache_key = (level, parent_id, name.to_string());
    if let Some(id) = cache.nodes.get(&cache_key) {
        return Ok(*id);
    }

    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM dim_category WHERE name = ?1 AND parent_id IS ?2 AND level = ?3",
            params![name, parent_id, level as i64],
            |row| row.get(0),
        )
        .optional()?;

    let id = match existing {
        Some(id) => id,
        None => {
            conn.execute(
                "INSERT INTO dim_category (name, parent_id, level) VALUES (?1, ?2, ?3)",
                params![name, parent_id, level as i64],
            )
            .with_context(|| format!("Failed to insert category '{}' at level {}", name, level))?;
            cache.nodes_created += 1;
            conn.last_insert_rowid()
        }
    };

    cache.nodes.insert(cache_key, id);
    Ok(id)
}

/// Walk `levels` root-first, creating missing nodes. Stops at the first empty
/// level. Returns the leaf id, or None when level 1 is empty.
///
/// The leaf gets one closure row per ancestor plus its self-pair.
pub fn get_or_create_category_path(
    conn: &Connection,
    cache: &mut CategoryCache,
    levels: &[Option<String>],
) -> Result<Option<i64>> {
    let mut chain: Vec<i64> = Vec::with_capacity(CATEGORY_LEVELS);
    let mut parent_id = None;

    for (index, level) in levels.iter().enumerate().take(CATEGORY_LEVELS) {
        let name = match level.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => break,
        };
        let id = get_or_create_category(conn, cache, index + 1, parent_id, name)?;
        chain.push(id);
        parent_id = Some(id);
    }

    let Some(&leaf_id) = chain.last() else {
        return Ok(None);
    };

    if cache.closure_done.insert(leaf_id) {
        write_closure(conn, &chain)?;
        cache.closure_rows_written += chain.len();
    }

    Ok(Some(leaf_id))
}

/// `chain` is root-first and ends at the leaf.
fn write_closure(conn: &Connection, chain: &[i64]) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO dim_category_path (ancestor_id, descendant_id, depth) VALUES (?1, ?2, ?3)",
    )?;
    let leaf_index = chain.len() - 1;
    let leaf_id = chain[leaf_index];

    for (index, ancestor_id) in chain.iter().enumerate() {
        let depth = (leaf_index - index) as i64;
        stmt.execute(params![ancestor_id, leaf_id, depth])?;
    }
    Ok(())
}

// ============================================================================
// READS
// ============================================================================

fn node_from_row(row: &rusqlite::Row) -> rusqlite::Result<CategoryNode> {
    Ok(CategoryNode {
        id: row.get(0)?,
        name: row.get(1)?,
        parent_id: row.get(2)?,
        level: row.get(3)?,
    })
}

pub fn get_category(conn: &Connection, id: i64) -> Result<Option<CategoryNode>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, name, parent_id, level FROM dim_category WHERE id = ?1",
        params![id],
        node_from_row,
    )
    .optional()
}

/// Every node, ordered by level then id.
pub fn list_categories(conn: &Connection) -> Result<Vec<CategoryNode>> {
    let mut stmt = conn.prepare("SELECT id, name, parent_id, level FROM dim_category ORDER BY level, id")?;
    let nodes = stmt
        .query_map([], node_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(nodes)
}

pub fn children_of(conn: &Connection, parent_id: i64) -> Result<Vec<CategoryNode>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, parent_id, level FROM dim_category WHERE parent_id = ?1 ORDER BY id",
    )?;
    let nodes = stmt
        .query_map(params![parent_id], node_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(nodes)
}

/// Closure rows for one descendant, self-pair first.
pub fn closure_for(conn: &Connection, descendant_id: i64) -> Result<Vec<ClosureRow>> {
    let mut stmt = conn.prepare(
        "SELECT ancestor_id, descendant_id, depth FROM dim_category_path
         WHERE descendant_id = ?1 ORDER BY depth",
    )?;
    let rows = stmt
        .query_map(params![descendant_id], |row| {
            Ok(ClosureRow {
                ancestor_id: row.get(0)?,
                descendant_id: row.get(1)?,
                depth: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Of `ids`, the ones that have at least one child anywhere in the tree.
pub fn ids_with_children(conn: &Connection, ids: &[i64]) -> Result<HashSet<i64>, rusqlite::Error> {
    if ids.is_empty() {
        return Ok(HashSet::new());
    }
    let placeholders = vec!["?"; ids.len()].join(",");
    let sql = format!("SELECT DISTINCT parent_id FROM dim_category WHERE parent_id IN ({placeholders})");
    let mut stmt = conn.prepare(&sql)?;
    let parents = stmt
        .query_map(rusqlite::params_from_iter(ids.iter()), |row| row.get::<_, i64>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(parents)
}

/// Fact categories whose closure is incomplete (a node at level L must have
/// exactly L closure rows). Empty on a healthy store.
pub fn incomplete_closures(conn: &Connection) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT c.id FROM dim_category c
         WHERE c.id IN (SELECT DISTINCT category_id FROM fact_budget_item WHERE category_id IS NOT NULL)
           AND (SELECT COUNT(*) FROM dim_category_path p WHERE p.descendant_id = c.id) != c.level
         ORDER BY c.id",
    )?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<i64>, _>>()?;
    Ok(ids)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn path(names: &[&str]) -> Vec<Option<String>> {
        names.iter().map(|n| Some(n.to_string())).collect()
    }

    #[test]
    fn test_path_creates_nodes_and_closure() {
        let conn = conn();
        let mut cache = CategoryCache::new();

        let leaf = get_or_create_category_path(&conn, &mut cache, &path(&["งบลงทุน", "ค่าครุภัณฑ์", "ครุภัณฑ์ยานพาหนะ"]))
            .unwrap()
            .unwrap();

        let nodes = list_categories(&conn).unwrap();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].level, 1);
        assert!(nodes[0].is_root());

        let closure = closure_for(&conn, leaf).unwrap();
        assert_eq!(closure.len(), 3);
        assert_eq!(closure[0], ClosureRow { ancestor_id: leaf, descendant_id: leaf, depth: 0 });
        assert_eq!(closure[2].ancestor_id, nodes[0].id);
        assert_eq!(closure[2].depth, 2);
    }

    #[test]
    fn test_same_name_under_different_parents() {
        let conn = conn();
        let mut cache = CategoryCache::new();

        let a = get_or_create_category_path(&conn, &mut cache, &path(&["งบลงทุน", "ค่าวัสดุ"])).unwrap();
        let b = get_or_create_category_path(&conn, &mut cache, &path(&["งบดำเนินงาน", "ค่าวัสดุ"])).unwrap();

        assert_ne!(a, b);
        assert_eq!(list_categories(&conn).unwrap().len(), 4);
    }

    #[test]
    fn test_stops_at_first_empty_level() {
        let conn = conn();
        let mut cache = CategoryCache::new();

        let levels = vec![Some("งบลงทุน".to_string()), None, Some("ค่าที่ดิน".to_string())];
        let leaf = get_or_create_category_path(&conn, &mut cache, &levels).unwrap().unwrap();

        assert_eq!(list_categories(&conn).unwrap().len(), 1);
        assert_eq!(get_category(&conn, leaf).unwrap().unwrap().name, "งบลงทุน");
        assert_eq!(get_or_create_category_path(&conn, &mut cache, &[None]).unwrap(), None);
    }

    #[test]
    fn test_closure_memoized_per_leaf() {
        let conn = conn();
        let mut cache = CategoryCache::new();

        get_or_create_category_path(&conn, &mut cache, &path(&["ก", "ข"])).unwrap();
        get_or_create_category_path(&conn, &mut cache, &path(&["ก", "ข"])).unwrap();
        assert_eq!(cache.closure_rows_written, 2);

        // Parent used as a leaf later gets its own self-pair
        let parent = get_or_create_category_path(&conn, &mut cache, &path(&["ก"])).unwrap().unwrap();
        assert_eq!(closure_for(&conn, parent).unwrap().len(), 1);
    }

    #[test]
    fn test_fresh_cache_reuses_stored_nodes() {
        let conn = conn();
        let first = get_or_create_category_path(&conn, &mut CategoryCache::new(), &path(&["ก", "ข"])).unwrap();
        let second = get_or_create_category_path(&conn, &mut CategoryCache::new(), &path(&["ก", "ข"])).unwrap();

        assert_eq!(first, second);
        assert_eq!(list_categories(&conn).unwrap().len(), 2);
        assert_eq!(closure_for(&conn, second.unwrap()).unwrap().len(), 2);
    }

    #[test]
    fn test_ids_with_children() {
        let conn = conn();
        let mut cache = CategoryCache::new();
        let leaf = get_or_create_category_path(&conn, &mut cache, &path(&["ก", "ข"])).unwrap().unwrap();
        let root = get_category(&conn, leaf).unwrap().unwrap().parent_id.unwrap();

        let parents = ids_with_children(&conn, &[root, leaf]).unwrap();
        assert!(parents.contains(&root));
        assert!(!parents.contains(&leaf));
        assert_eq!(children_of(&conn, root).unwrap().len(), 1);
        assert!(ids_with_children(&conn, &[]).unwrap().is_empty());
    }
}
