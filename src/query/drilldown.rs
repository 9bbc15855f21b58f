// 🔎 Drill-down Engine - grouped, filtered, multi-year breakdowns
//
// Category grouping picks a target depth (1 at the root, one below the
// active category filter otherwise). Facts posted above that depth land in
// an "unspecified further" bucket, so a parent's total always equals the
// sum of its children's rows.
//
// Collapse mode follows single-child chains (under the current filters)
// and reports them as one row: "ก > ข > ค".

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::collections::BTreeMap;
use tracing::debug;

use super::builder::QueryBuilder;
use super::{
    BreakdownRequest, BreakdownResponse, BreakdownRow, CollapsedChain, Dimension, DimensionKey, PathStep,
    RowBucket,
};
use crate::entities::{get_category, id_exists, ids_with_children, CategoryNode};
use crate::error::QueryError;
use crate::parser::CATEGORY_LEVELS;

/// Longest chain collapse mode will follow.
pub const MAX_COLLAPSE_DEPTH: usize = 6;
pub const COLLAPSE_SEPARATOR: &str = " > ";
pub const UNSPECIFIED_FURTHER_LABEL: &str = "ไม่ระบุหมวดย่อย";

// ============================================================================
// RESOLVED FILTERS
// ============================================================================

/// Request filters after validation against storage.
#[derive(Debug, Default)]
struct ResolvedFilters {
    years: Vec<i32>,
    /// Non-category conjunction: column = value, or IS NULL for None
    columns: Vec<(&'static str, Option<Value>)>,
    /// Most recent category pick
    category: Option<CategoryNode>,
    /// Only facts posted directly on `category`
    direct: bool,
    /// Category no-value with no category picked before it
    category_null: bool,
}

impl ResolvedFilters {
    /// Years, non-category filters, and the category filter for `ancestor`.
    fn apply(&self, qb: &mut QueryBuilder, ancestor: Option<i64>, direct: bool) {
        qb.filter_in(
            "f.fiscal_year",
            self.years.iter().map(|y| Value::Integer(i64::from(*y))),
        );
        for (column, value) in &self.columns {
            qb.filter_eq_or_null(column, value.clone());
        }
        if self.category_null {
            qb.filter("f.category_id IS NULL");
        }

        if let Some(id) = ancestor {
            if direct {
                qb.filter_eq_or_null("f.category_id", Some(Value::Integer(id)));
            } else {
                // one closure join covers the node and every descendant
                let p = qb.bind(id);
                qb.join(
                    "cp_filter",
                    format!(
                        "JOIN dim_category_path cp_filter ON cp_filter.descendant_id = f.category_id AND cp_filter.ancestor_id = {p}"
                    ),
                );
            }
        }
    }
}

/// One (group value, year) cell as returned by SQL.
#[derive(Debug)]
struct GroupCell {
    bucket: RowBucket,
    key: Option<DimensionKey>,
    name: Option<String>,
    level: Option<i64>,
    year: i32,
    amount: f64,
    share: Option<f64>,
}

// ============================================================================
// ENGINE
// ============================================================================

/// Read-only; holds no per-request state.
pub struct DrilldownEngine<'c> {
    conn: &'c Connection,
}

impl<'c> DrilldownEngine<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        DrilldownEngine { conn }
    }

    pub fn breakdown(&self, req: &BreakdownRequest) -> Result<BreakdownResponse, QueryError> {
        let filters = self.resolve(req)?;

        let category_level = match req.group {
            Dimension::Category => Some(req.category_level.unwrap_or_else(|| {
                filters.category.as_ref().map_or(1, |node| node.level + 1)
            })),
            _ => None,
        };

        let ancestor = filters.category.as_ref().map(|node| node.id);
        let cells = self.group_cells(&filters, req.group, ancestor, filters.direct, category_level.unwrap_or(1))?;

        let mut totals: BTreeMap<i32, f64> = BTreeMap::new();
        let mut pivot: BTreeMap<(RowBucket, Option<DimensionKey>), BreakdownRow> = BTreeMap::new();

        for cell in cells {
            *totals.entry(cell.year).or_default() += cell.amount;

            let row = pivot
                .entry((cell.bucket, cell.key.clone()))
                .or_insert_with(|| BreakdownRow {
                    name: row_label(req.group, cell.bucket, cell.name.as_deref(), cell.key.as_ref()),
                    key: cell.key.clone(),
                    bucket: cell.bucket,
                    level: cell.level,
                    amounts: BTreeMap::new(),
                    shares: BTreeMap::new(),
                    is_terminal: false,
                    collapsed: None,
                });
            *row.amounts.entry(cell.year).or_default() += cell.amount;
            *row.shares.entry(cell.year).or_default() += cell.share.unwrap_or(0.0);
        }

        let mut rows: Vec<BreakdownRow> = pivot.into_values().collect();

        if req.group == Dimension::Category && req.collapse {
            for row in rows.iter_mut() {
                self.collapse_row(&filters, row)?;
            }
        }
        self.mark_terminal(req.group, &mut rows)?;

        let latest = filters.years.last().copied().unwrap_or_default();
        rows.sort_by(|a, b| {
            b.amount_for(latest)
                .total_cmp(&a.amount_for(latest))
                .then_with(|| a.name.cmp(&b.name))
        });

        debug!(group = %req.group, rows = rows.len(), ?category_level, "breakdown");

        Ok(BreakdownResponse {
            years: filters.years,
            group: req.group,
            totals,
            rows,
            is_leaf_level: req.group == Dimension::Item,
            category_level,
        })
    }

    // ------------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------------

    fn resolve(&self, req: &BreakdownRequest) -> Result<ResolvedFilters, QueryError> {
        if req.years.is_empty() {
            return Err(QueryError::MissingYears);
        }
        if let Some(level) = req.category_level {
            if level < 1 || level > CATEGORY_LEVELS as i64 {
                return Err(QueryError::InvalidCategoryLevel {
                    level,
                    max: CATEGORY_LEVELS,
                });
            }
        }

        let mut years = req.years.clone();
        years.sort_unstable();
        years.dedup();

        let mut filters = ResolvedFilters {
            years,
            ..Default::default()
        };

        for step in &req.path {
            match step.dimension {
                Dimension::Category => match &step.key {
                    Some(_) => {
                        let id = expect_id(step)?;
                        let node = get_category(self.conn, id)?.ok_or(QueryError::InvalidId {
                            dimension: Dimension::Category.as_str(),
                            id,
                        })?;
                        filters.category = Some(node);
                        filters.direct = false;
                    }
                    None if filters.category.is_some() => filters.direct = true,
                    None => filters.category_null = true,
                },
                Dimension::Item => {
                    let value = match &step.key {
                        Some(DimensionKey::Text(text)) => Some(Value::Text(text.clone())),
                        None => None,
                        Some(_) => return Err(invalid_key(step)),
                    };
                    filters.columns.push((step.dimension.fact_column(), value));
                }
                Dimension::Obliged => {
                    let value = match &step.key {
                        Some(DimensionKey::Flag(flag)) => Some(Value::Integer(i64::from(*flag))),
                        None => None,
                        Some(_) => return Err(invalid_key(step)),
                    };
                    filters.columns.push((step.dimension.fact_column(), value));
                }
                dimension => {
                    let value = match &step.key {
                        Some(_) => {
                            let id = expect_id(step)?;
                            let table = dimension.table().unwrap_or_default();
                            if !id_exists(self.conn, table, id)? {
                                return Err(QueryError::InvalidId {
                                    dimension: dimension.as_str(),
                                    id,
                                });
                            }
                            Some(Value::Integer(id))
                        }
                        None => None,
                    };
                    filters.columns.push((dimension.fact_column(), value));
                }
            }
        }

        Ok(filters)
    }

    // ------------------------------------------------------------------------
    // SQL
    // ------------------------------------------------------------------------

    fn group_query(
        &self,
        filters: &ResolvedFilters,
        group: Dimension,
        ancestor: Option<i64>,
        direct: bool,
        level: i64,
    ) -> QueryBuilder {
        let mut qb = QueryBuilder::new("fact_budget_item f");
        filters.apply(&mut qb, ancestor, direct);

        let (bucket, key, name, group_level) = match group {
            Dimension::Category => {
                let l = qb.bind(level);
                qb.join(
                    "cp_group",
                    "LEFT JOIN dim_category_path cp_group ON cp_group.descendant_id = f.category_id",
                );
                qb.join("c", "LEFT JOIN dim_category c ON c.id = cp_group.ancestor_id");
                qb.join("leaf", "LEFT JOIN dim_category leaf ON leaf.id = f.category_id");
                // exactly one grouping row per fact: its ancestor at the
                // target level, or itself when it sits above that level
                qb.filter(format!(
                    "(c.level = {l} OR (leaf.level < {l} AND cp_group.depth = 0) OR f.category_id IS NULL)"
                ));
                (
                    format!(
                        "CASE WHEN f.category_id IS NULL THEN 'none' WHEN c.level = {l} THEN 'node' ELSE 'further' END"
                    ),
                    format!("CASE WHEN c.level = {l} THEN c.id END"),
                    format!("CASE WHEN c.level = {l} THEN c.name END"),
                    format!("CASE WHEN c.level = {l} THEN c.level END"),
                )
            }
            Dimension::Item => (
                "CASE WHEN f.item_description IS NULL THEN 'none' ELSE 'node' END".to_string(),
                "f.item_description".to_string(),
                "f.item_description".to_string(),
                "NULL".to_string(),
            ),
            Dimension::Obliged => (
                "CASE WHEN f.obliged IS NULL THEN 'none' ELSE 'node' END".to_string(),
                "f.obliged".to_string(),
                "CASE WHEN f.obliged IS NULL THEN NULL WHEN f.obliged THEN 'งบผูกพัน' ELSE 'งบไม่ผูกพัน' END"
                    .to_string(),
                "NULL".to_string(),
            ),
            dimension => {
                let column = dimension.fact_column();
                let table = dimension.table().unwrap_or_default();
                qb.join("g", format!("LEFT JOIN {table} g ON g.id = {column}"));
                (
                    format!("CASE WHEN {column} IS NULL THEN 'none' ELSE 'node' END"),
                    column.to_string(),
                    "g.name".to_string(),
                    "NULL".to_string(),
                )
            }
        };

        qb.select(format!("{bucket} AS bucket"))
            .select(format!("{key} AS group_key"))
            .select(format!("{name} AS group_name"))
            .select(format!("{group_level} AS group_level"))
            .select("f.fiscal_year AS fiscal_year")
            .select("COALESCE(SUM(f.amount), 0) AS amount")
            .select("SUM(f.amount) / NULLIF(SUM(SUM(f.amount)) OVER (PARTITION BY f.fiscal_year), 0) AS share");
        qb.group_by("bucket")
            .group_by("group_key")
            .group_by("group_name")
            .group_by("group_level")
            .group_by("f.fiscal_year");
        qb
    }

    fn group_cells(
        &self,
        filters: &ResolvedFilters,
        group: Dimension,
        ancestor: Option<i64>,
        direct: bool,
        level: i64,
    ) -> Result<Vec<GroupCell>, QueryError> {
        let (sql, params) = self.group_query(filters, group, ancestor, direct, level).build();
        let mut stmt = self.conn.prepare(&sql)?;

        let cells = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                let bucket: String = row.get(0)?;
                let key: Value = row.get(1)?;
                Ok(GroupCell {
                    bucket: match bucket.as_str() {
                        "none" => RowBucket::NoValue,
                        "further" => RowBucket::UnspecifiedFurther,
                        _ => RowBucket::Value,
                    },
                    key: to_key(group, key),
                    name: row.get(2)?,
                    level: row.get(3)?,
                    year: row.get(4)?,
                    amount: row.get(5)?,
                    share: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(cells)
    }

    // ------------------------------------------------------------------------
    // Terminal + collapse
    // ------------------------------------------------------------------------

    /// Terminal is a property of the full tree, not of the filtered facts.
    fn mark_terminal(&self, group: Dimension, rows: &mut [BreakdownRow]) -> Result<(), QueryError> {
        match group {
            Dimension::Category => {
                let ids: Vec<i64> = rows
                    .iter()
                    .filter(|r| r.bucket == RowBucket::Value)
                    .filter_map(|r| r.key.as_ref().and_then(DimensionKey::as_id))
                    .collect();
                let parents = ids_with_children(self.conn, &ids)?;

                for row in rows.iter_mut() {
                    row.is_terminal = match (&row.bucket, row.key.as_ref().and_then(DimensionKey::as_id)) {
                        (RowBucket::Value, Some(id)) => !parents.contains(&id),
                        _ => true,
                    };
                }
            }
            Dimension::Item => rows.iter_mut().for_each(|r| r.is_terminal = true),
            _ => {}
        }
        Ok(())
    }

    /// Follow the chain while the filtered child set is a single real node.
    fn collapse_row(&self, filters: &ResolvedFilters, row: &mut BreakdownRow) -> Result<(), QueryError> {
        let (RowBucket::Value, Some(start)) = (row.bucket, row.key.as_ref().and_then(DimensionKey::as_id)) else {
            return Ok(());
        };
        let Some(start_level) = row.level else {
            return Ok(());
        };

        let mut labels = vec![row.name.clone()];
        let mut ids = vec![start];
        let mut current = start;
        let mut level = start_level;

        for _ in 0..MAX_COLLAPSE_DEPTH {
            let children = self.filtered_children(filters, current, level + 1)?;
            let [(RowBucket::Value, Some(child), name)] = children.as_slice() else {
                break;
            };
            labels.push(name.clone());
            ids.push(*child);
            current = *child;
            level += 1;
        }

        if ids.len() > 1 {
            row.key = Some(DimensionKey::Id(current));
            row.name = labels.join(COLLAPSE_SEPARATOR);
            row.level = Some(level);
            row.collapsed = Some(CollapsedChain { labels, ids });
        }
        Ok(())
    }

    /// Distinct child rows of `parent` at `level`, same years and non-category filters.
    fn filtered_children(
        &self,
        filters: &ResolvedFilters,
        parent: i64,
        level: i64,
    ) -> Result<Vec<(RowBucket, Option<i64>, String)>, QueryError> {
        let cells = self.group_cells(filters, Dimension::Category, Some(parent), false, level)?;

        let mut children: Vec<(RowBucket, Option<i64>, String)> = Vec::new();
        for cell in cells {
            let id = cell.key.as_ref().and_then(DimensionKey::as_id);
            if !children.iter().any(|(b, i, _)| *b == cell.bucket && *i == id) {
                children.push((cell.bucket, id, cell.name.unwrap_or_default()));
            }
        }
        Ok(children)
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn expect_id(step: &PathStep) -> Result<i64, QueryError> {
    step.key
        .as_ref()
        .and_then(DimensionKey::as_id)
        .ok_or_else(|| invalid_key(step))
}

fn invalid_key(step: &PathStep) -> QueryError {
    QueryError::InvalidParameter {
        field: step.dimension.as_str().to_string(),
        value: format!("{:?}", step.key),
    }
}

fn to_key(group: Dimension, value: Value) -> Option<DimensionKey> {
    match (group, value) {
        (_, Value::Null) => None,
        (Dimension::Obliged, Value::Integer(flag)) => Some(DimensionKey::Flag(flag != 0)),
        (_, Value::Integer(id)) => Some(DimensionKey::Id(id)),
        (_, Value::Text(text)) => Some(DimensionKey::Text(text)),
        (_, Value::Real(r)) => Some(DimensionKey::Text(r.to_string())),
        (_, Value::Blob(_)) => None,
    }
}

fn row_label(group: Dimension, bucket: RowBucket, name: Option<&str>, key: Option<&DimensionKey>) -> String {
    match bucket {
        RowBucket::NoValue => group.no_value_label().to_string(),
        RowBucket::UnspecifiedFurther => UNSPECIFIED_FURTHER_LABEL.to_string(),
        RowBucket::Value => match (name, key) {
            (Some(name), _) => name.to_string(),
            (None, Some(DimensionKey::Id(id))) => format!("#{id}"),
            _ => group.no_value_label().to_string(),
        },
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{setup_database, table_counts};
    use crate::entities::{get_or_create_category_path, upsert_named, CategoryCache, NamedDimension};
    use rusqlite::params;

    struct Store {
        conn: Connection,
        cache: CategoryCache,
    }

    impl Store {
        fn new() -> Self {
            let conn = Connection::open_in_memory().unwrap();
            setup_database(&conn).unwrap();
            Store {
                conn,
                cache: CategoryCache::new(),
            }
        }

        fn category(&mut self, names: &[&str]) -> i64 {
            let levels: Vec<Option<String>> = names.iter().map(|n| Some(n.to_string())).collect();
            get_or_create_category_path(&self.conn, &mut self.cache, &levels)
                .unwrap()
                .unwrap()
        }

        fn ministry(&self, name: &str) -> i64 {
            upsert_named(&self.conn, NamedDimension::Ministry, name).unwrap()
        }

        fn fact(&self, ministry: Option<i64>, category: i64, year: i32, amount: f64) {
            self.fact_full(ministry, None, category, year, amount, "รายการ", None);
        }

        #[allow(clippy::too_many_arguments)]
        fn fact_full(
            &self,
            ministry: Option<i64>,
            plan: Option<i64>,
            category: i64,
            year: i32,
            amount: f64,
            description: &str,
            obliged: Option<bool>,
        ) {
            self.conn
                .execute(
                    "INSERT INTO fact_budget_item (item_id, ministry_id, budget_plan_id, category_id, item_description, fiscal_year, amount, obliged)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        format!("x_{year}"),
                        ministry,
                        plan,
                        category,
                        description,
                        year,
                        amount,
                        obliged
                    ],
                )
                .unwrap();
        }

        fn engine(&self) -> DrilldownEngine<'_> {
            DrilldownEngine::new(&self.conn)
        }
    }

    fn category_request(years: Vec<i32>) -> BreakdownRequest {
        BreakdownRequest::new(years, Dimension::Category)
    }

    #[test]
    fn test_direct_facts_fold_into_parent_and_further_bucket() {
        let mut store = Store::new();
        let k = store.category(&["ก"]);
        let kh = store.category(&["ก", "ข"]);
        store.fact(None, k, 2569, 100.0);
        store.fact(None, kh, 2569, 50.0);

        let root = store.engine().breakdown(&category_request(vec![2569])).unwrap();
        assert_eq!(root.category_level, Some(1));
        assert_eq!(root.rows.len(), 1);
        assert_eq!(root.rows[0].name, "ก");
        assert_eq!(root.rows[0].amount_for(2569), 150.0);
        assert!(!root.rows[0].is_terminal);

        let drilled = store
            .engine()
            .breakdown(&category_request(vec![2569]).with_step(PathStep::id(Dimension::Category, k)))
            .unwrap();
        assert_eq!(drilled.category_level, Some(2));
        assert_eq!(drilled.rows.len(), 2);

        let child = drilled.row_named("ข").unwrap();
        assert_eq!(child.amount_for(2569), 50.0);
        assert!(child.is_terminal);

        let further = drilled.row_named(UNSPECIFIED_FURTHER_LABEL).unwrap();
        assert_eq!(further.bucket, RowBucket::UnspecifiedFurther);
        assert_eq!(further.key, None);
        assert_eq!(further.amount_for(2569), 100.0);
        assert_eq!(drilled.total_for(2569), root.total_for(2569));
    }

    #[test]
    fn test_chain_collapse() {
        let mut store = Store::new();
        let leaf = store.category(&["ก", "ข", "ค"]);
        store.fact(None, leaf, 2569, 10.0);

        let collapsed = store
            .engine()
            .breakdown(&category_request(vec![2569]).collapsed(true))
            .unwrap();
        assert_eq!(collapsed.rows.len(), 1);
        let row = &collapsed.rows[0];
        assert_eq!(row.name, "ก > ข > ค");
        assert_eq!(row.key, Some(DimensionKey::Id(leaf)));
        assert_eq!(row.level, Some(3));
        assert!(row.is_terminal);
        assert_eq!(row.collapsed.as_ref().unwrap().ids.len(), 3);
        assert_eq!(row.amount_for(2569), 10.0);

        // Without collapse, ข is its own one-row step under ก
        let root = store.engine().breakdown(&category_request(vec![2569])).unwrap();
        let k = root.rows[0].key.as_ref().and_then(DimensionKey::as_id).unwrap();
        assert_eq!(root.rows[0].name, "ก");
        assert!(root.rows[0].collapsed.is_none());

        let step = store
            .engine()
            .breakdown(&category_request(vec![2569]).with_step(PathStep::id(Dimension::Category, k)))
            .unwrap();
        assert_eq!(step.rows.len(), 1);
        assert_eq!(step.rows[0].name, "ข");
        assert!(!step.rows[0].is_terminal);
    }

    #[test]
    fn test_collapse_stops_at_node_with_direct_facts() {
        let mut store = Store::new();
        let k = store.category(&["ก"]);
        let leaf = store.category(&["ก", "ข"]);
        store.fact(None, k, 2569, 1.0);
        store.fact(None, leaf, 2569, 2.0);

        let res = store
            .engine()
            .breakdown(&category_request(vec![2569]).collapsed(true))
            .unwrap();
        assert_eq!(res.rows[0].name, "ก");
        assert!(res.rows[0].collapsed.is_none());
    }

    #[test]
    fn test_collapse_uses_filtered_children() {
        let mut store = Store::new();
        let m1 = store.ministry("กระทรวง 1");
        let m2 = store.ministry("กระทรวง 2");
        let a = store.category(&["ก", "ข"]);
        let b = store.category(&["ก", "ค"]);
        store.fact(Some(m1), a, 2569, 5.0);
        store.fact(Some(m2), b, 2569, 7.0);

        // Under ministry 1 only ข has facts, so ก → ข collapses
        let res = store
            .engine()
            .breakdown(
                &category_request(vec![2569])
                    .with_step(PathStep::id(Dimension::Ministry, m1))
                    .collapsed(true),
            )
            .unwrap();
        assert_eq!(res.rows[0].name, "ก > ข");

        // Across both ministries ก branches
        let res = store
            .engine()
            .breakdown(&category_request(vec![2569]).collapsed(true))
            .unwrap();
        assert_eq!(res.rows[0].name, "ก");
    }

    #[test]
    fn test_parent_equals_sum_of_children_everywhere() {
        let mut store = Store::new();
        let paths: &[&[&str]] = &[
            &["งบลงทุน"],
            &["งบลงทุน", "ค่าครุภัณฑ์"],
            &["งบลงทุน", "ค่าครุภัณฑ์", "ยานพาหนะ"],
            &["งบลงทุน", "ค่าที่ดิน"],
            &["งบดำเนินงาน", "ค่าวัสดุ"],
            &["งบดำเนินงาน"],
        ];
        for (i, path) in paths.iter().enumerate() {
            let id = store.category(path);
            store.fact(None, id, 2568, 10.0 * (i as f64 + 1.0));
            store.fact(None, id, 2569, 3.0 * (i as f64 + 1.0));
        }

        let engine = store.engine();
        let mut frontier = vec![(None::<i64>, engine.breakdown(&category_request(vec![2568, 2569])).unwrap())];

        while let Some((_, res)) = frontier.pop() {
            for row in res.rows.iter().filter(|r| r.bucket == RowBucket::Value && !r.is_terminal) {
                let id = row.key.as_ref().and_then(DimensionKey::as_id).unwrap();
                let child = engine
                    .breakdown(&category_request(vec![2568, 2569]).with_step(PathStep::id(Dimension::Category, id)))
                    .unwrap();
                for year in [2568, 2569] {
                    let sum: f64 = child.rows.iter().map(|r| r.amount_for(year)).sum();
                    assert!((sum - row.amount_for(year)).abs() < 1e-9, "node {} year {}", row.name, year);
                }
                frontier.push((Some(id), child));
            }
        }
    }

    #[test]
    fn test_shares_and_totals() {
        let mut store = Store::new();
        let a = store.category(&["ก"]);
        let b = store.category(&["ข"]);
        store.fact(None, a, 2569, 30.0);
        store.fact(None, b, 2569, 10.0);
        store.fact(None, a, 2568, 5.0);

        let res = store.engine().breakdown(&category_request(vec![2568, 2569])).unwrap();

        assert_eq!(res.total_for(2569), 40.0);
        assert_eq!(res.total_for(2568), 5.0);
        let k = res.row_named("ก").unwrap();
        assert!((k.shares[&2569] - 0.75).abs() < 1e-9);
        assert!((k.shares[&2568] - 1.0).abs() < 1e-9);
        assert_eq!(res.row_named("ข").unwrap().shares.get(&2568), None);
    }

    #[test]
    fn test_ordered_by_latest_year() {
        let mut store = Store::new();
        let a = store.category(&["ก"]);
        let b = store.category(&["ข"]);
        store.fact(None, a, 2568, 100.0);
        store.fact(None, a, 2569, 1.0);
        store.fact(None, b, 2568, 1.0);
        store.fact(None, b, 2569, 50.0);

        let res = store.engine().breakdown(&category_request(vec![2569, 2568])).unwrap();
        assert_eq!(res.years, vec![2568, 2569]);
        assert_eq!(res.rows[0].name, "ข");
    }

    #[test]
    fn test_no_value_bucket_and_filter() {
        let mut store = Store::new();
        let cat = store.category(&["ก"]);
        let plan = upsert_named(&store.conn, NamedDimension::BudgetPlan, "แผนงานพื้นฐาน").unwrap();
        store.fact_full(None, Some(plan), cat, 2569, 8.0, "ก", None);
        store.fact_full(None, None, cat, 2569, 2.0, "ข", None);

        let res = store
            .engine()
            .breakdown(&BreakdownRequest::new(vec![2569], Dimension::BudgetPlan))
            .unwrap();
        assert_eq!(res.rows.len(), 2);
        let none = res.row_named("ไม่ระบุแผนงาน").unwrap();
        assert_eq!(none.bucket, RowBucket::NoValue);
        assert_eq!(none.amount_for(2569), 2.0);
        assert_eq!(res.total_for(2569), 10.0);

        let only_none = store
            .engine()
            .breakdown(
                &BreakdownRequest::new(vec![2569], Dimension::Item)
                    .with_step(PathStep::no_value(Dimension::BudgetPlan)),
            )
            .unwrap();
        assert_eq!(only_none.rows.len(), 1);
        assert_eq!(only_none.rows[0].key, Some(DimensionKey::Text("ข".to_string())));
        assert!(only_none.is_leaf_level);
        assert!(only_none.rows[0].is_terminal);
    }

    #[test]
    fn test_direct_items_step() {
        let mut store = Store::new();
        let k = store.category(&["ก"]);
        let kh = store.category(&["ก", "ข"]);
        store.fact_full(None, None, k, 2569, 4.0, "ตรง", None);
        store.fact_full(None, None, kh, 2569, 6.0, "ลึก", None);

        let res = store
            .engine()
            .breakdown(
                &BreakdownRequest::new(vec![2569], Dimension::Item)
                    .with_step(PathStep::id(Dimension::Category, k))
                    .with_step(PathStep::no_value(Dimension::Category)),
            )
            .unwrap();
        assert_eq!(res.rows.len(), 1);
        assert_eq!(res.rows[0].name, "ตรง");

        let subtree = store
            .engine()
            .breakdown(&BreakdownRequest::new(vec![2569], Dimension::Item).with_step(PathStep::id(Dimension::Category, k)))
            .unwrap();
        assert_eq!(subtree.rows.len(), 2);
    }

    #[test]
    fn test_category_level_override() {
        let mut store = Store::new();
        let shallow = store.category(&["ก"]);
        let deep = store.category(&["ก", "ข", "ค"]);
        store.fact(None, shallow, 2569, 1.0);
        store.fact(None, deep, 2569, 2.0);

        let res = store
            .engine()
            .breakdown(&category_request(vec![2569]).with_category_level(3))
            .unwrap();
        assert_eq!(res.category_level, Some(3));
        assert_eq!(res.row_named("ค").unwrap().amount_for(2569), 2.0);
        assert_eq!(res.row_named(UNSPECIFIED_FURTHER_LABEL).unwrap().amount_for(2569), 1.0);
    }

    #[test]
    fn test_terminal_ignores_filters() {
        let mut store = Store::new();
        let k = store.category(&["ก"]);
        let kh = store.category(&["ก", "ข"]);
        store.fact(None, k, 2569, 1.0);
        store.fact(None, kh, 2568, 1.0);

        let res = store.engine().breakdown(&category_request(vec![2569])).unwrap();
        assert!(!res.rows[0].is_terminal);
    }

    #[test]
    fn test_ministry_and_obliged_grouping() {
        let mut store = Store::new();
        let cat = store.category(&["ก"]);
        let m = store.ministry("กระทรวงการคลัง");
        store.fact_full(Some(m), None, cat, 2569, 3.0, "ก", Some(true));
        store.fact_full(None, None, cat, 2569, 1.0, "ข", Some(false));
        store.fact_full(Some(m), None, cat, 2569, 1.0, "ค", None);

        let res = store
            .engine()
            .breakdown(&BreakdownRequest::new(vec![2569], Dimension::Ministry))
            .unwrap();
        assert_eq!(res.rows[0].key, Some(DimensionKey::Id(m)));
        assert_eq!(res.rows[0].name, "กระทรวงการคลัง");
        assert_eq!(res.row_named("ไม่ระบุกระทรวง").unwrap().amount_for(2569), 1.0);

        let res = store
            .engine()
            .breakdown(
                &BreakdownRequest::new(vec![2569], Dimension::Obliged)
                    .with_step(PathStep::id(Dimension::Ministry, m)),
            )
            .unwrap();
        assert_eq!(res.rows.len(), 2);
        assert_eq!(res.row_named("งบผูกพัน").unwrap().key, Some(DimensionKey::Flag(true)));
        assert_eq!(res.row_named("ไม่ระบุ").unwrap().bucket, RowBucket::NoValue);

        let res = store
            .engine()
            .breakdown(
                &BreakdownRequest::new(vec![2569], Dimension::Item)
                    .with_step(PathStep::pick(Dimension::Obliged, DimensionKey::Flag(false))),
            )
            .unwrap();
        assert_eq!(res.rows.len(), 1);
        assert_eq!(res.rows[0].name, "ข");
    }

    #[test]
    fn test_client_errors_leave_store_untouched() {
        let mut store = Store::new();
        let cat = store.category(&["ก"]);
        store.fact(None, cat, 2569, 1.0);
        let before = table_counts(&store.conn).unwrap();
        let engine = store.engine();

        let err = engine.breakdown(&category_request(vec![])).unwrap_err();
        assert!(matches!(err, QueryError::MissingYears));

        let err = engine
            .breakdown(&category_request(vec![2569]).with_step(PathStep::id(Dimension::Ministry, 999)))
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidId { dimension: "ministry", id: 999 }));

        let err = engine
            .breakdown(&category_request(vec![2569]).with_step(PathStep::id(Dimension::Category, 999)))
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidId { dimension: "category", .. }));

        let err = engine
            .breakdown(&category_request(vec![2569]).with_category_level(7))
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidCategoryLevel { level: 7, .. }));

        let err = engine
            .breakdown(&category_request(vec![2569]).with_step(PathStep::pick(Dimension::Ministry, DimensionKey::Flag(true))))
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidParameter { .. }));
        assert!(err.is_client_error());

        assert_eq!(table_counts(&store.conn).unwrap(), before);
    }

    #[test]
    fn test_empty_result_is_not_an_error() {
        let store = Store::new();
        let res = store.engine().breakdown(&category_request(vec![2569])).unwrap();
        assert!(res.rows.is_empty());
        assert!(res.totals.is_empty());
        assert!(!res.is_leaf_level);
    }
}
