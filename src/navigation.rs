// 🧭 Navigation Planner - which dimension to group by after a pick
//
// The drill order is fixed: ministry → budgetary unit → plan → output →
// project → category → item. Category repeats until a terminal node is
// picked. A trail turns into a `BreakdownRequest` one pick per path step.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::query::{BreakdownRequest, Dimension, DimensionKey, PathStep};

pub const DEFAULT_HIERARCHY: [Dimension; 7] = [
    Dimension::Ministry,
    Dimension::BudgetaryUnit,
    Dimension::BudgetPlan,
    Dimension::Output,
    Dimension::Project,
    Dimension::Category,
    Dimension::Item,
];

/// Breadcrumb label for the unfiltered root.
pub const ROOT_LABEL: &str = "รวมทุกหน่วยงาน";

/// One selection on the trail. `key: None` is the no-value bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavPick {
    /// Grouping the pick was made under
    pub dimension: Dimension,
    pub key: Option<DimensionKey>,
    pub label: String,
    pub is_terminal: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationTrail {
    picks: Vec<NavPick>,
    /// Grouping shown at the deepest level
    current: Dimension,
}

impl Default for NavigationTrail {
    fn default() -> Self {
        NavigationTrail {
            picks: Vec::new(),
            current: DEFAULT_HIERARCHY[0],
        }
    }
}

impl NavigationTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Dimension {
        self.current
    }

    pub fn picks(&self) -> &[NavPick] {
        &self.picks
    }

    pub fn depth(&self) -> usize {
        self.picks.len()
    }

    /// Dimensions already on the trail, the current grouping included.
    pub fn used(&self) -> BTreeSet<Dimension> {
        self.picks
            .iter()
            .map(|p| p.dimension)
            .chain(std::iter::once(self.current))
            .collect()
    }

    /// Record a pick under the current grouping and move to the next one.
    /// Returns None (trail unchanged) when there is nowhere left to go.
    pub fn drill(&mut self, key: Option<DimensionKey>, label: &str, is_terminal: bool) -> Option<Dimension> {
        let next = next_group(self, is_terminal)?;
        self.picks.push(NavPick {
            dimension: self.current,
            key,
            label: label.to_string(),
            is_terminal,
        });
        self.current = next;
        Some(next)
    }

    /// The current grouping came back empty; skip ahead.
    pub fn advance_on_empty(&mut self) -> Option<Dimension> {
        let next = advance_on_empty(self.current, self)?;
        self.current = next;
        Some(next)
    }

    /// Breadcrumb click: keep the first `depth` picks and show the grouping
    /// that was active at that level.
    pub fn pop_to(&mut self, depth: usize) {
        if depth >= self.picks.len() {
            return;
        }
        self.current = self.picks[depth].dimension;
        self.picks.truncate(depth);
    }

    pub fn breadcrumbs(&self) -> Vec<String> {
        std::iter::once(ROOT_LABEL.to_string())
            .chain(self.picks.iter().map(|p| p.label.clone()))
            .collect()
    }

    pub fn to_request(&self, years: Vec<i32>, collapse: bool) -> BreakdownRequest {
        let mut request = BreakdownRequest::new(years, self.current).collapsed(collapse);
        request.path = self
            .picks
            .iter()
            .map(|p| PathStep {
                dimension: p.dimension,
                key: p.key.clone(),
            })
            .collect();
        request
    }
}

/// Grouping to show after picking a row under `trail.current()`.
pub fn next_group(trail: &NavigationTrail, picked_is_terminal: bool) -> Option<Dimension> {
    let used = trail.used();
    match trail.current() {
        Dimension::Item => None,
        Dimension::Category if !picked_is_terminal => Some(Dimension::Category),
        Dimension::Ministry if !used.contains(&Dimension::BudgetaryUnit) => Some(Dimension::BudgetaryUnit),
        Dimension::BudgetPlan if !used.contains(&Dimension::Output) => Some(Dimension::Output),
        _ => DEFAULT_HIERARCHY.into_iter().find(|d| !used.contains(d)),
    }
}

/// Grouping to try when `current` returned no rows. Never `current` itself.
pub fn advance_on_empty(current: Dimension, trail: &NavigationTrail) -> Option<Dimension> {
    if current == Dimension::Category {
        return Some(Dimension::Item);
    }
    let used = trail.used();
    let start = DEFAULT_HIERARCHY.iter().position(|d| *d == current).map_or(0, |i| i + 1);
    DEFAULT_HIERARCHY[start..]
        .iter()
        .copied()
        .find(|d| *d != current && !used.contains(d))
}
