// 🔍 Alias Discovery Engine - cluster near-duplicate spellings across years
//
// Curated renames only fix what someone has already seen. This engine finds
// the rest: values that differ only in whitespace, parenthetical remarks or
// Thai connector words. Every cluster gets one canonical spelling chosen by a
// total order, so repeated runs over the same corpus pick the same winner.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info};

use crate::aggregation::YearAggregate;
use crate::parser::{BudgetRecord, CATEGORY_LEVELS};

/// Connector words that OCR and manual entry drop or add freely.
pub const CONNECTOR_WORDS: &[&str] = &["การ", "และ", "ของ"];

/// Upper bound on discover/apply rounds.
pub const MAX_ALIAS_PASSES: usize = 3;

// ============================================================================
// TEXT FIELDS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TextField {
    Ministry,
    BudgetaryUnit,
    BudgetPlan,
    Output,
    Project,
    /// Zero-based position in the compacted category path (empty levels
    /// skipped), so a leaf that shifts depth between years still clusters
    Category(usize),
    ItemDescription,
}

impl TextField {
    /// Every field alias discovery runs over.
    pub fn all() -> Vec<TextField> {
        let mut fields = vec![
            TextField::Ministry,
            TextField::BudgetaryUnit,
            TextField::BudgetPlan,
            TextField::Output,
            TextField::Project,
        ];
        fields.extend((0..CATEGORY_LEVELS).map(TextField::Category));
        fields.push(TextField::ItemDescription);
        fields
    }

    pub fn get<'r>(&self, record: &'r BudgetRecord) -> Option<&'r str> {
        match self {
            TextField::Ministry => record.ministry.as_deref(),
            TextField::BudgetaryUnit => record.budgetary_unit.as_deref(),
            TextField::BudgetPlan => record.budget_plan.as_deref(),
            TextField::Output => record.output.as_deref(),
            TextField::Project => record.project.as_deref(),
            TextField::Category(position) => {
                category_slot(record, *position).and_then(|slot| record.categories[slot].as_deref())
            }
            TextField::ItemDescription => record.item_description.as_deref(),
        }
    }

    fn slot_mut<'r>(&self, record: &'r mut BudgetRecord) -> Option<&'r mut Option<String>> {
        match self {
            TextField::Ministry => Some(&mut record.ministry),
            TextField::BudgetaryUnit => Some(&mut record.budgetary_unit),
            TextField::BudgetPlan => Some(&mut record.budget_plan),
            TextField::Output => Some(&mut record.output),
            TextField::Project => Some(&mut record.project),
            TextField::Category(position) => {
                let slot = category_slot(record, *position)?;
                record.categories.get_mut(slot)
            }
            TextField::ItemDescription => Some(&mut record.item_description),
        }
    }
}

/// Nominal slot of the `position`-th non-empty category level.
fn category_slot(record: &BudgetRecord, position: usize) -> Option<usize> {
    record
        .categories
        .iter()
        .enumerate()
        .filter(|(_, level)| level.as_deref().is_some_and(|name| !name.trim().is_empty()))
        .nth(position)
        .map(|(slot, _)| slot)
}

impl fmt::Display for TextField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextField::Ministry => write!(f, "ministry"),
            TextField::BudgetaryUnit => write!(f, "budgetary_unit"),
            TextField::BudgetPlan => write!(f, "budget_plan"),
            TextField::Output => write!(f, "output"),
            TextField::Project => write!(f, "project"),
            TextField::Category(slot) => write!(f, "category_lv{}", slot + 1),
            TextField::ItemDescription => write!(f, "item_description"),
        }
    }
}

/// field → (variant → canonical)
pub type AliasTable = BTreeMap<TextField, BTreeMap<String, String>>;

// ============================================================================
// LOOSE COMPARISON
// ============================================================================

/// Comparison form: no parenthetical groups, no whitespace, no connector words.
///
/// Example: "กรมการขนส่งทางบก (สำนักงานใหญ่" → "กรมขนส่งทางบก"
pub fn loose_form(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;

    // Unterminated "(" swallows the rest of the string.
    for c in text.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth > 0 => {}
            _ if c.is_whitespace() => {}
            _ => out.push(c),
        }
    }

    for word in CONNECTOR_WORDS {
        out = out.replace(word, "");
    }
    out
}

pub fn has_balanced_parens(text: &str) -> bool {
    let mut depth: i64 = 0;
    for c in text.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// Number of opening parentheses (closed or not).
pub fn paren_group_count(text: &str) -> usize {
    text.chars().filter(|c| *c == '(').count()
}

pub fn connector_count(text: &str) -> usize {
    CONNECTOR_WORDS
        .iter()
        .map(|word| text.matches(word).count())
        .sum()
}

pub fn whitespace_count(text: &str) -> usize {
    text.chars().filter(|c| c.is_whitespace()).count()
}

/// Total order over spellings; `Less` means `a` is the better canonical.
pub fn compare_candidates(a: &str, b: &str) -> Ordering {
    has_balanced_parens(b)
        .cmp(&has_balanced_parens(a))
        .then_with(|| paren_group_count(b).cmp(&paren_group_count(a)))
        .then_with(|| connector_count(b).cmp(&connector_count(a)))
        .then_with(|| whitespace_count(b).cmp(&whitespace_count(a)))
        .then_with(|| b.chars().count().cmp(&a.chars().count()))
        .then_with(|| a.cmp(b))
}

/// Best spelling in a cluster. None for an empty cluster.
pub fn choose_canonical<'a, I>(variants: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    variants.into_iter().min_by(|a, b| compare_candidates(a, b))
}

// ============================================================================
// ENGINE
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AliasReport {
    pub passes: usize,
    pub aliases: AliasTable,
    /// Entries whose key changed and merged into another entry
    pub merged_entries: usize,
}

impl AliasReport {
    pub fn alias_count(&self) -> usize {
        self.aliases.values().map(BTreeMap::len).sum()
    }
}

pub struct AliasDiscoveryEngine {
    pub max_passes: usize,
}

impl AliasDiscoveryEngine {
    pub fn new() -> Self {
        AliasDiscoveryEngine {
            max_passes: MAX_ALIAS_PASSES,
        }
    }

    /// Find variant clusters over every distinct value of every field,
    /// across all years at once.
    pub fn discover(&self, years: &[YearAggregate]) -> AliasTable {
        let mut table = AliasTable::new();

        for field in TextField::all() {
            // loose form → distinct literal spellings
            let mut clusters: BTreeMap<String, BTreeSet<&str>> = BTreeMap::new();
            for year in years {
                for entry in year.entries.values() {
                    if let Some(value) = field.get(&entry.record) {
                        let loose = loose_form(value);
                        if loose.is_empty() {
                            continue;
                        }
                        clusters.entry(loose).or_default().insert(value);
                    }
                }
            }

            let mut aliases = BTreeMap::new();
            for variants in clusters.values().filter(|v| v.len() >= 2) {
                let Some(canonical) = choose_canonical(variants.iter().copied()) else {
                    continue;
                };
                for variant in variants.iter().filter(|v| **v != canonical) {
                    debug!(%field, variant, canonical, "alias discovered");
                    aliases.insert(variant.to_string(), canonical.to_string());
                }
            }

            if !aliases.is_empty() {
                table.insert(field, aliases);
            }
        }

        table
    }

    /// Rewrite every record through the table and re-merge entries whose
    /// key now collides.
    pub fn apply(&self, table: &AliasTable, years: Vec<YearAggregate>) -> (Vec<YearAggregate>, usize) {
        let mut merged = 0;
        let rewritten = years
            .into_iter()
            .map(|year| {
                let mut next = YearAggregate::new(year.label);
                next.stats = year.stats;
                for (_, mut entry) in year.entries {
                    rewrite_record(table, &mut entry.record);
                    if next.insert_aggregated(entry) {
                        merged += 1;
                    }
                }
                next
            })
            .collect();
        (rewritten, merged)
    }

    /// Discover and apply until a pass finds nothing, at most `max_passes` times.
    pub fn run(&self, mut years: Vec<YearAggregate>) -> (Vec<YearAggregate>, AliasReport) {
        let mut report = AliasReport::default();

        for _ in 0..self.max_passes {
            let table = self.discover(&years);
            if table.is_empty() {
                break;
            }
            report.passes += 1;

            let (rewritten, merged) = self.apply(&table, years);
            years = rewritten;
            report.merged_entries += merged;

            for (field, aliases) in table {
                report.aliases.entry(field).or_default().extend(aliases);
            }
        }

        info!(
            passes = report.passes,
            aliases = report.alias_count(),
            merged = report.merged_entries,
            "alias discovery finished"
        );
        (years, report)
    }
}

impl Default for AliasDiscoveryEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn rewrite_record(table: &AliasTable, record: &mut BudgetRecord) {
    for (field, aliases) in table {
        if let Some(slot) = field.slot_mut(record) {
            if let Some(canonical) = slot.as_ref().and_then(|v| aliases.get(v)) {
                *slot = Some(canonical.clone());
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
