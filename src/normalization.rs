// 🧹 Record Normalizer - canonical text for one field at a time
//
// Two curated rule sets, both deterministic:
//   1. substring corrections: ordered literal find/replace (OCR repairs)
//   2. normalize: strip numeric suffix → exact rename lookup → unchanged
//
// `normalize` is idempotent: every rename target is resolved to a fixed
// point when the table is built.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::config::{CorrectionRule, NormalizationConfig};
use crate::error::ConfigError;
use crate::parser::BudgetRecord;

/// Trailing "(1,234,500)" / "(12.50)" amount suffix left over from extract layout.
static AMOUNT_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s*\(\s*[0-9][0-9,]*(?:\.[0-9]+)?\s*\)\s*$").expect("static regex")
});

// ============================================================================
// CURATED TABLES
// ============================================================================

/// Organisation names that changed spelling between fiscal years.
const DEFAULT_RENAMES: &[(&str, &str)] = &[
    (
        "รายจ่ายเพื่อชดใช้เงินคงคลัง",
        "งบประมาณรายจ่ายเพื่อชดใช้เงินคงคลัง",
    ),
    (
        "ส่วนราชการไม่สังกัดสำนักนายกรัฐมนตรีฯ",
        "ส่วนราชการไม่สังกัดสำนักนายกรัฐมนตรี กระทรวง หรือทบวง และหน่วยงานภายใต้การควบคุมดูแลของนายกรัฐมนตรี",
    ),
    (
        "ส่วนราชการไม่สังกัดสำนักนายกรัฐมนตรี กระทรวง หรือทบวงและหน่วยงานภายใต้การควบคุมดูแลของนายกรัฐมนตรี",
        "ส่วนราชการไม่สังกัดสำนักนายกรัฐมนตรี กระทรวง หรือทบวง และหน่วยงานภายใต้การควบคุมดูแลของนายกรัฐมนตรี",
    ),
    ("กรมขนส่งทางบก", "กรมการขนส่งทางบก"),
    ("อปท", "องค์กรปกครองส่วนท้องถิ่น"),
];

/// OCR repairs. Order matters: the SARA AM repair must fire before the
/// rules that spell their `find` with a precomposed SARA AM.
const DEFAULT_CORRECTIONS: &[(&str, &str)] = &[
    ("\u{200B}", ""),
    // NIKHAHIT + SARA AA → SARA AM
    ("\u{0E4D}\u{0E32}", "\u{0E33}"),
    // SARA E + SARA E → SARA AE
    ("\u{0E40}\u{0E40}", "\u{0E41}"),
    ("สำนักนายกฯ", "สำนักนายกรัฐมนตรี"),
];

// ============================================================================
// NORMALIZER
// ============================================================================

#[derive(Debug, Clone)]
pub struct Normalizer {
    /// variant → canonical, already resolved to fixed points
    renames: HashMap<String, String>,
    corrections: Vec<CorrectionRule>,
}

impl Normalizer {
    /// Build from explicit rule sets. Fails on a rename cycle.
    pub fn new<I>(renames: I, corrections: Vec<CorrectionRule>) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut raw: HashMap<String, String> = HashMap::new();
        for (from, to) in renames {
            let (Some(from), Some(to)) = (strip_amount_suffix(&from), strip_amount_suffix(&to))
            else {
                continue;
            };
            if from != to {
                raw.insert(from, to);
            }
        }

        let mut resolved = HashMap::with_capacity(raw.len());
        for from in raw.keys() {
            let mut target = &raw[from];
            let mut hops = 0;
            while let Some(next) = raw.get(target) {
                hops += 1;
                if next == from || hops > raw.len() {
                    return Err(ConfigError::RenameCycle(from.clone()));
                }
                target = next;
            }
            resolved.insert(from.clone(), target.clone());
        }

        Ok(Normalizer {
            renames: resolved,
            corrections,
        })
    }

    /// Built-in curated tables only.
    pub fn with_defaults() -> Self {
        Self::from_config(&NormalizationConfig::default())
            .expect("built-in rename table is acyclic")
    }

    /// Built-in tables plus the config's extra renames and corrections.
    pub fn from_config(config: &NormalizationConfig) -> Result<Self, ConfigError> {
        let renames = DEFAULT_RENAMES
            .iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .chain(config.renames.iter().map(|(f, t)| (f.clone(), t.clone())));

        let corrections = DEFAULT_CORRECTIONS
            .iter()
            .map(|(find, replace)| CorrectionRule {
                find: find.to_string(),
                replace: replace.to_string(),
            })
            .chain(config.corrections.iter().cloned())
            .collect();

        Self::new(renames, corrections)
    }

    /// Canonical form of one value, or None when nothing is left.
    ///
    /// Example: "กรมขนส่งทางบก(125,000)" → "กรมการขนส่งทางบก"
    pub fn normalize(&self, text: &str) -> Option<String> {
        let stripped = strip_amount_suffix(text)?;
        match self.renames.get(&stripped) {
            Some(canonical) => Some(canonical.clone()),
            None => Some(stripped),
        }
    }

    /// Apply every correction rule once, in order.
    pub fn apply_substring_corrections(&self, text: &str) -> String {
        let mut corrected = text.to_string();
        for rule in &self.corrections {
            if !rule.find.is_empty() && corrected.contains(&rule.find) {
                corrected = corrected.replace(&rule.find, &rule.replace);
            }
        }
        corrected
    }

    /// Corrections first, then normalize.
    pub fn canonicalize(&self, value: Option<&str>) -> Option<String> {
        value.and_then(|v| self.normalize(&self.apply_substring_corrections(v)))
    }

    /// Canonicalize every text field that takes part in the natural key.
    pub fn normalize_record(&self, record: &BudgetRecord) -> BudgetRecord {
        let mut normalized = record.clone();
        normalized.ministry = self.canonicalize(record.ministry.as_deref());
        normalized.budgetary_unit = self.canonicalize(record.budgetary_unit.as_deref());
        normalized.budget_plan = self.canonicalize(record.budget_plan.as_deref());
        normalized.output = self.canonicalize(record.output.as_deref());
        normalized.project = self.canonicalize(record.project.as_deref());
        for (slot, value) in normalized.categories.iter_mut().zip(record.categories.iter()) {
            *slot = self.canonicalize(value.as_deref());
        }
        normalized.item_description = self.canonicalize(record.item_description.as_deref());
        normalized
    }

    pub fn rename_count(&self) -> usize {
        self.renames.len()
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Trim and remove trailing amount suffixes (repeatedly). None when blank.
pub fn strip_amount_suffix(text: &str) -> Option<String> {
    let mut current = text.trim().to_string();
    while let Some(m) = AMOUNT_SUFFIX.find(&current) {
        current.truncate(m.start());
        current = current.trim().to_string();
    }
    if current.is_empty() {
        None
    } else {
        Some(current)
    }
}

// ============================================================================
// TESTS
// ============================================================================
