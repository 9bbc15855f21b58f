// 🔑 Composite Key Builder - natural key tolerant of shifting category depth
//
// The same line item is filed under "งบลงทุน / - / ค่าที่ดิน" one year and
// "งบลงทุน / ค่าที่ดิน" the next. Compaction left-packs the non-empty levels
// so both produce the same key.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::parser::{BudgetRecord, CATEGORY_LEVELS};

/// ASCII unit separator. Stripped from content before joining.
pub const KEY_DELIMITER: char = '\u{1F}';

/// Category assigned to records that carry no category at all.
pub const UNSPECIFIED_CATEGORY: &str = "ไม่ระบุประเภทรายจ่าย";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey(String);

impl RecordKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stable short id for this key: first 16 hex digits of SHA-256.
    pub fn row_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest[..16].to_string()
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let printable = self.0.replace(KEY_DELIMITER, " | ");
        write!(f, "{printable}")
    }
}

/// Drop empty levels, left-pack the survivors, right-pad to the fixed width.
pub fn compact_categories(levels: &[Option<String>; CATEGORY_LEVELS]) -> [Option<String>; CATEGORY_LEVELS] {
    let mut compacted: [Option<String>; CATEGORY_LEVELS] = Default::default();
    let survivors = levels
        .iter()
        .filter_map(|level| level.as_deref())
        .map(str::trim)
        .filter(|level| !level.is_empty());

    for (slot, name) in compacted.iter_mut().zip(survivors) {
        *slot = Some(name.to_string());
    }
    compacted
}

/// Compacted category names, root first. Never empty: a record without a
/// category gets the unspecified sentinel at level 1.
pub fn category_path(record: &BudgetRecord) -> Vec<String> {
    let path: Vec<String> = compact_categories(&record.categories)
        .into_iter()
        .flatten()
        .collect();

    if path.is_empty() {
        vec![UNSPECIFIED_CATEGORY.to_string()]
    } else {
        path
    }
}

/// Build the merge key for an already-normalized record.
pub fn composite_key(record: &BudgetRecord) -> RecordKey {
    let path = category_path(record);
    let cross_func = match record.cross_func {
        Some(true) => "true",
        Some(false) => "false",
        None => "",
    };

    let mut parts: Vec<String> = Vec::with_capacity(7 + CATEGORY_LEVELS);
    parts.push(key_part(record.ministry.as_deref()));
    parts.push(key_part(record.budgetary_unit.as_deref()));
    parts.push(key_part(record.budget_plan.as_deref()));
    parts.push(cross_func.to_string());
    parts.push(key_part(record.output.as_deref()));
    parts.push(key_part(record.project.as_deref()));
    for slot in 0..CATEGORY_LEVELS {
        parts.push(key_part(path.get(slot).map(String::as_str)));
    }
    parts.push(key_part(record.item_description.as_deref()));

    RecordKey(parts.join(&KEY_DELIMITER.to_string()))
}

fn key_part(value: Option<&str>) -> String {
    value
        .unwrap_or("")
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(categories: [Option<&str>; CATEGORY_LEVELS]) -> BudgetRecord {
        BudgetRecord {
            ministry: Some("กระทรวงคมนาคม".to_string()),
            budgetary_unit: Some("กรมทางหลวง".to_string()),
            categories: categories.map(|c| c.map(str::to_string)),
            item_description: Some("ค่าก่อสร้างทาง".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_compaction_stable_across_depths() {
        let level3 = record([Some("งบลงทุน"), None, Some("ค่าที่ดิน"), None, None, None]);
        let level2 = record([Some("งบลงทุน"), Some("ค่าที่ดิน"), None, None, None, None]);
        let blank = record([Some("งบลงทุน"), Some("  "), Some("ค่าที่ดิน"), None, None, None]);

        assert_eq!(composite_key(&level3), composite_key(&level2));
        assert_eq!(composite_key(&blank), composite_key(&level2));
    }

    #[test]
    fn test_different_leaf_gives_different_key() {
        let a = record([Some("งบลงทุน"), Some("ค่าที่ดิน"), None, None, None, None]);
        let b = record([Some("งบลงทุน"), Some("ค่าครุภัณฑ์"), None, None, None, None]);
        assert_ne!(composite_key(&a), composite_key(&b));
    }

    #[test]
    fn test_missing_category_maps_to_sentinel() {
        let none = record([None, None, None, None, None, None]);
        let explicit = record([Some(UNSPECIFIED_CATEGORY), None, None, None, None, None]);

        assert_eq!(category_path(&none), vec![UNSPECIFIED_CATEGORY.to_string()]);
        assert_eq!(composite_key(&none), composite_key(&explicit));
    }

    #[test]
    fn test_delimiter_cannot_leak_from_content() {
        let mut a = record([Some("งบลงทุน"), None, None, None, None, None]);
        a.item_description = Some(format!("ค่า{}ทาง", KEY_DELIMITER));
        let mut b = record([Some("งบลงทุน"), None, None, None, None, None]);
        b.item_description = Some("ค่าทาง".to_string());

        assert_eq!(composite_key(&a), composite_key(&b));
        let parts = composite_key(&a).as_str().split(KEY_DELIMITER).count();
        assert_eq!(parts, 7 + CATEGORY_LEVELS);
    }

    #[test]
    fn test_cross_func_is_key_material() {
        let mut a = record([Some("งบลงทุน"), None, None, None, None, None]);
        let mut b = a.clone();
        a.cross_func = Some(true);
        b.cross_func = Some(false);
        assert_ne!(composite_key(&a), composite_key(&b));
    }

    #[test]
    fn test_row_id_is_stable() {
        let key = composite_key(&record([Some("งบลงทุน"), None, None, None, None, None]));
        let id = key.row_id();

        assert_eq!(id.len(), 16);
        assert_eq!(id, key.row_id());
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
