// Entity Stores - everything the fact table points at
//
// - dimension: name-keyed upserts (ministry, unit, plan, output, project)
// - category: variable-depth tree with a precomputed closure

pub mod category;
pub mod dimension;

pub use category::{
    children_of, closure_for, get_category, get_or_create_category, get_or_create_category_path,
    ids_with_children, incomplete_closures, list_categories, CategoryCache, CategoryNode, ClosureRow,
};
pub use dimension::{
    bulk_upsert_budgetary_units, bulk_upsert_named, find_named, id_exists, upsert_budgetary_unit,
    upsert_named, NamedDimension,
};
