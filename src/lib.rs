// Budget Ledger - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod error;
pub mod config;
pub mod parser;         // Extract CSV → BudgetRecord
pub mod normalization;  // Curated renames + OCR corrections
pub mod key;            // Composite natural key + row ids
pub mod aggregation;    // Per-year duplicate-key merge
pub mod deduplication;  // Cross-year alias discovery
pub mod reconciliation; // Multi-year outer join + reconciled CSV
pub mod pipeline;       // reconcile orchestration
pub mod db;
pub mod entities;       // Dimensions + category tree/closure
pub mod import;         // Reconciled CSV → fact store
pub mod query;          // Drill-down engine
pub mod navigation;     // Drill order planner

// Re-export commonly used types
pub use error::{ConfigError, QueryError};
pub use config::{PipelineConfig, YearSource};
pub use parser::{load_extract, BudgetRecord, CATEGORY_LEVELS};
pub use normalization::Normalizer;
pub use key::{category_path, composite_key, RecordKey, UNSPECIFIED_CATEGORY};
pub use aggregation::{YearAggregate, YearAggregator};
pub use deduplication::{AliasDiscoveryEngine, AliasReport, AliasTable};
pub use reconciliation::{
    read_reconciled, write_reconciled, MergedRecord, MultiYearReconciler, ReconcileStats, ReconciledExtract,
};
pub use pipeline::{PipelineSummary, ReconcilePipeline};
pub use db::{open_database, setup_database, table_counts, TableCounts};
pub use import::{FactImporter, ImportStrategy, ImportSummary};
pub use query::{
    BreakdownRequest, BreakdownResponse, BreakdownRow, Dimension, DimensionKey, DrilldownEngine, PathStep,
};
pub use navigation::{NavigationTrail, DEFAULT_HIERARCHY};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
