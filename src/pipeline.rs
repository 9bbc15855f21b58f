// 🔗 Reconcile Pipeline - per-year extracts → one reconciled CSV
//
// load + normalize + aggregate (parallel per year) → alias discovery (needs
// every year) → multi-year merge → write.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

use crate::aggregation::{YearAggregate, YearAggregator};
use crate::config::PipelineConfig;
use crate::deduplication::{AliasDiscoveryEngine, AliasReport};
use crate::normalization::Normalizer;
use crate::reconciliation::{write_reconciled, MultiYearReconciler, ReconcileStats, ReconciledExtract};

#[derive(Debug, Clone, Serialize)]
pub struct YearSummary {
    pub label: i32,
    pub rows_read: usize,
    pub rows_other_year: usize,
    pub malformed_amounts: usize,
    pub entries: usize,
    pub total_amount: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub years: Vec<YearSummary>,
    pub alias_passes: usize,
    pub aliases: usize,
    pub alias_merges: usize,
    pub reconciled: ReconcileStats,
    pub output: Option<PathBuf>,
}

pub struct ReconcilePipeline {
    normalizer: Normalizer,
    calendar_offset: i32,
    aliases: AliasDiscoveryEngine,
}

impl ReconcilePipeline {
    pub fn new(normalizer: Normalizer, calendar_offset: i32) -> Self {
        ReconcilePipeline {
            normalizer,
            calendar_offset,
            aliases: AliasDiscoveryEngine::new(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let normalizer = Normalizer::from_config(&config.normalization)
            .context("Invalid normalization rules")?;
        Ok(Self::new(normalizer, config.calendar_offset))
    }

    /// Alias discovery + merge over already-aggregated years.
    pub fn reconcile_years(&self, years: Vec<YearAggregate>) -> (ReconciledExtract, PipelineSummary) {
        let per_year: Vec<YearSummary> = years
            .iter()
            .map(|y| YearSummary {
                label: y.label,
                rows_read: y.stats.rows_read,
                rows_other_year: y.stats.rows_other_year,
                malformed_amounts: y.stats.malformed_amounts,
                entries: y.len(),
                total_amount: y.total_amount(),
            })
            .collect();

        let (years, report): (Vec<YearAggregate>, AliasReport) = self.aliases.run(years);
        let (rows, stats) = MultiYearReconciler::new().reconcile(&years);

        let extract = ReconciledExtract {
            years: years.iter().map(|y| y.label).collect(),
            rows,
        };
        let summary = PipelineSummary {
            years: per_year,
            alias_passes: report.passes,
            aliases: report.alias_count(),
            alias_merges: report.merged_entries,
            reconciled: stats,
            output: None,
        };
        (extract, summary)
    }

    pub fn run(&self, config: &PipelineConfig) -> Result<(ReconciledExtract, PipelineSummary)> {
        let aggregator = YearAggregator::new(&self.normalizer, self.calendar_offset);
        let years = aggregator.load_all(&config.years)?;
        Ok(self.reconcile_years(years))
    }

    /// Run and write the reconciled CSV to `config.reconciled_path`.
    pub fn run_to_file(&self, config: &PipelineConfig) -> Result<PipelineSummary> {
        let (extract, mut summary) = self.run(config)?;
        write_reconciled(&config.reconciled_path, &extract)?;

        info!(
            path = %config.reconciled_path.display(),
            rows = extract.rows.len(),
            "wrote reconciled extract"
        );
        summary.output = Some(config.reconciled_path.clone());
        Ok(summary)
    }
}
