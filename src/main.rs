use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use budget_ledger::{
    open_database, table_counts, BreakdownRequest, Dimension, DimensionKey, DrilldownEngine, FactImporter,
    ImportStrategy, PathStep, PipelineConfig, ReconcilePipeline,
};

#[derive(Parser, Debug)]
#[command(name = "budget-ledger", version, about = "Reconcile, import and explore budget line items")]
struct Cli {
    /// Pipeline config (years, paths, import options)
    #[arg(long, global = true, default_value = "budget-ledger.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Normalize, dedupe and merge every configured year into one CSV
    Reconcile,

    /// Load the reconciled CSV into the fact store
    Import {
        /// Clear all budget tables first
        #[arg(long)]
        reset: bool,

        /// per-row | bulk (overrides the config file)
        #[arg(long)]
        strategy: Option<ImportStrategy>,
    },

    /// Print one drill-down step as JSON
    Breakdown {
        #[arg(long = "year", required = true)]
        years: Vec<i32>,

        #[arg(long, default_value = "ministry")]
        group: String,

        #[arg(long)]
        ministry: Option<i64>,
        #[arg(long)]
        unit: Option<i64>,
        #[arg(long)]
        plan: Option<i64>,
        #[arg(long)]
        output: Option<i64>,
        #[arg(long)]
        project: Option<i64>,

        /// Category ancestors root-first; -1 means "direct items of the last one"
        #[arg(long = "category", allow_negative_numbers = true)]
        categories: Vec<i64>,

        #[arg(long)]
        category_level: Option<i64>,

        #[arg(long)]
        collapse: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    match cli.command {
        Command::Reconcile => run_reconcile(&config),
        Command::Import { reset, strategy } => run_import(&config, reset, strategy),
        Command::Breakdown {
            years,
            group,
            ministry,
            unit,
            plan,
            output,
            project,
            categories,
            category_level,
            collapse,
        } => {
            let mut request = BreakdownRequest::new(years, Dimension::parse_group(&group)?).collapsed(collapse);
            let picks = [
                (Dimension::Ministry, ministry),
                (Dimension::BudgetaryUnit, unit),
                (Dimension::BudgetPlan, plan),
                (Dimension::Output, output),
                (Dimension::Project, project),
            ];
            for (dimension, id) in picks {
                if let Some(id) = id {
                    request = request.with_step(id_or_no_value(dimension, id));
                }
            }
            for id in categories {
                request = request.with_step(id_or_no_value(Dimension::Category, id));
            }
            if let Some(level) = category_level {
                request = request.with_category_level(level);
            }
            run_breakdown(&config, &request)
        }
    }
}

fn id_or_no_value(dimension: Dimension, id: i64) -> PathStep {
    if id < 0 {
        PathStep::no_value(dimension)
    } else {
        PathStep::pick(dimension, DimensionKey::Id(id))
    }
}

fn run_reconcile(config: &PipelineConfig) -> Result<()> {
    println!("🔗 Reconcile - {} fiscal years", config.years.len());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let pipeline = ReconcilePipeline::from_config(config)?;
    let summary = pipeline.run_to_file(config)?;

    for year in &summary.years {
        println!(
            "✓ {}: {} rows read, {} keys, {} other-year rows, {} malformed amounts",
            year.label, year.rows_read, year.entries, year.rows_other_year, year.malformed_amounts
        );
    }
    println!(
        "✓ Aliases: {} over {} passes ({} entries merged)",
        summary.aliases, summary.alias_passes, summary.alias_merges
    );
    println!("✓ {}", summary.reconciled.summary());
    println!("\n✅ Wrote {}", config.reconciled_path.display());
    Ok(())
}

fn run_import(config: &PipelineConfig, reset: bool, strategy: Option<ImportStrategy>) -> Result<()> {
    println!("🗄️  Import - reconciled CSV → SQLite + WAL");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut conn = open_database(&config.database_path)?;
    let strategy = strategy.unwrap_or(config.import.strategy);

    let importer = FactImporter::new(strategy, config.import.batch_size).with_reset(reset);
    let summary = importer.import_file(&mut conn, &config.reconciled_path)?;

    println!("✓ Strategy: {}", summary.strategy);
    println!("✓ Rows read: {}", summary.rows_read);
    println!("✓ Facts written: {} ({} zero amounts skipped)", summary.facts_written, summary.zero_amounts_skipped);
    println!(
        "✓ Categories created: {} ({} closure rows)",
        summary.categories_created, summary.closure_rows_written
    );

    let counts = table_counts(&conn)?;
    println!("\n🔍 Database now holds {} facts, {} categories", counts.facts, counts.categories);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("🎉 Import complete");
    Ok(())
}

fn run_breakdown(config: &PipelineConfig, request: &BreakdownRequest) -> Result<()> {
    let conn = open_database(&config.database_path)?;
    let response = DrilldownEngine::new(&conn).breakdown(request)?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
