// Budget Ledger - Web Server
// Drill-down breakdowns over the fact store as JSON

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use budget_ledger::{
    open_database, BreakdownRequest, BreakdownResponse, Dimension, DimensionKey, DrilldownEngine, PathStep,
    QueryError,
};
use clap::Parser;
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "budget-server", version, about = "Serve budget drill-down breakdowns")]
struct Args {
    /// SQLite fact store written by `budget-ledger import`
    #[arg(long, default_value = "budget.db")]
    db: PathBuf,

    #[arg(long, default_value = "0.0.0.0:3000")]
    addr: String,
}

/// Shared application state. Each request opens its own read-only
/// connection; WAL lets readers run side by side.
#[derive(Clone)]
struct AppState {
    db_path: Arc<PathBuf>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

// ============================================================================
// Query-string decoding
// ============================================================================

/// `?filterXxxId=` parameters in path order. Category comes from
/// `filterCategoryPath` when present.
const ID_FILTERS: [(&str, Dimension); 5] = [
    ("filterMinistryId", Dimension::Ministry),
    ("filterBudgetaryUnitId", Dimension::BudgetaryUnit),
    ("filterBudgetPlanId", Dimension::BudgetPlan),
    ("filterOutputId", Dimension::Output),
    ("filterProjectId", Dimension::Project),
];

fn is_no_value(raw: &str) -> bool {
    matches!(raw.trim(), "-1" | "null")
}

fn invalid(field: &str, value: &str) -> QueryError {
    QueryError::InvalidParameter {
        field: field.to_string(),
        value: value.to_string(),
    }
}

fn id_step(field: &str, dimension: Dimension, raw: &str) -> Result<PathStep, QueryError> {
    if is_no_value(raw) {
        return Ok(PathStep::no_value(dimension));
    }
    raw.trim()
        .parse::<i64>()
        .map(|id| PathStep::id(dimension, id))
        .map_err(|_| invalid(field, raw))
}

/// Decode `/api/breakdown` parameters. `year` may repeat or be comma
/// separated. `group` is required.
fn parse_breakdown(params: &[(String, String)]) -> Result<BreakdownRequest, QueryError> {
    let get = |name: &str| {
        params
            .iter()
            .find(|(k, v)| k == name && !v.is_empty())
            .map(|(_, v)| v.as_str())
    };

    let mut years = Vec::new();
    for (_, raw) in params.iter().filter(|(k, _)| k == "year") {
        for part in raw.split(',').filter(|p| !p.trim().is_empty()) {
            years.push(part.trim().parse::<i32>().map_err(|_| invalid("year", part))?);
        }
    }

    let group = match get("group") {
        Some(name) => Dimension::parse_group(name)?,
        None => return Err(invalid("group", "")),
    };

    let mut request = BreakdownRequest::new(years, group);

    for (field, dimension) in ID_FILTERS {
        if let Some(raw) = get(field) {
            request = request.with_step(id_step(field, dimension, raw)?);
        }
    }

    if let Some(path) = get("filterCategoryPath") {
        for part in path.split(',').filter(|p| !p.trim().is_empty()) {
            request = request.with_step(id_step("filterCategoryPath", Dimension::Category, part)?);
        }
    } else if let Some(raw) = get("filterCategoryId") {
        request = request.with_step(id_step("filterCategoryId", Dimension::Category, raw)?);
    }

    if let Some(raw) = get("filterObligedId") {
        let step = match raw.trim() {
            "true" => PathStep::pick(Dimension::Obliged, DimensionKey::Flag(true)),
            "false" => PathStep::pick(Dimension::Obliged, DimensionKey::Flag(false)),
            other if is_no_value(other) => PathStep::no_value(Dimension::Obliged),
            _ => return Err(invalid("filterObligedId", raw)),
        };
        request = request.with_step(step);
    }

    if let Some(raw) = get("categoryLevel") {
        let level = raw.trim().parse::<i64>().map_err(|_| invalid("categoryLevel", raw))?;
        request = request.with_category_level(level);
    }

    if let Some(raw) = get("collapse") {
        request = request.collapsed(matches!(raw.trim(), "true" | "1"));
    }

    Ok(request)
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/breakdown - Grouped per-year amounts for one navigation step
async fn get_breakdown(State(state): State<AppState>, Query(params): Query<Vec<(String, String)>>) -> Response {
    let request = match parse_breakdown(&params) {
        Ok(request) => request,
        Err(e) => return query_error(e),
    };

    let db_path = Arc::clone(&state.db_path);
    match tokio::task::spawn_blocking(move || run_breakdown(&db_path, &request)).await {
        Ok(Ok(response)) => (StatusCode::OK, Json(ApiResponse::ok(response))).into_response(),
        Ok(Err(e)) => query_error(e),
        Err(e) => {
            error!("breakdown task failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<BreakdownResponse>::err("breakdown task failed".to_string())),
            )
                .into_response()
        }
    }
}

/// Blocking: run on the blocking pool, never on an async worker.
fn run_breakdown(db_path: &Path, request: &BreakdownRequest) -> Result<BreakdownResponse, QueryError> {
    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI,
    )?;
    DrilldownEngine::new(&conn).breakdown(request)
}

fn query_error(e: QueryError) -> Response {
    let status = if e.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        error!("breakdown failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(ApiResponse::<BreakdownResponse>::err(e.to_string()))).into_response()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    if !args.db.exists() {
        eprintln!("❌ Database not found: {}", args.db.display());
        eprintln!("   Run: budget-ledger import");
        std::process::exit(1);
    }

    // schema + WAL once, up front
    drop(open_database(&args.db)?);
    println!("✓ Database opened: {}", args.db.display());

    // Create shared state
    let state = AppState {
        db_path: Arc::new(args.db.clone()),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/breakdown", get(get_breakdown))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&args.addr).await?;
    info!(addr = %args.addr, "listening");

    println!("\n🚀 Server running on http://{}", args.addr);
    println!("   API: http://{}/api/breakdown?year=2569&group=ministry", args.addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await?;
    Ok(())
}
