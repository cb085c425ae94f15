use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sql_gateway::config::Config;
use sql_gateway::core::audit::AuditSink;
use sql_gateway::core::breaker::CircuitBreaker;
use sql_gateway::core::cache::ShortTermCache;
use sql_gateway::core::executor::QueryExecutor;
use sql_gateway::core::history::QueryHistoryStore;
use sql_gateway::core::llm::{LlmProvider, MockProvider, OpenAiCompatibleProvider};
use sql_gateway::core::orchestrator::{SqlTool, ToolResponse};
use sql_gateway::core::planner::SqlPlanner;
use sql_gateway::core::rate_limiter::RateLimiter;
use sql_gateway::db;
use sql_gateway::models::{ErrorResponse, Request as SqlRequest};
use sql_gateway::utils::{ScheduledExecutor, ScheduledTask};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = Config::load()?;

    init_logging(&config);
    tracing::info!("sql-gateway starting up");

    let pool = db::create_pool(&config.database.url).await?;
    tracing::info!("audit/history database pool created");

    let short_cache = Arc::new(ShortTermCache::new(config.cache.clone()));
    let history = Arc::new(QueryHistoryStore::new(pool.clone(), config.history.clone()));
    let breaker = Arc::new(CircuitBreaker::new(config.breaker.clone()));
    let llm = build_llm_provider(&config);
    tracing::info!("LLM provider: {}", config.llm.provider);

    let planner =
        SqlPlanner::new(short_cache, Arc::clone(&history), llm, breaker, &config.llm, &config.validator);
    let rate_limiter = RateLimiter::new(config.rate_limit.clone());
    let executor = QueryExecutor::new(mysql_async::Pool::new(data_store_url(&config).as_str()));
    let audit = AuditSink::new(pool.clone());

    let tool = Arc::new(SqlTool::new(config.clone(), rate_limiter, planner, executor, audit));

    spawn_history_cleanup(history);

    let app = Router::new()
        .route("/v1/sql/query", post(handle_query))
        .route("/healthz", get(health_check))
        .with_state(tool)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("listening on http://{}", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}

fn init_logging(config: &Config) {
    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path.file_name().and_then(|n| n.to_str()).unwrap_or("sql-gateway.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // Leaked deliberately: the writer must outlive this function, and the
        // process only exits by signal.
        std::mem::forget(guard);
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Selects the LLM route by `llm.provider`: `mock` for deterministic local
/// runs and tests, anything else speaks the OpenAI-compatible chat-completions
/// wire format (OpenRouter, OpenAI, Anthropic's compatibility endpoint).
fn build_llm_provider(config: &Config) -> Arc<dyn LlmProvider> {
    match config.llm.provider.as_str() {
        "mock" => {
            let table = config.validator.allowlisted_tables.first().map_or("sales_fact", String::as_str);
            Arc::new(MockProvider::canned_plan(format!("SELECT 1 FROM {table} LIMIT 1"), 0.9))
        },
        _ => Arc::new(OpenAiCompatibleProvider::new(
            config.llm.api_base.clone(),
            config.llm.api_key.clone(),
            config.llm.model.clone(),
        )),
    }
}

fn data_store_url(config: &Config) -> String {
    format!(
        "mysql://{}:{}@{}:{}/{}",
        config.data_store.user,
        config.data_store.password,
        config.data_store.host,
        config.data_store.port,
        config.data_store.database,
    )
}

/// Periodic `QueryHistoryStore::cleanup` sweep (spec.md §4.8: "invoked by an
/// external scheduler"), independent of the request path.
struct HistoryCleanupTask {
    history: Arc<QueryHistoryStore>,
}

impl ScheduledTask for HistoryCleanupTask {
    fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
        Box::pin(async move {
            let deleted = self.history.cleanup().await?;
            if deleted > 0 {
                tracing::info!("query history cleanup: removed {deleted} expired entries");
            }
            Ok(())
        })
    }
}

fn spawn_history_cleanup(history: Arc<QueryHistoryStore>) {
    let executor = ScheduledExecutor::new("query-history-cleanup", Duration::from_secs(3600));
    tokio::spawn(async move {
        executor.start(HistoryCleanupTask { history }).await;
    });
}

async fn health_check() -> &'static str {
    "OK"
}

async fn handle_query(
    State(tool): State<Arc<SqlTool>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<SqlRequest>,
) -> impl IntoResponse {
    let fallback_key = addr.ip().to_string();
    match tool.handle(request, &fallback_key).await {
        ToolResponse::Success(response) => (StatusCode::OK, Json(response)).into_response(),
        ToolResponse::Clarification(response) => (StatusCode::OK, Json(response)).into_response(),
        ToolResponse::Error(error) => (status_for_error(&error), Json(error)).into_response(),
    }
}

/// Maps the error taxonomy's `category` (spec.md §4.12) onto an HTTP status.
/// Not part of the spec's wire contract itself — callers are expected to read
/// `category`/`retryable` from the body — but a sensible default for HTTP
/// clients that only look at the status line.
fn status_for_error(error: &ErrorResponse) -> StatusCode {
    match error.category.as_str() {
        "validation" => StatusCode::BAD_REQUEST,
        "rate_limit" => StatusCode::TOO_MANY_REQUESTS,
        "timeout" => StatusCode::GATEWAY_TIMEOUT,
        "circuit_breaker" => StatusCode::SERVICE_UNAVAILABLE,
        "planning" => StatusCode::UNPROCESSABLE_ENTITY,
        "execution" => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
