//! PDF conversion server
//!
//! A stateless HTTP front end for the poppler command-line tools. Provides
//! REST API endpoints for:
//!
//! - Text extraction (plain and layout-preserving)
//! - Page rendering (PNG/JPEG)
//! - Document metadata
//!
//! ## Architecture
//!
//! Requests are served by a fixed pool of runtime worker threads. Each
//! conversion request needs a tool permit before its body is read; the
//! permit count caps how many external processes run at once, and requests
//! beyond it wait for a permit without buffering their uploads.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use clap::Parser;
use tokio::signal;
use tokio::sync::Semaphore;
use tool_invoker::{Invoker, ToolStatus};
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
mod config;
mod error;

use api::{
    handle_convert_json, handle_convert_raw, handle_extract, handle_health, handle_list_modes,
};
use config::{Args, BodyLimits};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub invoker: Arc<Invoker>,
    /// One permit per in-flight conversion request, so per running tool
    pub permits: Arc<Semaphore>,
    pub workers: usize,
    pub max_concurrent_tools: usize,
    /// Tool versions detected at startup
    pub tools: Arc<Vec<ToolStatus>>,
}

impl AppState {
    pub fn new(
        invoker: Invoker,
        workers: usize,
        max_concurrent_tools: usize,
        tools: Vec<ToolStatus>,
    ) -> Self {
        Self {
            invoker: Arc::new(invoker),
            permits: Arc::new(Semaphore::new(max_concurrent_tools)),
            workers,
            max_concurrent_tools,
            tools: Arc::new(tools),
        }
    }
}

/// Build the application router
///
/// The conversion routes share one concurrency limit backed by the permit
/// semaphore. A request waits for a permit before its handler runs, so the
/// body of a queued request is never read into memory.
pub fn router(state: AppState) -> Router {
    let limits = BodyLimits::for_payload(state.invoker.config().max_payload_bytes);
    let tool_permits = GlobalConcurrencyLimitLayer::with_semaphore(state.permits.clone());

    Router::new()
        // Health check
        .route("/health", get(handle_health))
        // API endpoints
        .route("/api/modes", get(handle_list_modes))
        .route(
            "/api/convert",
            post(handle_convert_json)
                .layer::<_, Infallible>(DefaultBodyLimit::max(limits.json))
                .layer(tool_permits.clone()),
        )
        .route(
            "/api/convert/:mode",
            post(handle_convert_raw)
                .layer::<_, Infallible>(DefaultBodyLimit::max(limits.raw))
                .layer(tool_permits.clone()),
        )
        .route(
            "/api/extract",
            post(handle_extract)
                .layer::<_, Infallible>(DefaultBodyLimit::max(limits.multipart))
                .layer(tool_permits),
        )
        .with_state(state)
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    args.validate()?;

    // Fixed worker pool; requests never get more threads than this
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(usize::from(args.workers))
        .thread_name("convert-worker")
        .enable_all()
        .build()
        .context("Failed to build runtime")?;

    runtime.block_on(serve(args))
}

async fn serve(args: Args) -> anyhow::Result<()> {
    info!("Starting convert-server on {}:{}", args.host, args.port);

    let invoker = Invoker::new(args.invoker_config());

    // Check the toolset before accepting traffic
    let required = invoker.modes().required_tools();
    let tools = invoker.config().toolchain.detect(&required).await;
    let missing: Vec<&str> = tools
        .iter()
        .filter(|t| !t.available)
        .map(|t| t.tool)
        .collect();
    if !missing.is_empty() {
        if args.skip_tool_check {
            warn!("Missing poppler tools: {}", missing.join(", "));
        } else {
            error!("Missing poppler tools: {}", missing.join(", "));
            bail!(
                "required poppler tools not found: {} (install poppler-utils or set --bin-dir)",
                missing.join(", ")
            );
        }
    }
    for tool in tools.iter().filter(|t| t.available) {
        info!(
            "Found {} ({})",
            tool.tool,
            tool.version.as_deref().unwrap_or("unknown version")
        );
    }

    let state = AppState::new(
        invoker,
        usize::from(args.workers),
        args.max_concurrent_tools(),
        tools,
    );

    // Configure CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = router(state)
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(cors);

    if let Some(limit) = args.rate_limiter() {
        let governor_conf = Arc::new(
            GovernorConfigBuilder::default()
                .period(limit.period)
                .burst_size(limit.burst)
                .finish()
                .context("Failed to create rate limiter config")?,
        );
        app = app.layer(GovernorLayer {
            config: governor_conf,
        });
        info!("Rate limit: {} requests/second per IP", args.rate_limit);
    }

    // Start server
    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", args.host, args.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Server listening on http://{}", addr);
    info!(
        "Workers: {}, concurrent tools: {}, timeout: {}ms, max payload: {} bytes",
        args.workers,
        args.max_concurrent_tools(),
        args.timeout_ms,
        args.max_payload_bytes
    );
    info!("Enabled modes: {}", args.modes);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
