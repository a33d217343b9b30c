use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vellum::config::Config;
use vellum::services::{
    AuthService, BacktestService, Bookkeeper, ExecutionEngine, InMemoryRegistry, LeaseRegistry,
    MarketDataService, RunningRegistry, SqliteStore,
};
use vellum::sources::ChartClient;
use vellum::{api, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vellum=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Arc::new(Config::from_env());
    info!("Starting Vellum server on {}:{}", config.host, config.port);

    // Open the ledger
    let store = Arc::new(SqliteStore::new(&config.database_path)?);

    // Market data: upstream client + cache, synthetic fallback in development
    let chart_client = ChartClient::new(
        config.upstream_market_url.clone(),
        Duration::from_secs(config.quote_timeout_secs),
    );
    let market = Arc::new(MarketDataService::new(
        chart_client,
        config.env.is_development(),
    ));

    // Ledger bookkeeping
    let bookkeeper = Arc::new(Bookkeeper::new(store.clone()));

    // Running-algorithm registry: in-memory for a single process, database
    // leases when replicas share the ledger
    let tick = Duration::from_secs(config.engine_tick_secs);
    let registry: Arc<dyn RunningRegistry> = if config.lease_registry {
        info!("Using database-lease algorithm registry");
        Arc::new(LeaseRegistry::new(store.clone(), tick * 3))
    } else {
        Arc::new(InMemoryRegistry::new())
    };

    // Live execution engine
    let engine = Arc::new(ExecutionEngine::new(
        store.clone(),
        bookkeeper.clone(),
        market.clone(),
        registry,
        tick,
        config.default_symbol.clone(),
    ));

    // Backtesting
    let backtester = Arc::new(BacktestService::new(store.clone(), market.clone()));

    // Bearer-token auth
    let auth = Arc::new(AuthService::new(config.jwt_secret.clone(), store.clone()));

    let state = AppState {
        config: config.clone(),
        store,
        market,
        bookkeeper,
        engine: engine.clone(),
        backtester,
        auth,
    };

    let app = api::router()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(engine))
        .await?;

    Ok(())
}

/// Wait for ctrl-c, then drain running execution tasks.
async fn shutdown_signal(engine: Arc<ExecutionEngine>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received, draining execution tasks");
    engine.shutdown().await;
}
