use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use busca_precos::config::{LoggingConfig, MetricsConfig};
use busca_precos::stores::adapters::register_builtin;
use busca_precos::web::{create_router, AppState};
use busca_precos::{AppConfig, RenderPool, SearchCache, SearchOrchestrator, SqliteHistory, StoreRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;
    let _log_guard = init_tracing(&config.logging)?;

    info!("Starting busca-precos v{}", env!("CARGO_PKG_VERSION"));

    if config.metrics.enabled {
        install_metrics(&config.metrics)?;
    }

    let history = SqliteHistory::connect(&config.database).await?;
    if let Err(e) = history.clean_old_data(config.database.retention_days).await {
        warn!(error = %e, "Failed to remove old search results");
    }

    let pool = RenderPool::new(&config.render);
    let result = serve(config, history, pool.clone()).await;

    // runs on every exit path, including a failed startup
    pool.shutdown().await;
    info!("Shutdown complete");
    result
}

async fn serve(config: AppConfig, history: SqliteHistory, pool: RenderPool) -> Result<()> {
    let registry = StoreRegistry::new();
    register_builtin(&registry, pool, &config.render).await?;

    let cache = SearchCache::from_config(&config.cache);
    let sweeper = cache.spawn_sweeper(config.cache.check_period());

    let orchestrator = SearchOrchestrator::new(registry, cache, Arc::new(history.clone()), config.search.clone());
    let app = create_router(AppState::new(orchestrator, history));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "Listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    sweeper.abort();
    served?;
    Ok(())
}

fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::from_default_env().add_directive("busca_precos=debug".parse()?);
    let registry = tracing_subscriber::registry().with(filter).with(fmt::layer());

    match &config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, "busca-precos.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Ok(Some(guard))
        }
        None => {
            registry.init();
            Ok(None)
        }
    }
}

fn install_metrics(config: &MetricsConfig) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    info!(%addr, "Prometheus exporter listening");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received interrupt"),
        _ = terminate => info!("Received terminate"),
    }
}
