use std::sync::Arc;

use clap::Parser;
use costreport::{
    api::{build_router, AppState},
    clock::{Clock, SystemClock},
    config::{CliArgs, Config, StorageKind},
    services::Services,
};
use costreport_memory::InMemoryStorage;
use costreport_postgres::PostgresStorage;
use costreport_sqlite::SqliteStorage;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();
    let config = Config::load(&cli);

    init_tracing(&config);

    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Metrics recorder not installed");
            None
        }
    };

    let services = match open_services(&config).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, backend = ?config.storage.backend, "Failed to open storage");
            std::process::exit(1);
        }
    };

    let state = AppState {
        services: Arc::new(services),
        timeout: config.request_timeout(),
        metrics,
    };
    let app = build_router(state, config.admin.cleanup_routes);

    let addr = match config.listen_addr() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(error = %e, host = %config.server.host, "Invalid listen address");
            std::process::exit(1);
        }
    };

    tracing::info!(%addr, backend = ?config.storage.backend, "API listening");

    if let Err(e) = axum::Server::bind(&addr).serve(app.into_make_service()).await {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    if config.logging.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn open_services(config: &Config) -> Result<Services, String> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    match config.storage.backend {
        StorageKind::Memory => Ok(Services::new(Arc::new(InMemoryStorage::new()), clock)),
        StorageKind::Sqlite => {
            let storage = SqliteStorage::new(&config.storage.path).map_err(|e| e.to_string())?;
            Ok(Services::new(Arc::new(storage), clock))
        }
        StorageKind::Postgres => {
            let conn_str = config
                .storage
                .connection_string
                .clone()
                .ok_or_else(|| "storage.connection_string is required for postgres".to_string())?;
            // The sync client runs its own runtime and must not be built on an async worker.
            let storage = tokio::task::spawn_blocking(move || PostgresStorage::new(&conn_str))
                .await
                .map_err(|e| e.to_string())?
                .map_err(|e| e.to_string())?;
            Ok(Services::new(Arc::new(storage), clock))
        }
    }
}
