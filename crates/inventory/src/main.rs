//! Inventory service entry point.

use std::sync::Arc;

use common::JwtManager;
use common::telemetry::init_tracing;
use inventory::config::Config;
use inventory::{InMemoryProductStore, PostgresProductStore, ProductStore};
use messaging::EventPublisher;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

async fn serve<S: ProductStore + 'static>(
    config: Config,
    store: S,
    publisher: Arc<dyn EventPublisher>,
    metrics_handle: PrometheusHandle,
) {
    let jwt = Arc::new(JwtManager::new(config.jwt.clone()));
    let state = inventory::create_state(store, publisher);
    let app = inventory::create_app(state, jwt, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting inventory service");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config.log_level, config.log_format);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Connect the event publisher
    let publisher = messaging::connect_publisher(config.amqp_url.as_deref())
        .await
        .expect("failed to connect to AMQP broker");

    // 4. Open the product ledger and serve
    match config.database_url.clone() {
        Some(url) => {
            let pool = sqlx::PgPool::connect(&url)
                .await
                .expect("failed to connect to PostgreSQL");
            let store = PostgresProductStore::new(pool);
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            serve(config, store, publisher, metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory product ledger");
            serve(config, InMemoryProductStore::new(), publisher, metrics_handle).await;
        }
    }
}
