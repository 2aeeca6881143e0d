//! Sales service entry point.

use std::sync::Arc;

use common::telemetry::init_tracing;
use common::{JwtManager, Role};
use messaging::EventPublisher;
use metrics_exporter_prometheus::PrometheusHandle;
use sales::config::Config;
use sales::{HttpInventoryGateway, InMemoryOrderStore, OrderStore, PostgresOrderStore};
use tokio::signal;

/// Lifetime of a service token minted at startup.
const SERVICE_TOKEN_TTL_SECS: i64 = 365 * 24 * 3600;

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

async fn serve<O: OrderStore + 'static>(
    config: Config,
    jwt: Arc<JwtManager>,
    orders: O,
    inventory: HttpInventoryGateway,
    publisher: Arc<dyn EventPublisher>,
    metrics_handle: PrometheusHandle,
) {
    let state = sales::create_state(orders, inventory, publisher);

    // Finish any placement a previous process left half done
    match state.workflow.recover_incomplete().await {
        Ok(report) => tracing::info!(?report, "startup recovery finished"),
        Err(e) => tracing::error!(error = %e, "startup recovery failed"),
    }

    let app = sales::create_app(state, jwt, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting sales service");

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

    // 4. Build the inventory gateway
    let jwt = Arc::new(JwtManager::new(config.jwt.clone()));
    let token = match config.inventory_service_token.clone() {
        Some(token) => token,
        None => jwt
            .issue_with_ttl("sales-service", "Sales Service", &[Role::Service], SERVICE_TOKEN_TTL_SECS)
            .expect("failed to mint service token"),
    };
    let inventory = HttpInventoryGateway::new(
        config.inventory_base_url.clone(),
        token,
        config.inventory_timeout(),
    )
    .expect("failed to build inventory client");
    tracing::info!(base_url = inventory.base_url(), "inventory gateway ready");

    // 5. Open the order ledger and serve
    match config.database_url.clone() {
        Some(url) => {
            let pool = sqlx::PgPool::connect(&url)
                .await
                .expect("failed to connect to PostgreSQL");
            let store = PostgresOrderStore::new(pool);
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            serve(config, jwt, store, inventory, publisher, metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory order ledger");
            serve(
                config,
                jwt,
                InMemoryOrderStore::new(),
                inventory,
                publisher,
                metrics_handle,
            )
            .await;
        }
    }
}
