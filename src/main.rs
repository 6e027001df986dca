use booking_payments::api::{router, AppState};
use booking_payments::config::AppConfig;
use booking_payments::database::{
    init_pool_from_config, run_migrations, InMemoryPaymentStore, PaymentStore, PgPaymentStore,
};
use booking_payments::health::HealthChecker;
use booking_payments::logging::init_tracing;
use booking_payments::payments::factory::GatewayRegistry;
use booking_payments::services::booking_client::HttpBookingClient;
use booking_payments::services::notification::PaymentNotifier;
use booking_payments::services::payment_orchestrator::PaymentOrchestrator;
use booking_payments::services::webhook_processor::WebhookProcessor;
use booking_payments::workers::{IntakeWorkerConfig, PaymentIntake, PaymentIntakeWorker};
use dotenv::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        skip_externals = config.skip_externals,
        "Starting booking payments service"
    );

    let store: Arc<dyn PaymentStore> = match &config.database {
        Some(database) => {
            info!("Initializing database connection pool...");
            let pool = init_pool_from_config(database).await.map_err(|e| {
                error!("Failed to initialize database pool: {}", e);
                e
            })?;
            run_migrations(&pool).await?;
            info!(
                max_connections = pool.options().get_max_connections(),
                "Database connection pool initialized"
            );
            Arc::new(PgPaymentStore::new(pool))
        }
        None => {
            warn!("Skipping database initialization (SKIP_EXTERNALS=true); payments are kept in memory");
            Arc::new(InMemoryPaymentStore::new())
        }
    };

    let gateways = Arc::new(GatewayRegistry::from_env()?);
    if gateways.enabled().is_empty() {
        warn!("No payment gateway is enabled; initiation requests will fail");
    }

    let booking = Arc::new(HttpBookingClient::new(&config.booking)?);
    let orchestrator = Arc::new(PaymentOrchestrator::new(
        gateways.clone(),
        store.clone(),
        booking.clone(),
        config.payments.clone(),
    ));
    let webhooks = Arc::new(WebhookProcessor::new(
        gateways.clone(),
        store.clone(),
        orchestrator.reconciler().clone(),
        PaymentNotifier::new(booking),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (intake, intake_rx) = PaymentIntake::channel(config.payments.intake_queue_capacity);
    let worker = PaymentIntakeWorker::new(
        orchestrator.clone(),
        &intake,
        intake_rx,
        IntakeWorkerConfig {
            max_deliveries: config.payments.intake_max_deliveries,
            ..IntakeWorkerConfig::default()
        },
    );
    let worker_handle = tokio::spawn(worker.run(shutdown_rx));

    let app = router(AppState {
        orchestrator,
        webhooks,
        intake,
        health: HealthChecker::new(store, gateways),
    });

    let addr: SocketAddr = config.server.bind_address().parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to address {}: {}", addr, e);
        e
    })?;
    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(shutdown_tx))
        .await?;

    match tokio::time::timeout(Duration::from_secs(10), worker_handle).await {
        Ok(Ok(())) => info!("Payment intake worker shut down"),
        Ok(Err(e)) => error!(error = %e, "Payment intake worker panicked"),
        Err(_) => warn!("Payment intake worker did not stop in time"),
    }

    info!("Server shutdown complete");
    Ok(())
}
