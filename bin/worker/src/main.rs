use innoflow_worker::{PgStore, Worker, WorkerConfig};
use innoflow_workflow::{ExecutorRegistry, NodeTypeRegistry, Orchestrator};
use sqlx::postgres::PgPoolOptions;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Optional TOML file as the first argument; environment variables win.
    let config = match std::env::args().nth(1) {
        Some(path) => WorkerConfig::from_file(Path::new(&path)),
        None => WorkerConfig::from_env(),
    }
    .expect("failed to load configuration");
    tracing::info!(engine = ?config.engine, "Loaded configuration");

    let db_pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("failed to run migrations");

    let orchestrator = Orchestrator::new(
        Arc::new(PgStore::new(db_pool)),
        Arc::new(NodeTypeRegistry::builtin()),
        Arc::new(ExecutorRegistry::builtin()),
        config.engine.clone(),
    );
    let worker = Worker::new(orchestrator)
        .with_batch_size(config.batch_size)
        .with_poll_interval(config.poll_interval());

    worker
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await;
}
