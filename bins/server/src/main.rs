//! Flowgate API Server
//!
//! Serves the approval workflow API and, when enabled, runs the escalation
//! sweep in the background until shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sea_orm_migration::MigratorTrait;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flowgate_api::{AppState, create_router};
use flowgate_core::workflow::{
    ApprovalPolicy, EngineConfig, EscalationScheduler, LogNotifier, StepResolver, WorkflowEngine,
};
use flowgate_db::{SeaOrmRequestStore, connect, migration::Migrator};
use flowgate_shared::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowgate=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load().context("failed to load configuration")?;

    let db = connect(&config.database).await?;
    info!("Connected to database");
    if config.database.run_migrations {
        Migrator::up(&db, None).await?;
        info!("Migrations applied");
    }

    let engine_config = EngineConfig::from_settings(&config.workflow, &config.escalation)?;
    info!(
        return_policy = ?engine_config.return_policy,
        max_conflict_retries = engine_config.max_conflict_retries,
        "Workflow engine configured"
    );
    let engine = Arc::new(WorkflowEngine::new(
        Arc::new(SeaOrmRequestStore::new(db)),
        Arc::new(LogNotifier),
        StepResolver::new(
            ApprovalPolicy::default_tiers(),
            config.workflow.augment_supplied_chains,
        ),
        engine_config,
    ));

    let shutdown = CancellationToken::new();
    let sweeper = if config.escalation.enabled {
        let interval = Duration::from_secs(config.escalation.sweep_interval_secs.max(1));
        info!(interval_secs = interval.as_secs(), "Escalation sweep enabled");
        let scheduler = Arc::new(EscalationScheduler::new(Arc::clone(&engine), interval));
        Some(scheduler.spawn(shutdown.clone()))
    } else {
        None
    };

    let app = create_router(AppState { engine });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    let token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            token.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Some(handle) = sweeper {
        handle.await.ok();
    }

    Ok(())
}
