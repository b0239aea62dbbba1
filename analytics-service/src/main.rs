use analytics_service::{
    api::{create_router, AppState},
    auth::ensure_bootstrap_admin,
    config::AppConfig,
    metrics_server, observability,
    scheduler::Scheduler,
};
use anyhow::Result;
use energy_client::db;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr).await?;
    }

    let pool = db::connect(&cfg.database.uri, cfg.database.max_connections).await?;
    if cfg.database.run_migrations {
        db::run_migrations(&pool).await?;
    }
    ensure_bootstrap_admin(&pool, &cfg.auth).await?;

    let shutdown = CancellationToken::new();

    let scheduler = cfg
        .scheduler
        .enabled
        .then(|| tokio::spawn(Scheduler::new(pool.clone(), &cfg).run(shutdown.clone())));

    let state = Arc::new(AppState::new(pool, &cfg));
    let app = create_router(state, &cfg.server);

    let listener = TcpListener::bind(&cfg.server.bind_addr).await?;
    tracing::info!(addr = %cfg.server.bind_addr, "analytics api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Some(handle) = scheduler {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "scheduler task failed");
        }
    }
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = token.cancelled() => {}
    }
    tracing::info!("shutdown signal received");
    token.cancel();
}
