use std::sync::Arc;

use delivery_tracking::{api, config, engine, error, state};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    let config = config::Config::from_env()?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false);
    if config.log_json {
        subscriber.json().init();
    } else {
        subscriber.compact().init();
    }

    let shared_state = Arc::new(state::AppState::from_config(&config)?);

    tokio::spawn(engine::supervisor::run_supervisor(
        shared_state.store.clone(),
        shared_state.boards.clone(),
        shared_state.synchronizer.clone(),
    ));

    let app = api::rest::router(shared_state.clone());

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| error::AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(
        http_port = config.http_port,
        backend = %config.backend_url,
        directions = config.directions_url.as_deref().unwrap_or("fallback only"),
        "http server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| error::AppError::Internal(format!("server error: {err}")))?;

    shared_state.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
