use std::env;

use embed_auth::{install_global, AppConfig, EmbedRuntime, StdioBus};
use tokio::signal;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Stdout carries protocol messages, so logs go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::from_env()?;
    let runtime = EmbedRuntime::from_config(config, StdioBus::stdio())?;
    install_global(runtime.channel.clone());
    runtime.mount();

    match runtime.token().await {
        Ok(_) => tracing::info!(state = ?runtime.channel.state(), "token acquired"),
        Err(err) => tracing::warn!(error = %err, "initial token request failed"),
    }

    if let Ok(path) = env::var("EMBED_PROBE_PATH") {
        match runtime.api.get(&path).await {
            Ok(response) => tracing::info!(path = %path, status = %response.status(), "probe succeeded"),
            Err(err) => tracing::warn!(path = %path, status = ?err.status(), error = %err, "probe failed"),
        }
    }

    shutdown_signal().await;
    runtime.heartbeat.stop();
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
