mod config;
mod error;
mod eval;
mod extract;
mod llm;
mod report;
mod rubric;
mod segment;
mod session;
mod web;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::web::AppState;

#[tokio::main]
async fn main() {
    dotenv().ok();

    let config = AppConfig::from_env();
    init_tracing(&config);

    if let Err(err) = app_main(config).await {
        error!(?err, "application error");
        std::process::exit(1);
    }
}

async fn app_main(config: AppConfig) -> Result<()> {
    let addr = SocketAddr::new(config.host, config.port);
    let state = AppState::new(config).await?;

    let app = web::router::build_router(state);

    info!(%addr, "listening");

    let listener = TcpListener::bind(addr)
        .await
        .context("failed to bind listener")?;
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let default_filter = if config.debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
