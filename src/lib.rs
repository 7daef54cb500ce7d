//! BDD Hub -- scenario authoring and test-run tracking for BDD suites.
//!
//! This crate provides the core library for storing Gherkin-style
//! scenarios, queueing and recording test runs, synthesizing example
//! tables for scenario outlines, and emailing result reports.

pub mod api;
pub mod config;
pub mod media;
pub mod metrics;
pub mod model;
pub mod notify;
pub mod outline;
pub mod queue;
pub mod richtext;
pub mod runs;
pub mod storage;
pub mod ui;

use anyhow::Result;

use crate::api::state::AppState;
use crate::config::AppConfig;
use crate::media::ScreenshotSigner;
use crate::storage::Store;

/// Start the BDD Hub server: REST API plus the HTML UI.
pub async fn serve(config: &AppConfig) -> Result<()> {
    tracing::info!(db_path = %config.db_path, "initializing database");
    let pool = storage::open_pool(&config.db_path)?;
    let store = Store::new(pool);
    let signer = ScreenshotSigner::new(
        &config.media.base_url,
        &config.media.secret,
        config.media.expiry_days,
    );

    let app = api::router(AppState { store, signer });

    let addr: std::net::SocketAddr = config.bind.parse()?;
    tracing::info!(%addr, "bddhub listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
