mod config;
mod error;
mod export;
mod gemini;
mod generator;
mod html;
mod layout;
mod models;
mod paginate;
mod placeholders;
mod prompt;
mod raster;
mod routes;
mod service;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tracing_subscriber::{fmt, EnvFilter};

use crate::{
    config::AppConfig,
    gemini::GeminiClient,
    generator::{ContentGenerator, DemoGenerator},
    layout::load_font,
    routes::{router, AppState},
    service::EbookService,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = AppConfig::from_env();
    let generator: Arc<dyn ContentGenerator> = if config.demo_mode {
        tracing::warn!("Demo mode enabled, no model API calls will be made");
        Arc::new(DemoGenerator)
    } else {
        if config.api_key.is_none() {
            tracing::warn!("GEMINI_API_KEY is not set, generation requests will fail");
        }
        Arc::new(GeminiClient::new(&config).context("building the Gemini client")?)
    };

    let font = load_font(config.font_path.as_deref());
    if font.is_none() {
        tracing::warn!("No font found, exported pages will show text placeholders");
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let service = EbookService::new(generator, Arc::new(config), font);
    let app = router(AppState { service });

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "Starting server");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down");
        })
        .await
        .context("server error")?;
    Ok(())
}
