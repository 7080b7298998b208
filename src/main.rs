mod app_state;
mod camera;
mod config;
mod core;
mod web;

use std::sync::Arc;

use app_state::AppState;
use camera::{
    ffmpeg::FfmpegAdapter,
    session::{SessionManager, SessionPaths},
};
use config::AppConfig;
use tracing::info;
use tracing_appender::rolling;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tokio::fs::create_dir_all("logs").await?;
    let file_appender = rolling::daily("logs", "picam.log");
    let (non_blocking, _log_guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(non_blocking)
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = AppConfig::from_env()?;
    tokio::fs::create_dir_all("static").await?;
    tokio::fs::create_dir_all(&config.stills_dir).await?;
    tokio::fs::create_dir_all(&config.timelapse_dir).await?;

    let adapter = FfmpegAdapter::new(
        config.camera_device.clone(),
        config.camera_input_format.clone(),
        config.still_size,
        config.stream_size,
    );
    let session = SessionManager::new(
        adapter,
        SessionPaths {
            stills_dir: config.stills_dir.clone().into(),
            timelapse_root: config.timelapse_dir.clone().into(),
            stream_url: "/stream".to_string(),
        },
    );

    let state = Arc::new(AppState::new(config.clone(), session));
    let app = web::routes::build_router(state.clone());

    info!(
        "{} listening on {} (device: {})",
        config.app_name, config.bind_addr, config.camera_device
    );
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
