mod app_state;
mod camera;
mod capture;
mod config;
mod core;
mod frame;
mod web;

use std::sync::Arc;

use app_state::{AppState, SharedCli};
use camera::{driver::CameraDriver, gphoto_backend::GphotoCli};
use config::AppConfig;
use tracing::info;
use tracing_appender::rolling;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = AppConfig::from_env()?;

    if std::env::args().any(|arg| arg == "--camera-info") {
        let driver = CameraDriver::new(GphotoCli::new(false), config.driver_settings());
        let info = driver.camera_info(None).await?;
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    tokio::fs::create_dir_all("logs").await?;
    let file_appender = rolling::daily("logs", "boothcam.log");
    let (non_blocking, _log_guard) = tracing_appender::non_blocking(file_appender);

    let level = if config.debug_gphoto2 {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(non_blocking)
        .with_max_level(level)
        .init();

    for dir in [
        &config.public_dir,
        &config.photo_dir,
        &config.frame_dir,
        &config.frame_meta_dir,
    ] {
        tokio::fs::create_dir_all(dir).await?;
    }

    let cli: SharedCli = Arc::new(GphotoCli::new(config.debug_gphoto2));
    let state = Arc::new(AppState::new(config.clone(), cli));
    let app = web::routes::build_router(state);

    info!(
        cli = %config.gphoto2_bin,
        port = config.gphoto2_port.as_deref().unwrap_or("<auto>"),
        policy = ?config.port_policy,
        "boothcam listening on {}",
        config.bind_addr
    );
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
