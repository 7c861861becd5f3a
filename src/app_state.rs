use std::{path::Path, sync::Arc};

use crate::{
    camera::{driver::CameraDriver, traits::CameraCli},
    capture::orchestrator::CaptureOrchestrator,
    config::AppConfig,
    frame::store::FrameStore,
};

/// URL prefix under which `photo_dir` is served.
pub const PHOTOS_ROUTE: &str = "/photos";
/// URL prefix under which `frame_dir` is served.
pub const FRAMES_ROUTE: &str = "/frames";

pub type SharedCli = Arc<dyn CameraCli>;

pub struct AppState {
    pub config: AppConfig,
    pub orchestrator: CaptureOrchestrator<SharedCli>,
}

impl AppState {
    pub fn new(config: AppConfig, cli: SharedCli) -> Self {
        let driver = CameraDriver::new(cli, config.driver_settings());
        let frames = FrameStore::new(
            config.frame_dir.clone(),
            config.frame_meta_dir.clone(),
            FRAMES_ROUTE,
        );
        let orchestrator = CaptureOrchestrator::new(driver, frames, config.capture_settings());
        Self {
            config,
            orchestrator,
        }
    }

    /// Public URL of a file written under the photo directory.
    pub fn photo_url(&self, path: &Path) -> String {
        let relative = path
            .strip_prefix(&self.config.photo_dir)
            .ok()
            .map(|rel| {
                rel.components()
                    .map(|part| part.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .filter(|rel| !rel.is_empty())
            .or_else(|| {
                path.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .unwrap_or_default();
        format!("{PHOTOS_ROUTE}/{relative}")
    }

    pub fn absolute_url(&self, url: &str) -> Option<String> {
        self.config
            .base_url
            .as_deref()
            .map(|base| format!("{}{url}", base.trim_end_matches('/')))
    }
}
