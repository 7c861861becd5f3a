use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Serialize;
use tokio::fs;
use tracing::{info, warn};

use crate::{
    camera::{
        driver::{CameraDriver, CameraInfo, CaptureOptions, PortPolicy},
        parser::FileIndex,
        traits::CameraCli,
    },
    core::{
        errors::{CaptureError, CaptureFailure},
        state::{CaptureStage, Composition, FrameMode},
    },
    frame::{
        compose::{ComposeOptions, compose_frame},
        mosaic::{MOSAIC_TILES, create_mosaic},
        render::{open_image, write_jpeg},
        store::FrameStore,
    },
};

use super::{id::make_id, queue::CaptureQueue};

pub const DEFAULT_BURST_COUNT: usize = 4;

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub photo_dir: PathBuf,
    pub port_policy: PortPolicy,
    pub burst_count: usize,
}

/// Result of one successful capture. Only built once every step succeeded.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureEntry {
    pub id: String,
    pub output_path: PathBuf,
    pub frame_output_paths: Vec<PathBuf>,
    pub composition: Composition,
}

pub struct CaptureOrchestrator<C: CameraCli + 'static> {
    driver: Arc<CameraDriver<C>>,
    frames: Arc<FrameStore>,
    queue: CaptureQueue,
    settings: Arc<CaptureSettings>,
}

impl<C: CameraCli + 'static> Clone for CaptureOrchestrator<C> {
    fn clone(&self) -> Self {
        Self {
            driver: self.driver.clone(),
            frames: self.frames.clone(),
            queue: self.queue.clone(),
            settings: self.settings.clone(),
        }
    }
}

fn stage(id: &str, stage: CaptureStage) {
    info!(capture_id = id, %stage, "capture stage");
}

/// Removes what a failed capture left under the photo dir.
async fn discard(id: &str, frames_dir: &Path, output_path: &Path) {
    let removed = [
        fs::remove_dir_all(frames_dir).await,
        fs::remove_file(output_path).await,
    ];
    for err in removed.into_iter().filter_map(Result::err) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(capture_id = id, %err, "could not clean up failed capture");
        }
    }
}

impl<C: CameraCli + 'static> CaptureOrchestrator<C> {
    pub fn new(driver: CameraDriver<C>, frames: FrameStore, settings: CaptureSettings) -> Self {
        Self {
            driver: Arc::new(driver),
            frames: Arc::new(frames),
            queue: CaptureQueue::new(),
            settings: Arc::new(settings),
        }
    }

    pub fn frames(&self) -> &FrameStore {
        &self.frames
    }

    pub fn is_busy(&self) -> bool {
        self.queue.is_busy()
    }

    pub fn burst_count(&self) -> usize {
        self.settings.burst_count
    }

    /// Options shared by every step of one orchestration.
    async fn step_options(&self) -> CaptureOptions {
        let options = CaptureOptions::default();
        match self.settings.port_policy {
            PortPolicy::Detect => options,
            PortPolicy::Pin => {
                let port = self.driver.resolve_port(&options).await;
                info!(?port, "camera port pinned for this capture");
                options.with_port(port)
            }
        }
    }

    /// Runs auto-detect and summary in the capture slot so they never talk
    /// to the camera while a capture is in progress.
    pub async fn camera_info(&self, port: Option<String>) -> anyhow::Result<CameraInfo> {
        let driver = self.driver.clone();
        let info = self
            .queue
            .enqueue(move || async move { Ok(driver.camera_info(port.as_deref()).await) })
            .await??;
        Ok(info)
    }

    pub async fn capture_single(&self) -> Result<CaptureEntry, CaptureFailure> {
        let this = self.clone();
        self.queue
            .enqueue(move || async move { this.run_single().await })
            .await
    }

    /// Triggers `count` shots back to back (default from settings) and
    /// assembles them into one framed image or mosaic.
    pub async fn capture_burst(&self, count: Option<usize>) -> Result<CaptureEntry, CaptureFailure> {
        let count = count.unwrap_or(self.settings.burst_count).max(1);
        let this = self.clone();
        self.queue
            .enqueue(move || async move { this.run_burst(count).await })
            .await
    }

    /// One shutter release for a client-paced burst; nothing is downloaded.
    pub async fn trigger_only(&self) -> Result<(), CaptureFailure> {
        let this = self.clone();
        self.queue
            .enqueue(move || async move {
                let options = this.step_options().await;
                this.driver
                    .trigger_capture(&options)
                    .await
                    .map_err(CaptureFailure::TriggerFailed)
            })
            .await
    }

    /// Assembles the `count` most recent files on the camera, for bursts
    /// shot with [`Self::trigger_only`].
    pub async fn assemble_burst(&self, count: Option<usize>) -> Result<CaptureEntry, CaptureFailure> {
        let count = count.unwrap_or(self.settings.burst_count).max(1);
        let this = self.clone();
        self.queue
            .enqueue(move || async move {
                let id = make_id();
                stage(&id, CaptureStage::Idle);
                this.ensure_burst_composable(count).await?;
                let options = this.step_options().await;
                let latest = this
                    .driver
                    .latest_indices(count, &options)
                    .await
                    .map_err(CaptureFailure::DownloadFailed)?;
                if latest.len() < count {
                    return Err(CaptureFailure::InsufficientFrames {
                        expected: count,
                        found: latest.len(),
                    });
                }
                this.assemble(&id, &latest, &options).await
            })
            .await
    }

    async fn run_single(&self) -> Result<CaptureEntry, CaptureFailure> {
        let id = make_id();
        stage(&id, CaptureStage::Idle);
        let options = self.step_options().await;

        stage(&id, CaptureStage::Triggering { shot: 1, of: 1 });
        let index = self
            .driver
            .trigger_capture_and_get_index(&options)
            .await
            .map_err(CaptureFailure::TriggerFailed)?;
        stage(&id, CaptureStage::Listed { shot: 1 });

        let raw_dir = self.settings.photo_dir.join("singles").join(&id);
        let output_path = self.settings.photo_dir.join(format!("{id}.jpg"));
        let result = self
            .publish_single(&id, index, &raw_dir, &output_path, &options)
            .await;
        if result.is_err() {
            discard(&id, &raw_dir, &output_path).await;
        }
        result
    }

    async fn publish_single(
        &self,
        id: &str,
        index: FileIndex,
        raw_dir: &Path,
        output_path: &Path,
        options: &CaptureOptions,
    ) -> Result<CaptureEntry, CaptureFailure> {
        stage(id, CaptureStage::Downloading);
        let frames = self
            .download(&[index], raw_dir, options)
            .await
            .map_err(CaptureFailure::DownloadFailed)?;

        stage(id, CaptureStage::Assembling);
        let framed = compose_frame(
            &self.frames,
            FrameMode::Single,
            &frames,
            output_path,
            ComposeOptions::default(),
        )
        .await
        .map_err(CaptureFailure::CompositionFailed)?;
        let composition = if framed {
            stage(id, CaptureStage::Composed);
            Composition::Framed
        } else {
            keep_raw(&frames[0], output_path)
                .await
                .map_err(CaptureFailure::CompositionFailed)?;
            Composition::Raw
        };

        stage(id, CaptureStage::Done);
        Ok(CaptureEntry {
            id: id.to_string(),
            output_path: output_path.to_path_buf(),
            frame_output_paths: frames,
            composition,
        })
    }

    async fn run_burst(&self, count: usize) -> Result<CaptureEntry, CaptureFailure> {
        let id = make_id();
        stage(&id, CaptureStage::Idle);
        self.ensure_burst_composable(count).await?;
        let options = self.step_options().await;

        let mut baseline = self
            .driver
            .list_file_indices(&options)
            .await
            .map_err(CaptureFailure::TriggerFailed)?
            .into_iter()
            .max();
        let mut collected = Vec::with_capacity(count);
        for shot in 1..=count {
            stage(&id, CaptureStage::Triggering { shot, of: count });
            self.driver
                .trigger_capture(&options)
                .await
                .map_err(CaptureFailure::TriggerFailed)?;
            match self
                .driver
                .await_new_index(baseline, &options)
                .await
                .map_err(CaptureFailure::TriggerFailed)?
            {
                Some(index) => {
                    collected.push(index);
                    baseline = Some(index);
                    stage(&id, CaptureStage::Listed { shot });
                }
                None => warn!(capture_id = %id, shot, ?baseline, "no new file after trigger"),
            }
        }

        if collected.len() < count {
            return Err(CaptureFailure::InsufficientFrames {
                expected: count,
                found: collected.len(),
            });
        }
        self.assemble(&id, &collected, &options).await
    }

    /// Refuses a burst size that neither the burst frame nor the mosaic can
    /// take, before the camera is touched.
    async fn ensure_burst_composable(&self, count: usize) -> Result<(), CaptureFailure> {
        if count == MOSAIC_TILES {
            return Ok(());
        }
        let config = self
            .frames
            .get_frame_config(FrameMode::Burst)
            .await
            .map_err(|err| {
                CaptureFailure::CompositionFailed(CaptureError::ConfigurationInvalid(err.to_string()))
            })?;
        let overlay_on_disk = config.has_overlay()
            && fs::try_exists(self.frames.overlay_path(FrameMode::Burst))
                .await
                .unwrap_or(false);
        if overlay_on_disk && config.zones.len() == count {
            return Ok(());
        }
        Err(CaptureFailure::CompositionFailed(
            CaptureError::ConfigurationInvalid(format!(
                "burst of {count} shots needs a burst frame with {count} zones \
                 (configured: {}), or exactly {MOSAIC_TILES} shots for the mosaic",
                config.zones.len()
            )),
        ))
    }

    async fn assemble(
        &self,
        id: &str,
        indices: &[FileIndex],
        options: &CaptureOptions,
    ) -> Result<CaptureEntry, CaptureFailure> {
        let frames_dir = self.settings.photo_dir.join("bursts").join(id);
        let output_path = self.settings.photo_dir.join(format!("{id}-mosaic.jpg"));
        let result = self
            .publish_burst(id, indices, &frames_dir, &output_path, options)
            .await;
        if result.is_err() {
            discard(id, &frames_dir, &output_path).await;
        }
        result
    }

    async fn publish_burst(
        &self,
        id: &str,
        indices: &[FileIndex],
        frames_dir: &Path,
        output_path: &Path,
        options: &CaptureOptions,
    ) -> Result<CaptureEntry, CaptureFailure> {
        stage(id, CaptureStage::Downloading);
        let frames = self
            .download(indices, frames_dir, options)
            .await
            .map_err(CaptureFailure::DownloadFailed)?;

        stage(id, CaptureStage::Assembling);
        let framed = compose_frame(
            &self.frames,
            FrameMode::Burst,
            &frames,
            output_path,
            ComposeOptions::default(),
        )
        .await
        .map_err(CaptureFailure::CompositionFailed)?;
        let composition = if framed {
            stage(id, CaptureStage::Composed);
            Composition::Framed
        } else {
            stage(id, CaptureStage::MosaicFallback);
            create_mosaic(&frames, output_path)
                .await
                .map_err(CaptureFailure::CompositionFailed)?;
            Composition::Mosaic
        };

        stage(id, CaptureStage::Done);
        Ok(CaptureEntry {
            id: id.to_string(),
            output_path: output_path.to_path_buf(),
            frame_output_paths: frames,
            composition,
        })
    }

    async fn download(
        &self,
        indices: &[FileIndex],
        dest_dir: &Path,
        options: &CaptureOptions,
    ) -> Result<Vec<PathBuf>, CaptureError> {
        fs::create_dir_all(dest_dir).await?;
        let frames = self
            .driver
            .download_frames_range(indices, dest_dir, options)
            .await?;
        if frames.len() != indices.len() {
            return Err(CaptureError::InsufficientFrames {
                expected: indices.len(),
                found: frames.len(),
            });
        }
        Ok(frames)
    }
}

/// Publishes an unframed single shot: JPEGs are copied as-is, anything else
/// is re-encoded.
async fn keep_raw(raw: &Path, output: &Path) -> Result<(), CaptureError> {
    let is_jpeg = raw
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"));
    if is_jpeg {
        fs::copy(raw, output).await?;
        return Ok(());
    }
    let raw = raw.to_path_buf();
    let output = output.to_path_buf();
    tokio::task::spawn_blocking(move || write_jpeg(&open_image(&raw)?.to_rgb8(), &output)).await?
}
