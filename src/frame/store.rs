use std::{
    io::Cursor,
    path::{Path, PathBuf},
};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;

use crate::core::{errors::FrameStoreError, state::FrameMode};

use super::zone::{FrameZone, sanitize_zones};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameConfig {
    pub mode: FrameMode,
    pub overlay_ref: Option<String>,
    pub canvas_width: Option<u32>,
    pub canvas_height: Option<u32>,
    pub zones: Vec<FrameZone>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl FrameConfig {
    pub fn has_overlay(&self) -> bool {
        self.overlay_ref.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct StoredFrameConfig {
    overlay_ref: Option<String>,
    canvas_width: Option<u32>,
    canvas_height: Option<u32>,
    zones: Vec<FrameZone>,
    updated_at: Option<DateTime<Utc>>,
}

impl StoredFrameConfig {
    fn into_config(self, mode: FrameMode) -> FrameConfig {
        FrameConfig {
            mode,
            overlay_ref: self.overlay_ref,
            canvas_width: self.canvas_width,
            canvas_height: self.canvas_height,
            zones: self.zones,
            updated_at: self.updated_at,
        }
    }
}

/// Changes to merge into a stored frame; at least one must be set.
#[derive(Debug, Clone, Default)]
pub struct FrameUpdate {
    pub zones: Option<Vec<FrameZone>>,
    pub image: Option<Bytes>,
}

/// One JSON record and one PNG overlay per [`FrameMode`].
#[derive(Debug, Clone)]
pub struct FrameStore {
    frame_dir: PathBuf,
    meta_dir: PathBuf,
    public_prefix: String,
}

impl FrameStore {
    /// `public_prefix` is the URL path under which `frame_dir` is served.
    pub fn new(frame_dir: PathBuf, meta_dir: PathBuf, public_prefix: impl Into<String>) -> Self {
        Self {
            frame_dir,
            meta_dir,
            public_prefix: public_prefix.into(),
        }
    }

    fn meta_path(&self, mode: FrameMode) -> PathBuf {
        self.meta_dir.join(format!("{mode}.json"))
    }

    pub fn overlay_path(&self, mode: FrameMode) -> PathBuf {
        self.frame_dir.join(format!("{mode}.png"))
    }

    async fn read_stored(&self, mode: FrameMode) -> Result<StoredFrameConfig, FrameStoreError> {
        let path = self.meta_path(mode);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StoredFrameConfig::default());
            }
            Err(err) => return Err(err.into()),
        };
        let mut stored: StoredFrameConfig =
            serde_json::from_slice(&raw).map_err(|source| FrameStoreError::Malformed {
                path: path.display().to_string(),
                source,
            })?;
        stored.zones = sanitize_zones(&stored.zones);
        Ok(stored)
    }

    async fn persist(&self, mode: FrameMode, stored: &StoredFrameConfig) -> Result<(), FrameStoreError> {
        fs::create_dir_all(&self.meta_dir).await?;
        let json = serde_json::to_vec_pretty(stored).map_err(|source| FrameStoreError::Malformed {
            path: self.meta_path(mode).display().to_string(),
            source,
        })?;
        write_atomically(&self.meta_path(mode), &json).await
    }

    /// Stored configuration, or an empty one (no overlay, no zones).
    pub async fn get_frame_config(&self, mode: FrameMode) -> Result<FrameConfig, FrameStoreError> {
        Ok(self.read_stored(mode).await?.into_config(mode))
    }

    pub async fn save_frame_config(
        &self,
        mode: FrameMode,
        update: FrameUpdate,
    ) -> Result<FrameConfig, FrameStoreError> {
        if update.zones.is_none() && update.image.is_none() {
            return Err(FrameStoreError::NothingToSave);
        }

        let mut stored = self.read_stored(mode).await?;
        if let Some(zones) = update.zones.as_deref() {
            stored.zones = sanitize_zones(zones);
        }

        if let Some(image) = update.image {
            let (png, width, height) = tokio::task::spawn_blocking(move || reencode_png(&image))
                .await
                .map_err(|err| FrameStoreError::InvalidImage(err.to_string()))??;
            fs::create_dir_all(&self.frame_dir).await?;
            write_atomically(&self.overlay_path(mode), &png).await?;
            stored.overlay_ref = Some(format!(
                "{}/{mode}.png",
                self.public_prefix.trim_end_matches('/')
            ));
            stored.canvas_width = Some(width);
            stored.canvas_height = Some(height);
        }

        stored.updated_at = Some(Utc::now());
        self.persist(mode, &stored).await?;
        info!(
            %mode,
            zones = stored.zones.len(),
            overlay = stored.overlay_ref.is_some(),
            "frame config saved"
        );
        Ok(stored.into_config(mode))
    }
}

fn reencode_png(data: &[u8]) -> Result<(Vec<u8>, u32, u32), FrameStoreError> {
    let image =
        image::load_from_memory(data).map_err(|err| FrameStoreError::InvalidImage(err.to_string()))?;
    let mut png = Cursor::new(Vec::new());
    image
        .write_to(&mut png, ImageFormat::Png)
        .map_err(|err| FrameStoreError::InvalidImage(err.to_string()))?;
    Ok((png.into_inner(), image.width(), image.height()))
}

/// Each writer stages into its own sibling file, so overlapping saves never
/// rename each other's temp file away. The last rename wins.
async fn write_atomically(path: &Path, data: &[u8]) -> Result<(), FrameStoreError> {
    let tmp = staging_path(path);
    let written = match fs::write(&tmp, data).await {
        Ok(()) => fs::rename(&tmp, path).await,
        Err(err) => Err(err),
    };
    if written.is_err() {
        let _ = fs::remove_file(&tmp).await;
    }
    Ok(written?)
}

fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{:016x}.tmp", rand::random::<u64>()))
}
