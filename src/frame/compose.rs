use std::path::{Path, PathBuf};

use image::{Rgb, RgbaImage, imageops};
use tracing::{debug, warn};

use crate::core::{errors::CaptureError, state::FrameMode};

use super::{
    render::{WHITE, cover_fit, flatten, open_image, write_jpeg},
    store::FrameStore,
    zone::FrameZone,
};

#[derive(Debug, Clone, Copy)]
pub struct ComposeOptions {
    pub background: Rgb<u8>,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        Self { background: WHITE }
    }
}

/// Places `sources[i]` into zone `i` of the `mode` frame and writes a JPEG to
/// `output`.
///
/// Returns `Ok(false)` without touching `output` when no overlay is configured
/// or when the zone count differs from the number of sources.
pub async fn compose_frame(
    store: &FrameStore,
    mode: FrameMode,
    sources: &[PathBuf],
    output: &Path,
    options: ComposeOptions,
) -> Result<bool, CaptureError> {
    let config = store
        .get_frame_config(mode)
        .await
        .map_err(|err| CaptureError::ConfigurationInvalid(err.to_string()))?;

    if !config.has_overlay() {
        debug!(%mode, "no overlay configured");
        return Ok(false);
    }
    if config.zones.len() != sources.len() {
        debug!(
            %mode,
            zones = config.zones.len(),
            sources = sources.len(),
            "zone count does not match sources"
        );
        return Ok(false);
    }
    let overlay_path = store.overlay_path(mode);
    if !tokio::fs::try_exists(&overlay_path).await? {
        warn!(%mode, path = %overlay_path.display(), "overlay recorded but file is missing");
        return Ok(false);
    }

    let zones = config.zones;
    let sources = sources.to_vec();
    let output = output.to_path_buf();
    tokio::task::spawn_blocking(move || {
        render_framed(&overlay_path, &zones, &sources, &output, options.background)
    })
    .await??;
    Ok(true)
}

fn render_framed(
    overlay_path: &Path,
    zones: &[FrameZone],
    sources: &[PathBuf],
    output: &Path,
    background: Rgb<u8>,
) -> Result<(), CaptureError> {
    let overlay = open_image(overlay_path)?.to_rgba8();
    let (width, height) = overlay.dimensions();
    let mut canvas = RgbaImage::new(width, height);

    for (zone, source) in zones.iter().zip(sources) {
        let rect = zone.to_pixels(width, height);
        let tile = cover_fit(&open_image(source)?, rect.width, rect.height);
        imageops::overlay(&mut canvas, &tile, i64::from(rect.x), i64::from(rect.y));
    }
    imageops::overlay(&mut canvas, &overlay, 0, 0);

    write_jpeg(&flatten(&canvas, background), output)
}
