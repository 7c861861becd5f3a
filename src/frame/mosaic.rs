use std::path::{Path, PathBuf};

use image::{RgbImage, imageops};

use crate::core::errors::CaptureError;

use super::render::{BLACK, contain_fit, open_image, write_jpeg};

pub const MOSAIC_TILES: usize = 4;
const COLUMNS: u32 = 2;

/// Lays exactly four frames out on a 2x2 grid, row-major. Every cell is as
/// large as the widest and tallest input, and smaller inputs are letterboxed.
pub async fn create_mosaic(frames: &[PathBuf], output: &Path) -> Result<(), CaptureError> {
    if frames.len() != MOSAIC_TILES {
        return Err(CaptureError::ConfigurationInvalid(format!(
            "mosaic needs exactly {MOSAIC_TILES} frames, got {}",
            frames.len()
        )));
    }
    let frames = frames.to_vec();
    let output = output.to_path_buf();
    tokio::task::spawn_blocking(move || render_mosaic(&frames, &output)).await?
}

fn render_mosaic(frames: &[PathBuf], output: &Path) -> Result<(), CaptureError> {
    let images = frames
        .iter()
        .map(|path| open_image(path))
        .collect::<Result<Vec<_>, _>>()?;

    let cell_width = images.iter().map(|img| img.width()).max().unwrap_or(0);
    let cell_height = images.iter().map(|img| img.height()).max().unwrap_or(0);
    if cell_width == 0 || cell_height == 0 {
        return Err(CaptureError::Composition("mosaic frames have no pixels".to_string()));
    }

    let rows = (MOSAIC_TILES as u32).div_ceil(COLUMNS);
    let mut canvas = RgbImage::from_pixel(cell_width * COLUMNS, cell_height * rows, BLACK);
    for (i, image) in images.iter().enumerate() {
        let i = i as u32;
        let cell = contain_fit(image, cell_width, cell_height, BLACK);
        let x = (i % COLUMNS) * cell_width;
        let y = (i / COLUMNS) * cell_height;
        imageops::replace(&mut canvas, &cell, i64::from(x), i64::from(y));
    }

    write_jpeg(&canvas, output)
}
