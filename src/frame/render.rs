//! Blocking image helpers. Callers run these on the blocking pool.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use image::{
    DynamicImage, ImageReader, Rgb, RgbImage, RgbaImage, codecs::jpeg::JpegEncoder,
    imageops::{self, FilterType},
};

use crate::core::errors::CaptureError;

pub const JPEG_QUALITY: u8 = 90;
pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
pub const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

/// Decodes by content, so camera files with odd extensions still load.
pub fn open_image(path: &Path) -> Result<DynamicImage, CaptureError> {
    let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    Ok(image)
}

pub fn write_jpeg(image: &RgbImage, path: &Path) -> Result<(), CaptureError> {
    let mut writer = BufWriter::new(File::create(path)?);
    JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY).encode_image(image)?;
    writer.flush()?;
    Ok(())
}

/// Scales to cover `width` x `height` and crops the overflow around the
/// center.
pub fn cover_fit(image: &DynamicImage, width: u32, height: u32) -> RgbaImage {
    image
        .resize_to_fill(width, height, FilterType::Lanczos3)
        .to_rgba8()
}

/// Scales to fit inside `width` x `height` and letterboxes the rest with
/// `background`.
pub fn contain_fit(image: &DynamicImage, width: u32, height: u32, background: Rgb<u8>) -> RgbImage {
    let scaled = image.resize(width, height, FilterType::Lanczos3).to_rgb8();
    let mut cell = RgbImage::from_pixel(width, height, background);
    let x = (width - scaled.width()) / 2;
    let y = (height - scaled.height()) / 2;
    imageops::replace(&mut cell, &scaled, i64::from(x), i64::from(y));
    cell
}

/// Blends a transparent canvas onto an opaque background.
pub fn flatten(canvas: &RgbaImage, background: Rgb<u8>) -> RgbImage {
    RgbImage::from_fn(canvas.width(), canvas.height(), |x, y| {
        let [r, g, b, a] = canvas.get_pixel(x, y).0;
        let alpha = u16::from(a);
        let blend = |fg: u8, bg: u8| {
            ((u16::from(fg) * alpha + u16::from(bg) * (255 - alpha) + 127) / 255) as u8
        };
        Rgb([
            blend(r, background[0]),
            blend(g, background[1]),
            blend(b, background[2]),
        ])
    })
}
