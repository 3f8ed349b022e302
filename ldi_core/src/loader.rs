/*!
Image loading.

PNG images are decoded with the `image` crate and quantized to black and
white; their resolution comes from the pHYs chunk, read with `png`. Binary
PBM files are loaded as they are.
*/

use crate::bitmap::PackedBitImage;
use crate::error::Result;
use image::GrayImage;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::debug;

/// Pixels brighter than this are exposed
pub const DEFAULT_THRESHOLD: u8 = 127;

/// A decoded image and the resolution stored with it, if any
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub image: PackedBitImage,
    pub dpi: Option<f64>,
}

/// Quantize a grayscale image: a pixel is set if it is brighter than
/// `threshold`, or not brighter with `invert`.
pub fn from_gray(gray: &GrayImage, threshold: u8, invert: bool) -> PackedBitImage {
    let mut image = PackedBitImage::new(gray.width() as usize, gray.height() as usize);
    for (x, y, pixel) in gray.enumerate_pixels() {
        if (pixel.0[0] > threshold) != invert {
            image.set(x as usize, y as usize, true);
        }
    }
    image
}

/// Resolution stored in the pHYs chunk of a PNG file.
///
/// Without a unit the value is taken as dots per inch already.
pub fn read_png_dpi(path: &Path) -> Result<Option<f64>> {
    let decoder = png::Decoder::new(BufReader::new(File::open(path)?));
    let reader = decoder.read_info()?;
    let dpi = reader.info().pixel_dims.and_then(|dims| {
        let dpi = match dims.unit {
            png::Unit::Meter => f64::from(dims.xppu) * 0.0254,
            png::Unit::Unspecified => f64::from(dims.xppu),
        };
        (dpi > 0.0).then_some(dpi)
    });
    Ok(dpi)
}

/// Load a PNG, any color type, as black and white image.
pub fn load_png(path: &Path, threshold: u8, invert: bool) -> Result<LoadedImage> {
    let gray = image::open(path)?.to_luma8();
    let dpi = read_png_dpi(path)?;
    debug!(
        "Loaded {}: {}x{} pixels, {:?} dpi",
        path.display(),
        gray.width(),
        gray.height(),
        dpi
    );
    Ok(LoadedImage {
        image: from_gray(&gray, threshold, invert),
        dpi,
    })
}

/// Load a PNG or, by extension, a binary PBM file. PBM carries no
/// resolution.
pub fn load_image(path: &Path, threshold: u8, invert: bool) -> Result<LoadedImage> {
    let is_pbm = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pbm"));
    if is_pbm {
        let image = PackedBitImage::read_pbm(BufReader::new(File::open(path)?))?;
        return Ok(LoadedImage { image, dpi: None });
    }
    load_png(path, threshold, invert)
}
