//! Turns an arbitrary canvas drawing into the 28x28 input the network was
//! trained on: ink is cropped to its bounding box, rescaled into a 20x20 box
//! and centered on a black canvas, the same way MNIST digits are framed.

use crate::config::{CANVAS_SIZE, DIGIT_SIZE, INK_THRESHOLD};
use crate::error::{PredictError, Result};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma};
use std::fmt;

/// Inclusive pixel bounds of the ink on a raster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub row_min: u32,
    pub col_min: u32,
    pub row_max: u32,
    pub col_max: u32,
}

impl BoundingBox {
    /// Bounds of every pixel strictly brighter than `threshold`, or `None`
    /// if there are none
    pub fn of(image: &GrayImage, threshold: u8) -> Option<BoundingBox> {
        image
            .enumerate_pixels()
            .filter(|(_, _, p)| p.0[0] > threshold)
            .fold(None, |acc: Option<BoundingBox>, (x, y, _)| {
                Some(match acc {
                    None => BoundingBox {
                        row_min: y,
                        col_min: x,
                        row_max: y,
                        col_max: x,
                    },
                    Some(b) => BoundingBox {
                        row_min: b.row_min.min(y),
                        col_min: b.col_min.min(x),
                        row_max: b.row_max.max(y),
                        col_max: b.col_max.max(x),
                    },
                })
            })
    }

    pub fn width(&self) -> u32 {
        self.col_max - self.col_min + 1
    }

    pub fn height(&self) -> u32 {
        self.row_max - self.row_min + 1
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rows {}..={}, cols {}..={}",
            self.row_min, self.row_max, self.col_min, self.col_max
        )
    }
}

/// A single normalized digit, laid out as `[batch, height, width, channel]`
/// = `[1, 28, 28, 1]` with values in `[0, 1]`
#[derive(Clone, PartialEq)]
pub struct DigitTensor {
    data: Vec<f32>,
}

impl DigitTensor {
    pub const SHAPE: [usize; 4] = [1, CANVAS_SIZE as usize, CANVAS_SIZE as usize, 1];

    /// Scale a 28x28 raster to `[0, 1]`. Only built from the output of
    /// `recenter`, which always has that size
    pub(crate) fn from_image(image: &GrayImage) -> DigitTensor {
        assert_eq!(image.dimensions(), (CANVAS_SIZE, CANVAS_SIZE));
        DigitTensor {
            data: image.pixels().map(|p| p.0[0] as f32 / 255.0).collect(),
        }
    }

    pub fn shape(&self) -> [usize; 4] {
        Self::SHAPE
    }

    /// Row-major pixel values
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * CANVAS_SIZE as usize + col]
    }
}

impl fmt::Debug for DigitTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DigitTensor {{ shape: {:?}, data: <data> }}", self.shape())
    }
}

/// ITU-R 601-2 luma, the conversion the training images went through.
/// Alpha is dropped, not blended
pub fn to_grayscale(image: &DynamicImage) -> GrayImage {
    if let DynamicImage::ImageLuma8(gray) = image {
        return gray.clone();
    }
    let rgb = image.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let l = (r as u32 * 19595 + g as u32 * 38470 + b as u32 * 7471 + 0x8000) >> 16;
        Luma([l as u8])
    })
}

/// Crop a 28x28 raster to its ink, rescale that to 20x20 and paste it in the
/// middle of a fresh black 28x28 canvas
pub fn recenter(image: &GrayImage) -> Result<GrayImage> {
    let bbox = BoundingBox::of(image, INK_THRESHOLD).ok_or(PredictError::BlankCanvas)?;
    tracing::debug!("ink bounding box: {bbox}");

    let cropped =
        imageops::crop_imm(image, bbox.col_min, bbox.row_min, bbox.width(), bbox.height())
            .to_image();
    let digit = imageops::resize(&cropped, DIGIT_SIZE, DIGIT_SIZE, FilterType::Lanczos3);

    let mut canvas = GrayImage::new(CANVAS_SIZE, CANVAS_SIZE);
    let offset = ((CANVAS_SIZE - DIGIT_SIZE) / 2) as i64;
    imageops::replace(&mut canvas, &digit, offset, offset);
    Ok(canvas)
}

/// Run the whole pipeline on a decoded image of any size. The first resize
/// stretches: aspect ratio is not preserved
pub fn normalize(image: &DynamicImage) -> Result<DigitTensor> {
    let gray = to_grayscale(image);
    let coarse = imageops::resize(&gray, CANVAS_SIZE, CANVAS_SIZE, FilterType::CatmullRom);
    let centered = recenter(&coarse)?;
    Ok(DigitTensor::from_image(&centered))
}
