//! Per-image preprocessing
//!
//! decode -> optional center crop to the source size -> resize to the
//! training size -> `[-1, 1]` floats in HWC order.

use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::Array3;
use std::path::Path;

use crate::error::Result;
use crate::utils::RunConfig;

/// Preprocessing parameters for one corpus
#[derive(Debug, Clone, PartialEq)]
pub struct Preprocess {
    pub source_height: u32,
    pub source_width: u32,
    pub channels: usize,
    pub target_height: u32,
    pub target_width: u32,
    pub crop: bool,
}

impl Preprocess {
    pub fn from_config(config: &RunConfig) -> Self {
        let data = &config.data;
        Self {
            source_height: data.image_height_org as u32,
            source_width: data.image_width_org as u32,
            channels: data.image_depth_org,
            target_height: data.image_height as u32,
            target_width: data.image_width as u32,
            crop: data.is_crop,
        }
    }

    /// Decode and preprocess one file
    pub fn load(&self, path: &Path) -> Result<Array3<f32>> {
        Ok(self.apply(image::open(path)?))
    }

    /// Preprocess an already decoded image into `[height, width, channels]`
    pub fn apply(&self, img: DynamicImage) -> Array3<f32> {
        let img = if self.crop {
            center_crop(&img, self.source_width, self.source_height)
        } else {
            img
        };

        let img = if img.dimensions() == (self.target_width, self.target_height) {
            img
        } else {
            img.resize_exact(self.target_width, self.target_height, FilterType::Triangle)
        };

        let (w, h) = (self.target_width as usize, self.target_height as usize);
        let mut out = Array3::<f32>::zeros((h, w, self.channels));
        if self.channels == 1 {
            for (x, y, p) in img.to_luma8().enumerate_pixels() {
                out[[y as usize, x as usize, 0]] = normalize_pixel(p[0]);
            }
        } else {
            for (x, y, p) in img.to_rgb8().enumerate_pixels() {
                for k in 0..3 {
                    out[[y as usize, x as usize, k]] = normalize_pixel(p[k]);
                }
            }
        }
        out
    }
}

/// Central `width x height` region, clamped to the image bounds
pub fn center_crop(img: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    let (iw, ih) = img.dimensions();
    let (cw, ch) = (width.min(iw), height.min(ih));
    img.crop_imm((iw - cw) / 2, (ih - ch) / 2, cw, ch)
}

/// `v / 127.5 - 1`
pub fn normalize_pixel(v: u8) -> f32 {
    v as f32 / 127.5 - 1.0
}
