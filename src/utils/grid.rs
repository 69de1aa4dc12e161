//! Sample grid rendering
//!
//! Tiles a batch of generated images row-major into one picture and encodes
//! it as PNG.

use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use tch::{Kind, Tensor};

use crate::error::{Error, Result};

/// Grid layout in tiles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    pub rows: usize,
    pub cols: usize,
}

impl GridLayout {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    pub fn tiles(&self) -> usize {
        self.rows * self.cols
    }
}

/// Map `[-1, 1]` floats to bytes with `(x + 1) * 127.5`, truncating
pub fn to_pixels(images: &Tensor) -> Tensor {
    ((images.to_kind(Kind::Float) + 1.0) * 127.5)
        .clamp(0.0, 255.0)
        .to_kind(Kind::Uint8)
}

/// Arrange the first `rows * cols` NHWC images into one `[rows*H, cols*W, C]` image
///
/// Tile `(r, c)` holds image `r * cols + c`.
pub fn tile(images: &Tensor, layout: GridLayout) -> Result<Tensor> {
    let size = images.size();
    if size.len() != 4 {
        return Err(Error::config(format!(
            "sample grid expects [batch, height, width, channels], got {:?}",
            size
        )));
    }
    let (batch, h, w, c) = (size[0], size[1], size[2], size[3]);
    let (rows, cols) = (layout.rows as i64, layout.cols as i64);
    if rows * cols == 0 || batch < rows * cols {
        return Err(Error::config(format!(
            "a {}x{} grid needs {} images, batch has {}",
            rows,
            cols,
            rows * cols,
            batch
        )));
    }

    Ok(images
        .narrow(0, 0, rows * cols)
        .reshape([rows, cols, h, w, c])
        .permute([0, 2, 1, 3, 4])
        .reshape([rows * h, cols * w, c]))
}

/// Encode an `[H, W, C]` byte tensor as PNG (`C` is 1 or 3)
pub fn encode_png(grid: &Tensor) -> Result<Vec<u8>> {
    let size = grid.size();
    let (height, width, channels) = match size.as_slice() {
        [h, w, c] => (*h as u32, *w as u32, *c),
        _ => return Err(Error::config(format!("cannot encode tensor of shape {:?}", size))),
    };
    let raw: Vec<u8> = Vec::try_from(&grid.to_kind(Kind::Uint8).contiguous().flatten(0, -1))?;

    let picture = match channels {
        1 => GrayImage::from_raw(width, height, raw).map(DynamicImage::ImageLuma8),
        3 => RgbImage::from_raw(width, height, raw).map(DynamicImage::ImageRgb8),
        other => {
            return Err(Error::config(format!(
                "sample grid supports 1 or 3 channels, got {}",
                other
            )))
        }
    }
    .ok_or_else(|| Error::config("pixel buffer does not match the grid size"))?;

    let mut bytes = Cursor::new(Vec::new());
    picture.write_to(&mut bytes, ImageFormat::Png)?;
    Ok(bytes.into_inner())
}

/// Convert, tile and encode a batch of generator outputs
pub fn render_grid(images: &Tensor, layout: GridLayout) -> Result<Vec<u8>> {
    let pixels = to_pixels(&images.to_device(tch::Device::Cpu));
    encode_png(&tile(&pixels, layout)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Device;

    #[test]
    fn test_gray_grid() {
        let images = Tensor::zeros([4, 2, 2, 3], (Kind::Float, Device::Cpu));
        let png = render_grid(&images, GridLayout::new(2, 2)).unwrap();

        let decoded = image::load_from_memory(&png).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (4, 4));
        assert!(decoded.pixels().all(|p| p.0 == [127, 127, 127]));
    }

    #[test]
    fn test_pixel_mapping_extremes() {
        let images = Tensor::from_slice(&[-1.0f32, 0.0, 1.0]);
        let pixels: Vec<u8> = Vec::try_from(&to_pixels(&images)).unwrap();
        assert_eq!(pixels, vec![0, 127, 255]);
    }

    #[test]
    fn test_tiles_are_row_major() {
        // image i is filled with the value i
        let images = Tensor::arange(6, (Kind::Float, Device::Cpu))
            .view([6, 1, 1, 1])
            .expand([6, 2, 3, 1], false)
            .contiguous();
        let grid = tile(&images, GridLayout::new(2, 3)).unwrap();
        assert_eq!(grid.size(), vec![4, 9, 1]);

        for r in 0..2i64 {
            for c in 0..3i64 {
                let value = grid.double_value(&[r * 2, c * 3, 0]);
                assert_eq!(value, (r * 3 + c) as f64);
            }
        }
    }

    #[test]
    fn test_extra_images_are_ignored() {
        let images = Tensor::zeros([10, 4, 4, 1], (Kind::Float, Device::Cpu));
        let png = render_grid(&images, GridLayout::new(3, 3)).unwrap();

        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!(decoded.width(), 12);
        assert_eq!(decoded.height(), 12);
    }

    #[test]
    fn test_too_few_images() {
        let images = Tensor::zeros([3, 2, 2, 3], (Kind::Float, Device::Cpu));
        assert!(render_grid(&images, GridLayout::new(2, 2)).is_err());
    }

    #[test]
    fn test_unsupported_channels() {
        let images = Tensor::zeros([1, 2, 2, 4], (Kind::Float, Device::Cpu));
        assert!(render_grid(&images, GridLayout::new(1, 1)).is_err());
    }
}
