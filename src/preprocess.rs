//! Turns an uploaded image into the fixed-shape tensor the classifier expects

use crate::config::IMAGE_SIZE;
use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::DynamicImage;

/// Resampling filter used for every resize, so results are reproducible
pub const RESIZE_FILTER: FilterType = FilterType::CatmullRom;

/// Shape of a preprocessed image: batch, height, width, channels
pub const IMAGE_SHAPE: [usize; 4] = [1, IMAGE_SIZE as usize, IMAGE_SIZE as usize, 3];

/// A single RGB image as an NHWC float tensor with values in `[0, 1]`
#[derive(Clone, PartialEq)]
pub struct ImageTensor {
    data: Vec<f32>,
}

impl ImageTensor {
    pub fn shape(&self) -> [usize; 4] {
        IMAGE_SHAPE
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

impl std::fmt::Debug for ImageTensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ImageTensor {{ shape: {:?}, data: <f32> }}", IMAGE_SHAPE)
    }
}

/// Decode raw upload bytes, guessing the format from the content itself
pub fn decode(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes).context("cannot identify image file")
}

/// Convert to RGB, squash to 224x224 and scale pixels from `[0, 255]` to `[0, 1]`
pub fn preprocess(image: &DynamicImage) -> ImageTensor {
    let rgb = image.to_rgb8();
    let resized = image::imageops::resize(&rgb, IMAGE_SIZE, IMAGE_SIZE, RESIZE_FILTER);

    let data = resized
        .into_raw()
        .into_iter()
        .map(|p| p as f32 / 255.0)
        .collect();

    ImageTensor { data }
}
