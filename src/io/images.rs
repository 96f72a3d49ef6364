//! Image files: 16-bit depth PNGs, 8-bit masks and RGB frames.
use image::{GrayImage, ImageBuffer, Luma, RgbImage};

use std::path::Path;

use crate::raster::Raster;
use crate::Error;

fn size_error(width: usize, height: usize) -> Error {
    Error::DegenerateInput(format!("cannot encode a {}x{} image", width, height))
}

/// Save a depth raster as a 16-bit grayscale image. The format follows the file extension.
pub fn write_depth(path: &Path, depth: &Raster<u16>) -> Result<(), Error> {
    let buffer: ImageBuffer<Luma<u16>, Vec<u16>> = ImageBuffer::from_raw(
        depth.width() as u32,
        depth.height() as u32,
        depth.data().to_vec(),
    )
    .ok_or_else(|| size_error(depth.width(), depth.height()))?;
    buffer.save(path)?;
    Ok(())
}

pub fn read_depth(path: &Path) -> Result<Raster<u16>, Error> {
    let image = image::open(path)?.into_luma16();
    let (width, height) = image.dimensions();
    Raster::from_vec(width as usize, height as usize, image.into_raw())
}

pub fn write_mask(path: &Path, mask: &Raster<u8>) -> Result<(), Error> {
    let buffer = GrayImage::from_raw(mask.width() as u32, mask.height() as u32, mask.data().to_vec())
        .ok_or_else(|| size_error(mask.width(), mask.height()))?;
    buffer.save(path)?;
    Ok(())
}

pub fn read_rgb(path: &Path) -> Result<Raster<[u8; 3]>, Error> {
    let image = image::open(path)?.into_rgb8();
    let (width, height) = image.dimensions();
    let pixels = image
        .into_raw()
        .chunks(3)
        .map(|p| [p[0], p[1], p[2]])
        .collect();
    Raster::from_vec(width as usize, height as usize, pixels)
}

pub fn write_rgb(path: &Path, rgb: &Raster<[u8; 3]>) -> Result<(), Error> {
    let data = rgb.data().iter().flat_map(|p| p.iter().cloned()).collect();
    let buffer = RgbImage::from_raw(rgb.width() as u32, rgb.height() as u32, data)
        .ok_or_else(|| size_error(rgb.width(), rgb.height()))?;
    buffer.save(path)?;
    Ok(())
}
