//! Inverse lens distortion mapping.
//!
//! The lens model maps a raw (distorted) pixel `s` to its ideal position `s + d(s)`, where `d` is
//! a radial, tangential and affine displacement measured from the distortion center. Undistorting
//! an image needs the opposite direction: for every ideal output pixel, the raw pixel it came
//! from. `d` has no closed form inverse, so each output pixel is solved by fixed point iteration
//! `s <- u - d(s)`. The resulting [`UndistortMap`] only depends on the calibration and is built
//! once, then reused for every frame.
use indicatif::ParallelProgressIterator;
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::calibration::{Calibration, Crop, CropOrder, DistortionCoefficients, PinholeCamera};
use crate::pipeline::progress_bar;
use crate::raster::{sample_bilinear, Raster, Sample};
use crate::Error;

/// Unit of the offsets the distortion polynomial is evaluated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetUnits {
    /// Raw pixel offsets from the distortion center.
    Pixels,
    /// Offsets divided by the focal lengths.
    Focal,
}

/// Options controlling how the undistortion map is solved and laid out.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UndistortOptions {
    /// Stop once both displacement components change by less than this many pixels.
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Shift the output so the principal point lands on the image center.
    pub recenter: bool,
    /// The distortion model measures y upward from the bottom row.
    pub y_up: bool,
    pub offset_units: OffsetUnits,
}

impl Default for UndistortOptions {
    fn default() -> Self {
        UndistortOptions {
            tolerance: 0.05,
            max_iterations: 100,
            recenter: false,
            y_up: false,
            offset_units: OffsetUnits::Pixels,
        }
    }
}

impl UndistortOptions {
    pub fn validate(&self) -> Result<(), Error> {
        if !(self.tolerance > 0.0) || !self.tolerance.is_finite() {
            return Err(Error::Config(format!(
                "undistort tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if self.max_iterations == 0 {
            return Err(Error::Config(
                "undistort max_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of solving a single output pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PixelSolution {
    /// Raw image position of the output pixel.
    Mapped(f64, f64),
    OutOfBounds,
    NotConverged,
}

/// Forward distortion model of one camera, evaluated in raw image pixels.
#[derive(Debug, Clone)]
pub struct DistortionModel {
    camera: PinholeCamera,
    coefficients: DistortionCoefficients,
    y_up: bool,
    recenter: bool,
    offset_units: OffsetUnits,
}

impl DistortionModel {
    /// `camera` describes the raw images the model applies to.
    pub fn new(
        camera: PinholeCamera,
        coefficients: DistortionCoefficients,
        options: &UndistortOptions,
    ) -> Self {
        DistortionModel {
            camera,
            coefficients,
            y_up: options.y_up,
            recenter: options.recenter,
            offset_units: options.offset_units,
        }
    }

    pub fn camera(&self) -> &PinholeCamera {
        &self.camera
    }

    /// Flip between image rows and the model's vertical axis. Its own inverse.
    fn flip(&self, x: f64, y: f64) -> (f64, f64) {
        if self.y_up {
            (x, (self.camera.height - 1) as f64 - y)
        } else {
            (x, y)
        }
    }

    fn center(&self) -> (f64, f64) {
        self.flip(self.camera.cx, self.camera.cy)
    }

    /// Offset between output pixel coordinates and model coordinates.
    fn shift(&self) -> (f64, f64) {
        if self.recenter {
            let (x0, y0) = self.center();
            (
                x0 - 0.5 * (self.camera.width - 1) as f64,
                y0 - 0.5 * (self.camera.height - 1) as f64,
            )
        } else {
            (0.0, 0.0)
        }
    }

    /// Displacement `d(s)` at model position `(x, y)`.
    pub fn displacement(&self, x: f64, y: f64) -> (f64, f64) {
        let c = &self.coefficients;
        let (x0, y0) = self.center();
        let (sx, sy) = match self.offset_units {
            OffsetUnits::Pixels => (1.0, 1.0),
            OffsetUnits::Focal => (self.camera.fx, self.camera.fy),
        };
        let ox = (x - x0) / sx;
        let oy = (y - y0) / sy;
        let r2 = ox * ox + oy * oy;
        let radial = r2 * (c.k1 + r2 * (c.k2 + r2 * (c.k3 + r2 * c.k4)));
        let dx = ox * radial
            + c.p1 * (r2 + 2.0 * ox * ox)
            + 2.0 * c.p2 * ox * oy
            + c.alpha * ox
            + c.beta * oy;
        let dy = oy * radial + c.p2 * (r2 + 2.0 * oy * oy) + 2.0 * c.p1 * ox * oy;
        (dx * sx, dy * sy)
    }

    /// Output image position of raw pixel `(u, v)`.
    pub fn undistort_point(&self, u: f64, v: f64) -> (f64, f64) {
        let (x, y) = self.flip(u, v);
        let (dx, dy) = self.displacement(x, y);
        let (sx, sy) = self.shift();
        self.flip(x + dx - sx, y + dy - sy)
    }

    /// Raw image position of output pixel `(u, v)`.
    pub fn solve_pixel(&self, u: f64, v: f64, tolerance: f64, max_iterations: usize) -> PixelSolution {
        let (x, y) = self.flip(u, v);
        let (sx, sy) = self.shift();
        let (ix, iy) = (x + sx, y + sy);

        let (mut x, mut y) = (ix, iy);
        let (mut last_dx, mut last_dy) = (0.0, 0.0);
        let mut converged = false;
        for _ in 0..max_iterations {
            let (dx, dy) = self.displacement(x, y);
            x = ix - dx;
            y = iy - dy;
            if (dx - last_dx).abs() < tolerance && (dy - last_dy).abs() < tolerance {
                converged = true;
                break;
            }
            last_dx = dx;
            last_dy = dy;
        }
        if !converged || !x.is_finite() || !y.is_finite() {
            return PixelSolution::NotConverged;
        }

        let (su, sv) = self.flip(x, y);
        if su < 0.0
            || sv < 0.0
            || su >= self.camera.width as f64
            || sv >= self.camera.height as f64
        {
            PixelSolution::OutOfBounds
        } else {
            PixelSolution::Mapped(su, sv)
        }
    }

    /// Camera model of the undistorted images.
    pub fn output_camera(&self) -> PinholeCamera {
        if self.recenter {
            PinholeCamera {
                cx: 0.5 * (self.camera.width - 1) as f64,
                cy: 0.5 * (self.camera.height - 1) as f64,
                ..self.camera
            }
        } else {
            self.camera
        }
    }
}

/// Per-map counts of how the output pixels were resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MapStats {
    pub mapped: usize,
    pub out_of_bounds: usize,
    pub not_converged: usize,
}

/// Lookup table from output pixel to fractional raw pixel. `None` marks unmapped pixels.
#[derive(Debug, Clone)]
pub struct UndistortMap {
    sources: Raster<Option<[f32; 2]>>,
    stats: MapStats,
}

impl UndistortMap {
    /// Solve every output pixel of `model`. Rows are solved in parallel.
    pub fn solve(model: &DistortionModel, options: &UndistortOptions, verbose: bool) -> Self {
        let (width, height) = (model.camera.width, model.camera.height);
        let rows = (0..height)
            .into_par_iter()
            .progress_with(progress_bar(height as u64, "Solving undistort map", verbose))
            .map(|v| {
                (0..width)
                    .map(|u| {
                        model.solve_pixel(
                            u as f64,
                            v as f64,
                            options.tolerance,
                            options.max_iterations,
                        )
                    })
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();

        let mut stats = MapStats::default();
        for solution in rows.iter().flatten() {
            match solution {
                PixelSolution::Mapped(..) => stats.mapped += 1,
                PixelSolution::OutOfBounds => stats.out_of_bounds += 1,
                PixelSolution::NotConverged => stats.not_converged += 1,
            }
        }
        info!(
            "Undistort map {}x{}: {} mapped, {} out of bounds, {} not converged",
            width, height, stats.mapped, stats.out_of_bounds, stats.not_converged
        );
        if stats.not_converged > 0 {
            warn!(
                "{} pixels did not converge within {} iterations",
                stats.not_converged, options.max_iterations
            );
        }

        let sources = Raster::from_fn(width, height, |x, y| match rows[y][x] {
            PixelSolution::Mapped(sx, sy) => Some([sx as f32, sy as f32]),
            PixelSolution::OutOfBounds | PixelSolution::NotConverged => None,
        });
        UndistortMap { sources, stats }
    }

    pub fn width(&self) -> usize {
        self.sources.width()
    }

    pub fn height(&self) -> usize {
        self.sources.height()
    }

    pub fn stats(&self) -> &MapStats {
        &self.stats
    }

    /// Raw image position feeding output pixel `(x, y)`.
    pub fn source(&self, x: usize, y: usize) -> Option<[f32; 2]> {
        self.sources.get(x, y)
    }

    /// Resample a raw image through the map. Unmapped pixels get `T::default()`.
    pub fn remap<T: Sample>(&self, image: &Raster<T>) -> Result<Raster<T>, Error> {
        if image.dimensions() != self.sources.dimensions() {
            return Err(Error::DegenerateInput(format!(
                "image is {}x{} but the undistort map expects {}x{}",
                image.width(),
                image.height(),
                self.width(),
                self.height()
            )));
        }
        let data = self
            .sources
            .data()
            .par_iter()
            .map(|source| match source {
                Some([x, y]) => sample_bilinear(image, *x, *y),
                None => T::default(),
            })
            .collect::<Vec<_>>();
        Raster::from_vec(self.width(), self.height(), data)
    }
}

/// Distortion model for raw images of `calibration`, taking the crop order into account.
pub fn distortion_model(
    calibration: &Calibration,
    options: &UndistortOptions,
    order: CropOrder,
) -> Result<DistortionModel, Error> {
    let raw = calibration.raw_camera();
    raw.validate()?;
    let camera = match order {
        CropOrder::BeforeUndistort => raw.cropped(&calibration.crop)?,
        CropOrder::AfterUndistort | CropOrder::MaskOnly => raw,
    };
    Ok(DistortionModel::new(
        camera,
        calibration.coefficients()?,
        options,
    ))
}

/// Camera model of the images an [`Undistorter`] produces. Cheap, the map is not solved.
pub fn output_camera(
    calibration: &Calibration,
    options: &UndistortOptions,
    order: CropOrder,
) -> Result<PinholeCamera, Error> {
    let camera = distortion_model(calibration, options, order)?.output_camera();
    match order {
        CropOrder::AfterUndistort => camera.cropped(&calibration.crop),
        CropOrder::BeforeUndistort | CropOrder::MaskOnly => Ok(camera),
    }
}

/// Undistortion and cropping of the raw images of one camera.
pub struct Undistorter {
    map: UndistortMap,
    crop: Crop,
    order: CropOrder,
    camera: PinholeCamera,
}

impl Undistorter {
    pub fn new(
        calibration: &Calibration,
        options: &UndistortOptions,
        order: CropOrder,
        verbose: bool,
    ) -> Result<Self, Error> {
        let model = distortion_model(calibration, options, order)?;
        let map = UndistortMap::solve(&model, options, verbose);
        Ok(Undistorter {
            map,
            crop: calibration.crop,
            order,
            camera: output_camera(calibration, options, order)?,
        })
    }

    /// Camera model of the output images.
    pub fn camera(&self) -> &PinholeCamera {
        &self.camera
    }

    pub fn map(&self) -> &UndistortMap {
        &self.map
    }

    pub fn apply<T: Sample>(&self, image: &Raster<T>) -> Result<Raster<T>, Error> {
        if self.crop.is_empty() {
            return self.map.remap(image);
        }
        match self.order {
            CropOrder::AfterUndistort => self.crop.apply(&self.map.remap(image)?),
            CropOrder::BeforeUndistort => self.map.remap(&self.crop.apply(image)?),
            CropOrder::MaskOnly => self.map.remap(image),
        }
    }

    /// Mask of the crop region, when the crop is not applied to the images themselves.
    pub fn mask(&self) -> Option<Raster<u8>> {
        if self.order == CropOrder::MaskOnly && !self.crop.is_empty() {
            Some(self.crop.mask(self.camera.width, self.camera.height))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> PinholeCamera {
        PinholeCamera::new(64, 48, 60.0, 60.0, 31.5, 23.5)
    }

    fn coefficients() -> DistortionCoefficients {
        DistortionCoefficients {
            k1: 5e-5,
            p1: 1e-4,
            alpha: 0.01,
            ..DistortionCoefficients::default()
        }
    }

    #[test]
    fn options_reject_unusable_solver_settings() {
        assert!(UndistortOptions::default().validate().is_ok());
        for tolerance in &[0.0, -0.1, std::f64::NAN] {
            let options = UndistortOptions {
                tolerance: *tolerance,
                ..UndistortOptions::default()
            };
            assert!(matches!(options.validate(), Err(Error::Config(_))));
        }
        let options = UndistortOptions {
            max_iterations: 0,
            ..UndistortOptions::default()
        };
        assert!(matches!(options.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn zero_distortion_is_identity() {
        let options = UndistortOptions::default();
        let model = DistortionModel::new(camera(), DistortionCoefficients::default(), &options);
        let map = UndistortMap::solve(&model, &options, false);
        assert_eq!(map.stats().mapped, 64 * 48);
        for y in 0..48 {
            for x in 0..64 {
                assert_eq!(map.source(x, y), Some([x as f32, y as f32]));
            }
        }
    }

    #[test]
    fn recentering_shifts_principal_point() {
        let options = UndistortOptions {
            recenter: true,
            ..UndistortOptions::default()
        };
        let off_center = PinholeCamera::new(64, 48, 60.0, 60.0, 30.0, 23.5);
        let model = DistortionModel::new(off_center, DistortionCoefficients::default(), &options);
        let out = model.output_camera();
        assert_eq!((out.cx, out.cy), (31.5, 23.5));
        assert_eq!(
            model.solve_pixel(10.0, 5.0, 0.05, 100),
            PixelSolution::Mapped(8.5, 5.0)
        );
        assert_eq!(model.solve_pixel(1.0, 5.0, 0.05, 100), PixelSolution::OutOfBounds);
    }

    fn check_reproduces_pattern(options: UndistortOptions) {
        let model = DistortionModel::new(camera(), coefficients(), &options);
        let map = UndistortMap::solve(&model, &options, false);
        // raw image whose pixels hold their own undistorted coordinates
        let raw_u = Raster::from_fn(64, 48, |x, y| model.undistort_point(x as f64, y as f64).0 as f32);
        let raw_v = Raster::from_fn(64, 48, |x, y| model.undistort_point(x as f64, y as f64).1 as f32);
        let out_u = map.remap(&raw_u).unwrap();
        let out_v = map.remap(&raw_v).unwrap();

        let mut checked = 0;
        for y in 0..48 {
            for x in 0..64 {
                match map.source(x, y) {
                    Some([sx, sy]) if sx <= 63.0 && sy <= 47.0 => {
                        assert!((out_u.get(x, y) - x as f32).abs() < 1.0);
                        assert!((out_v.get(x, y) - y as f32).abs() < 1.0);
                        checked += 1;
                    }
                    _ => {}
                }
            }
        }
        assert!(checked > 64 * 48 / 2);
    }

    #[test]
    fn undistorted_pattern_is_reproduced() {
        check_reproduces_pattern(UndistortOptions::default());
    }

    #[test]
    fn undistorted_pattern_is_reproduced_y_up_recentered() {
        check_reproduces_pattern(UndistortOptions {
            recenter: true,
            y_up: true,
            ..UndistortOptions::default()
        });
    }

    #[test]
    fn focal_units_scale_offsets() {
        let pixels = DistortionModel::new(
            camera(),
            DistortionCoefficients {
                alpha: 0.01,
                ..DistortionCoefficients::default()
            },
            &UndistortOptions::default(),
        );
        let focal = DistortionModel::new(
            camera(),
            DistortionCoefficients {
                alpha: 0.01,
                ..DistortionCoefficients::default()
            },
            &UndistortOptions {
                offset_units: OffsetUnits::Focal,
                ..UndistortOptions::default()
            },
        );
        // a purely linear term does not depend on the unit
        let (a, b) = (pixels.displacement(41.5, 23.5), focal.displacement(41.5, 23.5));
        assert!((a.0 - b.0).abs() < 1e-12 && (a.1 - b.1).abs() < 1e-12);
        let radial = DistortionCoefficients {
            k1: 0.1,
            ..DistortionCoefficients::default()
        };
        let focal = DistortionModel::new(
            camera(),
            radial,
            &UndistortOptions {
                offset_units: OffsetUnits::Focal,
                ..UndistortOptions::default()
            },
        );
        // offset of one focal length: d = f * k1 * 1^3
        let (dx, dy) = focal.displacement(31.5 + 60.0, 23.5);
        assert!((dx - 6.0).abs() < 1e-9);
        assert_eq!(dy, 0.0);
    }

    #[test]
    fn non_convergence_leaves_pixel_unmapped() {
        let model = DistortionModel::new(camera(), coefficients(), &UndistortOptions::default());
        assert_eq!(model.solve_pixel(0.0, 0.0, 0.05, 1), PixelSolution::NotConverged);
        let options = UndistortOptions {
            max_iterations: 1,
            ..UndistortOptions::default()
        };
        let map = UndistortMap::solve(&model, &options, false);
        assert!(map.stats().not_converged > 0);
        assert_eq!(map.source(0, 0), None);
    }

    #[test]
    fn pincushion_corners_fall_outside() {
        let strong = DistortionCoefficients {
            k1: -4e-5,
            ..DistortionCoefficients::default()
        };
        let model = DistortionModel::new(camera(), strong, &UndistortOptions::default());
        let map = UndistortMap::solve(&model, &UndistortOptions::default(), false);
        assert_eq!(map.source(63, 47), None);
        assert!(map.stats().out_of_bounds > 0);
        assert!(map.source(32, 24).is_some());
    }

    #[test]
    fn remap_checks_size() {
        let options = UndistortOptions::default();
        let model = DistortionModel::new(camera(), DistortionCoefficients::default(), &options);
        let map = UndistortMap::solve(&model, &options, false);
        assert!(map.remap(&Raster::new(10, 10, 0u8)).is_err());
    }

    #[test]
    fn undistorter_crops_after() {
        let calibration = Calibration {
            fx: 60.0,
            fy: 60.0,
            cx: 31.5,
            cy: 23.5,
            distortion: vec![],
            body_to_camera: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
            image_width: 64,
            image_height: 48,
            crop: Crop {
                top: 8,
                right: 4,
                ..Crop::default()
            },
        };
        let options = UndistortOptions::default();
        let after = Undistorter::new(&calibration, &options, CropOrder::AfterUndistort, false).unwrap();
        assert_eq!((after.camera().width, after.camera().height), (60, 40));
        assert_eq!(after.camera().cy, 15.5);
        let image = Raster::from_fn(64, 48, |x, y| (x + 100 * y) as u16);
        let out = after.apply(&image).unwrap();
        assert_eq!(out.dimensions(), (60, 40));
        assert_eq!(out.get(0, 0), 800);
        assert!(after.mask().is_none());

        let before =
            Undistorter::new(&calibration, &options, CropOrder::BeforeUndistort, false).unwrap();
        assert_eq!(before.apply(&image).unwrap(), out);
        assert_eq!(before.camera(), after.camera());

        let masked = Undistorter::new(&calibration, &options, CropOrder::MaskOnly, false).unwrap();
        assert_eq!(masked.apply(&image).unwrap(), image);
        let mask = masked.mask().unwrap();
        assert_eq!(mask.get(0, 7), 0);
        assert_eq!(mask.get(0, 8), 255);
        assert_eq!(mask.get(60, 20), 0);
    }
}
