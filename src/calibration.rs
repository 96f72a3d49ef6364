//! Camera intrinsics, lens distortion coefficients and the body to camera extrinsic.
use std::fs::File;
use std::io::Read;
use std::path::Path;

use cgmath::Point3;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::raster::Raster;
use crate::transform::RigidTransform;
use crate::{check_finite, Error};

/// Pixels removed from each side of an image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Crop {
    pub top: usize,
    pub left: usize,
    pub right: usize,
    pub bottom: usize,
}

impl Crop {
    pub fn is_empty(&self) -> bool {
        self.top == 0 && self.left == 0 && self.right == 0 && self.bottom == 0
    }

    /// Size of a `width x height` image after cropping.
    pub fn cropped_size(&self, width: usize, height: usize) -> Result<(usize, usize), Error> {
        let horizontal = self.left.checked_add(self.right);
        let vertical = self.top.checked_add(self.bottom);
        match (horizontal, vertical) {
            (Some(h), Some(v)) if h < width && v < height => Ok((width - h, height - v)),
            _ => Err(Error::Config(format!(
                "crop {:?} leaves nothing of a {}x{} image",
                self, width, height
            ))),
        }
    }

    pub fn apply<T: Clone>(&self, raster: &Raster<T>) -> Result<Raster<T>, Error> {
        let (w, h) = self.cropped_size(raster.width(), raster.height())?;
        raster.window(self.left, self.top, w, h)
    }

    /// Full size mask with 255 on kept pixels and 0 on cropped ones. A crop that covers the whole
    /// image gives an all zero mask.
    pub fn mask(&self, width: usize, height: usize) -> Raster<u8> {
        let kept = self.cropped_size(width, height).is_ok();
        Raster::from_fn(width, height, |x, y| {
            let inside = kept
                && x >= self.left
                && x < width - self.right
                && y >= self.top
                && y < height - self.bottom;
            if inside {
                255
            } else {
                0
            }
        })
    }
}

/// Where a configured crop is applied relative to undistortion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropOrder {
    /// Undistort the full raw image, then crop the result.
    AfterUndistort,
    /// Crop the raw image, then undistort the cropped image.
    BeforeUndistort,
    /// Keep full size images and emit a mask of the crop instead.
    MaskOnly,
}

impl Default for CropOrder {
    fn default() -> Self {
        CropOrder::AfterUndistort
    }
}

impl std::str::FromStr for CropOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "after_undistort" => Ok(CropOrder::AfterUndistort),
            "before_undistort" => Ok(CropOrder::BeforeUndistort),
            "mask_only" => Ok(CropOrder::MaskOnly),
            _ => Err(Error::Config(format!("unknown crop order {}", s))),
        }
    }
}

/// Lens distortion terms: four radial, two tangential and two affine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DistortionCoefficients {
    pub k1: f64,
    pub k2: f64,
    pub k3: f64,
    pub k4: f64,
    pub p1: f64,
    pub p2: f64,
    pub alpha: f64,
    pub beta: f64,
}

impl DistortionCoefficients {
    /// Coefficients in `k1 k2 k3 k4 p1 p2 alpha beta` order. Missing trailing terms are zero.
    pub fn from_slice(values: &[f64]) -> Result<Self, Error> {
        if values.len() > 8 {
            return Err(Error::Config(format!(
                "at most 8 distortion coefficients are supported, got {}",
                values.len()
            )));
        }
        check_finite(values, "distortion coefficients")?;
        let mut c = [0.0; 8];
        c[..values.len()].copy_from_slice(values);
        Ok(DistortionCoefficients {
            k1: c[0],
            k2: c[1],
            k3: c[2],
            k4: c[3],
            p1: c[4],
            p2: c[5],
            alpha: c[6],
            beta: c[7],
        })
    }

    pub fn is_zero(&self) -> bool {
        *self == DistortionCoefficients::default()
    }
}

/// Ideal pinhole camera with pixel unit intrinsics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinholeCamera {
    pub width: usize,
    pub height: usize,
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl PinholeCamera {
    pub fn new(width: usize, height: usize, fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        PinholeCamera {
            width,
            height,
            fx,
            fy,
            cx,
            cy,
        }
    }

    /// Fractional pixel position of a point in the camera frame, or `None` when the point is not in
    /// front of the camera.
    pub fn project(&self, p: Point3<f64>) -> Option<(f64, f64)> {
        if !(p.z > 0.0) {
            return None;
        }
        Some((self.fx * p.x / p.z + self.cx, self.fy * p.y / p.z + self.cy))
    }

    /// Camera frame point with axial depth `z` seen at pixel `(u, v)`.
    pub fn unproject(&self, u: f64, v: f64, z: f64) -> Point3<f64> {
        Point3::new((u - self.cx) * z / self.fx, (v - self.cy) * z / self.fy, z)
    }

    /// Same camera after removing `crop` from the image.
    pub fn cropped(&self, crop: &Crop) -> Result<Self, Error> {
        let (width, height) = crop.cropped_size(self.width, self.height)?;
        Ok(PinholeCamera {
            width,
            height,
            cx: self.cx - crop.left as f64,
            cy: self.cy - crop.top as f64,
            ..*self
        })
    }

    pub fn validate(&self) -> Result<(), Error> {
        check_finite(&[self.fx, self.fy, self.cx, self.cy], "intrinsics")?;
        if self.width == 0 || self.height == 0 {
            return Err(Error::Config(format!(
                "image size {}x{} is empty",
                self.width, self.height
            )));
        }
        if !(self.fx > 0.0 && self.fy > 0.0) {
            return Err(Error::Config(format!(
                "focal lengths must be positive, got fx = {} fy = {}",
                self.fx, self.fy
            )));
        }
        Ok(())
    }
}

/// Calibration of one rig camera.
///
/// `cx`, `cy` and the distortion coefficients are in raw image pixels. `body_to_camera` is a
/// row-major homogeneous matrix mapping camera frame points into the body frame, with the camera
/// looking down +z, x to the right and y down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    #[serde(default)]
    pub distortion: Vec<f64>,
    pub body_to_camera: [[f64; 4]; 4],
    pub image_width: usize,
    pub image_height: usize,
    #[serde(default)]
    pub crop: Crop,
}

/// Camera that looks down -z with y up, as the rig stores it, to the optical convention.
const RIG_TO_OPTICAL: [f64; 4] = [1.0, -1.0, -1.0, 1.0];

fn float_sequence(value: &serde_yaml::Value, name: &str) -> Result<Vec<f64>, Error> {
    let seq = value
        .as_sequence()
        .ok_or_else(|| Error::Config(format!("{} is missing or not a list", name)))?;
    seq.iter()
        .map(|x| {
            x.as_f64()
                .ok_or_else(|| Error::Config(format!("{} contains a non-numeric entry", name)))
        })
        .collect()
}

impl Calibration {
    pub fn from_yaml_str(contents: &str) -> Result<Self, Error> {
        let calibration: Calibration = serde_yaml::from_str(contents)?;
        calibration.validate()?;
        Ok(calibration)
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let mut contents = String::new();
        File::open(path)?.read_to_string(&mut contents)?;
        Self::from_yaml_str(&contents)
    }

    /// Parse the calibration file written by the rig's own software.
    ///
    /// Intrinsics come from `parameters.param.camera_instrinsic_parameters_opt_cam`, laid out as
    /// `[width, height, _, cx, cy, f, distortion...]`, and the extrinsic from
    /// `parameters.param.T_imu2optcam_refine` as 16 row-major values.
    pub fn from_rig_yaml(contents: &str) -> Result<Self, Error> {
        let doc: serde_yaml::Value = serde_yaml::from_str(contents)?;
        let param = &doc["parameters"]["param"];
        let intrinsics = float_sequence(
            &param["camera_instrinsic_parameters_opt_cam"],
            "camera_instrinsic_parameters_opt_cam",
        )?;
        if intrinsics.len() < 6 {
            return Err(Error::Config(format!(
                "expected at least 6 intrinsic parameters, got {}",
                intrinsics.len()
            )));
        }
        let extrinsic = float_sequence(&param["T_imu2optcam_refine"], "T_imu2optcam_refine")?;
        if extrinsic.len() != 16 {
            return Err(Error::Config(format!(
                "T_imu2optcam_refine needs 16 values, got {}",
                extrinsic.len()
            )));
        }

        let mut body_to_camera = [[0.0; 4]; 4];
        for (i, x) in extrinsic.iter().enumerate() {
            body_to_camera[i / 4][i % 4] = x * RIG_TO_OPTICAL[i % 4];
        }
        debug!("rig calibration intrinsics {:?}", intrinsics);

        let calibration = Calibration {
            fx: intrinsics[5],
            fy: intrinsics[5],
            cx: intrinsics[3],
            cy: intrinsics[4],
            distortion: intrinsics[6..].to_vec(),
            body_to_camera,
            image_width: intrinsics[0] as usize,
            image_height: intrinsics[1] as usize,
            crop: Crop::default(),
        };
        calibration.validate()?;
        Ok(calibration)
    }

    /// Load either layout, trying the native one first.
    pub fn load_any(path: &Path) -> Result<Self, Error> {
        let mut contents = String::new();
        File::open(path)?.read_to_string(&mut contents)?;
        Self::from_yaml_str(&contents).or_else(|_| Self::from_rig_yaml(&contents))
    }

    pub fn coefficients(&self) -> Result<DistortionCoefficients, Error> {
        DistortionCoefficients::from_slice(&self.distortion)
    }

    pub fn extrinsic(&self) -> Result<RigidTransform, Error> {
        RigidTransform::from_rows(&self.body_to_camera)
    }

    /// The camera model of raw, still distorted images.
    pub fn raw_camera(&self) -> PinholeCamera {
        PinholeCamera::new(
            self.image_width,
            self.image_height,
            self.fx,
            self.fy,
            self.cx,
            self.cy,
        )
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.raw_camera().validate()?;
        self.coefficients()?;
        self.extrinsic()?;
        self.crop.cropped_size(self.image_width, self.image_height)?;
        Ok(())
    }
}
