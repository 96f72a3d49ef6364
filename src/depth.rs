//! Rendering depth maps from a point cloud with a z-buffer.
use cgmath::prelude::*;
use cgmath::Point3;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::calibration::PinholeCamera;
use crate::raster::Raster;
use crate::transform::RigidTransform;
use crate::Error;

/// Quantity stored per pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthKind {
    /// Distance along the optical axis.
    AxisZ,
    /// Euclidean distance from the camera center.
    Range,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthConfig {
    pub kind: DepthKind,
    /// Stored units per meter.
    pub scale: f64,
    /// Smallest value stored for a valid pixel. Keeps close points from turning into "no data".
    pub min_value: u16,
    /// Points with camera z at or below this are dropped.
    pub near: f64,
    /// Points with a depth beyond this are dropped.
    pub far: Option<f64>,
}

impl Default for DepthConfig {
    fn default() -> Self {
        DepthConfig {
            kind: DepthKind::AxisZ,
            scale: 1000.0,
            min_value: 1,
            near: 0.0,
            far: None,
        }
    }
}

impl DepthConfig {
    /// Reject settings that would let points behind the camera through or break quantization.
    pub fn validate(&self) -> Result<(), Error> {
        if !(self.near >= 0.0) || !self.near.is_finite() {
            return Err(Error::Config(format!(
                "depth near plane must be finite and non-negative, got {}",
                self.near
            )));
        }
        if let Some(far) = self.far {
            if !far.is_finite() || far <= self.near {
                return Err(Error::Config(format!(
                    "depth far plane must be finite and beyond near ({}), got {}",
                    self.near, far
                )));
            }
        }
        if !(self.scale > 0.0) || !self.scale.is_finite() {
            return Err(Error::Config(format!(
                "depth scale must be positive, got {}",
                self.scale
            )));
        }
        Ok(())
    }
}

/// What happened to the points of one projection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionStats {
    /// Points that landed on a pixel.
    pub projected: usize,
    pub behind_camera: usize,
    pub out_of_bounds: usize,
    pub beyond_far: usize,
    /// Depth comparisons where one of the two points was hidden.
    pub occluded: usize,
}

/// Depth in meters per pixel, `0.0` where no point landed.
#[derive(Debug, Clone)]
pub struct DepthRaster {
    depth: Raster<f32>,
    stats: ProjectionStats,
}

/// Project world `points` into the camera at `camera_pose` (camera to world), keeping the nearest
/// point per pixel.
pub fn render_depth(
    camera_pose: &RigidTransform,
    camera: &PinholeCamera,
    points: &[Point3<f64>],
    config: &DepthConfig,
) -> DepthRaster {
    let mut depth = Raster::new(camera.width, camera.height, 0.0f32);
    let mut stats = ProjectionStats::default();
    let (width, height) = (camera.width as f64, camera.height as f64);
    // points at or behind the image plane never project, whatever the configured near plane
    let near = config.near.max(0.0);

    for point in points {
        let p = camera_pose.inverse_transform_point(*point);
        if !(p.z > near) || !p.z.is_finite() {
            stats.behind_camera += 1;
            continue;
        }
        let d = match config.kind {
            DepthKind::AxisZ => p.z,
            DepthKind::Range => p.to_vec().magnitude(),
        };
        if config.far.map_or(false, |far| d > far) {
            stats.beyond_far += 1;
            continue;
        }

        let u = (camera.fx * p.x / p.z + camera.cx).floor();
        let v = (camera.fy * p.y / p.z + camera.cy).floor();
        // also rejects NaN
        if !(u >= 0.0 && v >= 0.0 && u < width && v < height) {
            stats.out_of_bounds += 1;
            continue;
        }

        stats.projected += 1;
        let d = (d as f32).max(std::f32::MIN_POSITIVE);
        let cell = depth.get_mut(u as usize, v as usize);
        if *cell == 0.0 {
            *cell = d;
        } else {
            stats.occluded += 1;
            if d < *cell {
                *cell = d;
            }
        }
    }
    debug!("{:?}", stats);

    DepthRaster { depth, stats }
}

impl DepthRaster {
    pub fn stats(&self) -> &ProjectionStats {
        &self.stats
    }

    pub fn meters(&self) -> &Raster<f32> {
        &self.depth
    }

    /// Quantize to integer units (millimeters by default). No data stays 0; valid depths are
    /// rounded and saturated into `[min_value, u16::MAX]`.
    pub fn to_millimeters(&self, config: &DepthConfig) -> Raster<u16> {
        let lowest = config.min_value.max(1) as f64;
        let highest = std::u16::MAX as f64;
        self.depth.map(|d| {
            if *d > 0.0 {
                (*d as f64 * config.scale).round().max(lowest).min(highest) as u16
            } else {
                0
            }
        })
    }

    /// Points seen by the camera, back in the world frame.
    pub fn unproject(
        &self,
        camera_pose: &RigidTransform,
        camera: &PinholeCamera,
        kind: DepthKind,
    ) -> Vec<Point3<f64>> {
        unproject_depth(&self.depth.map(|d| *d as f64), 1.0, camera_pose, camera, kind)
    }
}

/// Back-project a depth raster stored in `scale` units per meter into world points. Zero pixels
/// are skipped.
pub fn unproject_depth<T: Copy + Into<f64>>(
    depth: &Raster<T>,
    scale: f64,
    camera_pose: &RigidTransform,
    camera: &PinholeCamera,
    kind: DepthKind,
) -> Vec<Point3<f64>> {
    let mut points = Vec::new();
    for (v, row) in depth.rows().enumerate() {
        for (u, value) in row.iter().enumerate() {
            let d: f64 = (*value).into() / scale;
            if !(d > 0.0) {
                continue;
            }
            let ray = camera.unproject(u as f64, v as f64, 1.0);
            let z = match kind {
                DepthKind::AxisZ => d,
                DepthKind::Range => d / ray.to_vec().magnitude(),
            };
            let p = Point3::from_vec(ray.to_vec() * z);
            points.push(camera_pose.transform_point(p));
        }
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use cgmath::{Deg, Quaternion, Rotation3, Vector3};

    fn camera() -> PinholeCamera {
        PinholeCamera::new(64, 48, 50.0, 50.0, 32.0, 24.0)
    }

    #[test]
    fn principal_axis_lands_on_center() {
        let raster = render_depth(
            &RigidTransform::identity(),
            &camera(),
            &[Point3::new(0.0, 0.0, 3.5)],
            &DepthConfig::default(),
        );
        assert_eq!(raster.meters().get(32, 24), 3.5);
        assert_eq!(raster.stats().projected, 1);
        let mm = raster.to_millimeters(&DepthConfig::default());
        assert_eq!(mm.get(32, 24), 3500);
        assert_eq!(mm.data().iter().filter(|x| **x != 0).count(), 1);
    }

    #[test]
    fn nearest_point_wins() {
        let points = [
            Point3::new(0.0, 0.0, 5.0),
            Point3::new(0.0, 0.0, 2.0),
            Point3::new(0.0, 0.0, 7.0),
        ];
        let raster = render_depth(
            &RigidTransform::identity(),
            &camera(),
            &points,
            &DepthConfig::default(),
        );
        assert_eq!(raster.meters().get(32, 24), 2.0);
        assert_eq!(raster.stats().occluded, 2);
        assert_eq!(raster.to_millimeters(&DepthConfig::default()).get(32, 24), 2000);
    }

    #[test]
    fn drops_points_behind_outside_and_far() {
        let config = DepthConfig {
            far: Some(10.0),
            ..DepthConfig::default()
        };
        let points = [
            Point3::new(0.0, 0.0, -1.0),
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(100.0, 0.0, 1.0),
            Point3::new(0.0, 0.0, 20.0),
            Point3::new(std::f64::NAN, 0.0, 1.0),
        ];
        let raster = render_depth(&RigidTransform::identity(), &camera(), &points, &config);
        let stats = raster.stats();
        // the NaN spreads through the transform and lands in the depth check
        assert_eq!(stats.behind_camera, 3);
        assert_eq!(stats.out_of_bounds, 1);
        assert_eq!(stats.beyond_far, 1);
        assert_eq!(stats.projected, 0);
        assert!(raster.meters().data().iter().all(|d| *d == 0.0));
    }

    #[test]
    fn negative_near_still_drops_points_behind() {
        let config = DepthConfig {
            near: -5.0,
            ..DepthConfig::default()
        };
        let raster = render_depth(
            &RigidTransform::identity(),
            &camera(),
            &[Point3::new(0.1, 0.1, -2.0)],
            &config,
        );
        assert_eq!(raster.stats().projected, 0);
        assert_eq!(raster.stats().behind_camera, 1);
        assert!(raster.meters().data().iter().all(|d| *d == 0.0));
    }

    #[test]
    fn config_validation() {
        assert!(DepthConfig::default().validate().is_ok());
        let bad = [
            DepthConfig {
                near: -5.0,
                ..DepthConfig::default()
            },
            DepthConfig {
                near: std::f64::NAN,
                ..DepthConfig::default()
            },
            DepthConfig {
                near: 2.0,
                far: Some(2.0),
                ..DepthConfig::default()
            },
            DepthConfig {
                far: Some(std::f64::INFINITY),
                ..DepthConfig::default()
            },
            DepthConfig {
                scale: 0.0,
                ..DepthConfig::default()
            },
            DepthConfig {
                scale: std::f64::NAN,
                ..DepthConfig::default()
            },
        ];
        for config in &bad {
            assert!(
                matches!(config.validate(), Err(Error::Config(_))),
                "{:?}",
                config
            );
        }
    }

    #[test]
    fn millimeters_saturate_and_keep_sentinel() {
        let points = [
            Point3::new(0.0, 0.0, 120.0),
            Point3::new(0.0, 0.00001, 0.0002),
        ];
        let raster = render_depth(
            &RigidTransform::identity(),
            &camera(),
            &points,
            &DepthConfig::default(),
        );
        let mm = raster.to_millimeters(&DepthConfig::default());
        assert_eq!(mm.get(32, 24), 65535);
        assert_eq!(mm.get(32, 26), 1);
        assert_eq!(mm.get(0, 0), 0);
    }

    #[test]
    fn range_depth_uses_distance() {
        let config = DepthConfig {
            kind: DepthKind::Range,
            ..DepthConfig::default()
        };
        let raster = render_depth(
            &RigidTransform::identity(),
            &camera(),
            &[Point3::new(3.0, 0.0, 4.0)],
            &config,
        );
        // u = 50 * 3 / 4 + 32 = 69.5, out of a 64 pixel wide image
        assert_eq!(raster.stats().out_of_bounds, 1);
        let raster = render_depth(
            &RigidTransform::identity(),
            &camera(),
            &[Point3::new(0.3, 0.0, 4.0)],
            &config,
        );
        // u = 50 * 0.3 / 4 + 32 = 35.75
        assert_abs_diff_eq!(
            raster.meters().get(35, 24),
            (0.09f64 + 16.0).sqrt() as f32,
            epsilon = 1e-6
        );
    }

    #[test]
    fn unproject_inverts_render() {
        let pose = RigidTransform::from_quaternion(
            Quaternion::from_angle_y(Deg(20.0)),
            Vector3::new(1.0, -2.0, 0.5),
        )
        .unwrap();
        // inside pixel (32, 24), whose footprint at 4 m is 8 cm wide
        let local = Point3::new(0.04, 0.04, 4.0);
        let world = pose.transform_point(local);
        for kind in &[DepthKind::AxisZ, DepthKind::Range] {
            let config = DepthConfig {
                kind: *kind,
                ..DepthConfig::default()
            };
            let raster = render_depth(&pose, &camera(), &[world], &config);
            let back = raster.unproject(&pose, &camera(), *kind);
            assert_eq!(back.len(), 1);
            assert_abs_diff_eq!(back[0], world, epsilon = 0.1);
        }
    }
}
