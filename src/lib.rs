//! Temporal alignment and geometric projection for mobile mapping rigs.
//!
//! A rig records an IMU derived trajectory, a surveyed trajectory, a time tagged point cloud and a
//! video with its own timestamp file, all on different clocks. This crate turns those streams into
//! a consistent dataset: every camera frame and every LiDAR sweep gets an interpolated pose in the
//! world frame, images are undistorted, and depth maps are rendered by projecting the accumulated
//! point cloud into each camera.
//!
//! Example usage:
//! ```
//! use cgmath::{Point3, Quaternion, Vector3};
//! use rigsync::*;
//!
//! // body poses sampled by the IMU
//! let poses = vec![
//!     Pose::new(0.0, Vector3::new(0.0, 0.0, 0.0), Quaternion::new(1.0, 0.0, 0.0, 0.0)).unwrap(),
//!     Pose::new(10.0, Vector3::new(10.0, 0.0, 0.0), Quaternion::new(1.0, 0.0, 0.0, 0.0)).unwrap(),
//! ];
//! let mut interpolator = PoseInterpolator::new(poses);
//! let body = interpolator.interpolate(5.0).unwrap();
//!
//! // camera rigidly mounted on the body, looking down +z
//! let chain = TransformChain::new(RigidTransform::identity());
//! let camera_pose = chain.camera_pose(&body);
//!
//! let camera = PinholeCamera::new(64, 48, 50.0, 50.0, 32.0, 24.0);
//! let points = vec![Point3::new(5.0, 0.0, 2.0)];
//! let depth = render_depth(camera_pose.transform(), &camera, &points, &DepthConfig::default());
//! assert_eq!(depth.to_millimeters(&DepthConfig::default()).get(32, 24), 2000);
//! ```

extern crate cgmath;
extern crate indicatif;
extern crate log;
extern crate rayon;
extern crate thiserror;

pub mod calibration;
pub mod depth;
pub mod distortion;
pub mod interpolate;
pub mod io;
pub mod pipeline;
pub mod pose;
pub mod raster;
pub mod stream;
pub mod sweep;
pub mod transform;

pub use calibration::*;
pub use depth::*;
pub use distortion::*;
pub use interpolate::*;
pub use pipeline::*;
pub use pose::*;
pub use raster::*;
pub use stream::*;
pub use sweep::*;
pub use transform::*;

use thiserror::Error;

/// Everything that can go wrong while aligning or projecting.
#[derive(Debug, Error)]
pub enum Error {
    /// Query timestamp lies outside the samples the stream can still provide. Never extrapolated.
    #[error("timestamp {query} is outside the stream range [{first}, {last}]")]
    OutOfRange { query: f64, first: f64, last: f64 },
    /// Non-orthonormal rotation, NaN/Inf geometry or a zero-length interval used as a divisor.
    #[error("degenerate input: {0}")]
    DegenerateInput(String),
    /// A stream element is older than the element consumed before it.
    #[error("stream out of order: timestamp {next} follows {previous}")]
    UnorderedStream { previous: f64, next: f64 },
    /// `advance` was called on a cursor with nothing left.
    #[error("stream exhausted")]
    Exhausted,
    #[error("empty stream: {0}")]
    EmptyStream(String),
    #[error("parse error: {0}")]
    ParseError(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

/// Reject NaN and infinite values before they reach a transform.
pub(crate) fn check_finite(values: &[f64], what: &str) -> Result<(), Error> {
    if values.iter().all(|x| x.is_finite()) {
        Ok(())
    } else {
        Err(Error::DegenerateInput(format!(
            "{} contains a non-finite value: {:?}",
            what, values
        )))
    }
}
