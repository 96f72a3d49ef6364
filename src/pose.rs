use cgmath::prelude::*;
use cgmath::{Quaternion, Rad, Vector3};
use serde::{Deserialize, Serialize};

use crate::stream::Timestamped;
use crate::transform::RigidTransform;
use crate::{check_finite, Error};

/// Quaternions further than this from unit norm are rejected instead of renormalized.
pub const QUATERNION_NORM_TOLERANCE: f64 = 1e-3;

/// Below this angle between two quaternions SLERP falls back to a normalized lerp.
const SLERP_LINEAR_THRESHOLD: f64 = 1e-9;

/// Rigid pose at an instant. Maps points from the local frame into the world frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Pose {
    timestamp: f64,
    rotation: Quaternion<f64>,
    transform: RigidTransform,
}

impl Pose {
    /// Create a pose from a translation and a unit quaternion. The quaternion is renormalized if it
    /// is within `QUATERNION_NORM_TOLERANCE` of unit length.
    pub fn new(
        timestamp: f64,
        translation: Vector3<f64>,
        rotation: Quaternion<f64>,
    ) -> Result<Self, Error> {
        check_finite(&[timestamp], "pose timestamp")?;
        check_finite(
            &[rotation.s, rotation.v.x, rotation.v.y, rotation.v.z],
            "quaternion",
        )?;
        let norm = rotation.magnitude();
        if (norm - 1.0).abs() > QUATERNION_NORM_TOLERANCE {
            return Err(Error::DegenerateInput(format!(
                "quaternion {:?} has norm {}",
                rotation, norm
            )));
        }
        let rotation = rotation / norm;
        let transform = RigidTransform::from_quaternion(rotation, translation)?;
        Ok(Pose {
            timestamp,
            rotation,
            transform,
        })
    }

    /// Create a pose from roll (about x), pitch (about y) and yaw (about z) in radians.
    pub fn from_euler(
        timestamp: f64,
        translation: Vector3<f64>,
        roll: f64,
        pitch: f64,
        yaw: f64,
        order: EulerOrder,
    ) -> Result<Self, Error> {
        check_finite(&[roll, pitch, yaw], "euler angles")?;
        Self::new(timestamp, translation, order.quaternion(roll, pitch, yaw))
    }

    pub fn from_transform(timestamp: f64, transform: RigidTransform) -> Self {
        Pose {
            timestamp,
            rotation: transform.quaternion(),
            transform,
        }
    }

    pub fn identity(timestamp: f64) -> Self {
        Pose::from_transform(timestamp, RigidTransform::identity())
    }

    /// Same pose at a different time.
    pub fn restamp(&self, timestamp: f64) -> Self {
        Pose {
            timestamp,
            ..self.clone()
        }
    }

    pub(crate) fn from_unit(
        timestamp: f64,
        translation: Vector3<f64>,
        rotation: Quaternion<f64>,
    ) -> Self {
        let transform =
            RigidTransform::from_parts_unchecked(cgmath::Matrix3::from(rotation), translation);
        Pose {
            timestamp,
            rotation,
            transform,
        }
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn translation(&self) -> Vector3<f64> {
        self.transform.translation()
    }

    pub fn rotation(&self) -> Quaternion<f64> {
        self.rotation
    }

    pub fn transform(&self) -> &RigidTransform {
        &self.transform
    }

    /// World to local rotation and translation, the convention reconstruction tools such as
    /// COLMAP store per image.
    pub fn extrinsic(&self) -> (Quaternion<f64>, Vector3<f64>) {
        let inverse = self.transform.inverse();
        (self.rotation.conjugate(), inverse.translation())
    }
}

impl Timestamped for Pose {
    fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

/// Spherical linear interpolation along the shorter arc.
///
/// `amount` is expected in `[0, 1]`. The result is always a unit quaternion.
pub fn slerp(from: Quaternion<f64>, to: Quaternion<f64>, amount: f64) -> Quaternion<f64> {
    let mut to = to;
    let mut cos = from.dot(to);
    if cos < 0.0 {
        to = -to;
        cos = -cos;
    }
    let theta = cos.min(1.0).acos();
    let (a, b) = if theta < SLERP_LINEAR_THRESHOLD {
        (1.0 - amount, amount)
    } else {
        let sin = theta.sin();
        (
            ((1.0 - amount) * theta).sin() / sin,
            (amount * theta).sin() / sin,
        )
    };
    (from * a + to * b).normalize()
}

/// Order in which the three axis rotations of an Euler triple are applied, in the fixed frame.
///
/// Roll is always the rotation about x, pitch about y and yaw about z. `Xyz` applies roll first,
/// giving `R = Rz(yaw) Ry(pitch) Rx(roll)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EulerOrder {
    Xyz,
    Xzy,
    Yxz,
    Yzx,
    Zxy,
    Zyx,
}

impl Default for EulerOrder {
    fn default() -> Self {
        EulerOrder::Xyz
    }
}

impl std::str::FromStr for EulerOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_ref() {
            "xyz" => Ok(EulerOrder::Xyz),
            "xzy" => Ok(EulerOrder::Xzy),
            "yxz" => Ok(EulerOrder::Yxz),
            "yzx" => Ok(EulerOrder::Yzx),
            "zxy" => Ok(EulerOrder::Zxy),
            "zyx" => Ok(EulerOrder::Zyx),
            _ => Err(Error::Config(format!("unknown euler order {}", s))),
        }
    }
}

impl EulerOrder {
    fn axes(self) -> [usize; 3] {
        match self {
            EulerOrder::Xyz => [0, 1, 2],
            EulerOrder::Xzy => [0, 2, 1],
            EulerOrder::Yxz => [1, 0, 2],
            EulerOrder::Yzx => [1, 2, 0],
            EulerOrder::Zxy => [2, 0, 1],
            EulerOrder::Zyx => [2, 1, 0],
        }
    }

    pub fn quaternion(self, roll: f64, pitch: f64, yaw: f64) -> Quaternion<f64> {
        self.axes()
            .iter()
            .fold(Quaternion::one(), |q, axis| {
                let step = match axis {
                    0 => Quaternion::from_angle_x(Rad(roll)),
                    1 => Quaternion::from_angle_y(Rad(pitch)),
                    _ => Quaternion::from_angle_z(Rad(yaw)),
                };
                step * q
            })
            .normalize()
    }
}
