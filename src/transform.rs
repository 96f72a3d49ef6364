//! Rigid transforms and the world, body, camera frame chain.
use cgmath::prelude::*;
use cgmath::{Matrix3, Matrix4, Point3, Quaternion, Vector3, Vector4};

use crate::pose::Pose;
use crate::{check_finite, Error};

/// Maximum deviation of `R^T R` from identity (and of `det R` from one) accepted for a rotation.
pub const ORTHONORMAL_TOLERANCE: f64 = 1e-6;

/// Proper rigid motion (rotation plus translation, no scale or shear).
///
/// Stored as a homogeneous 4x4 matrix together with its inverse. The inverse is computed
/// analytically at construction time, so transforming into either direction costs one matrix
/// multiply. Only the checked constructors can create one, every `RigidTransform` in the program
/// therefore has an orthonormal rotation with determinant +1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    matrix: Matrix4<f64>,
    inverse: Matrix4<f64>,
}

fn entries(m: &Matrix3<f64>) -> [f64; 9] {
    [
        m.x.x, m.x.y, m.x.z, m.y.x, m.y.y, m.y.z, m.z.x, m.z.y, m.z.z,
    ]
}

fn check_rotation(r: &Matrix3<f64>) -> Result<(), Error> {
    check_finite(&entries(r), "rotation")?;
    let residual = r.transpose() * r - Matrix3::identity();
    let deviation = entries(&residual)
        .iter()
        .fold(0.0f64, |m, x| m.max(x.abs()));
    let det = r.determinant();
    if deviation > ORTHONORMAL_TOLERANCE || (det - 1.0).abs() > ORTHONORMAL_TOLERANCE {
        return Err(Error::DegenerateInput(format!(
            "rotation is not orthonormal (max |R^T R - I| = {:e}, det = {})",
            deviation, det
        )));
    }
    Ok(())
}

impl RigidTransform {
    pub fn identity() -> Self {
        RigidTransform {
            matrix: Matrix4::identity(),
            inverse: Matrix4::identity(),
        }
    }

    /// Build from a rotation matrix and a translation. Fails if the rotation is not orthonormal
    /// with determinant +1 or if anything is NaN/Inf.
    pub fn from_parts(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Result<Self, Error> {
        check_rotation(&rotation)?;
        check_finite(&[translation.x, translation.y, translation.z], "translation")?;
        Ok(Self::from_parts_unchecked(rotation, translation))
    }

    /// Build from a unit quaternion and a translation.
    pub fn from_quaternion(
        rotation: Quaternion<f64>,
        translation: Vector3<f64>,
    ) -> Result<Self, Error> {
        Self::from_parts(Matrix3::from(rotation), translation)
    }

    /// Build from a homogeneous matrix. The bottom row must be `[0, 0, 0, 1]`.
    pub fn from_matrix(m: Matrix4<f64>) -> Result<Self, Error> {
        let bottom = m.row(3);
        if bottom != Vector4::new(0.0, 0.0, 0.0, 1.0) {
            return Err(Error::DegenerateInput(format!(
                "homogeneous transform has bottom row {:?}",
                bottom
            )));
        }
        let rotation = Matrix3::from_cols(m.x.truncate(), m.y.truncate(), m.z.truncate());
        Self::from_parts(rotation, m.w.truncate())
    }

    /// Build from a row-major 4x4 matrix, the layout calibration files use.
    pub fn from_rows(rows: &[[f64; 4]; 4]) -> Result<Self, Error> {
        let r = rows;
        // cgmath constructors take column-major arguments
        Self::from_matrix(Matrix4::new(
            r[0][0], r[1][0], r[2][0], r[3][0], r[0][1], r[1][1], r[2][1], r[3][1], r[0][2],
            r[1][2], r[2][2], r[3][2], r[0][3], r[1][3], r[2][3], r[3][3],
        ))
    }

    /// Build from sixteen row-major values.
    pub fn from_row_major(values: &[f64]) -> Result<Self, Error> {
        if values.len() != 16 {
            return Err(Error::Config(format!(
                "a 4x4 transform needs 16 values, got {}",
                values.len()
            )));
        }
        let mut rows = [[0.0; 4]; 4];
        for (i, x) in values.iter().enumerate() {
            rows[i / 4][i % 4] = *x;
        }
        Self::from_rows(&rows)
    }

    pub(crate) fn from_parts_unchecked(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        let rt = rotation.transpose();
        let t_inv = -(rt * translation);
        RigidTransform {
            matrix: homogeneous(rotation, translation),
            inverse: homogeneous(rt, t_inv),
        }
    }

    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.matrix
    }

    pub fn inverse_matrix(&self) -> &Matrix4<f64> {
        &self.inverse
    }

    pub fn rotation(&self) -> Matrix3<f64> {
        Matrix3::from_cols(
            self.matrix.x.truncate(),
            self.matrix.y.truncate(),
            self.matrix.z.truncate(),
        )
    }

    pub fn translation(&self) -> Vector3<f64> {
        self.matrix.w.truncate()
    }

    pub fn quaternion(&self) -> Quaternion<f64> {
        Quaternion::from(self.rotation()).normalize()
    }

    /// The inverse motion. Swaps the cached matrices, nothing is recomputed.
    pub fn inverse(&self) -> RigidTransform {
        RigidTransform {
            matrix: self.inverse,
            inverse: self.matrix,
        }
    }

    /// `self ∘ other`: apply `other` first, then `self`.
    pub fn compose(&self, other: &RigidTransform) -> RigidTransform {
        RigidTransform {
            matrix: self.matrix * other.matrix,
            inverse: other.inverse * self.inverse,
        }
    }

    pub fn transform_point(&self, p: Point3<f64>) -> Point3<f64> {
        Point3::from_homogeneous(self.matrix * p.to_homogeneous())
    }

    pub fn inverse_transform_point(&self, p: Point3<f64>) -> Point3<f64> {
        Point3::from_homogeneous(self.inverse * p.to_homogeneous())
    }

    pub fn transform_vector(&self, v: Vector3<f64>) -> Vector3<f64> {
        self.rotation() * v
    }
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

fn homogeneous(r: Matrix3<f64>, t: Vector3<f64>) -> Matrix4<f64> {
    Matrix4::from_cols(r.x.extend(0.0), r.y.extend(0.0), r.z.extend(0.0), t.extend(1.0))
}

/// Coordinate frames a point buffer can be expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    World,
    Body,
    Camera,
}

/// Composition of body poses with the fixed body to camera extrinsic.
#[derive(Debug, Clone)]
pub struct TransformChain {
    body_to_camera: RigidTransform,
}

impl TransformChain {
    pub fn new(body_to_camera: RigidTransform) -> Self {
        TransformChain { body_to_camera }
    }

    pub fn body_to_camera(&self) -> &RigidTransform {
        &self.body_to_camera
    }

    /// Pose of the camera in the world at the time of `body`.
    pub fn camera_pose(&self, body: &Pose) -> Pose {
        Pose::from_transform(
            body.timestamp(),
            body.transform().compose(&self.body_to_camera),
        )
    }

    /// Express world points in the frame of `pose`.
    pub fn world_to_local(pose: &Pose, points: &[Point3<f64>]) -> Vec<Point3<f64>> {
        let t = pose.transform();
        points
            .iter()
            .map(|p| t.inverse_transform_point(*p))
            .collect()
    }

    pub fn points_in_body(&self, body: &Pose, points: &[Point3<f64>]) -> Vec<Point3<f64>> {
        Self::world_to_local(body, points)
    }

    pub fn points_in_camera(&self, body: &Pose, points: &[Point3<f64>]) -> Vec<Point3<f64>> {
        Self::world_to_local(&self.camera_pose(body), points)
    }

    /// Express world points in `frame`, using `body` as the rig pose.
    pub fn express(&self, frame: Frame, body: &Pose, points: &[Point3<f64>]) -> Vec<Point3<f64>> {
        match frame {
            Frame::World => points.to_vec(),
            Frame::Body => self.points_in_body(body, points),
            Frame::Camera => self.points_in_camera(body, points),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use cgmath::{Deg, Rad};

    fn sample() -> RigidTransform {
        let q = Quaternion::from_axis_angle(Vector3::new(1.0, 2.0, -0.5).normalize(), Deg(37.0));
        RigidTransform::from_quaternion(q, Vector3::new(3.0, -1.0, 12.5)).unwrap()
    }

    #[test]
    fn inverse_is_identity() {
        let t = sample();
        let product = t.matrix() * t.inverse_matrix();
        for i in 0..4 {
            for j in 0..4 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(product[i][j], expected, epsilon = 1e-12);
            }
        }
        let p = Point3::new(0.3, 7.0, -2.0);
        let back = t.inverse().transform_point(t.transform_point(p));
        assert_abs_diff_eq!(back, p, epsilon = 1e-12);
    }

    #[test]
    fn compose_applies_right_first() {
        let a = RigidTransform::from_quaternion(
            Quaternion::from_angle_z(Rad(std::f64::consts::FRAC_PI_2)),
            Vector3::new(1.0, 0.0, 0.0),
        )
        .unwrap();
        let b = RigidTransform::from_parts(Matrix3::identity(), Vector3::new(0.0, 0.0, 2.0))
            .unwrap();
        let p = a.compose(&b).transform_point(Point3::new(1.0, 0.0, 0.0));
        assert_abs_diff_eq!(p, Point3::new(1.0, 1.0, 2.0), epsilon = 1e-12);
        let q = a.compose(&b).inverse_transform_point(p);
        assert_abs_diff_eq!(q, Point3::new(1.0, 0.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn rejects_scaled_rotation() {
        let r = Matrix3::from_value(2.0);
        assert!(matches!(
            RigidTransform::from_parts(r, Vector3::zero()),
            Err(Error::DegenerateInput(_))
        ));
    }

    #[test]
    fn rejects_reflection() {
        let r = Matrix3::from_diagonal(Vector3::new(1.0, 1.0, -1.0));
        assert!(RigidTransform::from_parts(r, Vector3::zero()).is_err());
    }

    #[test]
    fn rejects_nan_translation() {
        let t = Vector3::new(0.0, std::f64::NAN, 0.0);
        assert!(RigidTransform::from_parts(Matrix3::identity(), t).is_err());
    }

    #[test]
    fn row_major_layout() {
        let t = RigidTransform::from_row_major(&[
            0.0, -1.0, 0.0, 5.0, //
            1.0, 0.0, 0.0, 6.0, //
            0.0, 0.0, 1.0, 7.0, //
            0.0, 0.0, 0.0, 1.0,
        ])
        .unwrap();
        assert_abs_diff_eq!(t.translation(), Vector3::new(5.0, 6.0, 7.0));
        let p = t.transform_point(Point3::new(1.0, 0.0, 0.0));
        assert_abs_diff_eq!(p, Point3::new(5.0, 7.0, 7.0), epsilon = 1e-12);
    }

    #[test]
    fn rejects_projective_bottom_row() {
        let mut rows = [[0.0; 4]; 4];
        for i in 0..4 {
            rows[i][i] = 1.0;
        }
        rows[3][2] = 0.5;
        assert!(RigidTransform::from_rows(&rows).is_err());
    }

    #[test]
    fn camera_pose_composes_extrinsic() {
        let extrinsic =
            RigidTransform::from_parts(Matrix3::identity(), Vector3::new(0.0, 0.5, 0.0)).unwrap();
        let chain = TransformChain::new(extrinsic);
        let body = Pose::from_transform(
            4.0,
            RigidTransform::from_quaternion(
                Quaternion::from_angle_z(Rad(std::f64::consts::PI)),
                Vector3::new(10.0, 0.0, 0.0),
            )
            .unwrap(),
        );
        let camera = chain.camera_pose(&body);
        assert_eq!(camera.timestamp(), 4.0);
        assert_abs_diff_eq!(camera.translation(), Vector3::new(10.0, -0.5, 0.0), epsilon = 1e-12);

        let world = vec![Point3::new(10.0, -0.5, 3.0)];
        let in_camera = chain.express(Frame::Camera, &body, &world);
        assert_abs_diff_eq!(in_camera[0], Point3::new(0.0, 0.0, 3.0), epsilon = 1e-12);
        let in_body = chain.express(Frame::Body, &body, &world);
        assert_abs_diff_eq!(in_body[0], Point3::new(0.0, 0.5, 3.0), epsilon = 1e-12);
    }
}
