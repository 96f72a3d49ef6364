//! Pose interpolation for queries from another sensor's clock.
use log::{trace, warn};

use crate::pose::{slerp, Pose};
use crate::stream::{StreamCursor, Timestamped};
use crate::{check_finite, Error};

/// Interpolates a pose stream at increasing query times.
///
/// The interpolator keeps the last bracket `(before, after)` and only ever moves it forward, so a
/// sequence of increasing queries costs amortized O(1) each and the underlying stream is read once.
/// Queries outside the stream's range fail with [`Error::OutOfRange`]; poses are never
/// extrapolated.
pub struct PoseInterpolator<I: Iterator<Item = Pose>> {
    cursor: StreamCursor<I>,
    first: Option<f64>,
    before: Option<Pose>,
    after: Option<Pose>,
}

impl PoseInterpolator<std::vec::IntoIter<Pose>> {
    pub fn new(poses: Vec<Pose>) -> Self {
        Self::from_cursor(StreamCursor::new(poses))
    }
}

impl<I: Iterator<Item = Pose>> PoseInterpolator<I> {
    pub fn from_cursor(mut cursor: StreamCursor<I>) -> Self {
        let first = cursor.peek_timestamp();
        PoseInterpolator {
            cursor,
            first,
            before: None,
            after: None,
        }
    }

    /// Latest sample time seen so far. Only a lower bound on the stream's end until the stream is
    /// exhausted.
    fn latest(&self) -> f64 {
        self.after
            .as_ref()
            .map(|p| p.timestamp())
            .or(self.first)
            .unwrap_or(std::f64::NAN)
    }

    /// Next usable sample. Out of order or degenerate records are logged and skipped.
    fn next_sample(&mut self) -> Result<Pose, Error> {
        loop {
            match self.cursor.advance() {
                Err(e)
                    if matches!(e, Error::UnorderedStream { .. } | Error::DegenerateInput(_)) =>
                {
                    warn!("skipping pose record {}: {}", self.cursor.consumed() - 1, e);
                }
                other => return other,
            }
        }
    }

    /// Find the poses surrounding `t`, moving the bracket forward as needed.
    pub fn bracket(&mut self, t: f64) -> Result<(&Pose, &Pose), Error> {
        check_finite(&[t], "query timestamp")?;
        let first = self
            .first
            .ok_or_else(|| Error::EmptyStream("pose stream has no samples".to_string()))?;
        if t < first {
            return Err(Error::OutOfRange {
                query: t,
                first,
                last: self.latest(),
            });
        }

        let mut after = match self.after.take() {
            Some(p) => p,
            None => self.next_sample()?,
        };
        while after.timestamp() < t {
            match self.next_sample() {
                Ok(next) => self.before = Some(std::mem::replace(&mut after, next)),
                Err(Error::Exhausted) => {
                    let last = after.timestamp();
                    self.after = Some(after);
                    return Err(Error::OutOfRange { query: t, first, last });
                }
                Err(e) => {
                    self.after = Some(after);
                    return Err(e);
                }
            }
        }
        self.after = Some(after);

        let after = self.after.as_ref().ok_or(Error::Exhausted)?;
        match &self.before {
            Some(before) if before.timestamp() > t => Err(Error::OutOfRange {
                query: t,
                first: before.timestamp(),
                last: after.timestamp(),
            }),
            Some(before) => Ok((before, after)),
            // the first sample sits exactly at t
            None => Ok((after, after)),
        }
    }

    /// Pose at time `t`.
    pub fn interpolate(&mut self, t: f64) -> Result<Pose, Error> {
        let (before, after) = self.bracket(t)?;
        trace!(
            "interpolating {} between {} and {}",
            t,
            before.timestamp(),
            after.timestamp()
        );
        Ok(interpolate_between(before, after, t))
    }
}

/// Blend two poses at time `t`. Translation is interpolated linearly, rotation along the shorter
/// great arc. `t` is clamped to the interval spanned by the two poses.
pub fn interpolate_between(before: &Pose, after: &Pose, t: f64) -> Pose {
    let span = after.timestamp() - before.timestamp();
    if !(span > 0.0) {
        return before.restamp(t);
    }
    let r = ((t - before.timestamp()) / span).max(0.0).min(1.0);
    if r == 0.0 {
        return before.restamp(t);
    }
    if r == 1.0 {
        return after.restamp(t);
    }
    let translation = before.translation() + (after.translation() - before.translation()) * r;
    let rotation = slerp(before.rotation(), after.rotation(), r);
    Pose::from_unit(t, translation, rotation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use cgmath::prelude::*;
    use cgmath::{Deg, Quaternion, Vector3};

    fn pose(t: f64, x: f64, yaw: f64) -> Pose {
        Pose::new(t, Vector3::new(x, 0.0, 0.0), Quaternion::from_angle_z(Deg(yaw))).unwrap()
    }

    #[test]
    fn midpoint_between_identity_and_translation() {
        let mut interp = PoseInterpolator::new(vec![pose(0.0, 0.0, 0.0), pose(10.0, 10.0, 0.0)]);
        let p = interp.interpolate(5.0).unwrap();
        assert_eq!(p.timestamp(), 5.0);
        assert_abs_diff_eq!(p.translation(), Vector3::new(5.0, 0.0, 0.0), epsilon = 1e-12);
        assert_abs_diff_eq!(p.rotation(), Quaternion::one(), epsilon = 1e-12);
    }

    #[test]
    fn endpoints_reproduce_samples() {
        let a = pose(1.0, 2.0, 30.0);
        let b = pose(2.0, 3.0, 60.0);
        let start = interpolate_between(&a, &b, 1.0);
        assert_eq!(start.transform(), a.transform());
        assert_eq!(start.rotation(), a.rotation());
        let end = interpolate_between(&a, &b, 2.0);
        assert_eq!(end.transform(), b.transform());
    }

    #[test]
    fn equal_timestamps_return_before() {
        let a = pose(3.0, 1.0, 0.0);
        let b = pose(3.0, 9.0, 0.0);
        let p = interpolate_between(&a, &b, 3.0);
        assert_eq!(p.translation(), a.translation());
    }

    #[test]
    fn rotation_is_interpolated() {
        let mut interp = PoseInterpolator::new(vec![pose(0.0, 0.0, 0.0), pose(1.0, 0.0, 90.0)]);
        let p = interp.interpolate(0.5).unwrap();
        assert_abs_diff_eq!(
            p.rotation(),
            Quaternion::from_angle_z(Deg(45.0)),
            epsilon = 1e-12
        );
    }

    #[test]
    fn out_of_range_queries() {
        let mut interp = PoseInterpolator::new(vec![pose(1.0, 0.0, 0.0), pose(2.0, 1.0, 0.0)]);
        assert!(matches!(
            interp.interpolate(0.5),
            Err(Error::OutOfRange { .. })
        ));
        assert!(interp.interpolate(1.0).is_ok());
        assert!(interp.interpolate(2.0).is_ok());
        match interp.interpolate(2.5) {
            Err(Error::OutOfRange { query, first, last }) => {
                assert_eq!(query, 2.5);
                assert_eq!(first, 1.0);
                assert_eq!(last, 2.0);
            }
            x => panic!("expected out of range, got {:?}", x),
        }
    }

    #[test]
    fn out_of_order_record_is_skipped() {
        let poses = vec![
            pose(0.0, 0.0, 0.0),
            pose(5.0, 5.0, 0.0),
            pose(3.0, 3.0, 0.0),
            pose(10.0, 10.0, 0.0),
        ];
        let mut interp = PoseInterpolator::new(poses);
        let p = interp.interpolate(7.0).unwrap();
        assert_abs_diff_eq!(p.translation(), Vector3::new(7.0, 0.0, 0.0), epsilon = 1e-12);
        let (before, after) = interp.bracket(7.5).unwrap();
        assert_eq!((before.timestamp(), after.timestamp()), (5.0, 10.0));
        assert_eq!(interp.cursor.consumed(), 4);
    }

    #[test]
    fn empty_stream() {
        let mut interp = PoseInterpolator::new(Vec::new());
        assert!(matches!(interp.interpolate(0.0), Err(Error::EmptyStream(_))));
    }

    #[test]
    fn scans_forward_only() {
        let poses = (0..100).map(|i| pose(i as f64, i as f64, 0.0)).collect();
        let mut interp = PoseInterpolator::new(poses);
        let mut t = 0.25;
        while t < 99.0 {
            let p = interp.interpolate(t).unwrap();
            assert_abs_diff_eq!(p.translation().x, t, epsilon = 1e-9);
            t += 0.7;
        }
        assert!(interp.cursor.consumed() <= 100);
        // the bracket has moved past 10, going back is not possible
        assert!(matches!(
            interp.interpolate(10.0),
            Err(Error::OutOfRange { .. })
        ));
    }
}
