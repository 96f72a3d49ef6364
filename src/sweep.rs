//! Partitioning the LiDAR point stream into sweeps keyed by surveyed poses.
use cgmath::Point3;
use log::debug;

use crate::pose::Pose;
use crate::stream::{Stamped, StreamCursor};
use crate::transform::TransformChain;
use crate::Error;

/// Append-only buffer of every point seen during a run, in the world frame.
#[derive(Debug, Clone, Default)]
pub struct PointAccumulator {
    points: Vec<Point3<f64>>,
}

impl PointAccumulator {
    pub fn new() -> Self {
        PointAccumulator { points: Vec::new() }
    }

    pub fn extend(&mut self, points: &[Point3<f64>]) {
        self.points.extend_from_slice(points);
    }

    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn into_points(self) -> Vec<Point3<f64>> {
        self.points
    }
}

/// Points acquired up to a surveyed pose.
#[derive(Debug, Clone)]
pub struct Sweep {
    pub pose: Pose,
    /// World frame.
    pub points: Vec<Point3<f64>>,
}

impl Sweep {
    pub fn timestamp(&self) -> f64 {
        self.pose.timestamp()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The sweep's points in the body frame of its pose.
    pub fn points_in_body(&self) -> Vec<Point3<f64>> {
        TransformChain::world_to_local(&self.pose, &self.points)
    }
}

/// Cuts a time tagged point stream at every pose of a pose stream.
///
/// Each sweep holds the points acquired strictly before its pose and after the previous pose.
/// Points after the last pose are never returned.
pub struct SweepAssembler<P, Q>
where
    P: Iterator<Item = Pose>,
    Q: Iterator<Item = Stamped<Point3<f64>>>,
{
    poses: StreamCursor<P>,
    points: StreamCursor<Q>,
}

impl<P, Q> SweepAssembler<P, Q>
where
    P: Iterator<Item = Pose>,
    Q: Iterator<Item = Stamped<Point3<f64>>>,
{
    pub fn new(poses: StreamCursor<P>, points: StreamCursor<Q>) -> Self {
        SweepAssembler { poses, points }
    }

    /// Next sweep, or `None` once the pose stream is exhausted.
    pub fn next_sweep(&mut self) -> Result<Option<Sweep>, Error> {
        let pose = match self.poses.advance() {
            Ok(pose) => pose,
            Err(Error::Exhausted) => return Ok(None),
            Err(e) => return Err(e),
        };
        let points = self
            .points
            .advance_until(pose.timestamp())?
            .into_iter()
            .map(|p| p.payload)
            .collect::<Vec<_>>();
        debug!("sweep at {} has {} points", pose.timestamp(), points.len());
        Ok(Some(Sweep { pose, points }))
    }

    /// Assemble every sweep, adding their points to `accumulator`.
    pub fn collect_into(&mut self, accumulator: &mut PointAccumulator) -> Result<Vec<Sweep>, Error> {
        let mut sweeps = Vec::new();
        while let Some(sweep) = self.next_sweep()? {
            accumulator.extend(&sweep.points);
            sweeps.push(sweep);
        }
        Ok(sweeps)
    }
}

impl<P, Q> Iterator for SweepAssembler<P, Q>
where
    P: Iterator<Item = Pose>,
    Q: Iterator<Item = Stamped<Point3<f64>>>,
{
    type Item = Result<Sweep, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_sweep().transpose()
    }
}
