//! Driving the alignment over whole recordings.
//!
//! Poses are resolved sequentially, in frame order, because the interpolator only moves forward.
//! Once every frame has its pose the frames are independent and depth rendering runs in parallel.
use std::fs::File;
use std::io::Read;
use std::path::Path;

use cgmath::Point3;
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::calibration::{Calibration, CropOrder, PinholeCamera};
use crate::depth::{render_depth, DepthConfig, DepthRaster};
use crate::distortion::UndistortOptions;
use crate::interpolate::PoseInterpolator;
use crate::pose::{EulerOrder, Pose};
use crate::transform::TransformChain;
use crate::Error;

pub fn progress_bar(length: u64, message: &str, verbose: bool) -> ProgressBar {
    if !verbose {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(length);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:40}] {percent}% ({eta})")
            .progress_chars("#-"),
    );
    pb.set_message(message);
    pb
}

fn default_time_offset() -> f64 {
    18.0
}

/// Everything a run needs besides the input streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub calibration: Calibration,
    #[serde(default)]
    pub euler_order: EulerOrder,
    /// Seconds added to video timestamps to bring them onto the pose clock (UTC to GPS).
    #[serde(default = "default_time_offset")]
    pub time_offset: f64,
    #[serde(default)]
    pub crop_order: CropOrder,
    #[serde(default)]
    pub undistort: UndistortOptions,
    #[serde(default)]
    pub depth: DepthConfig,
    /// Seconds of video to process after the first aligned frame.
    #[serde(default)]
    pub duration: Option<f64>,
}

impl PipelineConfig {
    pub fn new(calibration: Calibration) -> Self {
        PipelineConfig {
            calibration,
            euler_order: EulerOrder::default(),
            time_offset: default_time_offset(),
            crop_order: CropOrder::default(),
            undistort: UndistortOptions::default(),
            depth: DepthConfig::default(),
            duration: None,
        }
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, Error> {
        let config: PipelineConfig = serde_yaml::from_str(contents)?;
        config.calibration.validate()?;
        config.undistort.validate()?;
        config.depth.validate()?;
        if let Some(d) = config.duration {
            if !(d >= 0.0) {
                return Err(Error::Config(format!("duration must be non-negative, got {}", d)));
            }
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let mut contents = String::new();
        File::open(path)?.read_to_string(&mut contents)?;
        Self::from_yaml_str(&contents)
    }

    pub fn transform_chain(&self) -> Result<TransformChain, Error> {
        Ok(TransformChain::new(self.calibration.extrinsic()?))
    }
}

/// A video frame with its resolved poses.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    /// Position of the frame in the video.
    pub index: usize,
    /// Timestamp on the pose clock.
    pub timestamp: f64,
    pub body_pose: Pose,
    pub camera_pose: Pose,
}

/// A frame that could not be aligned.
#[derive(Debug)]
pub struct SkippedFrame {
    pub index: usize,
    pub timestamp: f64,
    pub reason: Error,
}

#[derive(Debug, Default)]
pub struct AlignReport {
    pub frames: Vec<CameraFrame>,
    pub skipped: Vec<SkippedFrame>,
    /// Frames dropped by the duration limit.
    pub truncated: usize,
}

/// Assigns camera poses to video frames.
pub struct FrameAligner<I: Iterator<Item = Pose>> {
    interpolator: PoseInterpolator<I>,
    chain: TransformChain,
    time_offset: f64,
    duration: Option<f64>,
}

impl<I: Iterator<Item = Pose>> FrameAligner<I> {
    pub fn new(
        interpolator: PoseInterpolator<I>,
        chain: TransformChain,
        time_offset: f64,
        duration: Option<f64>,
    ) -> Self {
        FrameAligner {
            interpolator,
            chain,
            time_offset,
            duration,
        }
    }

    /// Pose one frame given its timestamp on the video clock.
    pub fn align(&mut self, index: usize, video_timestamp: f64) -> Result<CameraFrame, Error> {
        let timestamp = video_timestamp + self.time_offset;
        let body_pose = self.interpolator.interpolate(timestamp)?;
        let camera_pose = self.chain.camera_pose(&body_pose);
        Ok(CameraFrame {
            index,
            timestamp,
            body_pose,
            camera_pose,
        })
    }

    /// Pose every frame. Frames that fail are reported and skipped, the run continues.
    pub fn align_all(&mut self, video_timestamps: &[f64]) -> AlignReport {
        let mut report = AlignReport::default();
        let mut first: Option<f64> = None;
        for (index, t) in video_timestamps.iter().enumerate() {
            if let (Some(first), Some(duration)) = (first, self.duration) {
                if t + self.time_offset > first + duration {
                    report.truncated = video_timestamps.len() - index;
                    debug!("duration limit reached at frame {}", index);
                    break;
                }
            }
            match self.align(index, *t) {
                Ok(frame) => {
                    first.get_or_insert(frame.timestamp);
                    report.frames.push(frame);
                }
                Err(reason) => {
                    debug!("skipping frame {}: {}", index, reason);
                    report.skipped.push(SkippedFrame {
                        index,
                        timestamp: t + self.time_offset,
                        reason,
                    });
                }
            }
        }

        info!(
            "Aligned {} of {} frames",
            report.frames.len(),
            video_timestamps.len()
        );
        if !report.skipped.is_empty() {
            warn!(
                "{} frames had no bracketing poses or bad input",
                report.skipped.len()
            );
        }
        report
    }
}

/// Render a depth map for every frame. Frames are independent and rendered in parallel.
pub fn render_frames(
    frames: &[CameraFrame],
    camera: &PinholeCamera,
    points: &[Point3<f64>],
    config: &DepthConfig,
    verbose: bool,
) -> Vec<DepthRaster> {
    frames
        .par_iter()
        .progress_with(progress_bar(frames.len() as u64, "Rendering depth", verbose))
        .map(|frame| render_depth(frame.camera_pose.transform(), camera, points, config))
        .collect()
}
