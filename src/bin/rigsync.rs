extern crate cgmath;
extern crate env_logger;
extern crate indicatif;
extern crate itertools;
extern crate log;
extern crate rayon;
extern crate rigsync;
extern crate structopt;

use cgmath::Point3;
use indicatif::ParallelProgressIterator;
use itertools::Itertools;
use log::{info, warn};
use rayon::prelude::*;
use rigsync::io::{colmap, images, points, records, tum};
use rigsync::*;
use std::path::{Path, PathBuf};
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
struct AlignOpt {
    /// Binary IMU records (22 little-endian doubles each).
    #[structopt(name = "POSES", parse(from_os_str))]
    poses: PathBuf,

    /// Video frame timestamps, one per line, on the video clock.
    #[structopt(name = "TIMESTAMPS", parse(from_os_str))]
    timestamps: PathBuf,

    /// Pipeline configuration in YAML.
    #[structopt(name = "CONFIG", parse(from_os_str))]
    config: PathBuf,

    /// Output directory. Receives groundtruth.txt and a COLMAP model in sparse/.
    #[structopt(name = "OUT", parse(from_os_str))]
    out: PathBuf,

    /// Read POSES as surveyed records (52 bytes each) instead of IMU records.
    #[structopt(long = "survey")]
    survey: bool,

    /// World point cloud in .ply format. When given, a depth map is rendered for every frame.
    #[structopt(long = "points", parse(from_os_str))]
    points: Option<PathBuf>,

    /// Override the configured time offset between the video and pose clocks.
    #[structopt(long = "time-offset", allow_hyphen_values = true)]
    time_offset: Option<f64>,

    /// Show progress bars.
    #[structopt(short = "v", long = "verbose")]
    verbose: bool,
}

#[derive(StructOpt, Debug)]
struct SweepsOpt {
    /// Binary surveyed pose records, one per LiDAR sweep.
    #[structopt(name = "POSES", parse(from_os_str))]
    poses: PathBuf,

    /// Time tagged LiDAR points as `x y z t` lines, in the world frame.
    #[structopt(name = "POINTS", parse(from_os_str))]
    points: PathBuf,

    /// Output directory.
    #[structopt(name = "OUT", parse(from_os_str))]
    out: PathBuf,

    /// Only assemble sweeps within this many seconds of the first pose.
    #[structopt(long = "duration")]
    duration: Option<f64>,
}

#[derive(StructOpt, Debug)]
struct UndistortOpt {
    /// Pipeline configuration in YAML.
    #[structopt(name = "CONFIG", parse(from_os_str))]
    config: PathBuf,

    /// Output directory. Images keep their file names.
    #[structopt(name = "OUT", parse(from_os_str))]
    out: PathBuf,

    /// Raw images.
    #[structopt(name = "IMAGES", parse(from_os_str), required = true)]
    images: Vec<PathBuf>,

    /// Replace the configured calibration with this file. Both the pipeline layout and the rig's
    /// own parameter files are accepted.
    #[structopt(long = "calibration", parse(from_os_str))]
    calibration: Option<PathBuf>,

    /// Show progress bars.
    #[structopt(short = "v", long = "verbose")]
    verbose: bool,
}

#[derive(StructOpt, Debug)]
struct DepthOpt {
    /// Camera trajectory in TUM format, as written by `align`.
    #[structopt(name = "TRAJECTORY", parse(from_os_str))]
    trajectory: PathBuf,

    /// World point cloud in .ply format.
    #[structopt(name = "CLOUD", parse(from_os_str))]
    cloud: PathBuf,

    /// Pipeline configuration in YAML.
    #[structopt(name = "CONFIG", parse(from_os_str))]
    config: PathBuf,

    /// Output directory. Receives depth/*.png and depth.txt.
    #[structopt(name = "OUT", parse(from_os_str))]
    out: PathBuf,

    /// Show progress bars.
    #[structopt(short = "v", long = "verbose")]
    verbose: bool,
}

#[derive(StructOpt, Debug)]
#[structopt(
    name = "rigsync",
    about = "Tools for aligning mobile mapping rig recordings into posed camera datasets."
)]
enum Opt {
    /// Pose every video frame from the rig trajectory.
    Align(AlignOpt),
    /// Cut a time tagged point stream into per pose LiDAR sweeps.
    Sweeps(SweepsOpt),
    /// Undistort and crop raw images.
    Undistort(UndistortOpt),
    /// Render depth maps for a camera trajectory.
    Depth(DepthOpt),
}

fn frame_name(timestamp: f64, extension: &str) -> String {
    format!("{:.6}.{}", timestamp, extension)
}

/// Write `depth/<timestamp>.png` for every raster and list them in `depth.txt`.
fn save_depth_maps(
    out: &Path,
    timestamps: &[f64],
    rasters: &[DepthRaster],
    config: &DepthConfig,
) -> Result<(), Error> {
    let dir = out.join("depth");
    std::fs::create_dir_all(&dir)?;
    let mut entries = Vec::with_capacity(rasters.len());
    for (t, raster) in timestamps.iter().zip(rasters) {
        let name = frame_name(*t, "png");
        images::write_depth(&dir.join(&name), &raster.to_millimeters(config))?;
        entries.push((*t, format!("depth/{}", name)));
    }
    let stats = rasters.iter().fold(ProjectionStats::default(), |acc, r| {
        let s = r.stats();
        ProjectionStats {
            projected: acc.projected + s.projected,
            behind_camera: acc.behind_camera + s.behind_camera,
            out_of_bounds: acc.out_of_bounds + s.out_of_bounds,
            beyond_far: acc.beyond_far + s.beyond_far,
            occluded: acc.occluded + s.occluded,
        }
    });
    info!("Depth projection: {:?}", stats);
    tum::save_associations(&out.join("depth.txt"), &entries)?;
    Ok(())
}

fn run_align(opt: AlignOpt) -> Result<(), Error> {
    let mut config = PipelineConfig::load(&opt.config)?;
    if let Some(offset) = opt.time_offset {
        config.time_offset = offset;
    }
    let poses = if opt.survey {
        records::read_survey_poses(&opt.poses)?
    } else {
        records::read_imu_poses(&opt.poses, config.euler_order)?
    };
    let timestamps = tum::read_timestamps(&opt.timestamps)?;

    let mut aligner = FrameAligner::new(
        PoseInterpolator::new(poses),
        config.transform_chain()?,
        config.time_offset,
        config.duration,
    );
    let report = aligner.align_all(&timestamps);
    if !report.skipped.is_empty() {
        warn!(
            "Skipped frames: {}",
            report.skipped.iter().map(|s| s.index).join(", ")
        );
    }

    std::fs::create_dir_all(&opt.out)?;
    let camera_poses = report
        .frames
        .iter()
        .map(|f| f.camera_pose.clone())
        .collect::<Vec<_>>();
    tum::save_trajectory(&opt.out.join("groundtruth.txt"), &camera_poses)?;

    let camera = output_camera(&config.calibration, &config.undistort, config.crop_order)?;
    let cloud = match &opt.points {
        Some(path) => points::read_ply(path)?,
        None => Vec::new(),
    };
    let named = report
        .frames
        .iter()
        .map(|f| (frame_name(f.timestamp, "png"), f.camera_pose.clone()))
        .collect::<Vec<_>>();
    colmap::save_model(&opt.out.join("sparse"), &camera, &named, &cloud)?;

    if opt.points.is_some() {
        let rasters = render_frames(&report.frames, &camera, &cloud, &config.depth, opt.verbose);
        let stamps = report.frames.iter().map(|f| f.timestamp).collect::<Vec<_>>();
        save_depth_maps(&opt.out, &stamps, &rasters, &config.depth)?;
    }

    println!(
        "Aligned {} of {} frames",
        report.frames.len(),
        timestamps.len()
    );
    Ok(())
}

fn run_sweeps(opt: SweepsOpt) -> Result<(), Error> {
    let mut poses = records::read_survey_poses(&opt.poses)?;
    if let (Some(duration), Some(first)) = (opt.duration, poses.first().map(|p| p.timestamp())) {
        poses.retain(|p| p.timestamp() <= first + duration);
    }
    let stream = points::read_point_stream(&opt.points)?;

    let mut assembler = SweepAssembler::new(StreamCursor::new(poses), StreamCursor::new(stream));
    let mut accumulator = PointAccumulator::new();
    let sweeps = assembler.collect_into(&mut accumulator)?;

    let dir = opt.out.join("point");
    std::fs::create_dir_all(&dir)?;
    let mut entries = Vec::new();
    let mut sweep_poses = Vec::new();
    for sweep in sweeps.iter().filter(|s| !s.is_empty()) {
        let name = frame_name(sweep.timestamp(), "ply");
        points::write_ply(&dir.join(&name), &sweep.points_in_body())?;
        entries.push((sweep.timestamp(), format!("point/{}", name)));
        sweep_poses.push(sweep.pose.clone());
    }
    tum::save_trajectory(&opt.out.join("groundtruth_lidar.txt"), &sweep_poses)?;
    tum::save_associations(&opt.out.join("point.txt"), &entries)?;
    points::write_ply(&opt.out.join("points3D.ply"), accumulator.points())?;

    println!(
        "Assembled {} sweeps with {} points",
        entries.len(),
        accumulator.len()
    );
    Ok(())
}

fn run_undistort(opt: UndistortOpt) -> Result<(), Error> {
    let mut config = PipelineConfig::load(&opt.config)?;
    if let Some(path) = &opt.calibration {
        config.calibration = Calibration::load_any(path)?;
    }
    let undistorter = Undistorter::new(
        &config.calibration,
        &config.undistort,
        config.crop_order,
        opt.verbose,
    )?;
    std::fs::create_dir_all(&opt.out)?;

    let out = &opt.out;
    opt.images
        .par_iter()
        .progress_with(progress_bar(
            opt.images.len() as u64,
            "Undistorting",
            opt.verbose,
        ))
        .map(|path| {
            let name = path
                .file_name()
                .ok_or_else(|| Error::Config(format!("{} is not a file", path.display())))?;
            let image = images::read_rgb(path)?;
            images::write_rgb(&out.join(name), &undistorter.apply(&image)?)
        })
        .collect::<Result<Vec<_>, Error>>()?;

    if let Some(mask) = undistorter.mask() {
        images::write_mask(&out.join("mask.png"), &mask)?;
    }

    let camera = undistorter.camera();
    println!(
        "Undistorted {} images to {}x{} fx={} fy={} cx={} cy={}",
        opt.images.len(),
        camera.width,
        camera.height,
        camera.fx,
        camera.fy,
        camera.cx,
        camera.cy
    );
    Ok(())
}

fn run_depth(opt: DepthOpt) -> Result<(), Error> {
    let config = PipelineConfig::load(&opt.config)?;
    let trajectory = tum::read_trajectory(&opt.trajectory)?;
    let cloud: Vec<Point3<f64>> = points::read_ply(&opt.cloud)?;
    let camera = output_camera(&config.calibration, &config.undistort, config.crop_order)?;

    let rasters = trajectory
        .par_iter()
        .progress_with(progress_bar(
            trajectory.len() as u64,
            "Rendering depth",
            opt.verbose,
        ))
        .map(|pose| render_depth(pose.transform(), &camera, &cloud, &config.depth))
        .collect::<Vec<_>>();
    let stamps = trajectory.iter().map(|p| p.timestamp()).collect::<Vec<_>>();
    save_depth_maps(&opt.out, &stamps, &rasters, &config.depth)?;

    println!("Rendered {} depth maps", rasters.len());
    Ok(())
}

fn main() -> Result<(), rigsync::Error> {
    env_logger::init();
    match Opt::from_args() {
        Opt::Align(opt) => run_align(opt),
        Opt::Sweeps(opt) => run_sweeps(opt),
        Opt::Undistort(opt) => run_undistort(opt),
        Opt::Depth(opt) => run_depth(opt),
    }
}
