//! COLMAP sparse model text files, so aligned frames can seed a reconstruction.
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use cgmath::Point3;

use crate::calibration::PinholeCamera;
use crate::pose::Pose;

/// `cameras.txt` with a single pinhole camera of id 1.
pub fn write_cameras<W: Write>(out: &mut W, camera: &PinholeCamera) -> Result<(), std::io::Error> {
    writeln!(out, "# CAMERA_ID, MODEL, WIDTH, HEIGHT, PARAMS[]")?;
    writeln!(
        out,
        "1 PINHOLE {} {} {} {} {} {}",
        camera.width, camera.height, camera.fx, camera.fy, camera.cx, camera.cy
    )
}

/// `images.txt` with one entry per `(name, camera pose)`. Poses are stored as world to camera
/// extrinsics and every image has an empty observation line.
pub fn write_images<W: Write>(out: &mut W, images: &[(String, Pose)]) -> Result<(), std::io::Error> {
    writeln!(out, "# IMAGE_ID, QW, QX, QY, QZ, TX, TY, TZ, CAMERA_ID, NAME")?;
    writeln!(out, "# POINTS2D[] as (X, Y, POINT3D_ID)")?;
    for (i, (name, pose)) in images.iter().enumerate() {
        let (q, t) = pose.extrinsic();
        writeln!(
            out,
            "{} {} {} {} {} {} {} {} 1 {}",
            i + 1,
            q.s,
            q.v.x,
            q.v.y,
            q.v.z,
            t.x,
            t.y,
            t.z,
            name
        )?;
        writeln!(out)?;
    }
    Ok(())
}

/// `points3D.txt` without tracks.
pub fn write_points<W: Write>(out: &mut W, points: &[Point3<f64>]) -> Result<(), std::io::Error> {
    writeln!(out, "# POINT3D_ID, X, Y, Z, R, G, B, ERROR, TRACK[]")?;
    for (i, p) in points.iter().enumerate() {
        writeln!(out, "{} {} {} {} 128 128 128 0", i + 1, p.x, p.y, p.z)?;
    }
    Ok(())
}

/// Write `cameras.txt`, `images.txt` and `points3D.txt` into `dir`.
pub fn save_model(
    dir: &Path,
    camera: &PinholeCamera,
    images: &[(String, Pose)],
    points: &[Point3<f64>],
) -> Result<(), std::io::Error> {
    std::fs::create_dir_all(dir)?;
    write_cameras(&mut BufWriter::new(File::create(dir.join("cameras.txt"))?), camera)?;
    write_images(&mut BufWriter::new(File::create(dir.join("images.txt"))?), images)?;
    write_points(&mut BufWriter::new(File::create(dir.join("points3D.txt"))?), points)
}

#[test]
fn images_store_world_to_camera() {
    use cgmath::{Quaternion, Vector3};
    let pose = Pose::new(
        3.0,
        Vector3::new(1.0, 2.0, 3.0),
        Quaternion::new(1.0, 0.0, 0.0, 0.0),
    )
    .unwrap();
    let mut out = Vec::new();
    write_images(&mut out, &[("a.jpg".to_string(), pose)]).unwrap();
    let text = String::from_utf8(out).unwrap();
    let fields = text.lines().nth(2).unwrap().split_whitespace().collect::<Vec<_>>();
    let values = fields[1..8]
        .iter()
        .map(|x| x.parse::<f64>().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(values, vec![1.0, 0.0, 0.0, 0.0, -1.0, -2.0, -3.0]);
    assert_eq!(fields[8..], ["1", "a.jpg"]);
}
