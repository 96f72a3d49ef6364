//! Binary pose records written by the rig's acquisition software.
//!
//! Both formats are flat arrays of fixed size little-endian records without a header.
use byteorder::{LittleEndian, WriteBytesExt};
use cgmath::{Quaternion, Vector3};
use log::{info, warn};
use nom::error::VerboseError;
use nom::multi::count;
use nom::number::complete::{le_f32, le_f64, le_u32};
use nom::IResult;

use std::io::Write;
use std::path::Path;

use super::read_bytes;
use crate::pose::{EulerOrder, Pose};
use crate::Error;

/// `u32 id, f64 t, f64 x y z, f32 qx qy qz qw`
pub const SURVEY_RECORD_SIZE: usize = 4 + 4 * 8 + 4 * 4;

/// 22 `f64`: `t, yaw, pitch, roll, vx, vy, vz, px, py, pz` and 12 drift and scale terms.
pub const IMU_RECORD_SIZE: usize = 22 * 8;

/// A surveyed pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurveyRecord {
    pub id: u32,
    pub timestamp: f64,
    pub position: Vector3<f64>,
    /// `[qx, qy, qz, qw]`
    pub orientation: [f32; 4],
}

impl SurveyRecord {
    pub fn to_pose(&self) -> Result<Pose, Error> {
        let [x, y, z, w] = self.orientation;
        Pose::new(
            self.timestamp,
            self.position,
            Quaternion::new(w as f64, x as f64, y as f64, z as f64),
        )
    }
}

/// A pose from the inertial navigation solution. Angles are in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuRecord {
    pub timestamp: f64,
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
    pub velocity: Vector3<f64>,
    pub position: Vector3<f64>,
}

impl ImuRecord {
    pub fn to_pose(&self, order: EulerOrder) -> Result<Pose, Error> {
        Pose::from_euler(
            self.timestamp,
            self.position,
            self.roll,
            self.pitch,
            self.yaw,
            order,
        )
    }
}

fn survey_record(input: &[u8]) -> IResult<&[u8], SurveyRecord, VerboseError<&[u8]>> {
    let (input, id) = le_u32(input)?;
    let (input, timestamp) = le_f64(input)?;
    let (input, p) = count(le_f64, 3)(input)?;
    let (input, q) = count(le_f32, 4)(input)?;
    Ok((
        input,
        SurveyRecord {
            id,
            timestamp,
            position: Vector3::new(p[0], p[1], p[2]),
            orientation: [q[0], q[1], q[2], q[3]],
        },
    ))
}

fn imu_record(input: &[u8]) -> IResult<&[u8], ImuRecord, VerboseError<&[u8]>> {
    let (input, v) = count(le_f64, 22)(input)?;
    Ok((
        input,
        ImuRecord {
            timestamp: v[0],
            yaw: v[1],
            pitch: v[2],
            roll: v[3],
            velocity: Vector3::new(v[4], v[5], v[6]),
            position: Vector3::new(v[7], v[8], v[9]),
        },
    ))
}

fn parse_records<T, F>(bytes: &[u8], size: usize, what: &str, parser: F) -> Result<Vec<T>, Error>
where
    F: Fn(&[u8]) -> IResult<&[u8], T, VerboseError<&[u8]>>,
{
    if bytes.len() % size != 0 {
        return Err(Error::ParseError(format!(
            "{} file of {} bytes is not a whole number of {} byte records",
            what,
            bytes.len(),
            size
        )));
    }
    bytes
        .chunks(size)
        .enumerate()
        .map(|(i, chunk)| {
            parser(chunk).map(|x| x.1).map_err(|_| {
                Error::ParseError(format!("{} record {} could not be parsed", what, i))
            })
        })
        .collect()
}

/// Turn records into poses, dropping (and logging) records with degenerate geometry.
fn to_poses<T, F>(records: Vec<T>, what: &str, convert: F) -> Vec<Pose>
where
    F: Fn(&T) -> Result<Pose, Error>,
{
    let total = records.len();
    let poses = records
        .iter()
        .enumerate()
        .filter_map(|(i, r)| match convert(r) {
            Ok(pose) => Some(pose),
            Err(e) => {
                warn!("dropping {} record {}: {}", what, i, e);
                None
            }
        })
        .collect::<Vec<_>>();
    info!("Read {} of {} {} poses", poses.len(), total, what);
    poses
}

pub fn parse_survey_records(bytes: &[u8]) -> Result<Vec<SurveyRecord>, Error> {
    parse_records(bytes, SURVEY_RECORD_SIZE, "survey", survey_record)
}

pub fn parse_imu_records(bytes: &[u8]) -> Result<Vec<ImuRecord>, Error> {
    parse_records(bytes, IMU_RECORD_SIZE, "imu", imu_record)
}

pub fn read_survey_poses(path: &Path) -> Result<Vec<Pose>, Error> {
    let records = parse_survey_records(&read_bytes(path)?)?;
    Ok(to_poses(records, "survey", |r| r.to_pose()))
}

pub fn read_imu_poses(path: &Path, order: EulerOrder) -> Result<Vec<Pose>, Error> {
    let records = parse_imu_records(&read_bytes(path)?)?;
    Ok(to_poses(records, "imu", |r| r.to_pose(order)))
}

pub fn write_survey_records<W: Write>(
    out: &mut W,
    records: &[SurveyRecord],
) -> Result<(), std::io::Error> {
    for r in records {
        out.write_u32::<LittleEndian>(r.id)?;
        out.write_f64::<LittleEndian>(r.timestamp)?;
        out.write_f64::<LittleEndian>(r.position.x)?;
        out.write_f64::<LittleEndian>(r.position.y)?;
        out.write_f64::<LittleEndian>(r.position.z)?;
        for q in &r.orientation {
            out.write_f32::<LittleEndian>(*q)?;
        }
    }
    Ok(())
}

pub fn write_imu_records<W: Write>(out: &mut W, records: &[ImuRecord]) -> Result<(), std::io::Error> {
    for r in records {
        let head = [
            r.timestamp,
            r.yaw,
            r.pitch,
            r.roll,
            r.velocity.x,
            r.velocity.y,
            r.velocity.z,
            r.position.x,
            r.position.y,
            r.position.z,
        ];
        for x in head.iter().chain([0.0; 12].iter()) {
            out.write_f64::<LittleEndian>(*x)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn survey_layout() {
        let record = SurveyRecord {
            id: 7,
            timestamp: 1234.5,
            position: Vector3::new(1.0, 2.0, 3.0),
            orientation: [0.0, 0.0, 0.70710677, 0.70710677],
        };
        let mut bytes = Vec::new();
        write_survey_records(&mut bytes, &[record, record]).unwrap();
        assert_eq!(bytes.len(), 2 * SURVEY_RECORD_SIZE);
        assert_eq!(&bytes[..4], &[7u8, 0, 0, 0]);

        let parsed = parse_survey_records(&bytes).unwrap();
        assert_eq!(parsed, vec![record, record]);
        let pose = parsed[0].to_pose().unwrap();
        let q = pose.rotation();
        assert_abs_diff_eq!(q.s, std::f64::consts::FRAC_1_SQRT_2, epsilon = 1e-6);
        assert_abs_diff_eq!(q.v.z, std::f64::consts::FRAC_1_SQRT_2, epsilon = 1e-6);
    }

    #[test]
    fn truncated_file_is_rejected() {
        assert!(matches!(
            parse_survey_records(&[0u8; SURVEY_RECORD_SIZE + 3]),
            Err(Error::ParseError(_))
        ));
        assert!(parse_imu_records(&[0u8; 100]).is_err());
    }

    #[test]
    fn imu_fields() {
        let record = ImuRecord {
            timestamp: 10.0,
            yaw: 0.5,
            pitch: 0.1,
            roll: -0.2,
            velocity: Vector3::new(1.0, 0.0, 0.0),
            position: Vector3::new(4.0, 5.0, 6.0),
        };
        let mut bytes = Vec::new();
        write_imu_records(&mut bytes, &[record]).unwrap();
        assert_eq!(bytes.len(), IMU_RECORD_SIZE);
        // yaw is the second field
        assert_eq!(&bytes[8..16], &0.5f64.to_le_bytes());
        let parsed = parse_imu_records(&bytes).unwrap();
        assert_eq!(parsed[0], record);
        let pose = parsed[0].to_pose(EulerOrder::Xyz).unwrap();
        assert_eq!(pose.translation(), Vector3::new(4.0, 5.0, 6.0));
    }

    #[test]
    fn degenerate_records_are_dropped() {
        let good = SurveyRecord {
            id: 0,
            timestamp: 1.0,
            position: Vector3::new(0.0, 0.0, 0.0),
            orientation: [0.0, 0.0, 0.0, 1.0],
        };
        let bad = SurveyRecord {
            orientation: [0.0; 4],
            ..good
        };
        let poses = to_poses(vec![good, bad, good], "survey", |r| r.to_pose());
        assert_eq!(poses.len(), 2);
    }
}
