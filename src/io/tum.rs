//! Plain text trajectories, timestamp lists and association files in the TUM RGB-D layout.
use cgmath::{Quaternion, Vector3};
use nom::character::complete::{not_line_ending, space1};
use nom::error::VerboseError;
use nom::number::complete::double;
use nom::sequence::{pair, preceded};
use nom::IResult;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::{floats, parse_lines, read_string};
use crate::pose::Pose;
use crate::Error;

/// Parse `timestamp tx ty tz qx qy qz qw` lines.
pub fn parse_trajectory(contents: &str) -> Result<Vec<Pose>, Error> {
    let rows = parse_lines(contents, "trajectory", |x| floats(x, 8))?;
    rows.iter()
        .map(|r| {
            Pose::new(
                r[0],
                Vector3::new(r[1], r[2], r[3]),
                Quaternion::new(r[7], r[4], r[5], r[6]),
            )
        })
        .collect()
}

pub fn read_trajectory(path: &Path) -> Result<Vec<Pose>, Error> {
    parse_trajectory(&read_string(path)?)
}

pub fn write_trajectory<W: Write>(out: &mut W, poses: &[Pose]) -> Result<(), std::io::Error> {
    writeln!(out, "# timestamp tx ty tz qx qy qz qw")?;
    for pose in poses {
        let t = pose.translation();
        let q = pose.rotation();
        writeln!(
            out,
            "{} {} {} {} {} {} {} {}",
            pose.timestamp(),
            t.x,
            t.y,
            t.z,
            q.v.x,
            q.v.y,
            q.v.z,
            q.s
        )?;
    }
    Ok(())
}

pub fn save_trajectory(path: &Path, poses: &[Pose]) -> Result<(), std::io::Error> {
    let mut file = BufWriter::new(File::create(path)?);
    write_trajectory(&mut file, poses)
}

/// One timestamp per line, the first column of each line.
pub fn parse_timestamps(contents: &str) -> Result<Vec<f64>, Error> {
    fn timestamp(input: &str) -> IResult<&str, f64, VerboseError<&str>> {
        let (input, t) = double(input)?;
        let (input, _) = nom::combinator::opt(preceded(space1, not_line_ending))(input)?;
        Ok((input, t))
    }
    parse_lines(contents, "timestamps", timestamp)
}

pub fn read_timestamps(path: &Path) -> Result<Vec<f64>, Error> {
    parse_timestamps(&read_string(path)?)
}

/// `timestamp filename` pairs.
pub fn parse_associations(contents: &str) -> Result<Vec<(f64, String)>, Error> {
    fn association(input: &str) -> IResult<&str, (f64, String), VerboseError<&str>> {
        let (input, (t, name)) = pair(double, preceded(space1, not_line_ending))(input)?;
        Ok((input, (t, name.trim().to_string())))
    }
    parse_lines(contents, "association list", association)
}

pub fn write_associations<W: Write>(
    out: &mut W,
    entries: &[(f64, String)],
) -> Result<(), std::io::Error> {
    writeln!(out, "# timestamp filename")?;
    for (t, name) in entries {
        writeln!(out, "{} {}", t, name)?;
    }
    Ok(())
}

pub fn save_associations(path: &Path, entries: &[(f64, String)]) -> Result<(), std::io::Error> {
    let mut file = BufWriter::new(File::create(path)?);
    write_associations(&mut file, entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use cgmath::prelude::*;
    use cgmath::Deg;

    #[test]
    fn trajectory_text_round_trip() {
        let poses = vec![
            Pose::new(1.5, Vector3::new(1.0, -2.0, 3.25), Quaternion::one()).unwrap(),
            Pose::new(
                2.5,
                Vector3::new(0.0, 0.0, 1e6),
                Quaternion::from_angle_y(Deg(30.0)),
            )
            .unwrap(),
        ];
        let mut out = Vec::new();
        write_trajectory(&mut out, &poses).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("# timestamp"));
        let parsed = parse_trajectory(&text).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].timestamp(), 2.5);
        assert_abs_diff_eq!(parsed[1].translation(), poses[1].translation());
        assert_abs_diff_eq!(parsed[1].rotation(), poses[1].rotation(), epsilon = 1e-12);
    }

    #[test]
    fn rejects_short_trajectory_line() {
        assert!(matches!(
            parse_trajectory("1 2 3 4 5 6 7\n"),
            Err(Error::ParseError(_))
        ));
    }

    #[test]
    fn timestamps_take_first_column() {
        let ts = parse_timestamps("1699999999.10\n1699999999.2 extra\n\n").unwrap();
        assert_eq!(ts, vec![1699999999.10, 1699999999.2]);
    }

    #[test]
    fn associations() {
        let parsed = parse_associations("# timestamp filename\n1.25 depth/1.25.png\n").unwrap();
        assert_eq!(parsed, vec![(1.25, "depth/1.25.png".to_string())]);
        let mut out = Vec::new();
        write_associations(&mut out, &parsed).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "# timestamp filename\n1.25 depth/1.25.png\n"
        );
    }
}
