//! Readers and writers for the rig's file formats and the dataset layout.
//!
//! Everything here is a thin adapter: records are turned into [`Pose`](crate::Pose)s and points as
//! early as possible and the rest of the crate never sees a file.
use nom::character::complete::space0;
use nom::error::VerboseError;
use nom::multi::count;
use nom::number::complete::double;
use nom::sequence::{preceded, terminated};
use nom::IResult;

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::Error;

pub mod colmap;
pub mod images;
pub mod points;
pub mod records;
pub mod tum;

/// Exactly `n` whitespace separated floats.
pub(crate) fn floats(input: &str, n: usize) -> IResult<&str, Vec<f64>, VerboseError<&str>> {
    terminated(count(preceded(space0, double), n), space0)(input)
}

/// Run `parser` on every non-empty line of `contents` that does not start with `#`. `what` names
/// the file in error messages.
pub(crate) fn parse_lines<T, F>(contents: &str, what: &str, parser: F) -> Result<Vec<T>, Error>
where
    F: Fn(&str) -> IResult<&str, T, VerboseError<&str>>,
{
    let mut out = Vec::new();
    for (i, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (_, value) = nom::combinator::all_consuming(&parser)(line).map_err(|x| match x {
            nom::Err::Error(e) | nom::Err::Failure(e) => Error::ParseError(format!(
                "{} line {}: {}",
                what,
                i + 1,
                nom::error::convert_error(line, e)
            )),
            nom::Err::Incomplete(x) => {
                Error::ParseError(format!("{} line {}: {:?}", what, i + 1, x))
            }
        })?;
        out.push(value);
    }
    Ok(out)
}

pub(crate) fn read_string(path: &Path) -> Result<String, Error> {
    let mut contents = String::new();
    File::open(path)?.read_to_string(&mut contents)?;
    Ok(contents)
}

pub(crate) fn read_bytes(path: &Path) -> Result<Vec<u8>, Error> {
    let mut contents = Vec::new();
    File::open(path)?.read_to_end(&mut contents)?;
    Ok(contents)
}

#[test]
fn skips_comments_and_reports_line() {
    let parsed = parse_lines("# header\n\n1 2\n 3 4 \n", "test", |x| floats(x, 2)).unwrap();
    assert_eq!(parsed, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
    match parse_lines("1 2\n1 x\n", "test", |x| floats(x, 2)) {
        Err(Error::ParseError(msg)) => assert!(msg.starts_with("test line 2")),
        x => panic!("expected parse error, got {:?}", x),
    }
}
