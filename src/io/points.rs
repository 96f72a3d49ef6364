//! Point clouds: the time tagged text export of the LiDAR and PLY files.
use cgmath::Point3;
use ply_rs::parser::Parser;
use ply_rs::ply::{
    Addable, DefaultElement, ElementDef, Ply, Property, PropertyDef, PropertyType, ScalarType,
};
use ply_rs::writer::Writer;

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use super::{floats, parse_lines, read_string};
use crate::stream::Stamped;
use crate::Error;

/// Parse `x y z t` lines into time tagged points. Ordering is checked later by the stream cursor.
pub fn parse_point_stream(contents: &str) -> Result<Vec<Stamped<Point3<f64>>>, Error> {
    Ok(parse_lines(contents, "point stream", |x| floats(x, 4))?
        .into_iter()
        .map(|v| Stamped::new(v[3], Point3::new(v[0], v[1], v[2])))
        .collect())
}

pub fn read_point_stream(path: &Path) -> Result<Vec<Stamped<Point3<f64>>>, Error> {
    parse_point_stream(&read_string(path)?)
}

fn scalar(p: &Property) -> Option<f64> {
    match p {
        Property::Char(x) => Some(*x as f64),
        Property::UChar(x) => Some(*x as f64),
        Property::Short(x) => Some(*x as f64),
        Property::UShort(x) => Some(*x as f64),
        Property::Int(x) => Some(*x as f64),
        Property::UInt(x) => Some(*x as f64),
        Property::Float(x) => Some(*x as f64),
        Property::Double(x) => Some(*x),
        _ => None,
    }
}

/// Read the `x`, `y` and `z` properties of every vertex. Other properties are ignored.
pub fn read_ply(path: &Path) -> Result<Vec<Point3<f64>>, Error> {
    let mut file = BufReader::new(File::open(path)?);
    let parser = Parser::<DefaultElement>::new();
    let ply = parser.read_ply(&mut file)?;
    let vertices = match ply.payload.get("vertex") {
        Some(v) => v,
        None => return Ok(Vec::new()),
    };
    vertices
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let coordinate = |name: &str| {
                v.get(name).and_then(scalar).ok_or_else(|| {
                    Error::ParseError(format!(
                        "{}: vertex {} has no numeric {} property",
                        path.display(),
                        i,
                        name
                    ))
                })
            };
            Ok(Point3::new(
                coordinate("x")?,
                coordinate("y")?,
                coordinate("z")?,
            ))
        })
        .collect()
}

/// Write points as an ASCII PLY with double precision coordinates.
pub fn write_ply(path: &Path, points: &[Point3<f64>]) -> Result<(), std::io::Error> {
    let mut ply = Ply::<DefaultElement>::new();
    let mut vertex = ElementDef::new("vertex".to_string());
    for name in &["x", "y", "z"] {
        vertex.properties.add(PropertyDef::new(
            name.to_string(),
            PropertyType::Scalar(ScalarType::Double),
        ));
    }
    ply.header.elements.add(vertex);

    let elements = points
        .iter()
        .map(|point| {
            let mut p = DefaultElement::new();
            p.insert("x".to_string(), Property::Double(point.x));
            p.insert("y".to_string(), Property::Double(point.y));
            p.insert("z".to_string(), Property::Double(point.z));
            p
        })
        .collect();
    ply.payload.insert("vertex".to_string(), elements);

    let mut file = BufWriter::new(File::create(path)?);
    let writer = Writer::new();
    writer.write_ply(&mut file, &mut ply).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn point_stream_lines() {
        let points = parse_point_stream("# x y z t\n1 2 3 0.5\n4 5 6 0.75\n").unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].timestamp, 0.75);
        assert_eq!(points[1].payload, Point3::new(4.0, 5.0, 6.0));
        assert!(parse_point_stream("1 2 3\n").is_err());
    }

    #[test]
    fn ply_keeps_large_coordinates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cloud.ply");
        let points = vec![
            Point3::new(500123.125, 5401234.5, 312.0625),
            Point3::new(-1.0, 0.0, 2.5),
        ];
        write_ply(&path, &points).unwrap();
        assert_eq!(read_ply(&path).unwrap(), points);
    }
}
