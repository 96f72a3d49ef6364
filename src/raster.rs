//! Dense row-major 2D buffers for images, depth maps and lookup tables.
use crate::Error;

/// Row-major `width x height` grid. `(0, 0)` is the top left pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster<T> {
    width: usize,
    height: usize,
    data: Vec<T>,
}

impl<T: Clone> Raster<T> {
    pub fn new(width: usize, height: usize, fill: T) -> Self {
        Raster {
            width,
            height,
            data: vec![fill; width * height],
        }
    }

    /// Copy out the `width x height` window whose top left corner is `(left, top)`.
    pub fn window(&self, left: usize, top: usize, width: usize, height: usize) -> Result<Self, Error> {
        let fits = |start: usize, len: usize, total: usize| {
            start.checked_add(len).map_or(false, |end| end <= total)
        };
        if !fits(left, width, self.width) || !fits(top, height, self.height) {
            return Err(Error::DegenerateInput(format!(
                "window {}x{}+{}+{} does not fit a {}x{} raster",
                width, height, left, top, self.width, self.height
            )));
        }
        let mut data = Vec::with_capacity(width * height);
        for row in self.data.chunks(self.width).skip(top).take(height) {
            data.extend_from_slice(&row[left..left + width]);
        }
        Ok(Raster {
            width,
            height,
            data,
        })
    }
}

impl<T> Raster<T> {
    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Result<Self, Error> {
        if data.len() != width * height {
            return Err(Error::DegenerateInput(format!(
                "{} values cannot fill a {}x{} raster",
                data.len(),
                width,
                height
            )));
        }
        Ok(Raster {
            width,
            height,
            data,
        })
    }

    pub fn from_fn<F: FnMut(usize, usize) -> T>(width: usize, height: usize, mut f: F) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Raster {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    pub fn get_ref(&self, x: usize, y: usize) -> &T {
        &self.data[y * self.width + x]
    }

    pub fn get_mut(&mut self, x: usize, y: usize) -> &mut T {
        &mut self.data[y * self.width + x]
    }

    pub fn set(&mut self, x: usize, y: usize, value: T) {
        self.data[y * self.width + x] = value;
    }

    pub fn rows(&self) -> std::slice::Chunks<'_, T> {
        self.data.chunks(self.width.max(1))
    }

    pub fn map<U, F: FnMut(&T) -> U>(&self, f: F) -> Raster<U> {
        Raster {
            width: self.width,
            height: self.height,
            data: self.data.iter().map(f).collect(),
        }
    }
}

impl<T: Copy> Raster<T> {
    pub fn get(&self, x: usize, y: usize) -> T {
        self.data[y * self.width + x]
    }
}

/// Pixel types that can be resampled at fractional positions.
pub trait Sample: Copy + Default + Send + Sync {
    /// Blend the four neighbours `[top left, top right, bottom left, bottom right]` with
    /// horizontal weight `wx` and vertical weight `wy` toward the right and bottom neighbours.
    fn blend(corners: [Self; 4], wx: f32, wy: f32) -> Self;
}

fn lerp2(c: [f32; 4], wx: f32, wy: f32) -> f32 {
    let top = c[0] * (1.0 - wx) + c[1] * wx;
    let bottom = c[2] * (1.0 - wx) + c[3] * wx;
    top * (1.0 - wy) + bottom * wy
}

impl Sample for f32 {
    fn blend(c: [f32; 4], wx: f32, wy: f32) -> f32 {
        lerp2(c, wx, wy)
    }
}

impl Sample for u8 {
    fn blend(c: [u8; 4], wx: f32, wy: f32) -> u8 {
        let v = lerp2([c[0] as f32, c[1] as f32, c[2] as f32, c[3] as f32], wx, wy);
        v.round().max(0.0).min(std::u8::MAX as f32) as u8
    }
}

impl Sample for u16 {
    fn blend(c: [u16; 4], wx: f32, wy: f32) -> u16 {
        let v = lerp2([c[0] as f32, c[1] as f32, c[2] as f32, c[3] as f32], wx, wy);
        v.round().max(0.0).min(std::u16::MAX as f32) as u16
    }
}

impl Sample for [u8; 3] {
    fn blend(c: [[u8; 3]; 4], wx: f32, wy: f32) -> [u8; 3] {
        let mut out = [0u8; 3];
        for (i, o) in out.iter_mut().enumerate() {
            *o = u8::blend([c[0][i], c[1][i], c[2][i], c[3][i]], wx, wy);
        }
        out
    }
}

/// Bilinear sample of `raster` at fractional position `(x, y)`. Neighbours past the last row or
/// column are clamped to the edge. Callers must keep `(x, y)` inside the raster.
pub fn sample_bilinear<T: Sample>(raster: &Raster<T>, x: f32, y: f32) -> T {
    let x0 = (x.floor().max(0.0) as usize).min(raster.width - 1);
    let y0 = (y.floor().max(0.0) as usize).min(raster.height - 1);
    let x1 = (x0 + 1).min(raster.width - 1);
    let y1 = (y0 + 1).min(raster.height - 1);
    let wx = (x - x0 as f32).max(0.0).min(1.0);
    let wy = (y - y0 as f32).max(0.0).min(1.0);
    T::blend(
        [
            raster.get(x0, y0),
            raster.get(x1, y0),
            raster.get(x0, y1),
            raster.get(x1, y1),
        ],
        wx,
        wy,
    )
}

#[test]
fn window_copies_rows() {
    let r = Raster::from_fn(4, 3, |x, y| (x + 10 * y) as u16);
    let w = r.window(1, 1, 2, 2).unwrap();
    assert!(r.window(3, 0, 2, 1).is_err());
    assert_eq!(w.into_vec(), vec![11, 12, 21, 22]);
}

#[test]
fn from_vec_checks_size() {
    assert!(Raster::from_vec(2, 2, vec![0u8; 3]).is_err());
    assert_eq!(Raster::from_vec(2, 2, vec![1u8; 4]).unwrap().get(1, 1), 1);
}

#[test]
fn bilinear_blends_neighbours() {
    let r = Raster::from_vec(2, 2, vec![0.0f32, 10.0, 20.0, 30.0]).unwrap();
    assert_eq!(sample_bilinear(&r, 0.0, 0.0), 0.0);
    assert_eq!(sample_bilinear(&r, 0.5, 0.0), 5.0);
    assert_eq!(sample_bilinear(&r, 0.5, 0.5), 15.0);
    assert_eq!(sample_bilinear(&r, 1.0, 1.0), 30.0);
    let rgb = Raster::from_vec(2, 1, vec![[0u8, 100, 255], [100, 200, 255]]).unwrap();
    assert_eq!(sample_bilinear(&rgb, 0.5, 0.0), [50, 150, 255]);
}
