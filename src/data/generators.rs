//! Analytic field generators over spherical position.
//!
//! Each entity's centroid is projected onto the unit sphere and converted to
//! longitude in `[0, 2π)` and latitude in `[-π/2, π/2]`.

use std::f64::consts::TAU;

/// Longitude/latitude in radians.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SphericalPosition {
    pub lon: f64,
    pub lat: f64,
}

impl SphericalPosition {
    /// Project `xyz` onto the unit sphere. The origin maps to `(0, 0)`.
    pub fn from_cartesian(xyz: [f64; 3]) -> Self {
        let norm = (xyz[0] * xyz[0] + xyz[1] * xyz[1] + xyz[2] * xyz[2]).sqrt();
        if norm == 0.0 {
            return Self { lon: 0.0, lat: 0.0 };
        }
        let [x, y, z] = xyz.map(|c| c / norm);
        let mut lon = y.atan2(x);
        if lon < 0.0 {
            lon += TAU;
        }
        // tiny negative angles round up to TAU
        if lon >= TAU {
            lon -= TAU;
        }
        Self {
            lon,
            lat: z.clamp(-1.0, 1.0).asin(),
        }
    }
}

/// Pure function from position to `width` values.
pub trait FieldGenerator {
    fn width(&self) -> usize;
    fn evaluate(&self, pos: SphericalPosition, out: &mut [f64]);
}

/// `2 + sin(2·lat)^16 · cos(16·lon)`.
#[derive(Copy, Clone, Debug, Default)]
pub struct ScalarWave;

impl FieldGenerator for ScalarWave {
    fn width(&self) -> usize {
        1
    }

    fn evaluate(&self, pos: SphericalPosition, out: &mut [f64]) {
        out[0] = 2.0 + (2.0 * pos.lat).sin().powi(16) * (16.0 * pos.lon).cos();
    }
}

/// Component `i` (1-indexed): `(2 + cos(lon)^2 · cos(2·lat)) · i`.
#[derive(Copy, Clone, Debug)]
pub struct VectorHarmonic {
    pub width: usize,
}

impl FieldGenerator for VectorHarmonic {
    fn width(&self) -> usize {
        self.width
    }

    fn evaluate(&self, pos: SphericalPosition, out: &mut [f64]) {
        let base = 2.0 + pos.lon.cos().powi(2) * (2.0 * pos.lat).cos();
        for (i, v) in out.iter_mut().enumerate() {
            *v = base * (i + 1) as f64;
        }
    }
}

/// Any closure `Fn(SphericalPosition, &mut [f64])` of known width.
pub struct FnGenerator<F> {
    pub width: usize,
    pub f: F,
}

impl<F: Fn(SphericalPosition, &mut [f64])> FieldGenerator for FnGenerator<F> {
    fn width(&self) -> usize {
        self.width
    }

    fn evaluate(&self, pos: SphericalPosition, out: &mut [f64]) {
        (self.f)(pos, out)
    }
}
