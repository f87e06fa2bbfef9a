use std::ops::{Add, Sub};

use ndarray::Array2;

#[derive(Clone, Debug, Copy, PartialEq)]
pub struct Vec2D {
    pub x: f64,
    pub y: f64,
}

impl Add for Vec2D {
    fn add(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
        }
    }
    type Output = Self;
}
impl Sub for Vec2D {
    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
        }
    }
    type Output = Self;
}

/// Gnomonic (TAN) world coordinate system of a single image.
///
/// Pixel coordinates follow the FITS convention: the centre of the first
/// pixel is (1, 1).
#[derive(Clone, Debug, PartialEq)]
pub struct Wcs {
    /// reference pixel (CRPIX1, CRPIX2)
    pub crpix: Vec2D,
    /// reference sky position in degrees (CRVAL1, CRVAL2)
    pub crval: Vec2D,
    /// pixel offset to intermediate coordinates in degrees
    pub cd: [[f64; 2]; 2],
}

impl Wcs {
    /// returns None if the CD matrix cannot be inverted
    pub fn new(crpix: Vec2D, crval: Vec2D, cd: [[f64; 2]; 2]) -> Option<Wcs> {
        let det = cd[0][0] * cd[1][1] - cd[0][1] * cd[1][0];
        if !det.is_finite() || det.abs() < 1e-30 {
            return None;
        }
        Some(Wcs { crpix, crval, cd })
    }

    fn det(&self) -> f64 {
        self.cd[0][0] * self.cd[1][1] - self.cd[0][1] * self.cd[1][0]
    }

    /// pixel to (ra, dec) in degrees
    pub fn pixel_to_sky(&self, pixel: Vec2D) -> Vec2D {
        let d = pixel - self.crpix;
        let xi = (self.cd[0][0] * d.x + self.cd[0][1] * d.y).to_radians();
        let eta = (self.cd[1][0] * d.x + self.cd[1][1] * d.y).to_radians();

        let ra0 = self.crval.x.to_radians();
        let (sin_dec0, cos_dec0) = self.crval.y.to_radians().sin_cos();
        let denom = cos_dec0 - eta * sin_dec0;

        let ra = ra0 + xi.atan2(denom);
        let dec = (sin_dec0 + eta * cos_dec0).atan2((xi * xi + denom * denom).sqrt());
        Vec2D {
            x: ra.to_degrees().rem_euclid(360.0),
            y: dec.to_degrees(),
        }
    }

    /// (ra, dec) in degrees to pixel, or None if the position lies on the far
    /// side of the tangent plane
    pub fn sky_to_pixel(&self, sky: Vec2D) -> Option<Vec2D> {
        let (sin_dec, cos_dec) = sky.y.to_radians().sin_cos();
        let (sin_dec0, cos_dec0) = self.crval.y.to_radians().sin_cos();
        let (sin_dra, cos_dra) = (sky.x - self.crval.x).to_radians().sin_cos();

        let d = sin_dec * sin_dec0 + cos_dec * cos_dec0 * cos_dra;
        if d <= 0.0 {
            return None;
        }
        let xi = (cos_dec * sin_dra / d).to_degrees();
        let eta = ((sin_dec * cos_dec0 - cos_dec * sin_dec0 * cos_dra) / d).to_degrees();

        let det = self.det();
        let dx = (self.cd[1][1] * xi - self.cd[0][1] * eta) / det;
        let dy = (-self.cd[1][0] * xi + self.cd[0][0] * eta) / det;
        Some(self.crpix + Vec2D { x: dx, y: dy })
    }
}

/// Boolean coverage mask over a pixel grid, indexed `[row, column]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Footprint {
    pub mask: Array2<bool>,
}

impl Footprint {
    pub fn new(mask: Array2<bool>) -> Self {
        Footprint { mask }
    }

    pub fn covered(&self) -> usize {
        self.mask.iter().filter(|&&v| v).count()
    }

    pub fn total(&self) -> usize {
        self.mask.len()
    }

    /// fraction of covered pixels, 0 for an empty grid
    pub fn coverage_fraction(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.covered() as f64 / total as f64,
        }
    }

    /// true iff at least `threshold` of the grid is covered
    pub fn overlaps(&self, threshold: f64) -> bool {
        let total = self.total();
        total > 0 && self.covered() as f64 >= threshold * total as f64
    }
}
