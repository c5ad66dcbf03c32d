use nalgebra::{Matrix2, Vector2};

use crate::consts::EPSILON;
use crate::frame::Point;

/// 2x3 affine transform mapping frame coordinates onto reference coordinates:
///
/// ```text
/// [x']   [a  b] [x]   [tx]
/// [y'] = [c  d] [y] + [ty]
/// ```
///
/// The invalid transform has every coefficient set to NaN and marks a frame
/// whose geometry could not be estimated.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AffineTransform {
    linear: Matrix2<f64>,
    translation: Vector2<f64>,
}

impl AffineTransform {
    /// Build from a row-major 2x3 matrix.
    pub fn from_matrix(m: [[f64; 3]; 2]) -> Self {
        Self {
            linear: Matrix2::new(m[0][0], m[0][1], m[1][0], m[1][1]),
            translation: Vector2::new(m[0][2], m[1][2]),
        }
    }

    /// Rotation by `rotation` radians (counter-clockwise), uniform scaling, then translation.
    pub fn from_similarity(scale: f64, rotation: f64, tx: f64, ty: f64) -> Self {
        let (sin, cos) = rotation.sin_cos();
        Self::from_matrix([
            [scale * cos, -scale * sin, tx],
            [scale * sin, scale * cos, ty],
        ])
    }

    pub fn identity() -> Self {
        Self::from_similarity(1.0, 0.0, 0.0, 0.0)
    }

    pub fn invalid() -> Self {
        Self::from_matrix([[f64::NAN; 3]; 2])
    }

    /// True when every coefficient is finite.
    pub fn is_valid(&self) -> bool {
        self.linear.iter().chain(self.translation.iter()).all(|v| v.is_finite())
    }

    pub fn matrix(&self) -> [[f64; 3]; 2] {
        let l = &self.linear;
        let t = &self.translation;
        [[l[(0, 0)], l[(0, 1)], t.x], [l[(1, 0)], l[(1, 1)], t.y]]
    }

    /// Geometric mean scale factor, `sqrt(|det|)`.
    pub fn scale(&self) -> f64 {
        self.linear.determinant().abs().sqrt()
    }

    /// Rotation angle in radians.
    pub fn rotation(&self) -> f64 {
        self.linear[(1, 0)].atan2(self.linear[(0, 0)])
    }

    pub fn translation(&self) -> (f64, f64) {
        (self.translation.x, self.translation.y)
    }

    pub fn apply(&self, p: Point) -> Point {
        let v = self.linear * Vector2::new(p.x, p.y) + self.translation;
        Point::new(v.x, v.y)
    }

    /// Inverse mapping. A singular or invalid transform inverts to the invalid one.
    pub fn inverse(&self) -> Self {
        if !self.is_valid() || self.linear.determinant().abs() < EPSILON {
            return Self::invalid();
        }
        match self.linear.try_inverse() {
            Some(inv) => Self {
                linear: inv,
                translation: -(inv * self.translation),
            },
            None => Self::invalid(),
        }
    }

    /// `self` applied after `first`.
    pub fn compose(&self, first: &AffineTransform) -> Self {
        Self {
            linear: self.linear * first.linear,
            translation: self.linear * first.translation + self.translation,
        }
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}
