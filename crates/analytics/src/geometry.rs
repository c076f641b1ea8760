//! Planar geometry: point type, homography estimation, polygon membership.

use nalgebra::{Matrix3, SMatrix, SVector, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::AnalyticsError;

/// Twice the triangle area below which three points count as collinear.
const COLLINEAR_EPSILON: f64 = 1e-6;
/// Homogeneous scale below which a projected point is at infinity.
const W_EPSILON: f64 = 1e-12;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Drop the fractional part, matching integer pixel addressing.
    pub fn truncated(self) -> Self {
        Self::new(self.x.trunc(), self.y.trunc())
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    pub fn to_pixel(self) -> (i32, i32) {
        (self.x as i32, self.y as i32)
    }
}

impl From<(f32, f32)> for Point {
    fn from((x, y): (f32, f32)) -> Self {
        Self::new(x, y)
    }
}

/// 3x3 projective transform between two image planes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    matrix: Matrix3<f64>,
}

impl Homography {
    /// Map `point` through the transform. `None` when it lands at infinity.
    pub fn project(&self, point: Point) -> Option<Point> {
        let mapped = self.matrix * Vector3::new(point.x as f64, point.y as f64, 1.0);
        if mapped.z.abs() < W_EPSILON {
            return None;
        }
        let projected = Point::new((mapped.x / mapped.z) as f32, (mapped.y / mapped.z) as f32);
        projected.is_finite().then_some(projected)
    }
}

/// Solve the homography taking each `src_quad[i]` onto `dst_quad[i]`.
///
/// Both quads must hold exactly four points with no three collinear.
pub fn compute_transform(src_quad: &[Point], dst_quad: &[Point]) -> Result<Homography, AnalyticsError> {
    validate_quad("source", src_quad)?;
    validate_quad("destination", dst_quad)?;

    // h33 fixed to 1; two rows per correspondence.
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for (i, (src, dst)) in src_quad.iter().zip(dst_quad).enumerate() {
        let (x, y) = (src.x as f64, src.y as f64);
        let (u, v) = (dst.x as f64, dst.y as f64);
        let r = 2 * i;
        a[(r, 0)] = x;
        a[(r, 1)] = y;
        a[(r, 2)] = 1.0;
        a[(r, 6)] = -u * x;
        a[(r, 7)] = -u * y;
        b[r] = u;
        a[(r + 1, 3)] = x;
        a[(r + 1, 4)] = y;
        a[(r + 1, 5)] = 1.0;
        a[(r + 1, 6)] = -v * x;
        a[(r + 1, 7)] = -v * y;
        b[r + 1] = v;
    }

    let h = a
        .lu()
        .solve(&b)
        .ok_or_else(|| AnalyticsError::InvalidGeometry("point correspondences are singular".into()))?;
    let matrix = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);

    if matrix.iter().any(|v| !v.is_finite()) || matrix.determinant().abs() < W_EPSILON {
        return Err(AnalyticsError::InvalidGeometry(
            "perspective transform is degenerate".into(),
        ));
    }

    Ok(Homography { matrix })
}

fn validate_quad(role: &str, quad: &[Point]) -> Result<(), AnalyticsError> {
    if quad.len() != 4 {
        return Err(AnalyticsError::InvalidGeometry(format!(
            "{role} quad needs 4 points, got {}",
            quad.len()
        )));
    }
    if quad.iter().any(|p| !p.is_finite()) {
        return Err(AnalyticsError::InvalidGeometry(format!(
            "{role} quad contains non-finite coordinates"
        )));
    }
    for (i, j, k) in [(0, 1, 2), (0, 1, 3), (0, 2, 3), (1, 2, 3)] {
        if doubled_area(quad[i], quad[j], quad[k]).abs() < COLLINEAR_EPSILON {
            return Err(AnalyticsError::InvalidGeometry(format!(
                "{role} points {i}, {j} and {k} are collinear"
            )));
        }
    }
    Ok(())
}

fn doubled_area(a: Point, b: Point, c: Point) -> f64 {
    let (ax, ay) = (a.x as f64, a.y as f64);
    let (bx, by) = (b.x as f64, b.y as f64);
    let (cx, cy) = (c.x as f64, c.y as f64);
    (bx - ax) * (cy - ay) - (by - ay) * (cx - ax)
}

/// Point-in-polygon test; points on an edge or vertex count as inside.
pub fn point_in_polygon(polygon: &[Point], point: Point) -> bool {
    if polygon.len() < 3 || !point.is_finite() {
        return false;
    }

    let n = polygon.len();
    let mut inside = false;
    for i in 0..n {
        let a = polygon[i];
        let b = polygon[(i + 1) % n];
        if on_segment(a, b, point) {
            return true;
        }
        if (a.y > point.y) != (b.y > point.y) {
            let x_at = (b.x as f64 - a.x as f64) * (point.y as f64 - a.y as f64)
                / (b.y as f64 - a.y as f64)
                + a.x as f64;
            if (point.x as f64) < x_at {
                inside = !inside;
            }
        }
    }
    inside
}

fn on_segment(a: Point, b: Point, p: Point) -> bool {
    if doubled_area(a, b, p).abs() > COLLINEAR_EPSILON {
        return false;
    }
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}
