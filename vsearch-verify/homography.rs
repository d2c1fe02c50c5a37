//! Planar homography estimation and plausibility checks.

use nalgebra::{Matrix2, Matrix3, SMatrix, SVector, Vector3};
use vsearch_core::Point;

/// Twice the triangle area (px^2) below which three points count as collinear
const MIN_DOUBLE_AREA: f64 = 1.0;

/// Estimate the homography mapping `src[i]` to `dst[i]` by normalized DLT.
///
/// Four pairs give the exact solution, more pairs a least-squares fit.
/// Returns `None` for degenerate input.
pub fn estimate(src: &[Point], dst: &[Point]) -> Option<Matrix3<f64>> {
    if src.len() < 4 || src.len() != dst.len() {
        return None;
    }

    let t_src = normalizing_transform(src)?;
    let t_dst = normalizing_transform(dst)?;

    let mut ata = SMatrix::<f64, 8, 8>::zeros();
    let mut atb = SVector::<f64, 8>::zeros();
    for (p, q) in src.iter().zip(dst) {
        let (x, y) = apply_affine(&t_src, p);
        let (u, v) = apply_affine(&t_dst, q);

        let row_u = SVector::<f64, 8>::from([x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y]);
        let row_v = SVector::<f64, 8>::from([0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y]);
        ata += row_u * row_u.transpose() + row_v * row_v.transpose();
        atb += row_u * u + row_v * v;
    }

    let h = ata.lu().solve(&atb)?;
    let normalized = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);

    let h = t_dst.try_inverse()? * normalized * t_src;
    let scale = h[(2, 2)];
    if scale.abs() < 1e-12 || !h.iter().all(|v| v.is_finite()) {
        return None;
    }
    Some(h / scale)
}

/// Similarity transform moving the centroid to the origin with mean distance sqrt(2)
fn normalizing_transform(points: &[Point]) -> Option<Matrix3<f64>> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist < 1e-9 {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    Some(Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0))
}

fn apply_affine(t: &Matrix3<f64>, p: &Point) -> (f64, f64) {
    (
        t[(0, 0)] * p.x + t[(0, 2)],
        t[(1, 1)] * p.y + t[(1, 2)],
    )
}

/// Map a point through `h`; `None` when it lands on the line at infinity
pub fn project(h: &Matrix3<f64>, p: Point) -> Option<Point> {
    let v = h * Vector3::new(p.x, p.y, 1.0);
    if v.z.abs() < 1e-12 {
        return None;
    }
    let projected = Point::new(v.x / v.z, v.y / v.z);
    (projected.x.is_finite() && projected.y.is_finite()).then_some(projected)
}

/// Squared distance between `h(src)` and `dst`
pub fn reprojection_error_sq(h: &Matrix3<f64>, src: Point, dst: Point) -> f64 {
    match project(h, src) {
        Some(p) => (p.x - dst.x).powi(2) + (p.y - dst.y).powi(2),
        None => f64::INFINITY,
    }
}

/// Any three of the points (nearly) collinear
pub fn is_degenerate(points: &[Point]) -> bool {
    let n = points.len();
    for i in 0..n {
        for j in i + 1..n {
            for k in j + 1..n {
                let (a, b, c) = (points[i], points[j], points[k]);
                let double_area = ((b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)).abs();
                if double_area < MIN_DOUBLE_AREA {
                    return true;
                }
            }
        }
    }
    false
}

fn linear_part(h: &Matrix3<f64>) -> Matrix2<f64> {
    Matrix2::new(h[(0, 0)], h[(0, 1)], h[(1, 0)], h[(1, 1)])
}

/// Orientation preserving and scale change within `max_scale` in either direction
pub fn is_plausible(h: &Matrix3<f64>, max_scale: f64) -> bool {
    let det = linear_part(h).determinant();
    let bound = max_scale * max_scale;
    det.is_finite() && det > 0.0 && det >= 1.0 / bound && det <= bound
}

/// Score in [0, 1] for how well-conditioned a homography is. Near-singular,
/// strongly anisotropic, extreme-scale or strongly projective maps score near 0.
pub fn conditioning_score(h: &Matrix3<f64>, max_scale: f64, max_perspective: f64) -> f64 {
    let linear = linear_part(h);
    let det = linear.determinant();
    if !det.is_finite() || det <= 0.0 {
        return 0.0;
    }

    let singular = linear.singular_values();
    let (s_max, s_min) = (singular.max(), singular.min());
    let anisotropy = if s_max > 0.0 { s_min / s_max } else { 0.0 };

    let scale_score = if max_scale > 1.0 {
        1.0 - det.sqrt().ln().abs() / max_scale.ln()
    } else {
        1.0
    };

    let perspective = h[(2, 0)].hypot(h[(2, 1)]);
    let perspective_score = if max_perspective > 0.0 {
        1.0 - perspective / max_perspective
    } else {
        1.0
    };

    anisotropy.clamp(0.0, 1.0) * scale_score.clamp(0.0, 1.0) * perspective_score.clamp(0.0, 1.0)
}
