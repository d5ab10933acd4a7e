// core/geometry.rs

// Planar geometry used by the decision logic: distances, segment crossings,
// side-of-line tests, projections, heading differences and polygon containment.
// Heights are carried along but every test below works in the x/y plane.

use nalgebra::{Point3, Vector2};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Position plus heading (yaw, radians) of the ego vehicle or a waypoint.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Point3<f64>,
    #[serde(default)]
    pub yaw: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, z: f64, yaw: f64) -> Self {
        Pose {
            position: Point3::new(x, y, z),
            yaw,
        }
    }
}

impl Default for Pose {
    fn default() -> Self {
        Pose::new(0.0, 0.0, 0.0, 0.0)
    }
}

/// Euclidean distance in 3D.
pub fn distance(a: &Point3<f64>, b: &Point3<f64>) -> f64 {
    nalgebra::distance(a, b)
}

fn planar(p: &Point3<f64>) -> Vector2<f64> {
    Vector2::new(p.x, p.y)
}

fn cross(a: &Vector2<f64>, b: &Vector2<f64>) -> f64 {
    a.x * b.y - a.y * b.x
}

/// Signed side of `p` relative to the directed line `a -> b`.
/// Positive on the left, negative on the right, zero on the line.
pub fn side_of_line(p: &Point3<f64>, a: &Point3<f64>, b: &Point3<f64>) -> f64 {
    cross(&(planar(b) - planar(a)), &(planar(p) - planar(a)))
}

/// True if the closed segments `p1-p2` and `q1-q2` share at least one point.
pub fn segments_intersect(
    p1: &Point3<f64>,
    p2: &Point3<f64>,
    q1: &Point3<f64>,
    q2: &Point3<f64>,
) -> bool {
    let d1 = side_of_line(p1, q1, q2);
    let d2 = side_of_line(p2, q1, q2);
    let d3 = side_of_line(q1, p1, p2);
    let d4 = side_of_line(q2, p1, p2);

    if d1 * d2 < 0.0 && d3 * d4 < 0.0 {
        return true;
    }

    (d1 == 0.0 && on_segment(p1, q1, q2))
        || (d2 == 0.0 && on_segment(p2, q1, q2))
        || (d3 == 0.0 && on_segment(q1, p1, p2))
        || (d4 == 0.0 && on_segment(q2, p1, p2))
}

// Assumes `p` is collinear with `a-b`.
fn on_segment(p: &Point3<f64>, a: &Point3<f64>, b: &Point3<f64>) -> bool {
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

/// Crossing point of the segments `p1-p2` and `q1-q2`, if they cross.
///
/// The height is interpolated along `p1-p2`. Parallel segments yield `None`.
pub fn segment_intersection(
    p1: &Point3<f64>,
    p2: &Point3<f64>,
    q1: &Point3<f64>,
    q2: &Point3<f64>,
) -> Option<Point3<f64>> {
    let r = planar(p2) - planar(p1);
    let s = planar(q2) - planar(q1);
    let denom = cross(&r, &s);
    if denom.abs() < f64::EPSILON {
        return None;
    }

    let qp = planar(q1) - planar(p1);
    let t = cross(&qp, &s) / denom;
    let u = cross(&qp, &r) / denom;
    if !(0.0..=1.0).contains(&t) || !(0.0..=1.0).contains(&u) {
        return None;
    }

    Some(Point3::new(
        p1.x + t * r.x,
        p1.y + t * r.y,
        p1.z + t * (p2.z - p1.z),
    ))
}

/// Point of the segment `a`-`b` closest to `p` in the plane.
pub fn nearest_point_on_segment(p: &Point3<f64>, a: &Point3<f64>, b: &Point3<f64>) -> Point3<f64> {
    let ab = planar(b) - planar(a);
    let len_sq = ab.norm_squared();
    if len_sq < f64::EPSILON {
        return *a;
    }
    let t = ((planar(p) - planar(a)).dot(&ab) / len_sq).clamp(0.0, 1.0);
    Point3::new(a.x + t * ab.x, a.y + t * ab.y, a.z + t * (b.z - a.z))
}

/// Wraps an angle into `[-PI, PI)`.
pub fn normalize_angle(rad: f64) -> f64 {
    (rad + PI).rem_euclid(2.0 * PI) - PI
}

/// Heading of `from` minus heading of `to`, normalized, in degrees.
pub fn yaw_diff_deg(from: &Pose, to: &Pose) -> f64 {
    normalize_angle(from.yaw - to.yaw).to_degrees()
}

/// Even-odd containment test of `p` against a closed polygon given by its vertices.
pub fn polygon_contains(polygon: &[Point3<f64>], p: &Point3<f64>) -> bool {
    if polygon.len() < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (pi, pj) = (&polygon[i], &polygon[j]);
        if (pi.y > p.y) != (pj.y > p.y) {
            let x_cross = (pj.x - pi.x) * (p.y - pi.y) / (pj.y - pi.y) + pi.x;
            if p.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn pt(x: f64, y: f64) -> Point3<f64> {
        Point3::new(x, y, 0.0)
    }

    #[test]
    fn test_side_of_line_sign() {
        let a = pt(0.0, 0.0);
        let b = pt(1.0, 0.0);
        assert!(side_of_line(&pt(0.5, 1.0), &a, &b) > 0.0);
        assert!(side_of_line(&pt(0.5, -1.0), &a, &b) < 0.0);
        assert_eq!(side_of_line(&pt(2.0, 0.0), &a, &b), 0.0);
    }

    #[rstest]
    #[case(pt(0.0, 0.0), pt(2.0, 0.0), pt(1.0, -1.0), pt(1.0, 1.0), true)]
    #[case(pt(0.0, 0.0), pt(2.0, 0.0), pt(3.0, -1.0), pt(3.0, 1.0), false)]
    #[case(pt(0.0, 0.0), pt(2.0, 0.0), pt(2.0, 0.0), pt(2.0, 1.0), true)]
    #[case(pt(0.0, 0.0), pt(2.0, 0.0), pt(0.0, 1.0), pt(2.0, 1.0), false)]
    fn test_segments_intersect(
        #[case] p1: Point3<f64>,
        #[case] p2: Point3<f64>,
        #[case] q1: Point3<f64>,
        #[case] q2: Point3<f64>,
        #[case] expected: bool,
    ) {
        assert_eq!(segments_intersect(&p1, &p2, &q1, &q2), expected);
    }

    #[test]
    fn test_segment_intersection_point() {
        let hit = segment_intersection(&pt(0.0, 0.0), &pt(4.0, 0.0), &pt(1.0, -1.0), &pt(1.0, 1.0))
            .unwrap();
        assert!((hit.x - 1.0).abs() < 1e-9);
        assert!(hit.y.abs() < 1e-9);

        assert!(
            segment_intersection(&pt(0.0, 0.0), &pt(4.0, 0.0), &pt(0.0, 1.0), &pt(4.0, 1.0))
                .is_none()
        );
    }

    #[test]
    fn test_nearest_point_on_segment() {
        let p = nearest_point_on_segment(&pt(1.0, 3.0), &pt(0.0, 0.0), &pt(4.0, 0.0));
        assert!((p.x - 1.0).abs() < 1e-9);
        assert!(p.y.abs() < 1e-9);

        // Beyond the end the segment end is nearest.
        let p = nearest_point_on_segment(&pt(7.0, 1.0), &pt(0.0, 0.0), &pt(4.0, 0.0));
        assert!((p.x - 4.0).abs() < 1e-9);
    }

    #[rstest]
    #[case(0.0, 0.0)]
    #[case(1.5 * PI, -0.5 * PI)]
    #[case(-PI / 2.0, -PI / 2.0)]
    #[case(2.5 * PI, PI / 2.0)]
    fn test_normalize_angle(#[case] input: f64, #[case] expected: f64) {
        assert!((normalize_angle(input) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_yaw_diff_wraps() {
        let a = Pose::new(0.0, 0.0, 0.0, 179f64.to_radians());
        let b = Pose::new(0.0, 0.0, 0.0, (-179f64).to_radians());
        assert!((yaw_diff_deg(&a, &b) - (-2.0)).abs() < 1e-6);
    }

    #[test]
    fn test_polygon_contains() {
        let square = vec![pt(0.0, 0.0), pt(10.0, 0.0), pt(10.0, 10.0), pt(0.0, 10.0)];
        assert!(polygon_contains(&square, &pt(5.0, 5.0)));
        assert!(!polygon_contains(&square, &pt(15.0, 5.0)));
        assert!(!polygon_contains(&square[..2], &pt(5.0, 0.0)));
    }
}
