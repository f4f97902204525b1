//! Quadrilateral geometry for annotation comparison.
//!
//! Coordinates are image coordinates: x grows right, y grows down. "Clockwise"
//! therefore means clockwise as the frame is displayed.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::LabelError;

pub const POLYGON_VERTICES: usize = 4;

/// Tolerance for orientation tests and zero-area detection.
const EPSILON: f64 = 1e-9;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Exactly four ordered vertices. Any other vertex count is rejected when the
/// polygon is constructed or deserialized.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Point>", into = "Vec<Point>")]
pub struct Polygon {
    vertices: [Point; POLYGON_VERTICES],
}

impl TryFrom<Vec<Point>> for Polygon {
    type Error = String;

    fn try_from(points: Vec<Point>) -> std::result::Result<Self, Self::Error> {
        let count = points.len();
        let vertices: [Point; POLYGON_VERTICES] = points.try_into().map_err(|_| {
            format!(
                "polygon must have exactly {} points, got {}",
                POLYGON_VERTICES, count
            )
        })?;
        Ok(Self { vertices })
    }
}

impl From<Polygon> for Vec<Point> {
    fn from(polygon: Polygon) -> Self {
        polygon.vertices.to_vec()
    }
}

impl Polygon {
    pub fn new(vertices: [Point; POLYGON_VERTICES]) -> Self {
        Self { vertices }
    }

    /// Convenience constructor from `(x, y)` pairs.
    pub fn from_coords(coords: [(f64, f64); POLYGON_VERTICES]) -> Self {
        Self::new(coords.map(|(x, y)| Point::new(x, y)))
    }

    pub fn vertices(&self) -> &[Point; POLYGON_VERTICES] {
        &self.vertices
    }

    /// Shoelace area; positive when the vertices run clockwise on screen.
    pub fn signed_area(&self) -> f64 {
        signed_area(&self.vertices)
    }

    pub fn area(&self) -> f64 {
        self.signed_area().abs()
    }

    /// Rejects non-finite, zero-area and self-intersecting quadrilaterals,
    /// judged on the vertex order as given.
    pub fn validate(&self) -> Result<()> {
        if self
            .vertices
            .iter()
            .any(|p| !p.x.is_finite() || !p.y.is_finite())
        {
            return Err(geometry_error("polygon has non-finite coordinates"));
        }
        if self.area() <= EPSILON {
            return Err(geometry_error("polygon has zero area"));
        }
        let v = &self.vertices;
        // Opposite edges must not meet.
        for (a, b, c, d) in [(0, 1, 2, 3), (1, 2, 3, 0)] {
            if segments_intersect(v[a], v[b], v[c], v[d]) {
                return Err(geometry_error("polygon is self-intersecting"));
            }
        }
        // No vertex may touch an edge it is not an endpoint of.
        for i in 0..POLYGON_VERTICES {
            for offset in [1, 2] {
                let a = v[(i + offset) % POLYGON_VERTICES];
                let b = v[(i + offset + 1) % POLYGON_VERTICES];
                if point_on_segment(v[i], a, b) {
                    return Err(geometry_error("polygon vertex lies on another edge"));
                }
            }
        }
        Ok(())
    }

    /// Same outline with the vertices running clockwise on screen, starting at
    /// the vertex with the lowest y (ties: lowest x). The cyclic order is kept,
    /// so the shape never changes; vertex `i` of two canonical polygons then
    /// refers to the same corner.
    pub fn canonicalize(&self) -> Polygon {
        let mut ordered = self.vertices;
        if self.signed_area() < 0.0 {
            ordered.reverse();
        }

        let start = ordered
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.y.total_cmp(&b.y).then(a.x.total_cmp(&b.x)))
            .map(|(i, _)| i)
            .unwrap_or(0);
        ordered.rotate_left(start);
        Polygon::new(ordered)
    }

    /// Splits the quadrilateral along an interior diagonal.
    fn triangles(&self) -> [[Point; 3]; 2] {
        let v = &self.vertices;
        let total = self.signed_area();
        let first = signed_area(&[v[0], v[1], v[2]]);
        let second = signed_area(&[v[0], v[2], v[3]]);
        if first * total > 0.0 && second * total > 0.0 {
            [[v[0], v[1], v[2]], [v[0], v[2], v[3]]]
        } else {
            // A simple quadrilateral always has at least one interior diagonal.
            [[v[1], v[2], v[3]], [v[1], v[3], v[0]]]
        }
    }
}

/// Intersection-over-union of two simple quadrilaterals, in `[0, 1]`.
///
/// Both polygons are validated first; invalid input yields a geometry error
/// instead of a number.
pub fn iou(a: &Polygon, b: &Polygon) -> Result<f64> {
    a.validate()?;
    b.validate()?;

    let mut intersection = 0.0;
    for tri_a in a.triangles() {
        for tri_b in b.triangles() {
            intersection += convex_intersection_area(&tri_a, &tri_b);
        }
    }

    let union = a.area() + b.area() - intersection;
    if union <= EPSILON {
        return Err(geometry_error("polygon union has zero area"));
    }
    Ok((intersection / union).clamp(0.0, 1.0))
}

/// Vertex-wise arithmetic mean of polygons that share a canonical ordering.
pub fn mean_polygon(polygons: &[Polygon]) -> Option<Polygon> {
    if polygons.is_empty() {
        return None;
    }
    let n = polygons.len() as f64;
    let mut sums = [Point::new(0.0, 0.0); POLYGON_VERTICES];
    for polygon in polygons {
        for (sum, vertex) in sums.iter_mut().zip(polygon.vertices.iter()) {
            sum.x += vertex.x;
            sum.y += vertex.y;
        }
    }
    Some(Polygon::new(sums.map(|s| Point::new(s.x / n, s.y / n))))
}

fn geometry_error(message: &str) -> anyhow::Error {
    LabelError::Geometry(message.to_string()).into()
}

fn signed_area(points: &[Point]) -> f64 {
    let n = points.len();
    let mut twice = 0.0;
    for i in 0..n {
        let p = points[i];
        let q = points[(i + 1) % n];
        twice += p.x * q.y - q.x * p.y;
    }
    twice / 2.0
}

/// Cross product of `(b - a)` and `(p - a)`.
fn cross(a: Point, b: Point, p: Point) -> f64 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

fn orientation(a: Point, b: Point, p: Point) -> i8 {
    let value = cross(a, b, p);
    if value > EPSILON {
        1
    } else if value < -EPSILON {
        -1
    } else {
        0
    }
}

fn point_on_segment(p: Point, a: Point, b: Point) -> bool {
    orientation(a, b, p) == 0
        && p.x >= a.x.min(b.x) - EPSILON
        && p.x <= a.x.max(b.x) + EPSILON
        && p.y >= a.y.min(b.y) - EPSILON
        && p.y <= a.y.max(b.y) + EPSILON
}

/// True when the closed segments `p1p2` and `q1q2` share any point.
fn segments_intersect(p1: Point, p2: Point, q1: Point, q2: Point) -> bool {
    let o1 = orientation(p1, p2, q1);
    let o2 = orientation(p1, p2, q2);
    let o3 = orientation(q1, q2, p1);
    let o4 = orientation(q1, q2, p2);

    if o1 != o2 && o3 != o4 && o1 != 0 && o2 != 0 && o3 != 0 && o4 != 0 {
        return true;
    }
    point_on_segment(q1, p1, p2)
        || point_on_segment(q2, p1, p2)
        || point_on_segment(p1, q1, q2)
        || point_on_segment(p2, q1, q2)
}

/// Area of the intersection of two convex polygons (Sutherland-Hodgman).
fn convex_intersection_area(subject: &[Point], clip: &[Point]) -> f64 {
    let subject = positively_oriented(subject);
    let clip = positively_oriented(clip);

    let mut output = subject;
    for i in 0..clip.len() {
        if output.is_empty() {
            break;
        }
        let a = clip[i];
        let b = clip[(i + 1) % clip.len()];
        let input = std::mem::take(&mut output);
        for j in 0..input.len() {
            let current = input[j];
            let previous = input[(j + input.len() - 1) % input.len()];
            let current_side = cross(a, b, current);
            let previous_side = cross(a, b, previous);
            if current_side >= 0.0 {
                if previous_side < 0.0 {
                    output.push(edge_crossing(previous, current, previous_side, current_side));
                }
                output.push(current);
            } else if previous_side >= 0.0 {
                output.push(edge_crossing(previous, current, previous_side, current_side));
            }
        }
    }

    if output.len() < 3 {
        0.0
    } else {
        signed_area(&output).abs()
    }
}

fn positively_oriented(points: &[Point]) -> Vec<Point> {
    let mut owned = points.to_vec();
    if signed_area(&owned) < 0.0 {
        owned.reverse();
    }
    owned
}

/// Point where segment `from -> to` crosses the clip line, given the signed
/// distances of both endpoints to it. The sides differ, so the divisor is non-zero.
fn edge_crossing(from: Point, to: Point, from_side: f64, to_side: f64) -> Point {
    let t = from_side / (from_side - to_side);
    Point::new(from.x + t * (to.x - from.x), from.y + t * (to.y - from.y))
}
