// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2024 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! `CountingPredicate`: point-in-polygon test against a
//! configured counting area.

/// An integer vertex of a counting-area polygon, in frame-pixel coordinates.
pub type Vertex = (i32, i32);

/// A detection centroid, in frame-pixel coordinates. Centroids are the
/// midpoint of a float bounding box, so unlike polygon vertices they are not
/// integers.
pub type Point = (f64, f64);

/// Tests whether `point` lies in the closed region bounded by `polygon`.
///
/// A point exactly on an edge counts as inside. The result does not depend on which
/// vertex the polygon starts at.
///
/// Uses a standard even-odd ray-casting test, with an explicit
/// on-segment check first so boundary points don't depend on which way the
/// ray-cast happens to round.
pub fn contains(point: Point, polygon: &[Vertex]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    if on_boundary(point, polygon) {
        return true;
    }
    let (px, py) = point;
    let mut inside = false;
    let n = polygon.len();
    for i in 0..n {
        let (xi, yi) = (polygon[i].0 as f64, polygon[i].1 as f64);
        let (xj, yj) = (polygon[(i + n - 1) % n].0 as f64, polygon[(i + n - 1) % n].1 as f64);
        let crosses = (yi > py) != (yj > py);
        if crosses {
            let x_intersect = xj + (py - yj) / (yi - yj) * (xi - xj);
            if px < x_intersect {
                inside = !inside;
            }
        }
    }
    inside
}

fn on_boundary(point: Point, polygon: &[Vertex]) -> bool {
    let (px, py) = point;
    let n = polygon.len();
    for i in 0..n {
        let (ax, ay) = (polygon[i].0 as f64, polygon[i].1 as f64);
        let (bx, by) = (polygon[(i + 1) % n].0 as f64, polygon[(i + 1) % n].1 as f64);
        let cross = (bx - ax) * (py - ay) - (by - ay) * (px - ax);
        if cross.abs() > 1e-9 {
            continue;
        }
        let dot = (px - ax) * (bx - ax) + (py - ay) * (by - ay);
        if dot < 0.0 {
            continue;
        }
        let len_sq = (bx - ax).powi(2) + (by - ay).powi(2);
        if dot > len_sq {
            continue;
        }
        return true;
    }
    false
}

/// Computes the centroid `((x1+x2)/2, (y1+y2)/2)` of an axis-aligned box, as
/// used to test detections against the counting area.
pub fn centroid(x1: f64, y1: f64, x2: f64, y2: f64) -> Point {
    ((x1 + x2) / 2.0, (y1 + y2) / 2.0)
}

/// Rotates `polygon`'s vertex list so it starts at index `by`, without
/// changing the polygon it describes. Used by tests to check rotational
/// invariance.
pub fn rotate(polygon: &[Vertex], by: usize) -> Vec<Vertex> {
    if polygon.is_empty() {
        return Vec::new();
    }
    let by = by % polygon.len();
    let mut rotated = polygon[by..].to_vec();
    rotated.extend_from_slice(&polygon[..by]);
    rotated
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Vertex> {
        vec![(0, 0), (100, 0), (100, 100), (0, 100)]
    }

    #[test]
    fn centroid_inside_square_is_counted() {
        assert!(contains((50.0, 50.0), &square()));
    }

    #[test]
    fn point_outside_is_not_counted() {
        assert!(!contains((200.0, 200.0), &square()));
    }

    #[test]
    fn point_on_edge_is_counted() {
        assert!(contains((0.0, 50.0), &square()));
        assert!(contains((100.0, 50.0), &square()));
        assert!(contains((50.0, 0.0), &square()));
        assert!(contains((50.0, 100.0), &square()));
    }

    #[test]
    fn point_on_vertex_is_counted() {
        assert!(contains((0.0, 0.0), &square()));
        assert!(contains((100.0, 100.0), &square()));
    }

    #[test]
    fn result_is_rotation_invariant() {
        let base = square();
        let points = [(50.0, 50.0), (0.0, 50.0), (200.0, 200.0), (0.0, 0.0)];
        for by in 0..base.len() {
            let rotated = rotate(&base, by);
            for &p in &points {
                assert_eq!(
                    contains(p, &base),
                    contains(p, &rotated),
                    "mismatch at rotation {by} for point {p:?}"
                );
            }
        }
    }

    #[test]
    fn concave_polygon_respects_notch() {
        // A "C" shape: outer square minus a notch on the right side.
        let polygon = vec![
            (0, 0),
            (100, 0),
            (100, 40),
            (50, 40),
            (50, 60),
            (100, 60),
            (100, 100),
            (0, 100),
        ];
        assert!(!contains((75.0, 50.0), &polygon));
        assert!(contains((10.0, 50.0), &polygon));
        assert!(!contains((90.0, 50.0), &polygon));
    }
}
