//! Generators for synthetic polygons and validity masks.
//!
//! Everything here is deterministic so tests and benchmarks can assert on
//! exact pixel counts.

use geo::{Coord, LineString, MultiPolygon, Polygon};

fn ring(points: &[(f64, f64)]) -> LineString<f64> {
    LineString::from(
        points
            .iter()
            .map(|&(x, y)| Coord { x, y })
            .collect::<Vec<_>>(),
    )
}

/// Axis-aligned rectangle from (min_x, min_y) to (max_x, max_y).
///
/// # Example
///
/// ```
/// use geo::Area;
/// use test_utils::rect;
///
/// let r = rect(0.0, 0.0, 2.0, 3.0);
/// assert_eq!(r.unsigned_area(), 6.0);
/// ```
pub fn rect(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> MultiPolygon<f64> {
    MultiPolygon::new(vec![rect_polygon(min_x, min_y, max_x, max_y)])
}

fn rect_polygon(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Polygon<f64> {
    Polygon::new(
        ring(&[
            (min_x, min_y),
            (max_x, min_y),
            (max_x, max_y),
            (min_x, max_y),
            (min_x, min_y),
        ]),
        vec![],
    )
}

/// Rectangle with a rectangular hole.
pub fn rect_with_hole(outer: (f64, f64, f64, f64), hole: (f64, f64, f64, f64)) -> MultiPolygon<f64> {
    let exterior = rect_polygon(outer.0, outer.1, outer.2, outer.3).exterior().clone();
    let interior = rect_polygon(hole.0, hole.1, hole.2, hole.3).exterior().clone();
    MultiPolygon::new(vec![Polygon::new(exterior, vec![interior])])
}

/// Regular polygon approximating a circle.
pub fn circle(cx: f64, cy: f64, radius: f64, segments: usize) -> MultiPolygon<f64> {
    let segments = segments.max(3);
    let mut points: Vec<(f64, f64)> = (0..segments)
        .map(|i| {
            let theta = i as f64 / segments as f64 * std::f64::consts::TAU;
            (cx + radius * theta.cos(), cy + radius * theta.sin())
        })
        .collect();
    points.push(points[0]);
    MultiPolygon::new(vec![Polygon::new(ring(&points), vec![])])
}

/// Simple linear congruential generator for reproducible layouts.
fn lcg(state: &mut u64) -> u64 {
    *state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    *state >> 33
}

/// `count` squares of side `size` scattered over a `width` x `height` extent
/// whose upper-left corner is (0, height). Same seed, same layout.
pub fn scattered_squares(count: usize, width: f64, height: f64, size: f64, seed: u64) -> Vec<MultiPolygon<f64>> {
    let mut state = seed;
    let span_x = ((width - size).max(1.0)) as u64;
    let span_y = ((height - size).max(1.0)) as u64;
    (0..count)
        .map(|_| {
            let x = (lcg(&mut state) % span_x) as f64 + 0.25;
            let y = (lcg(&mut state) % span_y) as f64 + 0.25;
            rect(x, y, x + size, y + size)
        })
        .collect()
}

/// Validity mask that is false within `margin` cells of the edge.
pub fn border_mask(width: usize, height: usize, margin: usize) -> Vec<bool> {
    let mut mask = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            let inside = row >= margin
                && col >= margin
                && row + margin < height
                && col + margin < width;
            mask.push(inside);
        }
    }
    mask
}

/// Validity band with `nodata` at the listed (col, row) cells and 1.0 elsewhere.
pub fn band_with_nodata(width: usize, height: usize, nodata: f64, cells: &[(usize, usize)]) -> Vec<f64> {
    let mut band = vec![1.0; width * height];
    for &(col, row) in cells {
        if col < width && row < height {
            band[row * width + col] = nodata;
        }
    }
    band
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Area;

    #[test]
    fn test_rect_area() {
        assert_eq!(rect(0.0, 0.0, 2.0, 3.0).unsigned_area(), 6.0);
    }

    #[test]
    fn test_rect_with_hole_area() {
        let shape = rect_with_hole((0.0, 0.0, 4.0, 4.0), (1.0, 1.0, 3.0, 3.0));
        assert_eq!(shape.unsigned_area(), 12.0);
    }

    #[test]
    fn test_circle_area_close_to_pi_r2() {
        let c = circle(0.0, 0.0, 10.0, 256);
        let expected = std::f64::consts::PI * 100.0;
        assert!((c.unsigned_area() - expected).abs() / expected < 0.01);
    }

    #[test]
    fn test_scattered_squares_deterministic() {
        let a = scattered_squares(20, 100.0, 100.0, 3.0, 42);
        let b = scattered_squares(20, 100.0, 100.0, 3.0, 42);
        let c = scattered_squares(20, 100.0, 100.0, 3.0, 43);
        assert_eq!(a, b, "Same seed should produce same layout");
        assert_ne!(a, c, "Different seed should produce different layout");
        assert_eq!(a.len(), 20);
    }

    #[test]
    fn test_border_mask() {
        let mask = border_mask(4, 4, 1);
        assert_eq!(mask.iter().filter(|v| **v).count(), 4);
        assert!(!mask[0]);
        assert!(mask[5]);
    }

    #[test]
    fn test_band_with_nodata() {
        let band = band_with_nodata(3, 2, -9999.0, &[(2, 1), (5, 5)]);
        assert_eq!(band[5], -9999.0);
        assert_eq!(band.iter().filter(|v| **v == -9999.0).count(), 1);
    }
}
