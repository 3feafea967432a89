//! Bresenham horizon rays over a pixel grid.
//!
//! Rows grow downwards and azimuths are clockwise from north, so a ray
//! toward azimuth `a` advances `sin(a)` in columns and `-cos(a)` in rows.

/// Longest ray distance honoured, in pixels. Far beyond any raster, and
/// small enough that endpoint and error terms stay within `i64`.
const MAX_RAY_PX: f64 = 4_503_599_627_370_496.0; // 2^52

/// Pixels on the ray from `(start_col, start_row)` toward `azimuth_rad`,
/// clipped to a `rows` x `cols` grid.
///
/// The endpoint is `max_dist_px` away with each offset rounded to the
/// nearest pixel, so a fractional distance can reach one pixel further:
/// the ray holds at most `round(max_dist_px) + 1` pixels, not
/// `max_dist_px + 1`.
///
/// The start pixel comes first. Tracing stops at the endpoint or right
/// before the first step that would leave the grid. A start pixel outside
/// the grid yields an empty ray.
pub fn trace(
    start_col: usize,
    start_row: usize,
    max_dist_px: f64,
    azimuth_rad: f64,
    rows: usize,
    cols: usize,
) -> Vec<(usize, usize)> {
    if start_col >= cols || start_row >= rows {
        return Vec::new();
    }

    let dist = max_dist_px.clamp(0.0, MAX_RAY_PX);
    let x0 = start_col as i64;
    let y0 = start_row as i64;
    let x1 = x0 + (dist * azimuth_rad.sin()).round() as i64;
    let y1 = y0 - (dist * azimuth_rad.cos()).round() as i64;

    let dx = (x1 - x0).abs();
    let dy = (y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let (cols, rows) = (cols as i64, rows as i64);

    // A clipped ray never holds more pixels than the grid's longer side
    let mut line = Vec::with_capacity((dx.max(dy).min(cols + rows) + 1) as usize);
    let (mut x, mut y) = (x0, y0);
    let mut err = dx - dy;

    loop {
        line.push((x as usize, y as usize));
        if x == x1 && y == y1 {
            break;
        }

        let e2 = 2 * err;
        let (mut nx, mut ny) = (x, y);
        if e2 > -dy {
            err -= dy;
            nx += sx;
        }
        if e2 < dx {
            err += dx;
            ny += sy;
        }

        if nx < 0 || ny < 0 || nx >= cols || ny >= rows {
            break;
        }
        x = nx;
        y = ny;
    }

    line
}

/// Euclidean distance between two pixels, in pixels.
pub fn pixel_distance(a: (usize, usize), b: (usize, usize)) -> f64 {
    let dc = a.0 as f64 - b.0 as f64;
    let dr = a.1 as f64 - b.1 as f64;
    dc.hypot(dr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

    #[test]
    fn test_trace_north() {
        let line = trace(5, 10, 3.0, 0.0, 20, 20);
        assert_eq!(line, vec![(5, 10), (5, 9), (5, 8), (5, 7)]);
    }

    #[test]
    fn test_trace_east_and_south() {
        assert_eq!(trace(2, 2, 2.0, FRAC_PI_2, 5, 5), vec![(2, 2), (3, 2), (4, 2)]);
        assert_eq!(trace(2, 0, 2.0, PI, 5, 5), vec![(2, 0), (2, 1), (2, 2)]);
    }

    #[test]
    fn test_trace_diagonal() {
        // 4 * sin(45°) = 2.83 rounds to 3
        let line = trace(0, 10, 4.0, FRAC_PI_4, 20, 20);
        assert_eq!(line, vec![(0, 10), (1, 9), (2, 8), (3, 7)]);
    }

    #[test]
    fn test_trace_shallow_slope() {
        // Endpoint (10, 7): dx = 10, dy = 3
        let az = (10.0f64).atan2(3.0);
        let line = trace(0, 10, (109.0f64).sqrt(), az, 20, 20);
        assert_eq!(line.first(), Some(&(0, 10)));
        assert_eq!(line.last(), Some(&(10, 7)));
        assert_eq!(line.len(), 11);
        for w in line.windows(2) {
            assert_eq!(w[1].0, w[0].0 + 1);
            assert!(w[0].1 - w[1].1 <= 1);
        }
    }

    #[test]
    fn test_trace_clips_at_edge() {
        // Heading west from column 2: (1, 5) and (0, 5) then the edge
        let line = trace(2, 5, 50.0, 1.5 * PI, 10, 10);
        assert_eq!(line, vec![(2, 5), (1, 5), (0, 5)]);

        let line = trace(7, 7, 50.0, FRAC_PI_4, 10, 10);
        assert_eq!(line, vec![(7, 7), (8, 6), (9, 5)]);
    }

    #[test]
    fn test_trace_zero_distance_and_outside_start() {
        assert_eq!(trace(3, 3, 0.0, 1.0, 5, 5), vec![(3, 3)]);
        assert!(trace(5, 3, 10.0, 1.0, 5, 5).is_empty());
    }

    #[test]
    fn test_trace_stays_in_bounds_and_short() {
        let (rows, cols) = (37, 23);
        let max_dist = 40.0;
        for step in 0..72 {
            let az = step as f64 * 5.0f64.to_radians();
            for &(c, r) in &[(0, 0), (11, 18), (22, 36), (5, 30)] {
                let line = trace(c, r, max_dist, az, rows, cols);
                assert_eq!(line[0], (c, r));
                assert!(line.len() as f64 <= f64::round(max_dist) + 1.0);
                assert!(line.iter().all(|&(x, y)| x < cols && y < rows));
                for w in line.windows(2) {
                    assert_ne!(w[0], w[1]);
                    assert!(w[0].0.abs_diff(w[1].0) <= 1 && w[0].1.abs_diff(w[1].1) <= 1);
                }
            }
        }
    }

    #[test]
    fn test_trace_fractional_distance_rounds_endpoint() {
        // 2.6 px rounds to a 3 px endpoint: 4 pixels including the start
        let line = trace(5, 10, 2.6, 0.0, 20, 20);
        assert_eq!(line, vec![(5, 10), (5, 9), (5, 8), (5, 7)]);
        assert_eq!(line.len(), 2.6f64.round() as usize + 1);
        assert_eq!(trace(5, 10, 2.4, 0.0, 20, 20).len(), 3);

        for step in 0..36 {
            let az = step as f64 * 10.0f64.to_radians();
            for d in [0.4, 1.5, 3.49, 7.7, 12.5] {
                let line = trace(15, 15, d, az, 30, 30);
                assert!(line.len() as f64 <= f64::round(d) + 1.0, "d = {}, az = {}", d, az);
            }
        }
    }

    #[test]
    fn test_trace_huge_distance_is_clipped_cheaply() {
        for d in [1e13, 1e300, f64::MAX, f64::INFINITY] {
            let line = trace(5, 5, d, 0.7, 10, 10);
            assert_eq!(line.first(), Some(&(5, 5)));
            assert!(line.len() <= 10);
            assert!(line.iter().all(|&(c, r)| c < 10 && r < 10));
            let last = *line.last().unwrap();
            // Stops at the top or right edge
            assert!(last.0 == 9 || last.1 == 0, "{:?}", last);
        }
        assert_eq!(trace(5, 5, 1e13, 0.0, 10, 10).len(), 6);
        assert_eq!(trace(5, 5, f64::NAN, 0.0, 10, 10), vec![(5, 5)]);
    }

    #[test]
    fn test_trace_deterministic() {
        assert_eq!(trace(4, 4, 30.0, 2.2, 50, 50), trace(4, 4, 30.0, 2.2, 50, 50));
    }

    #[test]
    fn test_pixel_distance() {
        assert_eq!(pixel_distance((0, 0), (3, 4)), 5.0);
        assert_eq!(pixel_distance((3, 4), (3, 4)), 0.0);
    }
}
