//! Geometric rectification: find the card's four corners in a photo and
//! warp them to a flat, axis-aligned rectangle.
//!
//! ## Algorithm
//!
//! ```text
//! photo ─▶ gray ─▶ resize(h = working_height) ─▶ gaussian(5×5) ─▶ canny(75, 200)
//!       ─▶ contours ─▶ top-N by area ─▶ approx polygon (ε = 2 % perimeter)
//!       ─▶ first 4-gon × ratio ─▶ order corners ─▶ perspective warp
//! ```
//!
//! Detection runs on a downscaled copy; the accepted polygon is scaled back
//! and the warp samples the full-resolution photo. Any miss yields
//! [`Degradation::NoQuadrilateral`] with the input image as the fallback.

use crate::output::{Degradation, StageOutcome};
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use imageproc::contours::find_contours;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use tracing::{debug, warn};

/// A 2-D point in image pixel coordinates.
pub type Point = (f32, f32);

const CANNY_LOW: f32 = 75.0;
const CANNY_HIGH: f32 = 200.0;
/// Sigma of a 5×5 Gaussian kernel when sigma is derived from the kernel size.
const BLUR_SIGMA: f32 = 1.1;
/// Polygon approximation tolerance as a fraction of the contour perimeter.
const APPROX_EPSILON_RATIO: f64 = 0.02;

/// Order four corners as `[top-left, top-right, bottom-right, bottom-left]`.
///
/// Top-left has the smallest `x + y`, bottom-right the largest. Top-right has
/// the smallest `y − x`, bottom-left the largest. Ties go to the earliest
/// input point.
pub fn order_points(pts: &[Point; 4]) -> [Point; 4] {
    let sum = |p: &Point| p.0 + p.1;
    let diff = |p: &Point| p.1 - p.0;
    [
        pts[argmin(pts, sum)],
        pts[argmin(pts, diff)],
        pts[argmax(pts, sum)],
        pts[argmax(pts, diff)],
    ]
}

fn argmin(pts: &[Point; 4], key: impl Fn(&Point) -> f32) -> usize {
    let mut best = 0;
    for i in 1..4 {
        if key(&pts[i]) < key(&pts[best]) {
            best = i;
        }
    }
    best
}

fn argmax(pts: &[Point; 4], key: impl Fn(&Point) -> f32) -> usize {
    let mut best = 0;
    for i in 1..4 {
        if key(&pts[i]) > key(&pts[best]) {
            best = i;
        }
    }
    best
}

fn distance(a: Point, b: Point) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Locate the card boundary. Returns the four corners in full-resolution
/// coordinates, unordered, or `None` if no contour simplifies to a 4-gon.
pub fn find_card_quad(
    img: &DynamicImage,
    working_height: u32,
    max_candidates: usize,
) -> Option<[Point; 4]> {
    let gray = img.to_luma8();
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 || working_height == 0 {
        return None;
    }

    let ratio = h as f32 / working_height as f32;
    let small_w = ((w as f32 / ratio) as u32).max(3);
    let small = image::imageops::resize(&gray, small_w, working_height, FilterType::Triangle);
    let blurred = gaussian_blur_f32(&small, BLUR_SIGMA);
    let edges = canny(&blurred, CANNY_LOW, CANNY_HIGH);

    let mut contours = area_ranked_contours(&edges);
    debug!("Rectify: {} contours on {}x{} edge map", contours.len(), small_w, working_height);
    contours.truncate(max_candidates);

    for (_, contour) in &contours {
        let epsilon = APPROX_EPSILON_RATIO * arc_length(contour);
        let approx = approx_polygon(contour, epsilon);
        if approx.len() == 4 {
            let mut quad = [(0.0f32, 0.0f32); 4];
            for (slot, p) in quad.iter_mut().zip(&approx) {
                *slot = (p.0 as f32 * ratio, p.1 as f32 * ratio);
            }
            debug!("Rectify: accepted quadrilateral {:?}", quad);
            return Some(quad);
        }
    }
    None
}

/// Warp the region bounded by `quad` to an upright rectangle.
///
/// Width is the longer of the top and bottom edges, height the longer of the
/// left and right edges. Returns `None` for degenerate quads.
pub fn four_point_transform(img: &RgbImage, quad: &[Point; 4]) -> Option<RgbImage> {
    let [tl, tr, br, bl] = order_points(quad);
    let max_w = (distance(br, bl) as u32).max(distance(tr, tl) as u32);
    let max_h = (distance(tr, br) as u32).max(distance(tl, bl) as u32);
    if max_w < 2 || max_h < 2 {
        return None;
    }

    let (wf, hf) = ((max_w - 1) as f32, (max_h - 1) as f32);
    let dst = [(0.0, 0.0), (wf, 0.0), (wf, hf), (0.0, hf)];
    let projection = Projection::from_control_points([tl, tr, br, bl], dst)?;

    let mut out = RgbImage::new(max_w, max_h);
    warp_into(img, &projection, Interpolation::Bilinear, Rgb([0, 0, 0]), &mut out);
    Some(out)
}

/// Rectify a card photo, falling back to the input when no boundary is found.
pub fn rectify(
    img: &DynamicImage,
    working_height: u32,
    max_candidates: usize,
) -> StageOutcome<DynamicImage> {
    let Some(quad) = find_card_quad(img, working_height, max_candidates) else {
        warn!("Rectify: no card boundary found, using full image");
        return StageOutcome::degraded(img.clone(), Degradation::NoQuadrilateral);
    };
    match four_point_transform(&img.to_rgb8(), &quad) {
        Some(flat) => {
            debug!("Rectify: warped to {}x{}", flat.width(), flat.height());
            StageOutcome::Complete(DynamicImage::ImageRgb8(flat))
        }
        None => {
            warn!("Rectify: degenerate quadrilateral {:?}, using full image", quad);
            StageOutcome::degraded(img.clone(), Degradation::NoQuadrilateral)
        }
    }
}

// ── Polygon helpers ─────────────────────────────────────────────────────────

/// Contours of an edge map, largest area first, each paired with its area.
///
/// The sort is stable, so equal areas keep discovery order.
fn area_ranked_contours(edges: &GrayImage) -> Vec<(f64, Vec<(f64, f64)>)> {
    let mut ranked: Vec<(f64, Vec<(f64, f64)>)> = find_contours::<i32>(edges)
        .into_iter()
        .filter(|c| c.points.len() >= 4)
        .map(|c| {
            let points: Vec<(f64, f64)> =
                c.points.iter().map(|p| (p.x as f64, p.y as f64)).collect();
            (polygon_area(&points), points)
        })
        .collect();
    ranked.sort_by(|a, b| b.0.total_cmp(&a.0));
    ranked
}

/// Shoelace area of a closed polygon (last point connects to the first).
pub(crate) fn polygon_area(points: &[(f64, f64)]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut area = 0.0;
    for i in 0..points.len() {
        let (a, b) = (points[i], points[(i + 1) % points.len()]);
        area += a.0 * b.1 - b.0 * a.1;
    }
    area.abs() * 0.5
}

/// Perimeter of a closed polygon.
pub(crate) fn arc_length(points: &[(f64, f64)]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    (0..points.len())
        .map(|i| {
            let (a, b) = (points[i], points[(i + 1) % points.len()]);
            ((b.0 - a.0).powi(2) + (b.1 - a.1).powi(2)).sqrt()
        })
        .sum()
}

/// Douglas-Peucker simplification of a closed contour.
///
/// The ring is cut at two mutually distant points, which are always kept,
/// and each half is simplified as an open chain.
pub(crate) fn approx_polygon(points: &[(f64, f64)], epsilon: f64) -> Vec<(f64, f64)> {
    let n = points.len();
    if n < 3 {
        return points.to_vec();
    }
    let far_from = |origin: (f64, f64)| {
        let mut best = 0;
        let mut best_d = -1.0;
        for (i, p) in points.iter().enumerate() {
            let d = (p.0 - origin.0).powi(2) + (p.1 - origin.1).powi(2);
            if d > best_d {
                best = i;
                best_d = d;
            }
        }
        best
    };
    let a = far_from(points[0]);
    let b = far_from(points[a]);
    if a == b {
        return vec![points[a]];
    }
    let (start, mid) = (a.min(b), a.max(b));

    let first: Vec<(f64, f64)> = points[start..=mid].to_vec();
    let second: Vec<(f64, f64)> = points[mid..]
        .iter()
        .chain(points[..=start].iter())
        .copied()
        .collect();

    let mut out = douglas_peucker(&first, epsilon);
    out.pop();
    let mut tail = douglas_peucker(&second, epsilon);
    tail.pop();
    out.extend(tail);
    out
}

fn douglas_peucker(points: &[(f64, f64)], epsilon: f64) -> Vec<(f64, f64)> {
    let n = points.len();
    if n < 3 {
        return points.to_vec();
    }
    let mut keep = vec![false; n];
    keep[0] = true;
    keep[n - 1] = true;

    let mut stack = vec![(0, n - 1)];
    while let Some((start, end)) = stack.pop() {
        if end - start < 2 {
            continue;
        }
        let mut dmax = 0.0;
        let mut index = start;
        for i in start + 1..end {
            let d = perpendicular_distance(points[i], points[start], points[end]);
            if d > dmax {
                index = i;
                dmax = d;
            }
        }
        if dmax > epsilon {
            keep[index] = true;
            stack.push((start, index));
            stack.push((index, end));
        }
    }

    points
        .iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(*p))
        .collect()
}

fn perpendicular_distance(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let dx = b.0 - a.0;
    let dy = b.1 - a.1;
    let mag = (dx * dx + dy * dy).sqrt();
    if mag < 1e-9 {
        return ((p.0 - a.0).powi(2) + (p.1 - a.1).powi(2)).sqrt();
    }
    (dy * p.0 - dx * p.1 + b.0 * a.1 - b.1 * a.0).abs() / mag
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use imageproc::drawing::draw_polygon_mut;
    use imageproc::point::Point as IPoint;

    #[test]
    fn order_points_is_independent_of_input_order() {
        let tl = (10.0, 12.0);
        let tr = (200.0, 5.0);
        let br = (210.0, 120.0);
        let bl = (8.0, 110.0);
        let perms = [[tl, tr, br, bl], [br, bl, tl, tr], [tr, tl, bl, br], [bl, br, tr, tl]];
        for p in perms {
            assert_eq!(order_points(&p), [tl, tr, br, bl]);
        }
    }

    #[test]
    fn order_points_extremes() {
        let pts = [(95.0, 60.0), (3.0, 1.0), (90.0, 2.0), (4.0, 70.0)];
        let o = order_points(&pts);
        let sums: Vec<f32> = pts.iter().map(|p| p.0 + p.1).collect();
        let min_sum = sums.iter().cloned().fold(f32::MAX, f32::min);
        let max_sum = sums.iter().cloned().fold(f32::MIN, f32::max);
        assert_eq!(o[0].0 + o[0].1, min_sum);
        assert_eq!(o[2].0 + o[2].1, max_sum);
        assert_eq!(o[1], (90.0, 2.0));
        assert_eq!(o[3], (4.0, 70.0));
    }

    #[test]
    fn uniform_image_is_returned_unchanged() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(120, 80, Rgb([200, 200, 200])));
        let out = rectify(&img, 500, 5);
        assert_eq!(out.degradation(), Some(&Degradation::NoQuadrilateral));
        assert_eq!(out.into_value(), img);
    }

    #[test]
    fn tiny_image_has_no_quad() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(2, 2));
        assert!(find_card_quad(&img, 500, 5).is_none());
    }

    #[test]
    fn axis_aligned_quad_warps_to_its_own_size() {
        let mut img = RgbImage::from_pixel(50, 40, Rgb([0, 0, 0]));
        for y in 10..30 {
            for x in 10..40 {
                img.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let quad = [(40.0, 30.0), (10.0, 10.0), (40.0, 10.0), (10.0, 30.0)];
        let out = four_point_transform(&img, &quad).unwrap();
        assert_eq!(out.dimensions(), (30, 20));
        assert_eq!(out.get_pixel(15, 10), &Rgb([255, 255, 255]));
    }

    #[test]
    fn degenerate_quad_is_rejected() {
        let img = RgbImage::new(10, 10);
        let quad = [(1.0, 1.0), (1.0, 1.0), (1.0, 1.0), (1.0, 1.0)];
        assert!(four_point_transform(&img, &quad).is_none());
    }

    #[test]
    fn approx_polygon_recovers_square_corners() {
        let mut ring = Vec::new();
        for i in 0..100 {
            ring.push((i as f64, 0.0));
        }
        for i in 0..100 {
            ring.push((100.0, i as f64));
        }
        for i in 0..100 {
            ring.push((100.0 - i as f64, 100.0));
        }
        for i in 0..100 {
            ring.push((0.0, 100.0 - i as f64));
        }
        let approx = approx_polygon(&ring, 0.02 * arc_length(&ring));
        assert_eq!(approx.len(), 4, "got {approx:?}");
        assert!((polygon_area(&approx) - 10_000.0).abs() < 1.0);
    }

    #[test]
    fn contours_are_ranked_by_area_descending() {
        let mut edges = GrayImage::new(60, 40);
        for (x0, y0, side) in [(2u32, 2u32, 6u32), (20, 5, 20), (50, 30, 4)] {
            for i in 0..=side {
                for (x, y) in [(x0 + i, y0), (x0 + i, y0 + side), (x0, y0 + i), (x0 + side, y0 + i)] {
                    edges.put_pixel(x, y, Luma([255]));
                }
            }
        }
        let ranked = area_ranked_contours(&edges);
        assert!(ranked.len() >= 3, "got {} contours", ranked.len());
        assert!(ranked.windows(2).all(|w| w[0].0 >= w[1].0));
        for (area, points) in &ranked {
            assert_eq!(*area, polygon_area(points));
        }
        assert!(ranked[0].0 > 300.0, "largest square first: {}", ranked[0].0);
    }

    #[test]
    fn polygon_helpers() {
        let sq = [(0.0, 0.0), (2.0, 0.0), (2.0, 2.0), (0.0, 2.0)];
        assert_eq!(polygon_area(&sq), 4.0);
        assert_eq!(arc_length(&sq), 8.0);
    }

    #[test]
    fn bright_card_on_dark_background_is_found() {
        let mut gray = GrayImage::from_pixel(400, 300, Luma([20]));
        let corners = [
            IPoint::new(60, 50),
            IPoint::new(340, 70),
            IPoint::new(330, 250),
            IPoint::new(70, 240),
        ];
        draw_polygon_mut(&mut gray, &corners, Luma([235]));
        let img = DynamicImage::ImageLuma8(gray);

        let out = rectify(&img, 500, 5);
        assert!(!out.is_degraded(), "card boundary should be detected");
        let flat = out.into_value();
        assert!((240..=310).contains(&flat.width()), "width {}", flat.width());
        assert!((160..=220).contains(&flat.height()), "height {}", flat.height());
    }
}
