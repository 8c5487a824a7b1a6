// Score-map post-processing: region and link maps to region outlines
//
// Outlines come back in score-map pixel coordinates; the caller maps them to
// the original image.

use geo::{ConvexHull, MinimumRotatedRect, MultiPoint};
use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use ndarray::ArrayView2;
use std::collections::BTreeMap;
use tracing::trace;

use crate::utils::geometry::{dilate, StructuringElement};

/// Components smaller than this are noise
const MIN_COMPONENT_AREA: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct ScoreThresholds {
    /// Peak region score a component needs to be kept
    pub text_threshold: f32,
    /// Region score above which a pixel belongs to some component
    pub low_text: f32,
    /// Link score above which a pixel joins neighbouring characters
    pub link_threshold: f32,
}

#[derive(Debug)]
struct ComponentStats {
    area: usize,
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    peak: f32,
}

/// Find text regions in the score maps.
///
/// With `polygon_mode` off every region is a 4-point box (minimum-area
/// rectangle, or the axis-aligned bounds when that rectangle is nearly
/// square). With it on, regions are convex outlines with any number of points.
pub fn extract_regions(
    text_map: ArrayView2<f32>,
    link_map: ArrayView2<f32>,
    thresholds: &ScoreThresholds,
    polygon_mode: bool,
) -> Vec<Vec<(f32, f32)>> {
    let (h, w) = text_map.dim();
    if h == 0 || w == 0 || link_map.dim() != (h, w) {
        return Vec::new();
    }

    let is_text = |x: u32, y: u32| text_map[[y as usize, x as usize]] > thresholds.low_text;
    let is_link = |x: u32, y: u32| link_map[[y as usize, x as usize]] > thresholds.link_threshold;

    let combined = GrayImage::from_fn(w as u32, h as u32, |x, y| {
        if is_text(x, y) || is_link(x, y) {
            Luma([255])
        } else {
            Luma([0])
        }
    });
    let labels = connected_components(&combined, Connectivity::Four, Luma([0u8]));

    let mut components: BTreeMap<u32, ComponentStats> = BTreeMap::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0];
        if label == 0 {
            continue;
        }
        let score = text_map[[y as usize, x as usize]];
        let stats = components.entry(label).or_insert(ComponentStats {
            area: 0,
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            peak: f32::MIN,
        });
        stats.area += 1;
        stats.min_x = stats.min_x.min(x);
        stats.min_y = stats.min_y.min(y);
        stats.max_x = stats.max_x.max(x);
        stats.max_y = stats.max_y.max(y);
        stats.peak = stats.peak.max(score);
    }
    trace!("Score maps {}x{}: {} candidate components", w, h, components.len());

    let mut regions = Vec::new();
    for (label, stats) in &components {
        if stats.area < MIN_COMPONENT_AREA || stats.peak < thresholds.text_threshold {
            continue;
        }

        let bw = (stats.max_x - stats.min_x + 1) as i64;
        let bh = (stats.max_y - stats.min_y + 1) as i64;
        let niter = ((stats.area as f64 * bw.min(bh) as f64 / (bw * bh) as f64).sqrt() * 2.0) as i64;

        let sx = (stats.min_x as i64 - niter).max(0) as u32;
        let sy = (stats.min_y as i64 - niter).max(0) as u32;
        let ex = (stats.min_x as i64 + bw + niter + 1).min(w as i64) as u32;
        let ey = (stats.min_y as i64 + bh + niter + 1).min(h as i64) as u32;

        // Pixels held only by the link map are separators, not glyphs
        let segment = GrayImage::from_fn(ex - sx, ey - sy, |x, y| {
            let (gx, gy) = (sx + x, sy + y);
            let in_component = labels.get_pixel(gx, gy)[0] == *label;
            if in_component && !(is_link(gx, gy) && !is_text(gx, gy)) {
                Luma([255])
            } else {
                Luma([0])
            }
        });
        let size = (1 + niter) as usize;
        let grown = dilate(&segment, &StructuringElement::rect(size, size));

        let points: Vec<(f64, f64)> = grown
            .enumerate_pixels()
            .filter(|(_, _, p)| p[0] != 0)
            .map(|(x, y, _)| ((sx + x) as f64, (sy + y) as f64))
            .collect();
        if points.is_empty() {
            continue;
        }

        let outline = if polygon_mode {
            convex_outline(&points)
        } else {
            min_area_quad(&points).to_vec()
        };
        regions.push(canonical_order(outline));
    }

    regions
        .into_iter()
        .map(|outline| outline.into_iter().map(|(x, y)| (x as f32, y as f32)).collect())
        .collect()
}

fn axis_aligned(points: &[(f64, f64)]) -> [(f64, f64); 4] {
    let (l, t, r, b) = points.iter().fold(
        (f64::MAX, f64::MAX, f64::MIN, f64::MIN),
        |(l, t, r, b), &(x, y)| (l.min(x), t.min(y), r.max(x), b.max(y)),
    );
    [(l, t), (r, t), (r, b), (l, b)]
}

fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Minimum-area rectangle around the points; near-square results are
/// replaced by the axis-aligned bounds.
pub(crate) fn min_area_quad(points: &[(f64, f64)]) -> [(f64, f64); 4] {
    let rotated = MultiPoint::from(points.to_vec())
        .minimum_rotated_rect()
        .and_then(|rect| {
            let coords: Vec<(f64, f64)> = rect.exterior().coords().map(|c| (c.x, c.y)).collect();
            (coords.len() >= 4).then(|| [coords[0], coords[1], coords[2], coords[3]])
        });

    let quad = match rotated {
        Some(quad) => quad,
        None => return axis_aligned(points),
    };

    let side_a = distance(quad[0], quad[1]);
    let side_b = distance(quad[1], quad[2]);
    let box_ratio = side_a.max(side_b) / (side_a.min(side_b) + 1e-5);
    if (1.0 - box_ratio).abs() <= 0.1 {
        axis_aligned(points)
    } else {
        quad
    }
}

fn convex_outline(points: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let hull = MultiPoint::from(points.to_vec()).convex_hull();
    let mut coords: Vec<(f64, f64)> = hull.exterior().coords().map(|c| (c.x, c.y)).collect();
    if coords.len() > 1 && coords.first() == coords.last() {
        coords.pop();
    }
    if coords.len() < 3 {
        return axis_aligned(points).to_vec();
    }
    coords
}

/// Clockwise on screen (positive shoelace with y pointing down), starting
/// from the point closest to the top-left corner.
pub(crate) fn canonical_order(mut outline: Vec<(f64, f64)>) -> Vec<(f64, f64)> {
    let n = outline.len();
    if n < 3 {
        return outline;
    }
    let twice_area: f64 = (0..n)
        .map(|i| {
            let (x0, y0) = outline[i];
            let (x1, y1) = outline[(i + 1) % n];
            x0 * y1 - x1 * y0
        })
        .sum();
    if twice_area < 0.0 {
        outline.reverse();
    }

    let start = outline
        .iter()
        .enumerate()
        .fold((0, f64::MAX), |(best, best_sum), (i, &(x, y))| {
            if x + y < best_sum {
                (i, x + y)
            } else {
                (best, best_sum)
            }
        })
        .0;
    outline.rotate_left(start);
    outline
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    const THRESHOLDS: ScoreThresholds = ScoreThresholds {
        text_threshold: 0.7,
        low_text: 0.4,
        link_threshold: 0.4,
    };

    fn blob(h: usize, w: usize, xs: std::ops::RangeInclusive<usize>, ys: std::ops::RangeInclusive<usize>, score: f32) -> Array2<f32> {
        let mut map = Array2::<f32>::zeros((h, w));
        for y in ys {
            for x in xs.clone() {
                map[[y, x]] = score;
            }
        }
        map
    }

    #[test]
    fn square_blob_becomes_axis_aligned_box() {
        let text = blob(64, 64, 10..=19, 10..=19, 0.9);
        let link = Array2::<f32>::zeros((64, 64));
        let regions = extract_regions(text.view(), link.view(), &THRESHOLDS, false);
        assert_eq!(regions.len(), 1);
        // niter = int(sqrt(100 * 10 / 100) * 2) = 6, a 7x7 kernel grows 3px per side
        assert_eq!(
            regions[0],
            vec![(7.0, 7.0), (22.0, 7.0), (22.0, 22.0), (7.0, 22.0)]
        );
    }

    #[test]
    fn elongated_blob_keeps_its_rectangle() {
        let text = blob(64, 64, 10..=39, 10..=19, 0.9);
        let link = Array2::<f32>::zeros((64, 64));
        let regions = extract_regions(text.view(), link.view(), &THRESHOLDS, false);
        assert_eq!(regions.len(), 1);
        let expected = [(7.0, 7.0), (42.0, 7.0), (42.0, 22.0), (7.0, 22.0)];
        for (got, want) in regions[0].iter().zip(expected.iter()) {
            assert!((got.0 - want.0).abs() < 1e-3 && (got.1 - want.1).abs() < 1e-3, "{got:?} vs {want:?}");
        }
    }

    #[test]
    fn weak_and_tiny_components_are_dropped() {
        let mut text = blob(64, 64, 5..=30, 5..=15, 0.5);
        text[[40, 40]] = 0.95;
        text[[40, 41]] = 0.95;
        let link = Array2::<f32>::zeros((64, 64));
        assert!(extract_regions(text.view(), link.view(), &THRESHOLDS, false).is_empty());
    }

    #[test]
    fn links_join_neighbouring_characters() {
        let mut text = blob(64, 64, 10..=17, 10..=19, 0.9);
        for y in 10..=19 {
            for x in 22..=29 {
                text[[y, x]] = 0.9;
            }
        }
        let link = blob(64, 64, 18..=21, 12..=17, 0.8);
        let separate = extract_regions(text.view(), Array2::<f32>::zeros((64, 64)).view(), &THRESHOLDS, false);
        let joined = extract_regions(text.view(), link.view(), &THRESHOLDS, false);
        assert_eq!(separate.len(), 2);
        assert_eq!(joined.len(), 1);
    }

    #[test]
    fn canonical_order_starts_top_left_clockwise() {
        let ordered = canonical_order(vec![(0.0, 10.0), (10.0, 10.0), (10.0, 0.0), (0.0, 0.0)]);
        assert_eq!(ordered, vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]);
    }
}
