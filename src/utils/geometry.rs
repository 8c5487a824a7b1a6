// Pure geometry helpers shared by detection, mask building and OCR cropping

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::drawing::{draw_line_segment_mut, draw_polygon_mut};
use imageproc::point::Point;
use tracing::trace;

use crate::core::types::QuadBox;

/// Divide every point by the resize ratio, keeping sub-pixel precision.
///
/// No check on the ratio: a zero ratio yields infinities the caller has to
/// live with, exactly as the raw division would.
pub fn rescale_points(points: &[(f32, f32)], ratio_w: f32, ratio_h: f32) -> Vec<(f32, f32)> {
    points
        .iter()
        .map(|&(x, y)| (x / ratio_w, y / ratio_h))
        .collect()
}

/// Map boxes from a resized frame back to the original frame, truncating
/// toward zero.
pub fn rescale_boxes(boxes: &[QuadBox], ratio_w: f32, ratio_h: f32) -> Vec<QuadBox> {
    boxes
        .iter()
        .map(|quad| {
            let points = quad.points.map(|p| {
                Point::new(
                    (p.x as f32 / ratio_w) as i32,
                    (p.y as f32 / ratio_h) as i32,
                )
            });
            QuadBox::new(points)
        })
        .collect()
}

/// Binary structuring element with its anchor at the kernel centre.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuringElement {
    width: usize,
    height: usize,
    cells: Vec<bool>,
}

impl StructuringElement {
    /// Ellipse inscribed in a `width x height` box, cell-for-cell the same
    /// shape OpenCV builds for `MORPH_ELLIPSE`.
    pub fn ellipse(width: usize, height: usize) -> Self {
        let mut cells = vec![false; width * height];
        let r = (height / 2) as i64;
        let c = (width / 2) as i64;
        let inv_r2 = if r > 0 { 1.0 / (r * r) as f64 } else { 0.0 };

        for i in 0..height {
            let dy = i as i64 - r;
            if dy.abs() > r {
                continue;
            }
            let dx = (c as f64 * (((r * r - dy * dy) as f64) * inv_r2).sqrt()).round_ties_even()
                as i64;
            let j1 = (c - dx).max(0) as usize;
            let j2 = ((c + dx + 1).min(width as i64)).max(0) as usize;
            for j in j1..j2 {
                cells[i * width + j] = true;
            }
        }

        Self {
            width,
            height,
            cells,
        }
    }

    pub fn rect(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            cells: vec![true; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn contains(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height && self.cells[y * self.width + x]
    }

    fn offsets(&self) -> Vec<(i64, i64)> {
        let ax = (self.width / 2) as i64;
        let ay = (self.height / 2) as i64;
        (0..self.height)
            .flat_map(|y| (0..self.width).map(move |x| (x, y)))
            .filter(|&(x, y)| self.contains(x, y))
            .map(|(x, y)| (x as i64 - ax, y as i64 - ay))
            .collect()
    }
}

/// One pass of binary dilation. Any non-zero input pixel counts as set and
/// every covered output pixel becomes 255; pixels outside the image never
/// contribute.
pub fn dilate(mask: &GrayImage, element: &StructuringElement) -> GrayImage {
    let (w, h) = mask.dimensions();
    let mut out = GrayImage::new(w, h);
    let offsets = element.offsets();
    if offsets.is_empty() {
        return out;
    }

    // dst(x, y) = max over kernel cells of src(x + dx, y + dy), so each set
    // source pixel stamps the reflected kernel.
    for (sx, sy, px) in mask.enumerate_pixels() {
        if px[0] == 0 {
            continue;
        }
        for &(dx, dy) in &offsets {
            let x = sx as i64 - dx;
            let y = sy as i64 - dy;
            if x >= 0 && y >= 0 && x < w as i64 && y < h as i64 {
                out.put_pixel(x as u32, y as u32, Luma([255]));
            }
        }
    }
    out
}

/// Fill a closed polygon (edges included), clipped to the canvas.
///
/// Repeated vertices are collapsed first; a polygon that degenerates to a
/// segment or a single point is drawn as such.
pub fn fill_polygon(canvas: &mut GrayImage, points: &[Point<i32>], value: u8) {
    let mut poly: Vec<Point<i32>> = Vec::with_capacity(points.len());
    for &p in points {
        if poly.last() != Some(&p) {
            poly.push(p);
        }
    }
    while poly.len() > 1 && poly.first() == poly.last() {
        poly.pop();
    }

    let color = Luma([value]);
    match poly.len() {
        0 => {}
        1 => {
            let p = poly[0];
            if p.x >= 0 && p.y >= 0 && (p.x as u32) < canvas.width() && (p.y as u32) < canvas.height()
            {
                canvas.put_pixel(p.x as u32, p.y as u32, color);
            }
        }
        2 => draw_line_segment_mut(
            canvas,
            (poly[0].x as f32, poly[0].y as f32),
            (poly[1].x as f32, poly[1].y as f32),
            color,
        ),
        _ => draw_polygon_mut(canvas, &poly, color),
    }
}

/// Rasterize boxes into a `width x height` binary mask, then dilate once with
/// a `radius x radius` ellipse when `radius > 0`.
pub fn rasterize_mask(width: u32, height: u32, boxes: &[QuadBox], radius: u32) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    for quad in boxes {
        fill_polygon(&mut mask, &quad.points, 255);
    }
    trace!("Rasterized {} boxes into {}x{} mask", boxes.len(), width, height);

    if radius == 0 {
        return mask;
    }
    let element = StructuringElement::ellipse(radius as usize, radius as usize);
    dilate(&mask, &element)
}

/// Crop the inclusive bounding rectangle of `quad` (clamped to the image) and
/// zero every pixel outside the quadrilateral. May return an empty image.
pub fn crop_quad(image: &RgbImage, quad: &QuadBox) -> RgbImage {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return RgbImage::new(0, 0);
    }
    let (min_x, min_y, max_x, max_y) = quad.bounds();
    let x0 = min_x.max(0);
    let y0 = min_y.max(0);
    let x1 = max_x.min(w as i32 - 1);
    let y1 = max_y.min(h as i32 - 1);
    if x0 > x1 || y0 > y1 {
        return RgbImage::new(0, 0);
    }

    let crop_w = (x1 - x0 + 1) as u32;
    let crop_h = (y1 - y0 + 1) as u32;

    let local: Vec<Point<i32>> = quad
        .points
        .iter()
        .map(|p| Point::new(p.x - x0, p.y - y0))
        .collect();
    let mut stencil = GrayImage::new(crop_w, crop_h);
    fill_polygon(&mut stencil, &local, 255);

    RgbImage::from_fn(crop_w, crop_h, |x, y| {
        if stencil.get_pixel(x, y)[0] == 0 {
            Rgb([0, 0, 0])
        } else {
            *image.get_pixel(x0 as u32 + x, y0 as u32 + y)
        }
    })
}
