pub mod postprocess;

use anyhow::{bail, Context, Result};
use image::DynamicImage;
use imageproc::point::Point;
use ndarray::Array2;
use ort::session::Session;
use ort::value::Value;
use parking_lot::Mutex;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Instant;
use tracing::{debug, info, instrument, trace};

use crate::core::config::DetectionConfig;
use crate::core::types::QuadBox;
use crate::services::onnx_builder::build_session;
use crate::utils::geometry::rescale_points;
use crate::utils::image_ops::{normalize_mean_variance, resize_aspect_ratio, ResizeTransform};
use postprocess::{extract_regions, min_area_quad, ScoreThresholds};

const INPUT_NAME: &str = "input";
const OUTPUT_NAME: &str = "output";

/// Image in, quadrilateral boxes in original pixel coordinates out
pub trait TextDetector: Send + Sync {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<QuadBox>>;
}

/// What to do with detected regions that are not 4-point boxes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegionShapePolicy {
    /// Drop them
    #[default]
    QuadOnly,
    /// Reduce them to their minimum-area rectangle
    MinAreaRect,
}

impl RegionShapePolicy {
    pub fn apply(&self, outline: &[(f32, f32)]) -> Option<[(f32, f32); 4]> {
        if let [a, b, c, d] = outline {
            return Some([*a, *b, *c, *d]);
        }
        match self {
            RegionShapePolicy::QuadOnly => None,
            RegionShapePolicy::MinAreaRect if outline.len() >= 3 => {
                let points: Vec<(f64, f64)> =
                    outline.iter().map(|&(x, y)| (x as f64, y as f64)).collect();
                let quad = postprocess::canonical_order(min_area_quad(&points).to_vec());
                Some([0, 1, 2, 3].map(|i| (quad[i].0 as f32, quad[i].1 as f32)))
            }
            RegionShapePolicy::MinAreaRect => None,
        }
    }
}

impl FromStr for RegionShapePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "quad_only" => Ok(RegionShapePolicy::QuadOnly),
            "min_area_rect" => Ok(RegionShapePolicy::MinAreaRect),
            other => Err(format!(
                "unknown region shape policy '{other}', expected quad_only or min_area_rect"
            )),
        }
    }
}

impl fmt::Display for RegionShapePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionShapePolicy::QuadOnly => f.write_str("quad_only"),
            RegionShapePolicy::MinAreaRect => f.write_str("min_area_rect"),
        }
    }
}

/// Post-processing knobs, separated from the session so they can be tested
#[derive(Debug, Clone, Copy)]
pub struct DetectionParams {
    pub thresholds: ScoreThresholds,
    pub polygon_mode: bool,
    pub shape_policy: RegionShapePolicy,
}

impl From<&DetectionConfig> for DetectionParams {
    fn from(config: &DetectionConfig) -> Self {
        Self {
            thresholds: ScoreThresholds {
                text_threshold: config.text_threshold,
                low_text: config.low_text,
                link_threshold: config.link_threshold,
            },
            polygon_mode: config.polygon_mode,
            shape_policy: config.shape_policy,
        }
    }
}

/// Turn score maps into boxes in original image coordinates.
///
/// The maps may be smaller than the network input (CRAFT halves it); that
/// stride is measured from the sizes rather than assumed.
pub fn boxes_from_score_maps(
    text_map: &Array2<f32>,
    link_map: &Array2<f32>,
    transform: &ResizeTransform,
    params: &DetectionParams,
) -> Vec<QuadBox> {
    let (map_h, map_w) = text_map.dim();
    if map_h == 0 || map_w == 0 {
        return Vec::new();
    }
    let net_ratio_w = transform.canvas_w as f32 / map_w as f32;
    let net_ratio_h = transform.canvas_h as f32 / map_h as f32;
    let ratio_w = transform.ratio / net_ratio_w;
    let ratio_h = transform.ratio / net_ratio_h;

    let regions = extract_regions(
        text_map.view(),
        link_map.view(),
        &params.thresholds,
        params.polygon_mode,
    );
    let found = regions.len();

    let boxes: Vec<QuadBox> = regions
        .iter()
        .filter_map(|outline| params.shape_policy.apply(outline))
        .map(|quad| {
            let scaled = rescale_points(&quad, ratio_w, ratio_h);
            QuadBox::new([0, 1, 2, 3].map(|i| Point::new(scaled[i].0 as i32, scaled[i].1 as i32)))
        })
        .collect();

    if boxes.len() < found {
        debug!(
            "Shape policy {} dropped {} of {} regions",
            params.shape_policy,
            found - boxes.len(),
            found
        );
    }
    boxes
}

/// Split the network output into region and link maps.
///
/// Accepts `[1, H, W, 2]` (channels last, as CRAFT exports) or `[1, 2, H, W]`.
pub fn split_score_maps(dims: &[usize], data: &[f32]) -> Result<(Array2<f32>, Array2<f32>)> {
    if dims.len() != 4 || dims[0] != 1 {
        bail!("Unexpected score map shape {:?}", dims);
    }
    let expected: usize = dims.iter().product();
    if data.len() != expected {
        bail!("Score map has {} values, shape {:?} needs {}", data.len(), dims, expected);
    }

    if dims[3] == 2 {
        let (h, w) = (dims[1], dims[2]);
        let text = Array2::from_shape_fn((h, w), |(y, x)| data[(y * w + x) * 2]);
        let link = Array2::from_shape_fn((h, w), |(y, x)| data[(y * w + x) * 2 + 1]);
        Ok((text, link))
    } else if dims[1] >= 2 {
        let (h, w) = (dims[2], dims[3]);
        let plane = h * w;
        let text = Array2::from_shape_fn((h, w), |(y, x)| data[y * w + x]);
        let link = Array2::from_shape_fn((h, w), |(y, x)| data[plane + y * w + x]);
        Ok((text, link))
    } else {
        bail!("Score map shape {:?} has no link channel", dims)
    }
}

/// CRAFT text detector on ONNX Runtime
pub struct CraftDetector {
    session: Mutex<Session>,
    config: DetectionConfig,
    params: DetectionParams,
    device_type: String,
}

impl CraftDetector {
    pub fn new(config: &DetectionConfig) -> Result<Self> {
        let (device_type, session) = build_session(
            Path::new(&config.model_path),
            "detection",
            config.inference_backend.as_deref(),
            config.intra_threads,
        )?;
        info!("✓ Detection: {} ({})", device_type, config.model_path);

        Ok(Self {
            session: Mutex::new(session),
            config: config.clone(),
            params: DetectionParams::from(config),
            device_type,
        })
    }

    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    fn infer(&self, canvas_tensor: ndarray::Array4<f32>) -> Result<(Vec<usize>, Vec<f32>)> {
        let shape = canvas_tensor.shape().to_vec();
        let shape_arr: [usize; 4] = [shape[0], shape[1], shape[2], shape[3]];
        let (data, _offset) = canvas_tensor.into_raw_vec_and_offset();
        let input = Value::from_array((shape_arr, data))?;

        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![INPUT_NAME => input])?;

        let (shape, scores) = if let Some(output) = outputs.get(OUTPUT_NAME) {
            output.try_extract_tensor::<f32>()?
        } else {
            let first_key = outputs
                .keys()
                .next()
                .context("No outputs from detection model")?;
            outputs[first_key].try_extract_tensor::<f32>()?
        };

        let dims: Vec<usize> = shape.iter().map(|&x| x as usize).collect();
        Ok((dims, scores.to_vec()))
    }
}

impl TextDetector for CraftDetector {
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    fn detect(&self, image: &DynamicImage) -> Result<Vec<QuadBox>> {
        let start = Instant::now();
        let rgb = image.to_rgb8();
        let (canvas, transform) =
            resize_aspect_ratio(&rgb, self.config.canvas_size, self.config.mag_ratio);
        trace!(
            "Resized {}x{} → {}x{} (canvas {}x{}, ratio {:.3})",
            rgb.width(),
            rgb.height(),
            transform.target_w,
            transform.target_h,
            transform.canvas_w,
            transform.canvas_h,
            transform.ratio
        );

        let tensor = normalize_mean_variance(&canvas);
        let inference_start = Instant::now();
        let (dims, scores) = self.infer(tensor)?;
        debug!(
            "✓ Inference on {} completed in {:.2}ms, score maps {:?}",
            self.device_type,
            inference_start.elapsed().as_secs_f64() * 1000.0,
            dims
        );

        let (text_map, link_map) = split_score_maps(&dims, &scores)?;
        let boxes = boxes_from_score_maps(&text_map, &link_map, &transform, &self.params);

        debug!(
            "✓ Detected {} boxes in {:.2}ms",
            boxes.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(boxes)
    }
}
