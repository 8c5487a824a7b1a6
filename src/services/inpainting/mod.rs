// Inpainting Service Module - fills masked regions of an image
//
// LaMa exports take `image` [1,3,H,W] and `mask` [1,1,H,W], both in [0,1].
// Dynamic-shape exports need H and W divisible by 8; fixed-shape exports get
// a square resize instead.

use anyhow::{bail, Context, Result};
use image::imageops::FilterType;
use image::{GrayImage, Rgb, RgbImage};
use ort::session::Session;
use ort::value::Value;
use parking_lot::Mutex;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, instrument};

use crate::core::config::{DetectionConfig, InpaintConfig};
use crate::services::onnx_builder::build_session;

const PAD_MODULO: u32 = 8;

/// Image and binary mask in, image of the same size out
pub trait Inpainter: Send + Sync {
    fn inpaint(&self, image: &RgbImage, mask: &GrayImage) -> Result<RgbImage>;
}

/// Network input after resizing or padding
#[derive(Debug)]
pub struct PreparedInput {
    pub width: u32,
    pub height: u32,
    /// [1,3,H,W] channel planes in [0,1]
    pub image: Vec<f32>,
    /// [1,1,H,W] with 1.0 where the mask is set
    pub mask: Vec<f32>,
}

fn pad_to_modulo(size: u32) -> u32 {
    size.div_ceil(PAD_MODULO) * PAD_MODULO
}

/// Mirror an out-of-range coordinate back into `0..len`
fn reflect(i: u32, len: u32) -> u32 {
    if i < len {
        i
    } else {
        (2 * len).saturating_sub(i + 1).min(len - 1)
    }
}

/// Resize to `input_size` square, or symmetric-pad up to a multiple of 8.
pub fn prepare_input(image: &RgbImage, mask: &GrayImage, input_size: Option<u32>) -> PreparedInput {
    let (src_image, src_mask) = match input_size {
        Some(size) => (
            image::imageops::resize(image, size, size, FilterType::Triangle),
            image::imageops::resize(mask, size, size, FilterType::Nearest),
        ),
        None => {
            let (w, h) = image.dimensions();
            let (pw, ph) = (pad_to_modulo(w), pad_to_modulo(h));
            let padded_image =
                RgbImage::from_fn(pw, ph, |x, y| *image.get_pixel(reflect(x, w), reflect(y, h)));
            let padded_mask =
                GrayImage::from_fn(pw, ph, |x, y| *mask.get_pixel(reflect(x, w), reflect(y, h)));
            (padded_image, padded_mask)
        }
    };

    let (width, height) = src_image.dimensions();
    let plane = (width * height) as usize;
    let mut image_data = vec![0f32; plane * 3];
    for (x, y, pixel) in src_image.enumerate_pixels() {
        let idx = (y * width + x) as usize;
        for c in 0..3 {
            image_data[c * plane + idx] = pixel[c] as f32 / 255.0;
        }
    }
    let mask_data = src_mask
        .pixels()
        .map(|p| if p[0] > 0 { 1.0 } else { 0.0 })
        .collect();

    PreparedInput {
        width,
        height,
        image: image_data,
        mask: mask_data,
    }
}

/// Turn the network output back into an image of the original size and keep
/// the original pixels wherever the mask is unset.
pub fn compose_output(
    original: &RgbImage,
    mask: &GrayImage,
    dims: &[usize],
    data: &[f32],
) -> Result<RgbImage> {
    if dims.len() != 4 || dims[0] != 1 || dims[1] != 3 {
        bail!("Unexpected inpainting output shape {:?}", dims);
    }
    let (out_h, out_w) = (dims[2], dims[3]);
    if data.len() != 3 * out_h * out_w {
        bail!("Inpainting output has {} values for shape {:?}", data.len(), dims);
    }

    // Some exports emit [0,1], others [0,255]
    let peak = data.iter().cloned().fold(f32::MIN, f32::max);
    let scale = if peak > 1.5 { 1.0 } else { 255.0 };
    let plane = out_h * out_w;
    let raw = RgbImage::from_fn(out_w as u32, out_h as u32, |x, y| {
        let idx = y as usize * out_w + x as usize;
        Rgb([0, 1, 2].map(|c| (data[c * plane + idx] * scale).round().clamp(0.0, 255.0) as u8))
    });

    let (w, h) = original.dimensions();
    let restored = if (out_w as u32) < w || (out_h as u32) < h {
        image::imageops::resize(&raw, w, h, FilterType::Triangle)
    } else if out_w as u32 == w && out_h as u32 == h {
        raw
    } else if out_w as u32 == pad_to_modulo(w) && out_h as u32 == pad_to_modulo(h) {
        // Padded input: drop the padding
        image::imageops::crop_imm(&raw, 0, 0, w, h).to_image()
    } else {
        image::imageops::resize(&raw, w, h, FilterType::Triangle)
    };

    Ok(RgbImage::from_fn(w, h, |x, y| {
        if mask.get_pixel(x, y)[0] > 0 {
            *restored.get_pixel(x, y)
        } else {
            *original.get_pixel(x, y)
        }
    }))
}

/// LaMa inpainting network on ONNX Runtime
pub struct LamaInpainter {
    session: Mutex<Session>,
    input_size: Option<u32>,
    device_type: String,
}

impl LamaInpainter {
    pub fn new(config: &InpaintConfig, detection: &DetectionConfig) -> Result<Self> {
        let (device_type, session) = build_session(
            Path::new(&config.model_path),
            "inpainting",
            detection.inference_backend.as_deref(),
            detection.intra_threads,
        )?;
        info!(
            "✓ Inpainting: {} ({}, input {})",
            device_type,
            config.model_path,
            config
                .input_size
                .map(|s| format!("{s}x{s}"))
                .unwrap_or_else(|| "dynamic".to_string())
        );

        Ok(Self {
            session: Mutex::new(session),
            input_size: config.input_size,
            device_type,
        })
    }

    pub fn device_type(&self) -> &str {
        &self.device_type
    }
}

impl Inpainter for LamaInpainter {
    #[instrument(skip_all, fields(width = image.width(), height = image.height()))]
    fn inpaint(&self, image: &RgbImage, mask: &GrayImage) -> Result<RgbImage> {
        if image.dimensions() != mask.dimensions() {
            bail!(
                "Mask is {}x{} but image is {}x{}",
                mask.width(),
                mask.height(),
                image.width(),
                image.height()
            );
        }
        let start = Instant::now();
        let prepared = prepare_input(image, mask, self.input_size);
        let (w, h) = (prepared.width as usize, prepared.height as usize);

        let image_value = Value::from_array(([1usize, 3, h, w], prepared.image))?;
        let mask_value = Value::from_array(([1usize, 1, h, w], prepared.mask))?;

        let (dims, data) = {
            let mut session = self.session.lock();
            let outputs = session.run(ort::inputs![
                "image" => image_value,
                "mask" => mask_value
            ])?;
            let first_key = outputs
                .keys()
                .next()
                .context("No outputs from inpainting model")?;
            let (shape, data) = outputs[first_key].try_extract_tensor::<f32>()?;
            let dims: Vec<usize> = shape.iter().map(|&x| x as usize).collect();
            (dims, data.to_vec())
        };
        debug!(
            "✓ Inpainting inference on {} ({}x{}) in {:.2}ms",
            self.device_type,
            w,
            h,
            start.elapsed().as_secs_f64() * 1000.0
        );

        compose_output(image, mask, &dims, &data)
    }
}
