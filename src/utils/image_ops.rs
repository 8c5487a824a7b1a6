use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbImage};
use ndarray::Array4;
use std::fs::File;
use std::io::{BufWriter, Cursor};
use std::path::Path;

/// JPEG quality used for every image written into a workspace
pub const JPEG_QUALITY: u8 = 95;

const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Asynchronously load an image from bytes using spawn_blocking.
///
/// Image decoding is CPU-intensive, especially for large images.
pub async fn load_image_from_memory_async(bytes: &[u8]) -> Result<DynamicImage> {
    let bytes = bytes.to_vec(); // Clone to move into blocking task
    tokio::task::spawn_blocking(move || {
        image::load_from_memory(&bytes).context("Failed to load image from memory")
    })
    .await
    .context("Failed to spawn blocking task for image loading")?
}

pub fn encode_jpeg(img: &RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut bytes), JPEG_QUALITY);
    img.write_with_encoder(encoder)
        .context("Failed to encode image as JPEG")?;
    Ok(bytes)
}

/// Write an RGB JPEG at the workspace quality
pub fn save_jpeg(img: &RgbImage, path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let encoder = JpegEncoder::new_with_quality(BufWriter::new(file), JPEG_QUALITY);
    img.write_with_encoder(encoder)
        .with_context(|| format!("Failed to write JPEG {}", path.display()))
}

pub fn save_png(img: &DynamicImage, path: &Path) -> Result<()> {
    img.save_with_format(path, ImageFormat::Png)
        .with_context(|| format!("Failed to write PNG {}", path.display()))
}

pub fn open_image(path: &Path) -> Result<DynamicImage> {
    image::open(path).with_context(|| format!("Failed to open image {}", path.display()))
}

/// How an image was scaled and padded before going into the detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizeTransform {
    /// Scale applied to the original image
    pub ratio: f32,
    /// Size of the scaled content
    pub target_w: u32,
    pub target_h: u32,
    /// Size after zero padding to the stride multiple
    pub canvas_w: u32,
    pub canvas_h: u32,
}

impl ResizeTransform {
    /// Fit the longer side to `mag_ratio x side`, capped at `canvas_size`,
    /// then pad each side up to a multiple of 32.
    pub fn for_image(width: u32, height: u32, canvas_size: u32, mag_ratio: f32) -> Self {
        let longest = width.max(height).max(1) as f64;
        let target = (mag_ratio as f64 * longest).min(canvas_size as f64);
        let ratio = target / longest;
        let target_w = ((width as f64 * ratio) as u32).max(1);
        let target_h = ((height as f64 * ratio) as u32).max(1);
        Self {
            ratio: ratio as f32,
            target_w,
            target_h,
            canvas_w: target_w.div_ceil(32) * 32,
            canvas_h: target_h.div_ceil(32) * 32,
        }
    }
}

/// Resize preserving aspect ratio and zero-pad to the transform's canvas.
pub fn resize_aspect_ratio(
    img: &RgbImage,
    canvas_size: u32,
    mag_ratio: f32,
) -> (RgbImage, ResizeTransform) {
    let transform = ResizeTransform::for_image(img.width(), img.height(), canvas_size, mag_ratio);
    let resized = image::imageops::resize(
        img,
        transform.target_w,
        transform.target_h,
        FilterType::Triangle,
    );
    let mut canvas = RgbImage::new(transform.canvas_w, transform.canvas_h);
    image::imageops::replace(&mut canvas, &resized, 0, 0);
    (canvas, transform)
}

/// NCHW tensor with ImageNet mean/std normalization on the 0..255 scale
pub fn normalize_mean_variance(img: &RgbImage) -> Array4<f32> {
    let (w, h) = img.dimensions();
    let mut array = Array4::<f32>::zeros((1, 3, h as usize, w as usize));
    for (x, y, pixel) in img.enumerate_pixels() {
        for c in 0..3 {
            array[[0, c, y as usize, x as usize]] =
                (pixel[c] as f32 - MEAN[c] * 255.0) / (STD[c] * 255.0);
        }
    }
    array
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[tokio::test]
    async fn test_load_image_async() {
        let img = RgbImage::from_pixel(4, 3, Rgb([255, 0, 0]));
        let jpeg = encode_jpeg(&img).unwrap();

        let loaded = load_image_from_memory_async(&jpeg).await.unwrap();
        assert_eq!((loaded.width(), loaded.height()), (4, 3));
    }

    #[tokio::test]
    async fn test_load_garbage_fails() {
        assert!(load_image_from_memory_async(b"definitely not an image")
            .await
            .is_err());
    }

    #[test]
    fn transform_caps_at_canvas_and_pads_to_32() {
        let t = ResizeTransform::for_image(1000, 500, 1280, 1.5);
        assert!((1279..=1280).contains(&t.target_w));
        assert!((639..=640).contains(&t.target_h));
        assert_eq!((t.canvas_w, t.canvas_h), (1280, 640));
        assert!((t.ratio - 1.28).abs() < 1e-6);

        let small = ResizeTransform::for_image(100, 70, 1280, 1.5);
        assert_eq!((small.target_w, small.target_h), (150, 105));
        assert_eq!((small.canvas_w, small.canvas_h), (160, 128));
    }

    #[test]
    fn padding_is_black() {
        let img = RgbImage::from_pixel(100, 70, Rgb([255, 255, 255]));
        let (canvas, t) = resize_aspect_ratio(&img, 1280, 1.5);
        assert_eq!(canvas.dimensions(), (t.canvas_w, t.canvas_h));
        assert_eq!(canvas.get_pixel(t.canvas_w - 1, t.canvas_h - 1).0, [0, 0, 0]);
    }

    #[test]
    fn normalization_uses_imagenet_stats() {
        let img = RgbImage::from_pixel(2, 2, Rgb([0, 255, 128]));
        let tensor = normalize_mean_variance(&img);
        assert_eq!(tensor.shape(), &[1, 3, 2, 2]);
        assert!((tensor[[0, 0, 0, 0]] - (-0.485 / 0.229)).abs() < 1e-4);
        assert!((tensor[[0, 1, 1, 1]] - ((1.0 - 0.456) / 0.224)).abs() < 1e-4);
    }
}
