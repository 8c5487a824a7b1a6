// OCR Service Module - text recognition over masked box crops
//
// The recognizer is a capability trait; the shipping implementation shells out
// to the tesseract CLI in single-block mode.

use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use rayon::prelude::*;
use std::io::Write;
use std::process::Command;
use std::time::Instant;
use tracing::{debug, trace, warn};

use crate::core::config::OcrConfig;
use crate::core::types::QuadBox;
use crate::utils::geometry::crop_quad;

/// Literal recorded when a crop yields no text
pub const NO_TEXT: &str = "NA";

/// Single-channel crop in, recognized string out (possibly empty)
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, crop: &GrayImage) -> Result<String>;
}

/// Recognizer backed by the `tesseract` command line tool
pub struct TesseractRecognizer {
    binary: String,
    language: String,
    psm: u8,
}

impl TesseractRecognizer {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            binary: config.tesseract_path.clone(),
            language: config.language.clone(),
            psm: config.psm,
        }
    }
}

impl TextRecognizer for TesseractRecognizer {
    fn recognize(&self, crop: &GrayImage) -> Result<String> {
        let mut tmp = tempfile::Builder::new()
            .suffix(".png")
            .tempfile()
            .context("Failed to create temp file for OCR")?;
        DynamicImage::ImageLuma8(crop.clone())
            .write_to(&mut tmp, ImageFormat::Png)
            .context("Failed to write temp image for OCR")?;
        tmp.flush().ok();

        let output = Command::new(&self.binary)
            .arg(tmp.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .arg("--psm")
            .arg(self.psm.to_string())
            .output()
            .with_context(|| format!("Failed to run {} (is it installed?)", self.binary))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("tesseract failed ({}): {}", output.status, stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Crop, convert to luminance, recognize and trim one box. Empty crops and
/// empty results both come back as `NA` without an error.
pub fn recognize_box(
    recognizer: &dyn TextRecognizer,
    image: &RgbImage,
    quad: &QuadBox,
) -> Result<String> {
    let crop = crop_quad(image, quad);
    if crop.width() == 0 || crop.height() == 0 {
        trace!("Box {:?} has no pixels inside the image", quad.to_flat());
        return Ok(NO_TEXT.to_string());
    }
    let gray = DynamicImage::ImageRgb8(crop).to_luma8();
    let text = recognizer.recognize(&gray)?;
    Ok(normalize_text(&text))
}

/// Collapse whitespace runs (line breaks included) to single spaces and
/// substitute `NA` for an empty result. Keeps each record on one line.
pub fn normalize_text(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        NO_TEXT.to_string()
    } else {
        collapsed
    }
}

/// Recognize every box in parallel; results keep the input order.
pub fn recognize_boxes(
    recognizer: &dyn TextRecognizer,
    image: &RgbImage,
    boxes: &[QuadBox],
) -> Result<Vec<String>> {
    let start = Instant::now();
    let texts = boxes
        .par_iter()
        .enumerate()
        .map(|(i, quad)| {
            recognize_box(recognizer, image, quad).map_err(|e| {
                warn!("Recognition failed for box {}: {:#}", i, e);
                e.context(format!("Recognition failed for box {i}"))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    debug!(
        "✓ Recognized {} boxes in {:.2}ms",
        boxes.len(),
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(texts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use parking_lot::Mutex;

    /// Returns canned text and records the crop sizes it was shown
    struct ScriptedRecognizer {
        reply: String,
        seen: Mutex<Vec<(u32, u32)>>,
    }

    impl ScriptedRecognizer {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl TextRecognizer for ScriptedRecognizer {
        fn recognize(&self, crop: &GrayImage) -> Result<String> {
            self.seen.lock().push(crop.dimensions());
            Ok(self.reply.clone())
        }
    }

    /// Echoes the crop width so ordering can be checked
    struct WidthRecognizer;

    impl TextRecognizer for WidthRecognizer {
        fn recognize(&self, crop: &GrayImage) -> Result<String> {
            Ok(format!("  w{}\n", crop.width()))
        }
    }

    #[test]
    fn empty_recognition_becomes_na() {
        let image = RgbImage::from_pixel(50, 50, Rgb([255, 255, 255]));
        let quad = QuadBox::from_flat([5, 5, 20, 5, 20, 15, 5, 15]);
        let recognizer = ScriptedRecognizer::new(" \n\t ");
        assert_eq!(recognize_box(&recognizer, &image, &quad).unwrap(), "NA");
        assert_eq!(recognizer.seen.lock().as_slice(), &[(16, 11)]);
    }

    #[test]
    fn empty_crop_skips_the_engine() {
        let image = RgbImage::new(50, 50);
        let quad = QuadBox::from_flat([60, 60, 70, 60, 70, 70, 60, 70]);
        let recognizer = ScriptedRecognizer::new("never");
        assert_eq!(recognize_box(&recognizer, &image, &quad).unwrap(), "NA");
        assert!(recognizer.seen.lock().is_empty());
    }

    #[test]
    fn parallel_recognition_preserves_order() {
        let image = RgbImage::new(200, 50);
        let boxes: Vec<QuadBox> = (1..=20)
            .map(|w| QuadBox::from_flat([0, 0, w, 0, w, 10, 0, 10]))
            .collect();
        let texts = recognize_boxes(&WidthRecognizer, &image, &boxes).unwrap();
        let expected: Vec<String> = (1..=20).map(|w| format!("w{}", w + 1)).collect();
        assert_eq!(texts, expected);
    }

    #[test]
    fn multi_line_text_is_joined() {
        assert_eq!(normalize_text("Hello\nWorld\n"), "Hello World");
        assert_eq!(normalize_text("  a \r\n\r\n b\tc "), "a b c");
        assert_eq!(normalize_text("\n\n"), "NA");
    }

    #[test]
    fn missing_binary_is_an_error() {
        let recognizer = TesseractRecognizer {
            binary: "/nonexistent/tesseract-binary".to_string(),
            language: "eng".to_string(),
            psm: 6,
        };
        assert!(recognizer.recognize(&GrayImage::new(4, 4)).is_err());
    }
}
