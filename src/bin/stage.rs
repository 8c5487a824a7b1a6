//! Run a single pipeline stage on explicit files
//!
//! Usage:
//!   text-removal-stage detect  --image in.jpg --output boxes.txt
//!   text-removal-stage mask    --image in.jpg --coordinates boxes.txt --output mask.png [--radius 5]
//!   text-removal-stage inpaint --image in.jpg --mask mask.png --output clean.jpg
//!   text-removal-stage extract --image in.jpg --coordinates boxes.txt --output boxes_Cor.txt
//!
//! Model paths, thresholds and OCR settings come from the same environment
//! variables as the server.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use image::DynamicImage;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use text_removal::core::config::Config;
use text_removal::services::detection::{CraftDetector, TextDetector};
use text_removal::services::inpainting::{Inpainter, LamaInpainter};
use text_removal::services::ocr::{recognize_boxes, TesseractRecognizer};
use text_removal::utils::coordinates::{read_boxes, write_boxes, write_records};
use text_removal::utils::geometry::rasterize_mask;
use text_removal::utils::image_ops::{open_image, save_jpeg, save_png};

#[derive(Parser, Debug)]
#[command(
    name = "text-removal-stage",
    about = "Run one stage of the text removal pipeline",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Detect text boxes and write them as coordinate lines
    Detect {
        #[arg(long, short = 'i')]
        image: PathBuf,
        #[arg(long, short = 'o')]
        output: PathBuf,
    },
    /// Rasterize coordinate lines into a binary mask
    Mask {
        #[arg(long, short = 'i')]
        image: PathBuf,
        #[arg(long, short = 'c')]
        coordinates: PathBuf,
        #[arg(long, short = 'o')]
        output: PathBuf,
        /// Elliptical dilation size; 0 disables dilation
        #[arg(long, short = 'r')]
        radius: Option<u32>,
    },
    /// Fill the masked regions
    Inpaint {
        #[arg(long, short = 'i')]
        image: PathBuf,
        #[arg(long, short = 'm')]
        mask: PathBuf,
        #[arg(long, short = 'o')]
        output: PathBuf,
    },
    /// Recognize the text inside each box of the original image
    Extract {
        #[arg(long, short = 'i')]
        image: PathBuf,
        #[arg(long, short = 'c')]
        coordinates: PathBuf,
        #[arg(long, short = 'o')]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::new().context("Failed to load configuration")?;

    let filter = EnvFilter::new(format!(
        "text_removal={},ort=off",
        config.log_level().as_str().to_lowercase()
    ));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let start = Instant::now();
    match args.command {
        Commands::Detect { image, output } => {
            let img = open_image(&image)?;
            let detector = CraftDetector::new(&config.detection)?;
            let boxes = detector.detect(&img)?;
            write_boxes(&output, &boxes)?;
            println!("Detected {} boxes -> {}", boxes.len(), output.display());
        }
        Commands::Mask {
            image,
            coordinates,
            output,
            radius,
        } => {
            let (width, height) = image::image_dimensions(&image)
                .with_context(|| format!("Failed to read {}", image.display()))?;
            let boxes = read_boxes(&coordinates)?;
            let radius = radius.unwrap_or(config.dilation_radius());
            let mask = rasterize_mask(width, height, &boxes, radius);
            save_png(&DynamicImage::ImageLuma8(mask), &output)?;
            println!(
                "Mask {}x{} from {} boxes (radius {}) -> {}",
                width,
                height,
                boxes.len(),
                radius,
                output.display()
            );
        }
        Commands::Inpaint {
            image,
            mask,
            output,
        } => {
            let img = open_image(&image)?.to_rgb8();
            let mask_img = open_image(&mask)?.to_luma8();
            let inpainter = LamaInpainter::new(&config.inpaint, &config.detection)?;
            let cleaned = inpainter.inpaint(&img, &mask_img)?;
            save_jpeg(&cleaned, &output)?;
            println!("Inpainted ({}) -> {}", inpainter.device_type(), output.display());
        }
        Commands::Extract {
            image,
            coordinates,
            output,
        } => {
            let img = open_image(&image)?.to_rgb8();
            let boxes = read_boxes(&coordinates)?;
            let recognizer = TesseractRecognizer::new(&config.ocr);
            let texts = recognize_boxes(&recognizer, &img, &boxes)?;
            let records: Vec<_> = boxes.into_iter().zip(texts).collect();
            write_records(&output, &records)?;
            println!("Recognized {} boxes -> {}", records.len(), output.display());
        }
    }
    println!("Done in {:.2}s", start.elapsed().as_secs_f64());

    Ok(())
}
