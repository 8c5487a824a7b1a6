pub mod detection;
pub mod inpainting;
pub mod ocr;
pub mod onnx_builder; // Shared by the detection and inpainting sessions

// Re-export commonly used services
pub use detection::{CraftDetector, RegionShapePolicy, TextDetector};
pub use inpainting::{Inpainter, LamaInpainter};
pub use ocr::{TesseractRecognizer, TextRecognizer};
