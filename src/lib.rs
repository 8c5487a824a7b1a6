// Library exports for the text removal service

// Core modules
pub mod api;
pub mod core;
pub mod orchestration;
pub mod phases;
pub mod services;
pub mod utils;

// Re-export commonly used types and functions
pub use self::core::{
    config::Config,
    errors::{ConfigError, PipelineError, StageError},
    types::{PipelineState, QuadBox, StageKind, TextCoordinate, TextRemovalResponse},
};

pub use orchestration::{PipelineOrchestrator, Workspace};

pub use phases::PipelineStage;

pub use services::{CraftDetector, Inpainter, LamaInpainter, TesseractRecognizer, TextDetector, TextRecognizer};

pub use utils::{rasterize_mask, rescale_boxes, Metrics};
