// Shared types for the text removal pipeline

use imageproc::point::Point;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::core::config::Config;
use crate::orchestration::pipeline_orchestrator::PipelineOrchestrator;
use crate::utils::Metrics;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub metrics: Metrics,
}

/// Four ordered points bounding a detected text region, in the pixel space of
/// one specific image. The order is whatever the detector emitted and is kept
/// as-is by every consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuadBox {
    pub points: [Point<i32>; 4],
}

impl QuadBox {
    pub fn new(points: [Point<i32>; 4]) -> Self {
        Self { points }
    }

    /// Build from the flat `x1,y1,...,x4,y4` layout used on disk
    pub fn from_flat(coords: [i32; 8]) -> Self {
        Self {
            points: [
                Point::new(coords[0], coords[1]),
                Point::new(coords[2], coords[3]),
                Point::new(coords[4], coords[5]),
                Point::new(coords[6], coords[7]),
            ],
        }
    }

    pub fn to_flat(&self) -> [i32; 8] {
        let [p1, p2, p3, p4] = self.points;
        [p1.x, p1.y, p2.x, p2.y, p3.x, p3.y, p4.x, p4.y]
    }

    /// Inclusive axis-aligned bounds as (min_x, min_y, max_x, max_y)
    pub fn bounds(&self) -> (i32, i32, i32, i32) {
        self.points.iter().fold(
            (i32::MAX, i32::MAX, i32::MIN, i32::MIN),
            |(min_x, min_y, max_x, max_y), p| {
                (min_x.min(p.x), min_y.min(p.y), max_x.max(p.x), max_y.max(p.y))
            },
        )
    }
}

/// One line of an annotated coordinates file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinateRecord {
    pub quad: QuadBox,
    pub text: Option<String>,
}

/// The four stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Detect,
    Mask,
    Inpaint,
    Extract,
}

impl StageKind {
    pub const ALL: [StageKind; 4] = [
        StageKind::Detect,
        StageKind::Mask,
        StageKind::Inpaint,
        StageKind::Extract,
    ];

    /// Short identifier used in metrics labels and CLI subcommands
    pub fn key(&self) -> &'static str {
        match self {
            StageKind::Detect => "detect",
            StageKind::Mask => "mask",
            StageKind::Inpaint => "inpaint",
            StageKind::Extract => "extract",
        }
    }

    /// State reached once this stage has succeeded
    pub fn completes(&self) -> PipelineState {
        match self {
            StageKind::Detect => PipelineState::Detected,
            StageKind::Mask => PipelineState::Masked,
            StageKind::Inpaint => PipelineState::Inpainted,
            StageKind::Extract => PipelineState::Extracted,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageKind::Detect => "Text detection",
            StageKind::Mask => "Mask generation",
            StageKind::Inpaint => "Inpainting",
            StageKind::Extract => "Text extraction",
        };
        f.write_str(name)
    }
}

/// Request lifecycle. `Failed` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Received,
    Detected,
    Masked,
    Inpainted,
    Extracted,
    Done,
    Failed,
}

impl PipelineState {
    /// The stage allowed to run from this state, if any
    pub fn next_stage(&self) -> Option<StageKind> {
        match self {
            PipelineState::Received => Some(StageKind::Detect),
            PipelineState::Detected => Some(StageKind::Mask),
            PipelineState::Masked => Some(StageKind::Inpaint),
            PipelineState::Inpainted => Some(StageKind::Extract),
            PipelineState::Extracted | PipelineState::Done | PipelineState::Failed => None,
        }
    }

    /// Transition after `stage` succeeded; `None` if the stage is out of order
    pub fn advance(self, stage: StageKind) -> Option<PipelineState> {
        (self.next_stage() == Some(stage)).then(|| stage.completes())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Received => "RECEIVED",
            PipelineState::Detected => "DETECTED",
            PipelineState::Masked => "MASKED",
            PipelineState::Inpainted => "INPAINTED",
            PipelineState::Extracted => "EXTRACTED",
            PipelineState::Done => "DONE",
            PipelineState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// What a stage reports back on success
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    /// Number of boxes (or pixels, for the mask) the stage handled
    pub items: usize,
}

/// Recognized text for one box in the response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextCoordinate {
    pub coordinates: [i32; 8],
    pub text: String,
}

/// Successful `/upload` response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextRemovalResponse {
    pub message: String,
    pub cleaned_image: String,
    pub text_coordinates: Vec<TextCoordinate>,
    pub width: u32,
    pub height: u32,
    pub file_size: usize,
}

/// Error body for every non-2xx response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_layout_round_trips() {
        let flat = [10, 20, 30, 20, 30, 40, 10, 40];
        assert_eq!(QuadBox::from_flat(flat).to_flat(), flat);
    }

    #[test]
    fn bounds_cover_all_points() {
        let quad = QuadBox::from_flat([5, 9, 40, 2, 44, 30, 1, 33]);
        assert_eq!(quad.bounds(), (1, 2, 44, 33));
    }

    #[test]
    fn states_advance_only_in_order() {
        let mut state = PipelineState::Received;
        for stage in StageKind::ALL {
            state = state.advance(stage).expect("stage in order");
        }
        assert_eq!(state, PipelineState::Extracted);

        assert_eq!(PipelineState::Received.advance(StageKind::Mask), None);
        assert_eq!(PipelineState::Failed.advance(StageKind::Detect), None);
        assert!(PipelineState::Failed.is_terminal());
    }
}
