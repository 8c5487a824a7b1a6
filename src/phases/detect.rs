// Stage 1: Text detection
//
// INPUT/IMG/<name>.jpg -> INPUT/TXT/<name>.txt

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument};

use crate::core::errors::{StageContext, StageResult};
use crate::core::types::{StageKind, StageOutput};
use crate::orchestration::workspace::Workspace;
use crate::phases::PipelineStage;
use crate::services::detection::TextDetector;
use crate::utils::coordinates::write_boxes;
use crate::utils::image_ops::open_image;

pub struct DetectStage {
    detector: Arc<dyn TextDetector>,
}

impl DetectStage {
    pub fn new(detector: Arc<dyn TextDetector>) -> Self {
        Self { detector }
    }
}

impl PipelineStage for DetectStage {
    fn kind(&self) -> StageKind {
        StageKind::Detect
    }

    #[instrument(skip(self, workspace), fields(request_id = %workspace.request_id()))]
    fn run(&self, workspace: &Workspace) -> StageResult<StageOutput> {
        let start = Instant::now();
        let image = open_image(&workspace.input_image()).in_stage(self.kind())?;
        let boxes = self.detector.detect(&image).in_stage(self.kind())?;
        write_boxes(&workspace.coordinates(), &boxes).in_stage(self.kind())?;

        debug!(
            "✓ Detected {} boxes in {:.2}ms",
            boxes.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(StageOutput { items: boxes.len() })
    }
}
