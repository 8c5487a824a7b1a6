// Stage 4: Text extraction
//
// INPUT/IMG/<name>.jpg + INPUT/TXT/<name>.txt -> OUTPUT/COR/<name>_Cor.txt
// Reads the original image, not the cleaned one.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument};

use crate::core::errors::{StageContext, StageResult};
use crate::core::types::{StageKind, StageOutput};
use crate::orchestration::workspace::Workspace;
use crate::phases::PipelineStage;
use crate::services::ocr::{recognize_boxes, TextRecognizer};
use crate::utils::coordinates::{read_boxes, write_records};
use crate::utils::image_ops::open_image;

pub struct ExtractStage {
    recognizer: Arc<dyn TextRecognizer>,
}

impl ExtractStage {
    pub fn new(recognizer: Arc<dyn TextRecognizer>) -> Self {
        Self { recognizer }
    }
}

impl PipelineStage for ExtractStage {
    fn kind(&self) -> StageKind {
        StageKind::Extract
    }

    #[instrument(skip(self, workspace), fields(request_id = %workspace.request_id()))]
    fn run(&self, workspace: &Workspace) -> StageResult<StageOutput> {
        let start = Instant::now();
        let image = open_image(&workspace.input_image())
            .in_stage(self.kind())?
            .to_rgb8();
        let boxes = read_boxes(&workspace.coordinates()).in_stage(self.kind())?;

        let texts =
            recognize_boxes(self.recognizer.as_ref(), &image, &boxes).in_stage(self.kind())?;
        let records: Vec<_> = boxes.into_iter().zip(texts).collect();
        write_records(&workspace.annotated_coordinates(), &records).in_stage(self.kind())?;

        debug!(
            "✓ Extracted text for {} boxes in {:.2}ms",
            records.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(StageOutput {
            items: records.len(),
        })
    }
}
