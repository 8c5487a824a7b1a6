// Stage 3: Inpainting
//
// INPUT/IMG/<name>.jpg + INPUT/MASK/<name>.png -> OUTPUT/IMG/<name>.jpg

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument};

use crate::core::errors::{StageContext, StageResult};
use crate::core::types::{StageKind, StageOutput};
use crate::orchestration::workspace::Workspace;
use crate::phases::PipelineStage;
use crate::services::inpainting::Inpainter;
use crate::utils::image_ops::{open_image, save_jpeg};

pub struct InpaintStage {
    inpainter: Arc<dyn Inpainter>,
}

impl InpaintStage {
    pub fn new(inpainter: Arc<dyn Inpainter>) -> Self {
        Self { inpainter }
    }
}

impl PipelineStage for InpaintStage {
    fn kind(&self) -> StageKind {
        StageKind::Inpaint
    }

    #[instrument(skip(self, workspace), fields(request_id = %workspace.request_id()))]
    fn run(&self, workspace: &Workspace) -> StageResult<StageOutput> {
        let start = Instant::now();
        let image = open_image(&workspace.input_image())
            .in_stage(self.kind())?
            .to_rgb8();
        let mask = open_image(&workspace.mask()).in_stage(self.kind())?.to_luma8();

        let cleaned = self.inpainter.inpaint(&image, &mask).in_stage(self.kind())?;
        save_jpeg(&cleaned, &workspace.cleaned_image()).in_stage(self.kind())?;

        debug!(
            "✓ Inpainted {}x{} in {:.2}ms",
            cleaned.width(),
            cleaned.height(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(StageOutput {
            items: (cleaned.width() * cleaned.height()) as usize,
        })
    }
}
