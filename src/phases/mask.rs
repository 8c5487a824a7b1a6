// Stage 2: Mask generation
//
// INPUT/IMG/<name>.jpg + INPUT/TXT/<name>.txt -> INPUT/MASK/<name>.png

use anyhow::Context;
use image::DynamicImage;
use std::time::Instant;
use tracing::{debug, instrument};

use crate::core::errors::{StageContext, StageResult};
use crate::core::types::{StageKind, StageOutput};
use crate::orchestration::workspace::Workspace;
use crate::phases::PipelineStage;
use crate::utils::coordinates::read_boxes;
use crate::utils::geometry::rasterize_mask;
use crate::utils::image_ops::save_png;

pub struct MaskStage {
    dilation_radius: u32,
}

impl MaskStage {
    pub fn new(dilation_radius: u32) -> Self {
        Self { dilation_radius }
    }
}

impl PipelineStage for MaskStage {
    fn kind(&self) -> StageKind {
        StageKind::Mask
    }

    #[instrument(skip(self, workspace), fields(
        request_id = %workspace.request_id(),
        radius = self.dilation_radius
    ))]
    fn run(&self, workspace: &Workspace) -> StageResult<StageOutput> {
        let start = Instant::now();
        let input = workspace.input_image();
        // Only the dimensions are needed; the pixels are never decoded here
        let (width, height) = image::image_dimensions(&input)
            .with_context(|| format!("Failed to read dimensions of {}", input.display()))
            .in_stage(self.kind())?;
        let boxes = read_boxes(&workspace.coordinates()).in_stage(self.kind())?;

        let mask = rasterize_mask(width, height, &boxes, self.dilation_radius);
        let covered = mask.pixels().filter(|p| p[0] != 0).count();
        save_png(&DynamicImage::ImageLuma8(mask), &workspace.mask()).in_stage(self.kind())?;

        debug!(
            "✓ Mask {}x{} from {} boxes ({} pixels set) in {:.2}ms",
            width,
            height,
            boxes.len(),
            covered,
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(StageOutput { items: covered })
    }
}
