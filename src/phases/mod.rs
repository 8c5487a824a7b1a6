// Pipeline stages
//
// Every stage reads its inputs from the workspace and writes exactly one
// declared output file back into it. Stages are synchronous; the orchestrator
// runs them on the blocking pool one after another.

pub mod command;
pub mod detect;
pub mod extract;
pub mod inpaint;
pub mod mask;

use std::path::PathBuf;

use crate::core::errors::StageResult;
use crate::core::types::{StageKind, StageOutput};
use crate::orchestration::workspace::Workspace;

pub use command::CommandStage;
pub use detect::DetectStage;
pub use extract::ExtractStage;
pub use inpaint::InpaintStage;
pub use mask::MaskStage;

pub trait PipelineStage: Send + Sync {
    fn kind(&self) -> StageKind;

    fn run(&self, workspace: &Workspace) -> StageResult<StageOutput>;
}

/// File a stage must leave behind for the next one
pub fn declared_output(kind: StageKind, workspace: &Workspace) -> PathBuf {
    match kind {
        StageKind::Detect => workspace.coordinates(),
        StageKind::Mask => workspace.mask(),
        StageKind::Inpaint => workspace.cleaned_image(),
        StageKind::Extract => workspace.annotated_coordinates(),
    }
}
