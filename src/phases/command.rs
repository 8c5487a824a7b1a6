// External-process inpainting stage
//
// Runs a configured command line with `{image}`, `{mask}` and `{output}`
// replaced by workspace paths. The template is split on whitespace before
// substitution, so paths containing spaces stay single arguments.

use std::process::Command;
use std::time::Instant;
use tracing::{debug, instrument, warn};

use crate::core::errors::{StageContext, StageError, StageResult};
use crate::core::types::{StageKind, StageOutput};
use crate::orchestration::workspace::Workspace;
use crate::phases::PipelineStage;

pub const PLACEHOLDERS: [&str; 3] = ["{image}", "{mask}", "{output}"];

pub struct CommandStage {
    kind: StageKind,
    template: String,
}

impl CommandStage {
    /// Inpainting stage backed by an external program
    pub fn inpaint(template: impl Into<String>) -> Self {
        Self {
            kind: StageKind::Inpaint,
            template: template.into(),
        }
    }

    /// Program and arguments with the placeholders filled in
    pub fn command_line(&self, workspace: &Workspace) -> Vec<String> {
        let image = workspace.input_image().display().to_string();
        let mask = workspace.mask().display().to_string();
        let output = workspace.cleaned_image().display().to_string();
        self.template
            .split_whitespace()
            .map(|token| {
                token
                    .replace("{image}", &image)
                    .replace("{mask}", &mask)
                    .replace("{output}", &output)
            })
            .collect()
    }
}

impl PipelineStage for CommandStage {
    fn kind(&self) -> StageKind {
        self.kind
    }

    #[instrument(skip(self, workspace), fields(request_id = %workspace.request_id()))]
    fn run(&self, workspace: &Workspace) -> StageResult<StageOutput> {
        let start = Instant::now();
        let argv = self.command_line(workspace);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| StageError::failed(self.kind, anyhow::anyhow!("Empty command")))?;

        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| anyhow::anyhow!("Failed to spawn {}: {}", program, e))
            .in_stage(self.kind)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!("{} exited with {}: {}", program, output.status, stderr);
            return Err(StageError::ProcessFailed {
                stage: self.kind,
                status: output.status.to_string(),
                stderr,
            });
        }

        debug!(
            "✓ {} finished in {:.2}ms",
            program,
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(StageOutput::default())
    }
}
