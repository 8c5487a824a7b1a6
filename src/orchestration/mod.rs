pub mod pipeline_orchestrator;
pub mod workspace;

pub use pipeline_orchestrator::PipelineOrchestrator;
pub use workspace::{Workspace, WorkspaceGuard};
