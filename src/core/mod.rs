pub mod config;
pub mod errors;
pub mod types;

// Re-export commonly used items for convenience
pub use config::Config;
pub use errors::{
    ConfigError, CoordinateError, PipelineError, StageContext, StageError, WorkspaceError,
};
pub use types::{
    CoordinateRecord, PipelineState, QuadBox, StageKind, StageOutput, TextCoordinate,
    TextRemovalResponse,
};
