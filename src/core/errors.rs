// Custom error types for the text removal pipeline
//
// Using thiserror for typed errors at module seams; adapters and services
// use anyhow internally and are wrapped into these at stage boundaries.

use std::path::PathBuf;
use thiserror::Error;

use crate::core::types::StageKind;

/// Coordinate file parsing errors
#[derive(Debug, Error, PartialEq)]
pub enum CoordinateError {
    #[error("Line {line}: expected at least 8 numeric fields, found {found}")]
    TooFewFields { line: usize, found: usize },

    #[error("Line {line}: field {field} is not a number: {value:?}")]
    InvalidNumber {
        line: usize,
        field: usize,
        value: String,
    },

    #[error("Line {line}: missing text field after the 8 coordinates")]
    MissingText { line: usize },
}

/// Per-request workspace errors
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Failed to create workspace directory {path}: {source}")]
    CreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to purge workspace {path}: {source}")]
    PurgeFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure of a single pipeline stage
#[derive(Debug, Error)]
pub enum StageError {
    #[error("{stage} failed: {source:#}")]
    Failed {
        stage: StageKind,
        #[source]
        source: anyhow::Error,
    },

    #[error("{stage} failed: process exited with {status}: {stderr}")]
    ProcessFailed {
        stage: StageKind,
        status: String,
        stderr: String,
    },

    #[error("{stage} failed: expected output {path} was not produced")]
    MissingOutput { stage: StageKind, path: PathBuf },
}

impl StageError {
    /// Wrap any adapter error with the stage it happened in
    pub fn failed(stage: StageKind, source: impl Into<anyhow::Error>) -> Self {
        Self::Failed {
            stage,
            source: source.into(),
        }
    }

    pub fn stage(&self) -> StageKind {
        match self {
            Self::Failed { stage, .. }
            | Self::ProcessFailed { stage, .. }
            | Self::MissingOutput { stage, .. } => *stage,
        }
    }
}

/// Pipeline orchestration errors
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Rejected before any workspace side effect
    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Stage(#[from] StageError),

    /// A stage reported success but the final artifact is not there
    #[error("{0}")]
    MissingResult(String),

    #[error("Stage {stage} cannot run in state {state}")]
    OutOfOrder { stage: StageKind, state: String },

    #[error("Unexpected pipeline error: {0}")]
    Unexpected(String),
}

impl PipelineError {
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be in [0.0, 1.0], got {value}")]
    InvalidThreshold { name: &'static str, value: f32 },

    #[error("Invalid detection config: {0}")]
    InvalidDetectionConfig(String),

    #[error("Invalid inpainting config: {0}")]
    InvalidInpaintConfig(String),

    #[error("Invalid OCR config: {0}")]
    InvalidOcrConfig(String),

    #[error("Invalid workspace path: {0}")]
    InvalidWorkspacePath(String),

    #[error("Environment variable parsing failed: {0}")]
    EnvVarError(String),
}

pub type StageResult<T> = Result<T, StageError>;
pub type PipelineResult<T> = Result<T, PipelineError>;
pub type ConfigResult<T> = Result<T, ConfigError>;

// Helper trait for attaching stage context to adapter results
pub trait StageContext<T> {
    fn in_stage(self, stage: StageKind) -> StageResult<T>;
}

impl<T, E> StageContext<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn in_stage(self, stage: StageKind) -> StageResult<T> {
        self.map_err(|e| StageError::failed(stage, e))
    }
}
