// Shared ONNX Runtime session builder for the detection and inpainting networks

use anyhow::{bail, Context, Result};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::path::Path;
use tracing::{debug, info, warn};

#[cfg(feature = "tensorrt")]
use ort::execution_providers::TensorRTExecutionProvider;

#[cfg(feature = "cuda")]
use ort::execution_providers::CUDAExecutionProvider;

/// Thread count for CPU inference.
///
/// Capped at 6 on Windows, where more intra-op threads measured slower.
pub fn optimal_intra_op_threads(requested: usize) -> usize {
    #[cfg(target_os = "windows")]
    let optimal = std::cmp::min(6, requested).max(1);

    #[cfg(not(target_os = "windows"))]
    let optimal = requested.max(1);

    debug!("CPU threads: {} requested, using {} for inference", requested, optimal);
    optimal
}

/// Build a session for `model_path`.
///
/// With no forced backend, tries TensorRT then CUDA (when compiled in) and
/// falls back to CPU. Returns the backend name alongside the session.
pub fn build_session(
    model_path: &Path,
    model_name: &str,
    backend: Option<&str>,
    intra_threads: usize,
) -> Result<(String, Session)> {
    if !model_path.exists() {
        bail!(
            "{} model not found at {}",
            model_name,
            model_path.display()
        );
    }
    let threads = optimal_intra_op_threads(intra_threads);

    if let Some(forced) = backend {
        info!("INFERENCE_BACKEND={}, forcing specific backend for {}", forced, model_name);
        return try_forced_backend(forced, model_path, model_name, threads);
    }

    // Try TensorRT (if feature enabled)
    #[cfg(feature = "tensorrt")]
    {
        if let Ok(session) = Session::builder()
            .and_then(|b| b.with_execution_providers([TensorRTExecutionProvider::default().build()]))
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.with_intra_threads(threads))
            .and_then(|b| b.commit_from_file(model_path))
        {
            info!("✓ Using TensorRT acceleration for {}", model_name);
            return Ok(("TensorRT".to_string(), session));
        }
    }

    // Try CUDA (if feature enabled)
    #[cfg(feature = "cuda")]
    {
        if let Ok(session) = Session::builder()
            .and_then(|b| b.with_execution_providers([CUDAExecutionProvider::default().build()]))
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.with_intra_threads(threads))
            .and_then(|b| b.commit_from_file(model_path))
        {
            info!("✓ Using CUDA acceleration for {}", model_name);
            return Ok(("CUDA".to_string(), session));
        }
    }

    let session = cpu_session(model_path, model_name, threads)?;
    warn!("⚠️  Using CPU-only inference for {} (no GPU acceleration available)", model_name);
    Ok(("CPU".to_string(), session))
}

fn cpu_session(model_path: &Path, model_name: &str, threads: usize) -> Result<Session> {
    Session::builder()
        .with_context(|| format!("Failed to create ONNX session builder for {}", model_name))?
        .with_execution_providers([CPUExecutionProvider::default().build()])
        .with_context(|| format!("Failed to configure CPU execution provider for {}", model_name))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .with_context(|| format!("Failed to set graph optimization level for {}", model_name))?
        .with_intra_threads(threads)
        .with_context(|| format!("Failed to configure intra-op threads for {}", model_name))?
        .commit_from_file(model_path)
        .with_context(|| {
            format!(
                "Failed to load {} ONNX model from {}",
                model_name,
                model_path.display()
            )
        })
}

/// Force a specific backend; no silent fallback when it is unavailable
fn try_forced_backend(
    backend: &str,
    model_path: &Path,
    model_name: &str,
    threads: usize,
) -> Result<(String, Session)> {
    match backend.to_lowercase().as_str() {
        #[cfg(feature = "cuda")]
        "cuda" => {
            let session = Session::builder()
                .context("Failed to create session builder")?
                .with_execution_providers([CUDAExecutionProvider::default().build()])
                .context("Failed to configure CUDA provider")?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .context("Failed to set optimization level")?
                .with_intra_threads(threads)
                .context("Failed to configure intra-op threads")?
                .commit_from_file(model_path)
                .context("Failed to load model with CUDA")?;
            info!("✓ Forced CUDA backend for {}", model_name);
            Ok(("CUDA".to_string(), session))
        }
        #[cfg(not(feature = "cuda"))]
        "cuda" => {
            bail!("CUDA backend not available. Rebuild with: cargo build --features cuda")
        }

        #[cfg(feature = "tensorrt")]
        "tensorrt" => {
            let session = Session::builder()
                .context("Failed to create session builder")?
                .with_execution_providers([TensorRTExecutionProvider::default().build()])
                .context("Failed to configure TensorRT provider")?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .context("Failed to set optimization level")?
                .with_intra_threads(threads)
                .context("Failed to configure intra-op threads")?
                .commit_from_file(model_path)
                .context("Failed to load model with TensorRT")?;
            info!("✓ Forced TensorRT backend for {}", model_name);
            Ok(("TensorRT".to_string(), session))
        }
        #[cfg(not(feature = "tensorrt"))]
        "tensorrt" => {
            bail!("TensorRT backend not available. Rebuild with: cargo build --features tensorrt")
        }

        "cpu" => {
            let session = cpu_session(model_path, model_name, threads)?;
            info!("✓ Forced CPU backend for {}", model_name);
            Ok(("CPU".to_string(), session))
        }

        other => bail!(
            "Unknown inference backend '{}'. Valid options: cpu, cuda, tensorrt, auto",
            other
        ),
    }
}
