use crate::core::errors::ConfigError;
use crate::phases::command::PLACEHOLDERS;
use crate::services::detection::RegionShapePolicy;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::Level;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub log_level: Level,
    /// Request body limit for uploads
    pub max_upload_bytes: usize,
}

/// Detection configuration
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    pub model_path: String,
    pub text_threshold: f32,
    pub low_text: f32,
    pub link_threshold: f32,
    pub canvas_size: u32,
    pub mag_ratio: f32,
    pub polygon_mode: bool,
    pub shape_policy: RegionShapePolicy,
    /// cpu / cuda / tensorrt, None means pick the best compiled-in provider
    pub inference_backend: Option<String>,
    pub intra_threads: usize,
}

/// Mask configuration
#[derive(Debug, Clone)]
pub struct MaskConfig {
    /// Elliptical dilation kernel size in pixels, 0 disables dilation
    pub dilation_radius: u32,
}

/// Inpainting configuration
#[derive(Debug, Clone)]
pub struct InpaintConfig {
    pub model_path: String,
    /// Fixed square network input; None for exports with dynamic shapes
    pub input_size: Option<u32>,
    /// External command template with {image}, {mask}, {output} placeholders
    pub command: Option<String>,
}

/// OCR configuration
#[derive(Debug, Clone)]
pub struct OcrConfig {
    pub tesseract_path: String,
    pub language: String,
    pub psm: u8,
}

/// Workspace configuration
#[derive(Debug, Clone)]
pub struct WorkspaceConfig {
    pub base_dir: PathBuf,
    /// Fixed artifact name inside every workspace
    pub image_name: String,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub detection: DetectionConfig,
    pub mask: MaskConfig,
    pub inpaint: InpaintConfig,
    pub ocr: OcrConfig,
    pub workspace: WorkspaceConfig,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Self::load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_env() -> Result<Self, ConfigError> {
        let log_level = env_opt("LOG_LEVEL")
            .and_then(|s| parse_level(&s))
            .unwrap_or(Level::INFO);

        let shape_policy = match env_opt("REGION_SHAPE_POLICY") {
            Some(s) => s.parse().map_err(ConfigError::InvalidDetectionConfig)?,
            None => RegionShapePolicy::default(),
        };

        let inpaint_input_size = match env_opt("INPAINT_INPUT_SIZE") {
            Some(s) => Some(s.parse().map_err(|_| {
                ConfigError::EnvVarError(format!("INPAINT_INPUT_SIZE is not a number: {s}"))
            })?),
            None => None,
        };

        Ok(Self {
            server: ServerConfig {
                port: env_or("SERVER_PORT", 5000),
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                log_level,
                max_upload_bytes: env_or("MAX_UPLOAD_BYTES", 50 * 1024 * 1024),
            },
            detection: DetectionConfig {
                model_path: env::var("DETECTOR_MODEL_PATH")
                    .unwrap_or_else(|_| "models/craft_mlt_25k.onnx".to_string()),
                text_threshold: env_or("TEXT_THRESHOLD", 0.7),
                low_text: env_or("LOW_TEXT", 0.4),
                link_threshold: env_or("LINK_THRESHOLD", 0.4),
                canvas_size: env_or("CANVAS_SIZE", 1280),
                mag_ratio: env_or("MAG_RATIO", 1.5),
                polygon_mode: env_or("POLYGON_MODE", false),
                shape_policy,
                inference_backend: env_opt("INFERENCE_BACKEND")
                    .map(|s| s.to_lowercase())
                    .filter(|s| s != "auto"),
                intra_threads: env_or("ONNX_INTRA_THREADS", num_cpus::get().max(1)),
            },
            mask: MaskConfig {
                dilation_radius: env_or("MASK_DILATION_RADIUS", 5),
            },
            inpaint: InpaintConfig {
                model_path: env::var("INPAINT_MODEL_PATH")
                    .unwrap_or_else(|_| "models/big-lama.onnx".to_string()),
                input_size: inpaint_input_size,
                command: env_opt("INPAINT_COMMAND"),
            },
            ocr: OcrConfig {
                tesseract_path: env::var("TESSERACT_PATH")
                    .unwrap_or_else(|_| "tesseract".to_string()),
                language: env::var("OCR_LANGUAGE").unwrap_or_else(|_| "eng".to_string()),
                psm: env_or("OCR_PSM", 6),
            },
            workspace: WorkspaceConfig {
                base_dir: PathBuf::from(
                    env::var("WORKSPACE_DIR").unwrap_or_else(|_| "workspace".to_string()),
                ),
                image_name: "testImg".to_string(),
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let thresholds = [
            ("TEXT_THRESHOLD", self.detection.text_threshold),
            ("LOW_TEXT", self.detection.low_text),
            ("LINK_THRESHOLD", self.detection.link_threshold),
        ];
        for (name, value) in thresholds {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidThreshold { name, value });
            }
        }

        if !(32..=4096).contains(&self.detection.canvas_size) {
            return Err(ConfigError::InvalidDetectionConfig(format!(
                "canvas_size must be between 32 and 4096, got {}",
                self.detection.canvas_size
            )));
        }

        if !self.detection.mag_ratio.is_finite() || self.detection.mag_ratio <= 0.0 {
            return Err(ConfigError::InvalidDetectionConfig(format!(
                "mag_ratio must be positive, got {}",
                self.detection.mag_ratio
            )));
        }

        if let Some(backend) = &self.detection.inference_backend {
            if !matches!(backend.as_str(), "cpu" | "cuda" | "tensorrt") {
                return Err(ConfigError::InvalidDetectionConfig(format!(
                    "unknown inference backend: {backend}"
                )));
            }
        }

        if let Some(size) = self.inpaint.input_size {
            if size == 0 || size % 8 != 0 {
                return Err(ConfigError::InvalidInpaintConfig(format!(
                    "input_size must be a positive multiple of 8, got {size}"
                )));
            }
        }

        if let Some(command) = &self.inpaint.command {
            for placeholder in PLACEHOLDERS {
                if !command.contains(placeholder) {
                    return Err(ConfigError::InvalidInpaintConfig(format!(
                        "INPAINT_COMMAND must contain {placeholder}"
                    )));
                }
            }
        }

        if self.ocr.psm > 13 {
            return Err(ConfigError::InvalidOcrConfig(format!(
                "psm must be between 0 and 13, got {}",
                self.ocr.psm
            )));
        }

        if self.ocr.language.is_empty() {
            return Err(ConfigError::InvalidOcrConfig("language is empty".to_string()));
        }

        // Validate workspace directory parent exists
        let base = Path::new(&self.workspace.base_dir);
        if let Some(parent) = base.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                return Err(ConfigError::InvalidWorkspacePath(format!(
                    "Parent directory does not exist: {}",
                    parent.display()
                )));
            }
        }

        Ok(())
    }

    /// Defaults without touching the environment, used by tests and the stage CLI
    pub fn with_defaults(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            server: ServerConfig {
                port: 5000,
                host: "0.0.0.0".to_string(),
                log_level: Level::INFO,
                max_upload_bytes: 50 * 1024 * 1024,
            },
            detection: DetectionConfig {
                model_path: "models/craft_mlt_25k.onnx".to_string(),
                text_threshold: 0.7,
                low_text: 0.4,
                link_threshold: 0.4,
                canvas_size: 1280,
                mag_ratio: 1.5,
                polygon_mode: false,
                shape_policy: RegionShapePolicy::default(),
                inference_backend: None,
                intra_threads: num_cpus::get().max(1),
            },
            mask: MaskConfig { dilation_radius: 5 },
            inpaint: InpaintConfig {
                model_path: "models/big-lama.onnx".to_string(),
                input_size: None,
                command: None,
            },
            ocr: OcrConfig {
                tesseract_path: "tesseract".to_string(),
                language: "eng".to_string(),
                psm: 6,
            },
            workspace: WorkspaceConfig {
                base_dir: base_dir.into(),
                image_name: "testImg".to_string(),
            },
        }
    }

    pub fn server_port(&self) -> u16 {
        self.server.port
    }

    pub fn server_host(&self) -> &str {
        &self.server.host
    }

    pub fn log_level(&self) -> Level {
        self.server.log_level
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.server.max_upload_bytes
    }

    pub fn dilation_radius(&self) -> u32 {
        self.mask.dilation_radius
    }

    pub fn workspace_dir(&self) -> &Path {
        &self.workspace.base_dir
    }

    pub fn image_name(&self) -> &str {
        &self.workspace.image_name
    }
}

// Note: No Default implementation because Config::new() can fail

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = Config::with_defaults("workspace");
        assert!(config.validate().is_ok());
        assert_eq!(config.dilation_radius(), 5);
        assert_eq!(config.server_port(), 5000);
    }

    #[test]
    fn rejects_threshold_out_of_range() {
        let mut config = Config::with_defaults("workspace");
        config.detection.link_threshold = 1.5;
        match config.validate() {
            Err(ConfigError::InvalidThreshold { name, .. }) => assert_eq!(name, "LINK_THRESHOLD"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn rejects_command_without_placeholders() {
        let mut config = Config::with_defaults("workspace");
        config.inpaint.command = Some("lama-cli {image} {output}".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidInpaintConfig(_))
        ));
    }

    #[test]
    fn rejects_unaligned_inpaint_size() {
        let mut config = Config::with_defaults("workspace");
        config.inpaint.input_size = Some(500);
        assert!(config.validate().is_err());
        config.inpaint.input_size = Some(512);
        assert!(config.validate().is_ok());
    }
}
