// Pipeline Orchestrator: one request through detect → mask → inpaint → extract

use anyhow::Context;
use base64::{engine::general_purpose, Engine};
use image::RgbImage;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::core::config::Config;
use crate::core::errors::{PipelineError, PipelineResult, StageError};
use crate::core::types::{PipelineState, StageKind, StageOutput, TextCoordinate, TextRemovalResponse};
use crate::orchestration::workspace::{Workspace, WorkspaceGuard};
use crate::phases::{
    declared_output, CommandStage, DetectStage, ExtractStage, InpaintStage, MaskStage,
    PipelineStage,
};
use crate::services::detection::CraftDetector;
use crate::services::inpainting::LamaInpainter;
use crate::services::ocr::{TesseractRecognizer, NO_TEXT};
use crate::utils::coordinates::read_records;
use crate::utils::image_ops::{load_image_from_memory_async, save_jpeg};
use crate::utils::Metrics;

const SUCCESS_MESSAGE: &str = "Text removal completed successfully";

pub struct PipelineOrchestrator {
    config: Arc<Config>,
    stages: Vec<Arc<dyn PipelineStage>>,
    metrics: Metrics,
    backend_type: String,
}

impl PipelineOrchestrator {
    /// Load the models and wire up the shipping stages
    #[instrument(skip(config, metrics))]
    pub fn new(config: Arc<Config>, metrics: Metrics) -> anyhow::Result<Self> {
        info!("Initializing services...");

        let detector = CraftDetector::new(&config.detection)?;
        let backend_type = detector.device_type().to_string();

        let inpaint: Arc<dyn PipelineStage> = match &config.inpaint.command {
            Some(command) => {
                info!("✓ Inpainting: external command `{}`", command);
                Arc::new(CommandStage::inpaint(command.clone()))
            }
            None => {
                let inpainter = LamaInpainter::new(&config.inpaint, &config.detection)?;
                Arc::new(InpaintStage::new(Arc::new(inpainter)))
            }
        };
        let recognizer = TesseractRecognizer::new(&config.ocr);
        info!(
            "✓ OCR: {} (lang {}, psm {})",
            config.ocr.tesseract_path, config.ocr.language, config.ocr.psm
        );

        let stages: Vec<Arc<dyn PipelineStage>> = vec![
            Arc::new(DetectStage::new(Arc::new(detector))),
            Arc::new(MaskStage::new(config.dilation_radius())),
            inpaint,
            Arc::new(ExtractStage::new(Arc::new(recognizer))),
        ];

        let mut orchestrator = Self::with_stages(config, metrics, stages)?;
        orchestrator.backend_type = backend_type;
        info!(
            "✓ Ready (backend: {}, workspaces under {})",
            orchestrator.backend_type,
            orchestrator.config.workspace_dir().display()
        );
        Ok(orchestrator)
    }

    /// Use the given stages. They must cover every stage once, in pipeline order.
    pub fn with_stages(
        config: Arc<Config>,
        metrics: Metrics,
        stages: Vec<Arc<dyn PipelineStage>>,
    ) -> PipelineResult<Self> {
        let mut state = PipelineState::Received;
        for stage in &stages {
            state = state
                .advance(stage.kind())
                .ok_or_else(|| PipelineError::OutOfOrder {
                    stage: stage.kind(),
                    state: state.to_string(),
                })?;
        }
        if let Some(missing) = state.next_stage() {
            return Err(PipelineError::Unexpected(format!(
                "Pipeline stops in state {state}; {missing} stage is missing"
            )));
        }

        Ok(Self {
            config,
            stages,
            metrics,
            backend_type: "external".to_string(),
        })
    }

    /// Get the backend type (e.g., "CUDA", "TensorRT", "CPU")
    pub fn backend_type(&self) -> &str {
        &self.backend_type
    }

    /// Run one uploaded image through every stage.
    ///
    /// Undecodable bytes are rejected before any workspace exists. Once the
    /// workspace is created it is removed on every exit path.
    #[instrument(skip(self, image_bytes), fields(bytes = image_bytes.len()))]
    pub async fn process(&self, image_bytes: &[u8]) -> PipelineResult<TextRemovalResponse> {
        let start = Instant::now();
        let image = load_image_from_memory_async(image_bytes)
            .await
            .map_err(|e| PipelineError::InvalidInput(format!("Invalid image file: {e}")))?
            .to_rgb8();

        let workspace = Workspace::create(self.config.workspace_dir(), self.config.image_name())?;
        let guard = WorkspaceGuard::new(workspace.clone());
        debug!(
            "Request {}: {}x{} image",
            workspace.request_id(),
            image.width(),
            image.height()
        );

        self.store_input(image, &workspace).await?;

        let mut state = PipelineState::Received;
        for stage in &self.stages {
            let kind = stage.kind();
            let stage_start = Instant::now();
            match self.run_stage(Arc::clone(stage), &workspace).await {
                Ok(output) => {
                    self.metrics.record_stage_duration(kind, stage_start.elapsed());
                    if kind == StageKind::Detect {
                        self.metrics.record_boxes_detected(output.items);
                    }
                    state = state.advance(kind).ok_or_else(|| PipelineError::OutOfOrder {
                        stage: kind,
                        state: state.to_string(),
                    })?;
                    debug!("→ {}", state);
                }
                Err(e) => {
                    self.metrics.record_stage_failure(kind);
                    warn!(
                        "Request {} {} after {}: {}",
                        workspace.request_id(),
                        PipelineState::Failed,
                        state,
                        e
                    );
                    return Err(e);
                }
            }
        }

        let response = self.assemble_response(&workspace).await?;

        if let Err(e) = guard.purge() {
            warn!("Workspace cleanup failed: {}", e);
        }
        info!(
            "Request {} {} in {:.2}s: {} boxes",
            workspace.request_id(),
            PipelineState::Done,
            start.elapsed().as_secs_f64(),
            response.text_coordinates.len()
        );
        Ok(response)
    }

    async fn store_input(&self, image: RgbImage, workspace: &Workspace) -> PipelineResult<()> {
        let path = workspace.input_image();
        tokio::task::spawn_blocking(move || save_jpeg(&image, &path))
            .await
            .map_err(|e| PipelineError::Unexpected(format!("Input writer panicked: {e}")))?
            .map_err(|e| PipelineError::Unexpected(format!("{e:#}")))
    }

    /// Run a stage on the blocking pool and check it left its output behind
    async fn run_stage(
        &self,
        stage: Arc<dyn PipelineStage>,
        workspace: &Workspace,
    ) -> PipelineResult<StageOutput> {
        let kind = stage.kind();
        let ws = workspace.clone();
        let output = tokio::task::spawn_blocking(move || stage.run(&ws))
            .await
            .map_err(|e| PipelineError::Unexpected(format!("{kind} panicked: {e}")))??;

        let expected = declared_output(kind, workspace);
        if !expected.exists() {
            return Err(StageError::MissingOutput {
                stage: kind,
                path: expected,
            }
            .into());
        }
        Ok(output)
    }

    async fn assemble_response(&self, workspace: &Workspace) -> PipelineResult<TextRemovalResponse> {
        let cleaned_path = workspace.cleaned_image();
        if !cleaned_path.exists() {
            return Err(PipelineError::MissingResult(
                "Cleaned image not found".to_string(),
            ));
        }
        let annotated_path = workspace.annotated_coordinates();

        let assembled = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
            let bytes = std::fs::read(&cleaned_path)
                .with_context(|| format!("Failed to read {}", cleaned_path.display()))?;
            let (width, height) = image::load_from_memory(&bytes)
                .context("Cleaned image is not decodable")?
                .to_rgb8()
                .dimensions();
            let records = read_records(&annotated_path)?;
            Ok((bytes, width, height, records))
        })
        .await
        .map_err(|e| PipelineError::Unexpected(format!("Response assembly panicked: {e}")))?;
        let (bytes, width, height, records) =
            assembled.map_err(|e| PipelineError::Unexpected(format!("{e:#}")))?;

        let text_coordinates = records
            .into_iter()
            .map(|record| TextCoordinate {
                coordinates: record.quad.to_flat(),
                text: record.text.unwrap_or_else(|| NO_TEXT.to_string()),
            })
            .collect();

        Ok(TextRemovalResponse {
            message: SUCCESS_MESSAGE.to_string(),
            cleaned_image: general_purpose::STANDARD.encode(&bytes),
            text_coordinates,
            width,
            height,
            file_size: bytes.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::StageResult;
    use crate::core::types::QuadBox;
    use crate::services::detection::TextDetector;
    use crate::services::inpainting::Inpainter;
    use crate::services::ocr::TextRecognizer;
    use crate::utils::image_ops::encode_jpeg;
    use anyhow::{bail, Result};
    use image::{DynamicImage, GrayImage, Rgb};
    use parking_lot::Mutex;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// One box covering the whole image
    struct FullFrameDetector;

    impl TextDetector for FullFrameDetector {
        fn detect(&self, image: &DynamicImage) -> Result<Vec<QuadBox>> {
            let (w, h) = (image.width() as i32 - 1, image.height() as i32 - 1);
            Ok(vec![QuadBox::from_flat([0, 0, w, 0, w, h, 0, h])])
        }
    }

    struct FixedDetector(Vec<QuadBox>);

    impl TextDetector for FixedDetector {
        fn detect(&self, _image: &DynamicImage) -> Result<Vec<QuadBox>> {
            Ok(self.0.clone())
        }
    }

    /// Returns the image untouched and remembers the mask it was given
    #[derive(Default)]
    struct RecordingInpainter {
        calls: AtomicUsize,
        last_mask: Mutex<Option<GrayImage>>,
    }

    impl Inpainter for RecordingInpainter {
        fn inpaint(&self, image: &RgbImage, mask: &GrayImage) -> Result<RgbImage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_mask.lock() = Some(mask.clone());
            Ok(image.clone())
        }
    }

    struct EchoWidth;

    impl TextRecognizer for EchoWidth {
        fn recognize(&self, crop: &GrayImage) -> Result<String> {
            Ok(format!("width {}", crop.width()))
        }
    }

    struct FailingMask;

    impl PipelineStage for FailingMask {
        fn kind(&self) -> StageKind {
            StageKind::Mask
        }

        fn run(&self, _workspace: &Workspace) -> StageResult<StageOutput> {
            Err(StageError::ProcessFailed {
                stage: StageKind::Mask,
                status: "exit status: 1".to_string(),
                stderr: "mask writer crashed".to_string(),
            })
        }
    }

    /// Claims success without writing anything
    struct SilentMask;

    impl PipelineStage for SilentMask {
        fn kind(&self) -> StageKind {
            StageKind::Mask
        }

        fn run(&self, _workspace: &Workspace) -> StageResult<StageOutput> {
            Ok(StageOutput::default())
        }
    }

    struct PanickingDetect;

    impl PipelineStage for PanickingDetect {
        fn kind(&self) -> StageKind {
            StageKind::Detect
        }

        fn run(&self, _workspace: &Workspace) -> StageResult<StageOutput> {
            panic!("detector blew up")
        }
    }

    struct BrokenRecognizer;

    impl TextRecognizer for BrokenRecognizer {
        fn recognize(&self, _crop: &GrayImage) -> Result<String> {
            bail!("tesseract missing")
        }
    }

    fn jpeg(w: u32, h: u32) -> Vec<u8> {
        encode_jpeg(&RgbImage::from_pixel(w, h, Rgb([200, 180, 160]))).unwrap()
    }

    fn config(base: &Path) -> Arc<Config> {
        Arc::new(Config::with_defaults(base))
    }

    fn stages(
        detector: Arc<dyn TextDetector>,
        mask: Arc<dyn PipelineStage>,
        inpainter: Arc<dyn Inpainter>,
        recognizer: Arc<dyn TextRecognizer>,
    ) -> Vec<Arc<dyn PipelineStage>> {
        vec![
            Arc::new(DetectStage::new(detector)),
            mask,
            Arc::new(InpaintStage::new(inpainter)),
            Arc::new(ExtractStage::new(recognizer)),
        ]
    }

    fn is_empty_dir(path: &Path) -> bool {
        std::fs::read_dir(path).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn end_to_end_square_box() {
        let base = tempfile::tempdir().unwrap();
        let inpainter = Arc::new(RecordingInpainter::default());
        let quad = QuadBox::from_flat([10, 10, 90, 10, 90, 90, 10, 90]);
        let metrics = Metrics::new();
        let orchestrator = PipelineOrchestrator::with_stages(
            config(base.path()),
            metrics.clone(),
            stages(
                Arc::new(FixedDetector(vec![quad])),
                Arc::new(MaskStage::new(0)),
                inpainter.clone(),
                Arc::new(EchoWidth),
            ),
        )
        .unwrap();

        let response = orchestrator.process(&jpeg(100, 100)).await.unwrap();

        assert_eq!(response.message, SUCCESS_MESSAGE);
        assert_eq!((response.width, response.height), (100, 100));
        assert_eq!(
            response.text_coordinates,
            vec![TextCoordinate {
                coordinates: [10, 10, 90, 10, 90, 90, 10, 90],
                text: "width 81".to_string(),
            }]
        );
        let decoded = general_purpose::STANDARD
            .decode(&response.cleaned_image)
            .unwrap();
        assert_eq!(decoded.len(), response.file_size);

        let mask = inpainter.last_mask.lock().clone().unwrap();
        for (x, y, p) in mask.enumerate_pixels() {
            let inside = (10..=90).contains(&x) && (10..=90).contains(&y);
            assert_eq!(p[0], if inside { 255 } else { 0 }, "pixel ({x},{y})");
        }
        assert!(is_empty_dir(base.path()));

        let snapshot = metrics.snapshot();
        assert!(snapshot.stages.values().all(|s| s.runs == 1 && s.failures == 0));
        assert_eq!(snapshot.boxes_detected, 1);
    }

    #[tokio::test]
    async fn mask_failure_stops_the_pipeline_and_cleans_up() {
        let base = tempfile::tempdir().unwrap();
        let inpainter = Arc::new(RecordingInpainter::default());
        let orchestrator = PipelineOrchestrator::with_stages(
            config(base.path()),
            Metrics::new(),
            stages(
                Arc::new(FullFrameDetector),
                Arc::new(FailingMask),
                inpainter.clone(),
                Arc::new(EchoWidth),
            ),
        )
        .unwrap();

        let err = orchestrator.process(&jpeg(32, 32)).await.unwrap_err();

        match &err {
            PipelineError::Stage(stage_err) => assert_eq!(stage_err.stage(), StageKind::Mask),
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("mask writer crashed"));
        assert_eq!(inpainter.calls.load(Ordering::SeqCst), 0);
        assert!(is_empty_dir(base.path()));
    }

    #[tokio::test]
    async fn stage_without_declared_output_fails() {
        let base = tempfile::tempdir().unwrap();
        let inpainter = Arc::new(RecordingInpainter::default());
        let orchestrator = PipelineOrchestrator::with_stages(
            config(base.path()),
            Metrics::new(),
            stages(
                Arc::new(FullFrameDetector),
                Arc::new(SilentMask),
                inpainter.clone(),
                Arc::new(EchoWidth),
            ),
        )
        .unwrap();

        let err = orchestrator.process(&jpeg(16, 16)).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Stage(StageError::MissingOutput {
                stage: StageKind::Mask,
                ..
            })
        ));
        assert_eq!(inpainter.calls.load(Ordering::SeqCst), 0);
        assert!(is_empty_dir(base.path()));
    }

    #[tokio::test]
    async fn recognizer_failure_is_an_extraction_failure() {
        let base = tempfile::tempdir().unwrap();
        let orchestrator = PipelineOrchestrator::with_stages(
            config(base.path()),
            Metrics::new(),
            stages(
                Arc::new(FullFrameDetector),
                Arc::new(MaskStage::new(5)),
                Arc::new(RecordingInpainter::default()),
                Arc::new(BrokenRecognizer),
            ),
        )
        .unwrap();

        let err = orchestrator.process(&jpeg(24, 24)).await.unwrap_err();
        assert!(err.to_string().starts_with("Text extraction failed"));
        assert!(is_empty_dir(base.path()));
    }

    #[tokio::test]
    async fn panicking_stage_still_cleans_up() {
        let base = tempfile::tempdir().unwrap();
        let orchestrator = PipelineOrchestrator::with_stages(
            config(base.path()),
            Metrics::new(),
            vec![
                Arc::new(PanickingDetect),
                Arc::new(MaskStage::new(0)),
                Arc::new(InpaintStage::new(Arc::new(RecordingInpainter::default()))),
                Arc::new(ExtractStage::new(Arc::new(EchoWidth))),
            ],
        )
        .unwrap();

        let err = orchestrator.process(&jpeg(8, 8)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Unexpected(_)));
        assert!(is_empty_dir(base.path()));
    }

    #[tokio::test]
    async fn undecodable_upload_leaves_no_trace() {
        let base = tempfile::tempdir().unwrap();
        let orchestrator = PipelineOrchestrator::with_stages(
            config(base.path()),
            Metrics::new(),
            stages(
                Arc::new(FullFrameDetector),
                Arc::new(MaskStage::new(0)),
                Arc::new(RecordingInpainter::default()),
                Arc::new(EchoWidth),
            ),
        )
        .unwrap();

        let err = orchestrator.process(b"not an image").await.unwrap_err();
        assert!(err.is_input_error());
        assert!(is_empty_dir(base.path()));
    }

    #[tokio::test]
    async fn concurrent_requests_do_not_share_files() {
        let base = tempfile::tempdir().unwrap();
        let orchestrator = Arc::new(
            PipelineOrchestrator::with_stages(
                config(base.path()),
                Metrics::new(),
                stages(
                    Arc::new(FullFrameDetector),
                    Arc::new(MaskStage::new(3)),
                    Arc::new(RecordingInpainter::default()),
                    Arc::new(EchoWidth),
                ),
            )
            .unwrap(),
        );

        let sizes = [(40u32, 20u32), (64, 16), (24, 48), (50, 50)];
        let handles: Vec<_> = sizes
            .iter()
            .map(|&(w, h)| {
                let orchestrator = Arc::clone(&orchestrator);
                tokio::spawn(async move { orchestrator.process(&jpeg(w, h)).await })
            })
            .collect();

        for (handle, (w, h)) in handles.into_iter().zip(sizes) {
            let response = handle.await.unwrap().unwrap();
            assert_eq!((response.width, response.height), (w, h));
            assert_eq!(response.text_coordinates.len(), 1);
            assert_eq!(response.text_coordinates[0].text, format!("width {w}"));
        }
        assert!(is_empty_dir(base.path()));
    }

    #[test]
    fn misordered_stages_are_rejected() {
        let base = tempfile::tempdir().unwrap();
        let detect: Arc<dyn PipelineStage> = Arc::new(DetectStage::new(Arc::new(FullFrameDetector)));
        let mask: Arc<dyn PipelineStage> = Arc::new(MaskStage::new(0));

        let err = PipelineOrchestrator::with_stages(
            config(base.path()),
            Metrics::new(),
            vec![mask, detect],
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            PipelineError::OutOfOrder {
                stage: StageKind::Mask,
                ..
            }
        ));
    }

    #[test]
    fn incomplete_stage_list_is_rejected() {
        let base = tempfile::tempdir().unwrap();
        let detect: Arc<dyn PipelineStage> = Arc::new(DetectStage::new(Arc::new(FullFrameDetector)));
        let result = PipelineOrchestrator::with_stages(config(base.path()), Metrics::new(), vec![detect]);
        assert!(result.is_err());
    }
}
