// HTTP surface: upload endpoint plus health and monitoring routes

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::core::errors::PipelineError;
use crate::core::types::{AppState, ErrorResponse, TextRemovalResponse};

/// Upload extensions accepted by `/upload`
pub const ALLOWED_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "gif", "bmp"];

const IMAGE_FIELD: &str = "image";

/// Error body `{"error": "..."}` with a status code
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::InvalidInput(message) => Self::bad_request(message),
            PipelineError::MissingResult(message) => Self::internal(message),
            other => Self::internal(format!("Processing failed: {other}")),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

/// `name.ext` with an allowed extension, compared case-insensitively
pub fn allowed_file(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ALLOWED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = state.config.max_upload_bytes();

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/stats", get(stats_endpoint))
        .route("/upload", post(upload))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
}

async fn root() -> &'static str {
    "Text Removal Service"
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.metrics.record_endpoint_request("/health");
    Json(serde_json::json!({
        "status": "healthy",
        "message": "Server is running",
    }))
}

/// Prometheus metrics endpoint
async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

/// Detailed statistics endpoint (JSON)
async fn stats_endpoint(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let snapshot = state.metrics.snapshot();
    serde_json::to_value(snapshot)
        .map(Json)
        .map_err(|e| ApiError::internal(format!("Failed to serialize metrics: {e}")))
}

/// Read the `image` field, rejecting anything that should never reach the pipeline
async fn read_upload(multipart: &mut Multipart) -> Result<Vec<u8>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Multipart error: {e}")))?
    {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or("").to_string();
        if filename.is_empty() {
            return Err(ApiError::bad_request("No file selected"));
        }
        if !allowed_file(&filename) {
            return Err(ApiError::bad_request("File type not allowed"));
        }
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Read error: {e}")))?;
        info!("Received {} ({} bytes)", filename, data.len());
        return Ok(data.to_vec());
    }
    Err(ApiError::bad_request("No image file provided"))
}

/// Upload endpoint
///
/// # Request Format:
/// - multipart/form-data
/// - Field "image": one png/jpg/jpeg/gif/bmp file
///
/// # Response:
/// - TextRemovalResponse JSON, or `{"error": ...}`
async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<TextRemovalResponse>, ApiError> {
    let start = Instant::now();
    state.metrics.record_endpoint_request("/upload");

    let bytes = match read_upload(&mut multipart).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Upload rejected: {}", e.message);
            state.metrics.record_request_rejected();
            return Err(e);
        }
    };

    match state.orchestrator.process(&bytes).await {
        Ok(response) => {
            state.metrics.record_request_success(start.elapsed());
            Ok(Json(response))
        }
        Err(e) if e.is_input_error() => {
            warn!("Upload rejected: {}", e);
            state.metrics.record_request_rejected();
            Err(e.into())
        }
        Err(e) => {
            error!("Processing failed: {}", e);
            state.metrics.record_request_failure(start.elapsed());
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::core::types::QuadBox;
    use crate::orchestration::PipelineOrchestrator;
    use crate::phases::{DetectStage, ExtractStage, InpaintStage, MaskStage, PipelineStage};
    use crate::services::detection::TextDetector;
    use crate::services::inpainting::Inpainter;
    use crate::services::ocr::TextRecognizer;
    use crate::utils::Metrics;
    use anyhow::Result;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
    use std::io::Cursor;
    use std::path::Path;
    use std::sync::Arc;
    use tower::util::ServiceExt;

    const BOUNDARY: &str = "X-TEXT-REMOVAL-BOUNDARY";

    struct CornerDetector;

    impl TextDetector for CornerDetector {
        fn detect(&self, _image: &DynamicImage) -> Result<Vec<QuadBox>> {
            Ok(vec![QuadBox::from_flat([0, 0, 9, 0, 9, 9, 0, 9])])
        }
    }

    struct Passthrough;

    impl Inpainter for Passthrough {
        fn inpaint(&self, image: &RgbImage, _mask: &GrayImage) -> Result<RgbImage> {
            Ok(image.clone())
        }
    }

    struct Blank;

    impl TextRecognizer for Blank {
        fn recognize(&self, _crop: &GrayImage) -> Result<String> {
            Ok("\n".to_string())
        }
    }

    fn test_state(base: &Path) -> AppState {
        let config = Arc::new(Config::with_defaults(base));
        let metrics = Metrics::new();
        let stages: Vec<Arc<dyn PipelineStage>> = vec![
            Arc::new(DetectStage::new(Arc::new(CornerDetector))),
            Arc::new(MaskStage::new(config.dilation_radius())),
            Arc::new(InpaintStage::new(Arc::new(Passthrough))),
            Arc::new(ExtractStage::new(Arc::new(Blank))),
        ];
        let orchestrator =
            PipelineOrchestrator::with_stages(config.clone(), metrics.clone(), stages).unwrap();
        AppState {
            config,
            orchestrator: Arc::new(orchestrator),
            metrics,
        }
    }

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(w, h))
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn multipart_request(field: &str, filename: &str, data: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn extension_check_is_case_insensitive() {
        assert!(allowed_file("scan.PNG"));
        assert!(allowed_file("photo.final.jpeg"));
        assert!(!allowed_file("notes.txt"));
        assert!(!allowed_file("png"));
    }

    #[tokio::test]
    async fn health_reports_running() {
        let base = tempfile::tempdir().unwrap();
        let app = build_router(test_state(base.path()));
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["message"], "Server is running");
    }

    #[tokio::test]
    async fn upload_returns_cleaned_image_and_text() {
        let base = tempfile::tempdir().unwrap();
        let app = build_router(test_state(base.path()));

        let response = app
            .oneshot(multipart_request("image", "page.png", &png_bytes(30, 20)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["message"], "Text removal completed successfully");
        assert_eq!(body["width"], 30);
        assert_eq!(body["height"], 20);
        assert_eq!(
            body["text_coordinates"],
            serde_json::json!([{"coordinates": [0, 0, 9, 0, 9, 9, 0, 9], "text": "NA"}])
        );
        assert!(!body["cleaned_image"].as_str().unwrap().is_empty());
        assert!(std::fs::read_dir(base.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn missing_image_field_is_rejected() {
        let base = tempfile::tempdir().unwrap();
        let app = build_router(test_state(base.path()));

        let response = app
            .oneshot(multipart_request("file", "page.png", &png_bytes(4, 4)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "No image file provided");
    }

    #[tokio::test]
    async fn disallowed_extension_is_rejected() {
        let base = tempfile::tempdir().unwrap();
        let app = build_router(test_state(base.path()));

        let response = app
            .oneshot(multipart_request("image", "notes.txt", b"hello"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "File type not allowed");
        assert!(std::fs::read_dir(base.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn undecodable_upload_is_a_client_error() {
        let base = tempfile::tempdir().unwrap();
        let state = test_state(base.path());
        let metrics = state.metrics.clone();
        let app = build_router(state);

        let response = app
            .oneshot(multipart_request("image", "broken.jpg", b"definitely not a jpeg"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["error"]
            .as_str()
            .unwrap()
            .starts_with("Invalid image file"));
        assert!(std::fs::read_dir(base.path()).unwrap().next().is_none());
        assert_eq!(metrics.snapshot().requests_rejected, 1);
    }

    #[test]
    fn pipeline_errors_map_to_status_codes() {
        let missing = ApiError::from(PipelineError::MissingResult(
            "Cleaned image not found".to_string(),
        ));
        assert_eq!(missing.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(missing.message, "Cleaned image not found");

        let unexpected = ApiError::from(PipelineError::Unexpected("disk full".to_string()));
        assert_eq!(unexpected.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(unexpected.message.starts_with("Processing failed: "));
    }
}
