//! API handlers for the conversion server
//!
//! Provides REST endpoints for:
//! - Raw document conversion (`POST /api/convert/:mode`)
//! - JSON/base64 conversion (`POST /api/convert`)
//! - Multipart text extraction, one or more files (`POST /api/extract`)
//! - Mode listing and health

use axum::{
    body::Bytes,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::{BytesRejection, JsonRejection, QueryRejection},
        Multipart, Path, Query, State,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use tool_invoker::{
    ConversionMode, ConversionOptions, ConversionRequest, ExtractionScore, ToolStatus,
};
use tracing::{debug, info, warn};

use crate::error::ServerError;
use crate::AppState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub timestamp: String,
    pub workers: usize,
    pub max_concurrent_tools: usize,
    pub available_permits: usize,
    pub tools: Vec<ToolStatus>,
}

/// Handler: GET /health
///
/// Reports `degraded` when a tool needed by an enabled mode was missing at
/// startup.
pub async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let healthy = state.tools.iter().all(|t| t.available);
    Json(HealthResponse {
        status: if healthy { "healthy" } else { "degraded" },
        service: "convert-server",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
        workers: state.workers,
        max_concurrent_tools: state.max_concurrent_tools,
        available_permits: state.permits.available_permits(),
        tools: state.tools.as_ref().clone(),
    })
}

/// Mode list response
#[derive(Serialize)]
pub struct ModeListResponse {
    pub success: bool,
    pub modes: Vec<ModeInfo>,
    pub count: usize,
}

/// Mode metadata
#[derive(Serialize)]
pub struct ModeInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub mime_type: &'static str,
    pub tool: &'static str,
}

/// Handler: GET /api/modes
pub async fn handle_list_modes(State(state): State<AppState>) -> Json<ModeListResponse> {
    let modes: Vec<ModeInfo> = state
        .invoker
        .modes()
        .iter()
        .map(|m| ModeInfo {
            name: m.name(),
            description: m.description(),
            mime_type: m.mime_type(),
            tool: m.tool().binary(),
        })
        .collect();
    let count = modes.len();

    Json(ModeListResponse {
        success: true,
        modes,
        count,
    })
}

/// Handler: POST /api/convert/:mode
///
/// The request body is the PDF itself; the response body is the artifact.
pub async fn handle_convert_raw(
    State(state): State<AppState>,
    Path(mode): Path<String>,
    options: Result<Query<ConversionOptions>, QueryRejection>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ServerError> {
    let body = body
        .map_err(|e| state.body_error(e.status(), e.body_text()))?;
    state.invoker.check_size(body.len())?;
    let mode = state.invoker.modes().resolve(&mode)?;
    let Query(options) = options
        .map_err(|e| ServerError::InvalidRequest(e.body_text()))?;

    info!("Convert request: mode={}, size={}", mode, body.len());

    let artifact = state
        .invoker
        .convert(ConversionRequest::new(body, mode).with_options(options))
        .await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(artifact.mime_type),
    );
    headers.insert(
        "x-elapsed-ms",
        HeaderValue::from(artifact.elapsed.as_millis() as u64),
    );
    if let Some(pages) = artifact.page_count {
        headers.insert("x-page-count", HeaderValue::from(pages));
    }

    Ok((StatusCode::OK, headers, artifact.data).into_response())
}

/// Convert request body
#[derive(Deserialize)]
pub struct ConvertApiRequest {
    /// One of the enabled modes
    pub mode: String,

    /// Base64-encoded PDF
    pub data: String,

    /// `page`, `dpi`, `first_page`, `last_page`
    #[serde(flatten)]
    pub options: ConversionOptions,
}

/// Convert response
#[derive(Serialize)]
pub struct ConvertApiResponse {
    pub success: bool,
    pub mode: ConversionMode,
    /// Base64-encoded artifact
    pub data: String,
    pub mime_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    pub elapsed_ms: u64,
    /// Present for text modes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction: Option<ExtractionScore>,
}

/// Handler: POST /api/convert
pub async fn handle_convert_json(
    State(state): State<AppState>,
    req: Result<Json<ConvertApiRequest>, JsonRejection>,
) -> Result<Json<ConvertApiResponse>, ServerError> {
    let Json(req) = req
        .map_err(|e| state.body_error(e.status(), e.body_text()))?;

    // Reject before decoding: base64 is 4 bytes per 3
    state.invoker.check_size(req.data.len() / 4 * 3)?;
    let mode = state.invoker.modes().resolve(&req.mode)?;
    let document = STANDARD
        .decode(req.data.trim())
        .map_err(|e| ServerError::InvalidRequest(format!("Invalid base64 data: {}", e)))?;
    state.invoker.check_size(document.len())?;

    info!(
        "Convert request (json): mode={}, size={}",
        mode,
        document.len()
    );

    let artifact = state
        .invoker
        .convert(ConversionRequest::new(document, mode).with_options(req.options))
        .await?;

    let extraction = mode
        .is_text()
        .then(|| ExtractionScore::from_text(&String::from_utf8_lossy(&artifact.data)));

    Ok(Json(ConvertApiResponse {
        success: true,
        mode,
        data: STANDARD.encode(&artifact.data),
        mime_type: artifact.mime_type,
        page_count: artifact.page_count,
        elapsed_ms: artifact.elapsed.as_millis() as u64,
        extraction,
    }))
}

/// One uploaded document
struct Upload {
    filename: Option<String>,
    data: Bytes,
}

/// Per-file extraction result
#[derive(Serialize)]
pub struct ExtractedFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub success: bool,
    pub text: String,
    pub extraction: ExtractionScore,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    pub elapsed_ms: u64,
}

/// Extract response
#[derive(Serialize)]
pub struct ExtractApiResponse {
    /// True when every file was extracted
    pub success: bool,
    pub mode: ConversionMode,
    pub files: Vec<ExtractedFile>,
    /// Mean of the non-zero file scores
    pub overall: ExtractionScore,
    /// Text of every file that produced any, separated by blank lines
    pub all_text: String,
}

/// Handler: POST /api/extract
///
/// Multipart form with one or more PDFs in `files`, `file` or `document`
/// fields and an optional `mode` field, `text` or `layout`. Files are
/// extracted one after another under the request's single tool permit. A
/// file the tools reject is reported in its own entry; the rest still run.
pub async fn handle_extract(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ExtractApiResponse>, ServerError> {
    let mut multipart = multipart
        .map_err(|e| ServerError::InvalidRequest(e.body_text()))?;

    let mut uploads: Vec<Upload> = Vec::new();
    let mut mode_field: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| state.multipart_error(e))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "files" | "file" | "document" => {
                let filename = field
                    .file_name()
                    .filter(|n| !n.is_empty())
                    .map(str::to_string);
                let data = field.bytes().await.map_err(|e| state.multipart_error(e))?;
                // Browsers send an empty part when no file was chosen
                if filename.is_none() && data.is_empty() {
                    continue;
                }
                state.invoker.check_size(data.len())?;
                uploads.push(Upload { filename, data });
            }
            "mode" => {
                mode_field = Some(field.text().await.map_err(|e| state.multipart_error(e))?);
            }
            other => debug!("Ignoring multipart field '{}'", other),
        }
    }

    if uploads.is_empty() {
        return Err(ServerError::InvalidRequest("No file provided".to_string()));
    }
    let mode = state
        .invoker
        .modes()
        .resolve(mode_field.as_deref().unwrap_or("text"))?;
    if !mode.is_text() {
        return Err(ServerError::InvalidRequest(
            "Extraction supports the 'text' and 'layout' modes only".to_string(),
        ));
    }

    info!("Extract request: files={}, mode={}", uploads.len(), mode);

    let mut files = Vec::with_capacity(uploads.len());
    for upload in uploads {
        debug!(
            "Extracting {:?} ({} bytes)",
            upload.filename,
            upload.data.len()
        );
        let result = state
            .invoker
            .convert(ConversionRequest::new(upload.data, mode))
            .await
            .map_err(ServerError::from);

        files.push(match result {
            Ok(artifact) => {
                let text = String::from_utf8_lossy(&artifact.data).into_owned();
                ExtractedFile {
                    filename: upload.filename,
                    success: true,
                    extraction: ExtractionScore::from_text(&text),
                    text,
                    error: None,
                    code: None,
                    elapsed_ms: artifact.elapsed.as_millis() as u64,
                }
            }
            Err(ServerError::Internal(detail)) => return Err(ServerError::Internal(detail)),
            Err(e) => {
                warn!("Extraction of {:?} failed: {}", upload.filename, e);
                ExtractedFile {
                    filename: upload.filename,
                    success: false,
                    text: String::new(),
                    extraction: ExtractionScore::from_text(""),
                    error: Some(e.public_message()),
                    code: Some(e.kind().code()),
                    elapsed_ms: 0,
                }
            }
        });
    }

    let scores: Vec<ExtractionScore> = files.iter().map(|f| f.extraction).collect();
    let all_text = files
        .iter()
        .map(|f| f.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    Ok(Json(ExtractApiResponse {
        success: files.iter().all(|f| f.success),
        mode,
        overall: ExtractionScore::overall(&scores),
        all_text,
        files,
    }))
}

impl AppState {
    fn body_error(&self, status: StatusCode, text: String) -> ServerError {
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            ServerError::PayloadTooLarge {
                limit: self.invoker.config().max_payload_bytes,
            }
        } else {
            ServerError::InvalidRequest(text)
        }
    }

    fn multipart_error(&self, err: MultipartError) -> ServerError {
        self.body_error(err.status(), err.body_text())
    }
}
