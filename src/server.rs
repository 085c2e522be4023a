//! HTTP routes: the upload page, the JSON API and a health probe

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, State,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, warn};

use crate::analyzer::AzureVisionClient;
use crate::codec::RasterCodec;
use crate::config::Config;
use crate::error::{ConfigError, UploadError};
use crate::handler::{UploadHandler, UploadResponse};
use crate::page::{render_page, PageView};

/// Multipart field the upload form uses for the file
pub const IMAGE_FIELD: &str = "imageFile";

pub struct AppState {
    pub handler: UploadHandler,
    pub max_upload_bytes: usize,
}

impl AppState {
    /// Wire the Azure analyzer and the raster codec from startup config.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let analyzer = AzureVisionClient::new(config.analyzer_settings())?;
        let handler = UploadHandler::new(
            Arc::new(analyzer),
            Arc::new(RasterCodec),
            config.handler_settings(),
        );
        Ok(Self {
            handler,
            max_upload_bytes: config.max_upload_bytes,
        })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let max_upload_bytes = state.max_upload_bytes;
    Router::new()
        .route("/", get(index).post(submit_form))
        .route("/api/analyze", post(analyze_api))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn multipart_error(err: MultipartError, limit: usize) -> UploadError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        UploadError::Validation(format!(
            "Image is larger than the {} byte upload limit.",
            limit
        ))
    } else {
        UploadError::Validation(format!("Could not read the upload: {}", err.body_text()))
    }
}

/// Pull the image bytes out of the form.
///
/// Prefers the `imageFile` field; otherwise takes the first field that
/// carries a filename. `None` when the form has neither.
async fn read_image(
    multipart: Result<Multipart, MultipartRejection>,
    limit: usize,
) -> Result<Option<Bytes>, UploadError> {
    let mut multipart = multipart.map_err(|rejection| {
        debug!("Multipart rejected: {}", rejection.body_text());
        UploadError::empty_upload()
    })?;

    let mut fallback = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        let named = matches!(field.name(), Some(IMAGE_FIELD) | Some("ImageFile"));
        let has_file_name = field.file_name().is_some_and(|name| !name.is_empty());

        if named {
            let data = field.bytes().await.map_err(|e| multipart_error(e, limit))?;
            return Ok(Some(data));
        }
        if has_file_name && fallback.is_none() {
            fallback = Some(field.bytes().await.map_err(|e| multipart_error(e, limit))?);
        }
    }

    Ok(fallback)
}

async fn process(
    state: &AppState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<UploadResponse, UploadError> {
    let payload = read_image(multipart, state.max_upload_bytes).await?;
    state.handler.handle(payload).await
}

async fn index() -> Html<String> {
    Html(render_page(&PageView::default()))
}

async fn submit_form(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    match process(&state, multipart).await {
        Ok(result) => Html(render_page(&PageView {
            result: Some(&result),
            error: None,
        }))
        .into_response(),
        Err(err) => {
            warn!("Upload failed: {}", err);
            let page = render_page(&PageView {
                result: None,
                error: Some(&err.to_string()),
            });
            (err.status_code(), Html(page)).into_response()
        }
    }
}

async fn analyze_api(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, UploadError> {
    let result = process(&state, multipart).await.map_err(|err| {
        warn!("Upload failed: {}", err);
        err
    })?;
    Ok(Json(result))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "running" }))
}
