//! Upload relay.
//!
//! A small HTTP service for editing-host plugins that can only do multipart
//! uploads: the uploaded file is passed through to the pipeline host's
//! `/upload/image` endpoint. Also offers a connectivity probe of the
//! pipeline host.

use crate::config::RelayConfig;
use anyhow::{Context, Result};
use axum::{
    extract::{Multipart, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

/// Relay state shared across handlers
#[derive(Clone)]
pub struct RelayState {
    pub client: reqwest::Client,
    pub pipeline_url: String,
    pub upload_timeout: Duration,
    pub probe_timeout: Duration,
}

impl RelayState {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            pipeline_url: config.pipeline_url.clone(),
            upload_timeout: config.upload_timeout(),
            probe_timeout: config.probe_timeout(),
        }
    }
}

/// Error body returned by the relay
#[derive(Debug, Serialize, Deserialize)]
pub struct RelayErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

type RelayError = (StatusCode, Json<RelayErrorResponse>);

fn relay_error(status: StatusCode, error: impl Into<String>) -> RelayError {
    (
        status,
        Json(RelayErrorResponse {
            error: error.into(),
            details: None,
            url: None,
        }),
    )
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    pub filename: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProbeResponse {
    pub success: bool,
    pub message: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct ProbeQuery {
    pub url: Option<String>,
}

/// Create the relay router
pub fn create_router(state: RelayState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/upload", post(upload))
        .route("/test-pipeline", get(test_pipeline))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "server": "Image Bridge Relay"
    }))
}

struct UploadedFile {
    filename: String,
    content_type: Option<String>,
    data: Vec<u8>,
}

/// Receive a multipart upload and pass it on to the pipeline host
#[instrument(skip_all)]
async fn upload(
    State(state): State<RelayState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, RelayError> {
    let mut file: Option<UploadedFile> = None;
    let mut target_url: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| relay_error(StatusCode::BAD_REQUEST, e.body_text()))?
    {
        match field.name() {
            Some("image") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| relay_error(StatusCode::BAD_REQUEST, e.body_text()))?;
                file = Some(UploadedFile {
                    filename,
                    content_type,
                    data: data.to_vec(),
                });
            }
            Some("pipeline_url") => {
                let url = field
                    .text()
                    .await
                    .map_err(|e| relay_error(StatusCode::BAD_REQUEST, e.body_text()))?;
                if !url.is_empty() {
                    target_url = Some(url);
                }
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| relay_error(StatusCode::BAD_REQUEST, "No image file provided"))?;
    if file.filename.is_empty() {
        return Err(relay_error(StatusCode::BAD_REQUEST, "Empty filename"));
    }

    let target_url = target_url.unwrap_or_else(|| state.pipeline_url.clone());
    let target_url = target_url.trim_end_matches('/').to_string();

    info!(filename = %file.filename, target = %target_url, "Forwarding upload to pipeline host");

    let mut part = reqwest::multipart::Part::bytes(file.data).file_name(file.filename.clone());
    if let Some(content_type) = &file.content_type {
        part = part
            .mime_str(content_type)
            .map_err(|e| relay_error(StatusCode::BAD_REQUEST, e.to_string()))?;
    }
    let form = reqwest::multipart::Form::new()
        .part("image", part)
        .text("overwrite", "true");

    let response = state
        .client
        .post(format!("{}/upload/image", target_url))
        .timeout(state.upload_timeout)
        .multipart(form)
        .send()
        .await
        .map_err(|e| unreachable_error(&target_url, e))?;

    let status = response.status();
    if !status.is_success() {
        let details = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), "Pipeline host rejected upload");
        return Err((
            upstream_status(status),
            Json(RelayErrorResponse {
                error: format!("Pipeline host returned status {}", status.as_u16()),
                details: Some(details),
                url: None,
            }),
        ));
    }

    let text = response
        .text()
        .await
        .map_err(|e| unreachable_error(&target_url, e))?;
    let body: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
        warn!(error = %e, "Pipeline host sent a non-JSON upload response");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(RelayErrorResponse {
                error: format!("Invalid response from pipeline host: {}", e),
                details: Some(text.clone()),
                url: None,
            }),
        )
    })?;
    let filename = body
        .get("name")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or(file.filename);

    info!(filename = %filename, "Upload successful");

    Ok(Json(UploadResponse {
        success: true,
        filename,
        message: "Image uploaded to pipeline host".to_string(),
    }))
}

/// Check that the pipeline host answers
#[instrument(skip(state))]
async fn test_pipeline(
    State(state): State<RelayState>,
    Query(query): Query<ProbeQuery>,
) -> Result<Json<ProbeResponse>, RelayError> {
    let target_url = query.url.unwrap_or_else(|| state.pipeline_url.clone());
    let target_url = target_url.trim_end_matches('/').to_string();

    let response = state
        .client
        .get(format!("{}/system_stats", target_url))
        .timeout(state.probe_timeout)
        .send()
        .await
        .map_err(|e| unreachable_error(&target_url, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(relay_error(
            upstream_status(status),
            format!("Pipeline host returned status {}", status.as_u16()),
        ));
    }

    Ok(Json(ProbeResponse {
        success: true,
        message: "Connected to pipeline host".to_string(),
        url: target_url,
    }))
}

fn upstream_status(status: reqwest::StatusCode) -> StatusCode {
    StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY)
}

fn unreachable_error(target_url: &str, e: reqwest::Error) -> RelayError {
    if e.is_connect() || e.is_timeout() {
        warn!(target = %target_url, error = %e, "Cannot connect to pipeline host");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(RelayErrorResponse {
                error: "Cannot connect to pipeline host".to_string(),
                details: Some(format!("Is the pipeline host running at {}?", target_url)),
                url: Some(target_url.to_string()),
            }),
        )
    } else {
        error!(target = %target_url, error = %e, "Relay request failed");
        relay_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

/// Start the relay server
pub async fn start_relay_server(config: &RelayConfig) -> Result<()> {
    let router = create_router(RelayState::from_config(config));
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, pipeline_url = %config.pipeline_url, "Starting upload relay");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind relay address")?;

    axum::serve(listener, router)
        .await
        .context("Relay server error")?;

    Ok(())
}
