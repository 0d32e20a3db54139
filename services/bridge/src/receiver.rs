use crate::codec;
use crate::config::ReceiverConfig;
use crate::error::BridgeError;
use crate::store::{ImageSummary, InboundStore};
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::HeaderValue,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

/// Label used when the sender does not name its layer
pub const DEFAULT_LAYER_NAME: &str = "Photoshop Layer";

/// Receiver state shared across handlers
#[derive(Clone)]
pub struct ReceiverState {
    pub store: Arc<InboundStore>,
}

/// Ingest request from the editing host
#[derive(Debug, Deserialize)]
pub struct SendImageRequest {
    /// Base64-encoded image bytes
    pub image_data: Option<String>,
    /// Layer name used as the image label
    pub layer_name: Option<String>,
}

/// Successful ingest response
#[derive(Debug, Serialize, Deserialize)]
pub struct SendImageResponse {
    pub status: String,
    pub message: String,
    pub image_id: u64,
}

/// Receiver status response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub received_images_count: usize,
}

/// Stored image listing
#[derive(Debug, Serialize)]
pub struct ImageListResponse {
    pub images: Vec<ImageSummary>,
}

/// Create the receiver router
pub fn create_router(store: Arc<InboundStore>, config: &ReceiverConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| match HeaderValue::from_str(o) {
                    Ok(origin) => Some(origin),
                    Err(_) => {
                        warn!(origin = %o, "Ignoring malformed CORS origin");
                        None
                    }
                })
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/send_image", post(send_image))
        .route("/status", get(status))
        .route("/health", get(health_check))
        .route("/images", get(list_images))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(ReceiverState { store })
}

/// Receive an image from the editing host
#[instrument(skip_all)]
async fn send_image(
    State(state): State<ReceiverState>,
    payload: Result<Json<SendImageRequest>, JsonRejection>,
) -> Result<Json<SendImageResponse>, BridgeError> {
    let Json(request) = payload.map_err(|rejection| {
        warn!(error = %rejection, "Rejected malformed ingest request");
        metrics::counter!("bridge_images_rejected_total").increment(1);
        BridgeError::InputValidation(format!("Invalid request body: {}", rejection.body_text()))
    })?;

    let image_data = match request.image_data {
        Some(data) if !data.is_empty() => data,
        _ => {
            metrics::counter!("bridge_images_rejected_total").increment(1);
            return Err(BridgeError::InputValidation(
                "No image data provided".to_string(),
            ));
        }
    };
    let layer_name = request
        .layer_name
        .unwrap_or_else(|| DEFAULT_LAYER_NAME.to_string());

    // Decoding is CPU-bound; keep it off the async workers
    let decoded = tokio::task::spawn_blocking(move || codec::decode_transport_text(&image_data))
        .await
        .map_err(|e| BridgeError::Decode(format!("decode task failed: {}", e)))?;

    let (image, mode) = decoded.map_err(|e| {
        error!(layer_name = %layer_name, error = %e, "Error receiving image");
        metrics::counter!("bridge_images_rejected_total").increment(1);
        e
    })?;

    let (width, height) = (image.width(), image.height());
    let image_id = state.store.insert(image, layer_name.clone());
    metrics::counter!("bridge_images_received_total").increment(1);

    info!(
        image_id,
        layer_name = %layer_name,
        width,
        height,
        mode = mode.as_str(),
        "Received image"
    );

    Ok(Json(SendImageResponse {
        status: "success".to_string(),
        message: "Image received".to_string(),
        image_id,
    }))
}

/// Receiver status with the number of stored images
async fn status(State(state): State<ReceiverState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "running".to_string(),
        received_images_count: state.store.count(),
    })
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "bridge-receiver"
    }))
}

async fn list_images(State(state): State<ReceiverState>) -> Json<ImageListResponse> {
    Json(ImageListResponse {
        images: state.store.summaries(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::test_support::{png_bytes, solid_rgb};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn router(store: Arc<InboundStore>) -> Router {
        create_router(store, &ReceiverConfig::default())
    }

    async fn post_json(router: Router, body: String) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(
                Request::post("/send_image")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_malformed_cors_origin_is_skipped() {
        let config = ReceiverConfig {
            cors_origins: vec![
                "http://bad\norigin".to_string(),
                "http://localhost:3000".to_string(),
            ],
            ..ReceiverConfig::default()
        };
        let response = create_router(Arc::new(InboundStore::unbounded()), &config)
            .oneshot(
                Request::get("/health")
                    .header("origin", "http://localhost:3000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "http://localhost:3000"
        );
    }

    #[tokio::test]
    async fn test_send_image_success() {
        let store = Arc::new(InboundStore::unbounded());
        let data = codec::to_transport_text(&png_bytes(&solid_rgb(2, 2, [255, 0, 0])));
        let body = serde_json::json!({ "image_data": data, "layer_name": "test" }).to_string();

        let (status, json) = post_json(router(store.clone()), body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "success");
        assert_eq!(json["image_id"], 1);

        let latest = store.latest().unwrap();
        assert_eq!(latest.label, "test");
        assert_eq!(latest.image.width(), 2);
    }

    #[tokio::test]
    async fn test_default_layer_name() {
        let store = Arc::new(InboundStore::unbounded());
        let data = codec::to_transport_text(&png_bytes(&solid_rgb(1, 1, [0, 0, 0])));
        let body = serde_json::json!({ "image_data": data }).to_string();

        let (status, _) = post_json(router(store.clone()), body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(store.latest().unwrap().label, DEFAULT_LAYER_NAME);
    }

    #[tokio::test]
    async fn test_missing_image_data() {
        let store = Arc::new(InboundStore::unbounded());
        let body = serde_json::json!({ "layer_name": "test" }).to_string();

        let (status, json) = post_json(router(store.clone()), body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["status"], "error");
        assert_eq!(json["message"], "No image data provided");
        assert_eq!(store.count(), 0);
    }

    #[tokio::test]
    async fn test_empty_image_data() {
        let store = Arc::new(InboundStore::unbounded());
        let body = serde_json::json!({ "image_data": "" }).to_string();

        let (status, _) = post_json(router(store.clone()), body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(store.count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_json_body() {
        let store = Arc::new(InboundStore::unbounded());
        let (status, json) = post_json(router(store.clone()), "{not json".to_string()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["status"], "error");
        assert_eq!(store.count(), 0);
    }

    #[tokio::test]
    async fn test_undecodable_image() {
        let store = Arc::new(InboundStore::unbounded());
        let data = codec::to_transport_text(b"this is not a png");
        let body = serde_json::json!({ "image_data": data }).to_string();

        let (status, json) = post_json(router(store.clone()), body).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["status"], "error");
        assert!(json["message"].as_str().unwrap().contains("decode"));
        assert_eq!(store.count(), 0);
    }

    #[tokio::test]
    async fn test_status_and_images() {
        let store = Arc::new(InboundStore::unbounded());
        store.insert(solid_rgb(4, 3, [0, 0, 0]), "bg");

        let response = router(store.clone())
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let status: StatusResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(status.status, "running");
        assert_eq!(status.received_images_count, 1);

        let response = router(store)
            .oneshot(Request::get("/images").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["images"][0]["image_id"], 1);
        assert_eq!(json["images"][0]["size"], "4x3");
        assert_eq!(json["images"][0]["mode"], "RGB");
    }
}
