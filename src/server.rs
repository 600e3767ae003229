//! HTTP transport: direct methods and twin patches over axum.
//!
//! This is the device's stand-in for the cloud broker connection. It never
//! touches the strip itself. Methods and desired patches are turned into
//! [`SyncEvent`]s for the sync thread; reads come from the shared twin and
//! the status the sync thread publishes.
//!
//! ## Rust concepts
//! - axum extractors: `State`, `Path`, `Json`, `Bytes`
//! - `tokio::sync::oneshot` to await a reply from a `std::thread`
//! - `from_fn_with_state` middleware for the device-key check
//! - `tower-http` middleware for tracing and CORS

use crate::DeviceIdentity;
use crate::sync::{CommandResult, SyncEvent, SyncStatus};
use crate::twin::{Patch, TwinDocument, TwinStore};
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, patch, post};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Header carrying the device's shared access key.
pub const DEVICE_KEY_HEADER: &str = "x-device-key";

// ── App State ────────────────────────────────────────────────────────

/// Shared application state, passed to every handler via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// Channel to the sync thread
    pub events: Sender<SyncEvent>,
    /// Handle to the shared twin document
    pub twin: TwinStore,
    /// Status published by the sync thread
    pub status: Arc<Mutex<SyncStatus>>,
    /// Device identity and shared key
    pub identity: Arc<DeviceIdentity>,
}

// ── OpenAPI Documentation ────────────────────────────────────────────

#[derive(OpenApi)]
#[openapi(
    paths(get_status, get_twin, patch_desired, post_method),
    components(schemas(SyncStatus, crate::sync::SyncState, MethodResponse, DesiredAccepted)),
    tags(
        (name = "methods", description = "Direct methods (On, Off)"),
        (name = "twin", description = "Device twin properties"),
        (name = "system", description = "System status endpoints"),
    ),
    info(
        title = "LED Strip Twin API",
        version = env!("CARGO_PKG_VERSION"),
        description = "Direct methods and device twin for a NeoPixel strip"
    )
)]
pub struct ApiDoc;

// ── Request/Response types ───────────────────────────────────────────

/// Body of every direct-method response.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct MethodResponse {
    /// true if the method was handled
    pub result: bool,
    /// What happened
    #[schema(example = "Color set to 00FF00")]
    pub message: String,
}

/// Acknowledgement of a desired-property patch.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct DesiredAccepted {
    /// New `$version` of the desired section
    pub version: u64,
}

// ── Router ───────────────────────────────────────────────────────────

/// Build the axum router with all API endpoints.
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/twin", get(get_twin))
        .route("/api/v1/twin/desired", patch(patch_desired))
        .route("/api/v1/methods/{name}", post(post_method))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_device_key,
        ));

    Router::new()
        .merge(
            SwaggerUi::new("/docs")
                .url("/api-docs/openapi.json", ApiDoc::openapi())
                .config(
                    utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
                        .validator_url("none"),
                ),
        )
        .merge(api)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn require_device_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(DEVICE_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    if !state.identity.authorizes(presented) {
        tracing::warn!("Rejected request to {} without a valid device key", request.uri());
        return (StatusCode::UNAUTHORIZED, "Missing or wrong device key").into_response();
    }
    next.run(request).await
}

// ── Handlers ─────────────────────────────────────────────────────────

/// GET /api/v1/status — current color and sync state
#[utoipa::path(
    get,
    path = "/api/v1/status",
    tag = "system",
    responses(
        (status = 200, description = "Current sync status", body = SyncStatus)
    )
)]
async fn get_status(State(state): State<AppState>) -> Json<SyncStatus> {
    let status = state
        .status
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone();
    Json(status)
}

/// GET /api/v1/twin — full twin document
#[utoipa::path(
    get,
    path = "/api/v1/twin",
    tag = "twin",
    responses(
        (status = 200, description = "Twin document with desired and reported sections")
    )
)]
async fn get_twin(State(state): State<AppState>) -> Json<TwinDocument> {
    Json(state.twin.document())
}

/// PATCH /api/v1/twin/desired — merge desired properties
///
/// The patch is recorded in the twin and queued for the sync thread. There
/// is no way to report whether the device managed to apply it; read the
/// reported section afterwards.
#[utoipa::path(
    patch,
    path = "/api/v1/twin/desired",
    tag = "twin",
    request_body(content = Object, description = "Desired properties, e.g. {\"Color\": \"FF0000\"}"),
    responses(
        (status = 202, description = "Patch accepted", body = DesiredAccepted),
        (status = 502, description = "Twin file could not be written")
    )
)]
async fn patch_desired(
    State(state): State<AppState>,
    Json(body): Json<Map<String, Value>>,
) -> Result<(StatusCode, Json<DesiredAccepted>), (StatusCode, String)> {
    let patch = desired_patch_from_json(body);
    let twin = state.twin.clone();

    // The twin file is written under the twin lock; keep that off the runtime thread.
    let version = tokio::task::spawn_blocking(move || twin.apply_desired(patch))
        .await
        .map_err(|e| {
            tracing::error!("Desired patch task failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Desired patch task failed".to_string(),
            )
        })?
        .map_err(|e| {
            tracing::error!("{}", e);
            (StatusCode::BAD_GATEWAY, e.to_string())
        })?;

    Ok((StatusCode::ACCEPTED, Json(DesiredAccepted { version })))
}

/// POST /api/v1/methods/{name} — invoke a direct method
///
/// The body is the method payload: a JSON string (`"00FF00"`), bare text
/// (`00FF00`), or empty for `Off`. Other JSON values are rejected with 400.
#[utoipa::path(
    post,
    path = "/api/v1/methods/{name}",
    tag = "methods",
    params(("name" = String, Path, description = "Method name: On or Off")),
    request_body(content = String, description = "Color as RRGGBB for On"),
    responses(
        (status = 200, description = "Method handled", body = MethodResponse),
        (status = 400, description = "Payload is not a RRGGBB color string", body = MethodResponse),
        (status = 404, description = "Unknown method", body = MethodResponse),
        (status = 500, description = "Strip write failed", body = MethodResponse),
        (status = 502, description = "Twin update failed", body = MethodResponse)
    )
)]
async fn post_method(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> (StatusCode, Json<MethodResponse>) {
    let payload = match parse_method_payload(&body) {
        Ok(payload) => payload,
        Err(message) => {
            tracing::warn!("Method {} rejected: {}", name, message);
            return (
                StatusCode::BAD_REQUEST,
                Json(MethodResponse {
                    result: false,
                    message,
                }),
            );
        }
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    let event = SyncEvent::Command {
        name,
        payload,
        reply: reply_tx,
    };

    if state.events.send(event).is_err() {
        return sync_gone();
    }
    match reply_rx.await {
        Ok(result) => method_response(&result),
        Err(_) => sync_gone(),
    }
}

// ── Conversions ──────────────────────────────────────────────────────

/// Turn a method request body into the payload handed to the sync thread.
///
/// A JSON string is unwrapped, JSON `null` and an empty body mean "no
/// payload". Anything that is not JSON is taken as bare text. Numbers,
/// booleans, arrays and objects are an error: `123456` would otherwise
/// slip through as a color.
pub fn parse_method_payload(body: &[u8]) -> Result<Option<String>, String> {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    match serde_json::from_str::<Value>(text) {
        Ok(Value::String(s)) => Ok(Some(s)),
        Ok(Value::Null) => Ok(None),
        Ok(other) => Err(format!(
            "Method payload must be a color string, got {}",
            json_kind(&other)
        )),
        Err(_) => Ok(Some(text.to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Flatten a JSON object into a [`Patch`]. Strings are taken as-is, other
/// values as their JSON text; `null` entries are dropped.
pub fn desired_patch_from_json(body: Map<String, Value>) -> Patch {
    body.into_iter()
        .filter_map(|(key, value)| match value {
            Value::Null => None,
            Value::String(s) => Some((key, s)),
            other => Some((key, other.to_string())),
        })
        .collect()
}

/// Method response for a sync result.
pub fn method_response(result: &CommandResult) -> (StatusCode, Json<MethodResponse>) {
    let status =
        StatusCode::from_u16(result.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(MethodResponse {
            result: result.succeeded(),
            message: result.message(),
        }),
    )
}

fn sync_gone() -> (StatusCode, Json<MethodResponse>) {
    tracing::error!("Sync thread gone, cannot run method");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(MethodResponse {
            result: false,
            message: "Sync thread gone".to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;
    use crate::error::{HardwareFault, InvalidColorFormat, SyncError};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(b"\"00FF00\"".as_slice(), Some("00FF00"))]
    #[case(b"00FF00".as_slice(), Some("00FF00"))]
    #[case(b"  00ff00\n".as_slice(), Some("00ff00"))]
    #[case(b"\"123456\"".as_slice(), Some("123456"))]
    #[case(b"".as_slice(), None)]
    #[case(b"null".as_slice(), None)]
    fn method_payload_parsing(#[case] body: &[u8], #[case] expected: Option<&str>) {
        assert_eq!(
            parse_method_payload(body).unwrap().as_deref(),
            expected
        );
    }

    #[rstest]
    #[case(b"123456".as_slice(), "a number")]
    #[case(b"true".as_slice(), "a boolean")]
    #[case(b"[\"FF0000\"]".as_slice(), "an array")]
    #[case(b"{\"color\":\"FF0000\"}".as_slice(), "an object")]
    fn method_payload_rejects_non_string_json(#[case] body: &[u8], #[case] kind: &str) {
        let err = parse_method_payload(body).unwrap_err();
        assert!(err.ends_with(kind), "{err}");
    }

    #[test]
    fn desired_patch_keeps_strings_and_drops_nulls() {
        let body = serde_json::json!({
            "Color": "FF0000",
            "Brightness": 40,
            "Removed": null
        });
        let Value::Object(map) = body else {
            panic!("expected object");
        };

        let patch = desired_patch_from_json(map);

        assert_eq!(patch.len(), 2);
        assert_eq!(patch["Color"], "FF0000");
        assert_eq!(patch["Brightness"], "40");
    }

    #[test]
    fn method_response_for_handled() {
        let (status, Json(body)) = method_response(&CommandResult::Handled {
            color: Color::new(0, 255, 0),
        });
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            MethodResponse {
                result: true,
                message: "Color set to 00FF00".into()
            }
        );
    }

    #[rstest]
    #[case(
        CommandResult::Failed(SyncError::InvalidColor(InvalidColorFormat::NonHexDigit('Z'))),
        StatusCode::BAD_REQUEST
    )]
    #[case(CommandResult::UnknownCommand("Dance".into()), StatusCode::NOT_FOUND)]
    #[case(
        CommandResult::Failed(SyncError::Hardware(HardwareFault("x".into()))),
        StatusCode::INTERNAL_SERVER_ERROR
    )]
    fn method_response_for_failures(#[case] result: CommandResult, #[case] expected: StatusCode) {
        let (status, Json(body)) = method_response(&result);
        assert_eq!(status, expected);
        assert!(!body.result);
    }

    // ── Router ──

    mod router {
        use super::*;
        use pretty_assertions::assert_eq;
        use crate::strip::{SimulatedStrip, StripConfig};
        use crate::sync::{StateSync, sync_loop};
        use crate::twin::{COLOR_KEY, PropertyStore};
        use axum::body::Body;
        use axum::http::{Method, Request};
        use std::sync::mpsc;
        use std::thread::JoinHandle;
        use tower::ServiceExt;

        const KEY: &str = "s3cret";

        struct Device {
            app: Router,
            twin: TwinStore,
            events: Sender<SyncEvent>,
            sync_thread: JoinHandle<()>,
        }

        impl Device {
            /// Router wired to a live sync thread over a simulated strip.
            fn start() -> Self {
                let twin = TwinStore::new();
                let (tx, rx) = mpsc::channel();

                let mut sync_store = twin.clone();
                let patch_tx = tx.clone();
                sync_store.on_desired_patch(Arc::new(move |patch| {
                    let _ = patch_tx.send(SyncEvent::DesiredPatch(patch));
                }));

                let strip = SimulatedStrip::new(StripConfig::new(8, 100, 0));
                let status = Arc::new(Mutex::new(SyncStatus::new("pi-strip", 8)));
                let sync = StateSync::new(strip, sync_store);
                let sync_status = status.clone();
                let sync_thread = std::thread::spawn(move || sync_loop(rx, sync, sync_status));

                let app = create_router(AppState {
                    events: tx.clone(),
                    twin: twin.clone(),
                    status,
                    identity: Arc::new(DeviceIdentity {
                        id_scope: None,
                        device_id: "pi-strip".into(),
                        primary_key: Some(KEY.into()),
                    }),
                });

                Self {
                    app,
                    twin,
                    events: tx,
                    sync_thread,
                }
            }

            async fn send(&self, method: Method, uri: &str, body: &str) -> (StatusCode, Value) {
                let request = Request::builder()
                    .method(method)
                    .uri(uri)
                    .header(DEVICE_KEY_HEADER, KEY)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap();
                read(self.app.clone().oneshot(request).await.unwrap()).await
            }

            fn stop(self) {
                self.events.send(SyncEvent::Shutdown).unwrap();
                self.sync_thread.join().unwrap();
            }
        }

        async fn read(response: Response) -> (StatusCode, Value) {
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, body)
        }

        #[tokio::test]
        async fn request_without_key_is_rejected() {
            let device = Device::start();

            let request = Request::builder()
                .uri("/api/v1/status")
                .body(Body::empty())
                .unwrap();
            let response = device.app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

            let request = Request::builder()
                .method(Method::POST)
                .uri("/api/v1/methods/On")
                .header(DEVICE_KEY_HEADER, "wrong")
                .body(Body::from("\"00FF00\""))
                .unwrap();
            let response = device.app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(device.twin.get(COLOR_KEY).unwrap(), None);

            device.stop();
        }

        #[tokio::test]
        async fn on_then_off_updates_status_and_twin() {
            let device = Device::start();

            let (status, body) = device
                .send(Method::POST, "/api/v1/methods/On", "\"00ff00\"")
                .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["result"], true);
            assert_eq!(body["message"], "Color set to 00FF00");
            assert_eq!(device.twin.get(COLOR_KEY).unwrap().as_deref(), Some("00FF00"));

            let (status, body) = device.send(Method::GET, "/api/v1/status", "").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["color"], "00FF00");

            let (status, _) = device.send(Method::POST, "/api/v1/methods/Off", "").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(device.twin.get(COLOR_KEY).unwrap().as_deref(), Some("000000"));

            device.stop();
        }

        #[tokio::test]
        async fn unknown_method_is_not_found() {
            let device = Device::start();

            let (status, body) = device.send(Method::POST, "/api/v1/methods/Dance", "").await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body["result"], false);
            assert_eq!(body["message"], "Unknown command: Dance");
            assert_eq!(device.twin.get(COLOR_KEY).unwrap(), None);

            device.stop();
        }

        #[tokio::test]
        async fn non_string_payload_is_bad_request() {
            let device = Device::start();

            let (status, body) = device
                .send(Method::POST, "/api/v1/methods/On", "123456")
                .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["result"], false);
            assert_eq!(device.twin.get(COLOR_KEY).unwrap(), None);

            device.stop();
        }

        #[tokio::test]
        async fn desired_patch_is_applied_and_reported() {
            let device = Device::start();

            let (status, body) = device
                .send(Method::PATCH, "/api/v1/twin/desired", r#"{"Color":"ff0000"}"#)
                .await;
            assert_eq!(status, StatusCode::ACCEPTED);
            assert_eq!(body["version"], 1);

            // Events run in order, so once this reply is back the patch has been handled.
            let (status, _) = device.send(Method::POST, "/api/v1/methods/Dance", "").await;
            assert_eq!(status, StatusCode::NOT_FOUND);

            assert_eq!(device.twin.get(COLOR_KEY).unwrap().as_deref(), Some("FF0000"));
            let (status, body) = device.send(Method::GET, "/api/v1/twin", "").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["desired"]["Color"], "ff0000");
            assert_eq!(body["reported"]["Color"], "FF0000");

            device.stop();
        }
    }

    #[test]
    fn method_response_serializes_result_flag() {
        let body = MethodResponse {
            result: true,
            message: "ok".into(),
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"result": true, "message": "ok"})
        );
    }
}
