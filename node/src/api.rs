//! RPC server for an RVR node
//!
//! Every operation is `POST /rpc/<method>` with a JSON body and an `ApiResponse`
//! envelope in return.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rvr_consensus::clock::wait_for_exit;
use rvr_consensus::SetupParams;
use rvr_core::RvrError;
use rvr_p2p::Message;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::runtime::NodeRuntime;

/// API state containing node runtime
pub type ApiState = Arc<NodeRuntime>;

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: impl ToString) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }
}

/// Ping report request
#[derive(Debug, Deserialize)]
pub struct PingRequest {
    #[serde(default = "default_probe_size")]
    pub size: usize,
}

fn default_probe_size() -> usize {
    rvr_consensus::monitor::PROBE_SIZE
}

/// Ping report: round trip per roster member in microseconds, `null` on failure
#[derive(Debug, Serialize, Deserialize)]
pub struct PingReportResponse {
    pub rtt_micros: Vec<Option<u64>>,
}

fn status_for(err: &RvrError) -> StatusCode {
    match err {
        RvrError::AlreadyStarted => StatusCode::CONFLICT,
        RvrError::Exited => StatusCode::GONE,
        e if e.is_rejection() => StatusCode::FORBIDDEN,
        RvrError::ConfigError(_) | RvrError::DuplicateId(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reply(result: Result<(), RvrError>) -> (StatusCode, Json<ApiResponse<()>>) {
    match result {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::ok(()))),
        Err(e) => (status_for(&e), Json(ApiResponse::err(e))),
    }
}

/// Create API router
pub fn create_router(state: ApiState) -> Router {
    let enable_cors = state.config().rpc.enable_cors;

    let router = Router::new()
        .route("/health", get(health))
        .route("/identity", get(identity))
        .route("/rpc/setup", post(setup))
        .route("/rpc/start", post(start))
        .route("/rpc/set_view", post(set_view))
        .route("/rpc/send_in_msg", post(send_in_msg))
        .route("/rpc/retrieve_state", post(retrieve_state).get(retrieve_state))
        .route("/rpc/exit", post(exit))
        .route("/rpc/black_hole", post(black_hole))
        .route("/rpc/ping_report", post(ping_report))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    if enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        router.layer(cors)
    } else {
        router
    }
}

/// Health check
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn identity(State(runtime): State<ApiState>) -> impl IntoResponse {
    Json(ApiResponse::ok(runtime.identity().clone()))
}

async fn setup(State(runtime): State<ApiState>, Json(params): Json<SetupParams>) -> impl IntoResponse {
    reply(runtime.setup(params))
}

async fn start(State(runtime): State<ApiState>) -> impl IntoResponse {
    reply(runtime.start())
}

async fn set_view(State(runtime): State<ApiState>, Json(view): Json<Vec<u64>>) -> impl IntoResponse {
    runtime.set_view(view);
    reply(Ok(()))
}

async fn send_in_msg(State(runtime): State<ApiState>, Json(msg): Json<Message>) -> impl IntoResponse {
    let kind = msg.kind;
    let result = runtime.send_in_msg(msg);
    if let Err(e) = &result {
        debug!("Rejected inbound {}: {}", kind, e);
    }
    reply(result)
}

async fn retrieve_state(State(runtime): State<ApiState>) -> impl IntoResponse {
    Json(ApiResponse::ok(runtime.retrieve_state()))
}

async fn exit(State(runtime): State<ApiState>) -> impl IntoResponse {
    runtime.exit();
    reply(Ok(()))
}

async fn black_hole(State(runtime): State<ApiState>, body: Bytes) -> impl IntoResponse {
    runtime.black_hole(&body);
    reply(Ok(()))
}

async fn ping_report(State(runtime): State<ApiState>, Json(req): Json<PingRequest>) -> impl IntoResponse {
    let report = runtime.ping_report(req.size).await;
    let rtt_micros = report
        .into_iter()
        .map(|rtt| rtt.map(|d| d.as_micros() as u64))
        .collect();
    Json(ApiResponse::ok(PingReportResponse { rtt_micros }))
}

/// Serve the RPC API until the node exits
pub async fn start_api_server(runtime: Arc<NodeRuntime>, listen_addr: &str) -> anyhow::Result<()> {
    let mut exit = runtime.state().exit_receiver();
    let router = create_router(runtime);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!("RPC server listening on {}", listen_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { wait_for_exit(&mut exit).await })
        .await?;

    info!("RPC server on {} stopped", listen_addr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use rvr_core::NodeConfig;
    use rvr_crypto::keys::KeyPair;
    use rvr_p2p::{MemoryTransport, MessageKind};
    use tower::ServiceExt;

    fn test_runtime() -> ApiState {
        let mut config = NodeConfig::default();
        config.protocol.monitor_interval = None;
        Arc::new(NodeRuntime::new(
            config,
            KeyPair::generate(),
            Arc::new(MemoryTransport::new()),
        ))
    }

    fn post_json(uri: &str, body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    async fn read_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = create_router(test_runtime())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_setup_and_retrieve_state() {
        let runtime = test_runtime();
        let params = SetupParams::new(&runtime.config().protocol, vec![runtime.identity().clone()]);

        let response = create_router(runtime.clone())
            .oneshot(post_json("/rpc/setup", serde_json::to_string(&params).unwrap()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = create_router(runtime.clone())
            .oneshot(post_json("/rpc/set_view", "[5, 3]".into()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = create_router(runtime)
            .oneshot(post_json("/rpc/retrieve_state", String::new()))
            .await
            .unwrap();
        let body = read_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["view"], serde_json::json!([3, 5]));
        assert_eq!(body["data"]["init_view_size"], 1);
    }

    #[tokio::test]
    async fn test_rejected_message_reports_error() {
        let runtime = test_runtime();
        runtime
            .setup_with_roster(vec![runtime.identity().clone()])
            .unwrap();

        let outsider = KeyPair::generate();
        let msg = Message::new(MessageKind::ElectionChallenge, 0, outsider.identity("x"))
            .signed(&outsider);
        let response = create_router(runtime)
            .oneshot(post_json("/rpc/send_in_msg", serde_json::to_string(&msg).unwrap()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = read_json(response).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("not in the init view"));
    }

    #[tokio::test]
    async fn test_black_hole_accepts_raw_bytes() {
        let response = create_router(test_runtime())
            .oneshot(
                Request::post("/rpc/black_hole")
                    .body(Body::from(vec![0u8; 2000]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
