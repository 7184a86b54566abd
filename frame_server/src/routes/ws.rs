use crate::{inference::InferenceResult, server::SharedState};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::instrument;

const ROUTE: &str = "/ws";

// Protocol ceiling above the configured limit, so a slightly oversize
// message still gets an error reply instead of a dropped connection.
const PROTOCOL_SLACK_BYTES: usize = 1024 * 1024;

#[derive(Debug, Deserialize)]
struct FrameMessage {
    #[serde(default)]
    frame: Option<String>,
}

/// Outbound message: a summary plus the raw result, or an error message.
#[derive(Debug, Serialize)]
pub struct WsReply {
    status: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<InferenceResult>,
}

impl WsReply {
    fn success(result: InferenceResult) -> Self {
        Self {
            status: "success",
            message: result.summary(),
            data: Some(result),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error",
            message: message.into(),
            data: None,
        }
    }
}

#[instrument(skip(ws, state))]
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> Response {
    let protocol_limit = state.max_payload_bytes.saturating_add(PROTOCOL_SLACK_BYTES);

    ws.max_message_size(protocol_limit)
        .max_frame_size(protocol_limit)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: SharedState) {
    tracing::info!("Client connected");
    state.metrics.connection_opened();

    while let Some(message) = socket.recv().await {
        let reply = match message {
            Ok(Message::Text(text)) => handle_message(&state, text.as_str()).await,
            Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => handle_message(&state, text).await,
                Err(_) => WsReply::error("Binary message is not valid UTF-8"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!("WebSocket receive failed: {}", e);
                break;
            }
        };

        let payload = match serde_json::to_string(&reply) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Failed to serialize reply: {}", e);
                continue;
            }
        };

        if let Err(e) = socket.send(Message::Text(payload.into())).await {
            tracing::warn!("WebSocket send failed: {}", e);
            break;
        }
    }

    state.metrics.connection_closed();
    tracing::info!("Client disconnected");
}

/// Handles one inbound message. Every failure becomes an error reply; the
/// connection is never closed because of a bad frame.
pub async fn handle_message(state: &SharedState, text: &str) -> WsReply {
    state.metrics.record_request(ROUTE);

    if text.len() > state.max_payload_bytes {
        state.metrics.record_failure(ROUTE, "ValidationError");
        return WsReply::error(format!(
            "Frame message of {} bytes exceeds the {} byte limit",
            text.len(),
            state.max_payload_bytes
        ));
    }

    let request: FrameMessage = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => {
            state.metrics.record_failure(ROUTE, "ValidationError");
            return WsReply::error(format!("Invalid frame message: {}", e));
        }
    };

    let Some(frame) = request.frame.filter(|frame| !frame.is_empty()) else {
        state.metrics.record_failure(ROUTE, "ValidationError");
        return WsReply::error("No frame data provided");
    };

    let started = Instant::now();
    let outcome = state.pipeline.process(&frame).await;
    state
        .metrics
        .record_inference_duration(started.elapsed().as_millis() as u64, ROUTE);

    match outcome {
        Ok(result) => WsReply::success(result),
        Err(e) => {
            tracing::error!(kind = e.kind(), stage = ?e.stage(), "Error processing frame: {}", e);
            state.metrics.record_failure(ROUTE, e.kind());
            WsReply::error(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::build_router;
    use crate::test_support::{scratch_entries, sh_engine, test_state};
    use base64::{engine::general_purpose::STANDARD, Engine};
    use futures::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use tempfile::tempdir;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::{connect_async, tungstenite, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    const CAT: &str = r#"printf '{"prediction":"cat","confidence":0.92}'"#;

    fn frame_message() -> String {
        json!({ "frame": STANDARD.encode([0xFF, 0xD8, 0xFF, 0xD9]) }).to_string()
    }

    fn to_json(reply: &WsReply) -> Value {
        serde_json::to_value(reply).unwrap()
    }

    async fn serve(router: axum::Router) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await });
        addr
    }

    async fn round_trip(socket: &mut Client, message: String) -> Value {
        socket
            .send(tungstenite::Message::text(message))
            .await
            .unwrap();
        let reply = socket.next().await.unwrap().unwrap();
        serde_json::from_str(reply.to_text().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_success_reply_carries_summary_and_data() {
        let scratch = tempdir().unwrap();
        let state = test_state(sh_engine(CAT), scratch.path(), 1024);

        let reply = to_json(&handle_message(&state, &frame_message()).await);

        assert_eq!(
            reply,
            json!({
                "status": "success",
                "message": "Detected: cat (Confidence: 92.00%)",
                "data": {"prediction": "cat", "confidence": 0.92}
            })
        );
        assert_eq!(scratch_entries(scratch.path()), 0);
    }

    #[tokio::test]
    async fn test_missing_fields_are_reported_as_unknown() {
        let scratch = tempdir().unwrap();
        let state = test_state(sh_engine(r#"printf '{"framework":"none"}'"#), scratch.path(), 1024);

        let reply = to_json(&handle_message(&state, &frame_message()).await);

        assert_eq!(
            reply["message"],
            "Detected: unknown object (Confidence: unknown)"
        );
    }

    #[tokio::test]
    async fn test_failures_become_error_replies() {
        let scratch = tempdir().unwrap();
        let state = test_state(sh_engine("exit 2"), scratch.path(), 1024);

        let reply = to_json(&handle_message(&state, &frame_message()).await);
        assert_eq!(
            reply,
            json!({"status": "error", "message": "Inference process exited with code 2"})
        );

        let reply = to_json(&handle_message(&state, "{\"frame\": 12").await);
        assert_eq!(reply["status"], "error");

        let reply = to_json(&handle_message(&state, "{}").await);
        assert_eq!(reply["message"], "No frame data provided");
        assert_eq!(scratch_entries(scratch.path()), 0);
    }

    #[tokio::test]
    async fn test_connection_survives_a_bad_frame() {
        let scratch = tempdir().unwrap();
        let router = build_router(test_state(sh_engine(CAT), scratch.path(), 1024));
        let addr = serve(router).await;

        let (mut socket, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();

        let reply = round_trip(&mut socket, "not json".to_string()).await;
        assert_eq!(reply["status"], "error");

        let reply = round_trip(&mut socket, frame_message()).await;
        assert_eq!(reply["status"], "success");
        assert_eq!(reply["message"], "Detected: cat (Confidence: 92.00%)");

        socket.close(None).await.unwrap();
        assert_eq!(scratch_entries(scratch.path()), 0);
    }

    #[tokio::test]
    async fn test_oversize_message_gets_error_reply() {
        let scratch = tempdir().unwrap();
        let state = test_state(sh_engine(CAT), scratch.path(), 64);
        let message = json!({ "frame": STANDARD.encode(vec![0u8; 128]) }).to_string();

        let reply = to_json(&handle_message(&state, &message).await);

        assert_eq!(reply["status"], "error");
        assert!(reply["message"]
            .as_str()
            .unwrap()
            .contains("exceeds the 64 byte limit"));
        assert_eq!(scratch_entries(scratch.path()), 0);
    }

    #[tokio::test]
    async fn test_oversize_message_keeps_connection_open() {
        let scratch = tempdir().unwrap();
        let router = build_router(test_state(sh_engine(CAT), scratch.path(), 1024));
        let addr = serve(router).await;

        let (mut socket, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();

        let oversize = json!({ "frame": STANDARD.encode(vec![0u8; 4096]) }).to_string();
        let reply = round_trip(&mut socket, oversize).await;
        assert_eq!(reply["status"], "error");

        let reply = round_trip(&mut socket, frame_message()).await;
        assert_eq!(reply["status"], "success");
    }

    #[tokio::test]
    async fn test_frames_above_default_protocol_frame_size_are_accepted() {
        let scratch = tempdir().unwrap();
        let router = build_router(test_state(
            sh_engine(r#"printf '{"prediction":"large","bytes":%d}' "$(wc -c < "$1")""#),
            scratch.path(),
            50 * 1024 * 1024,
        ));
        let addr = serve(router).await;

        let (mut socket, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();

        // 15 MiB decoded is 20 MiB of base64, above tungstenite's 16 MiB frame default.
        let large = json!({ "frame": STANDARD.encode(vec![0xABu8; 15 * 1024 * 1024]) }).to_string();
        let reply = round_trip(&mut socket, large).await;
        assert_eq!(reply["status"], "success");
        assert_eq!(reply["data"]["bytes"], 15 * 1024 * 1024);

        let reply = round_trip(&mut socket, frame_message()).await;
        assert_eq!(reply["status"], "success");
        assert_eq!(scratch_entries(scratch.path()), 0);
    }

    #[tokio::test]
    async fn test_root_path_serves_websocket() {
        let scratch = tempdir().unwrap();
        let router = build_router(test_state(sh_engine(CAT), scratch.path(), 1024));
        let addr = serve(router).await;

        let (mut socket, _) = connect_async(format!("ws://{}/", addr)).await.unwrap();

        let reply = round_trip(&mut socket, frame_message()).await;
        assert_eq!(reply["status"], "success");
        assert_eq!(reply["message"], "Detected: cat (Confidence: 92.00%)");

        socket.close(None).await.unwrap();
    }
}
