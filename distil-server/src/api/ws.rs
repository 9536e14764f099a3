//! Websocket surface: command envelope decoding and status streaming
//!
//! Commands arrive as `{type, requestId?, session?, payload}` envelopes and
//! are decoded once into typed requests. Status pushes stream every event
//! for the requests a session watches; on subscription the last persisted
//! state is replayed first, so a reconnecting client is always consistent.

use std::collections::HashSet;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use serde::Deserialize;
use tracing::{debug, warn};

use distil_common::events::SolutionStatus;
use distil_common::model::request::Progress;
use distil_common::Error;

use crate::api::AppState;
use crate::compute::{stop_solution_request, SolutionRequest};

const CREATE_SOLUTIONS: &str = "CREATE_SOLUTIONS";
const STOP_SOLUTION: &str = "STOP_SOLUTION";
const GET_SESSION: &str = "GET_SESSION";
const SOLUTION_STATUS: &str = "SOLUTION_STATUS";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "requestId")]
    request_id: Option<String>,
    /// Opaque audit identifier; echoed back, never consulted.
    session: Option<String>,
    payload: Option<serde_json::Value>,
}

/// GET /ws
pub async fn handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(mut socket: WebSocket, state: AppState) {
    let mut bus_rx = state.runtime.engine.bus.subscribe();
    let mut watched: HashSet<String> = HashSet::new();

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if handle_command(&mut socket, &state, &mut watched, &text)
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "websocket receive failed");
                        break;
                    }
                }
            }
            status = bus_rx.recv() => {
                match status {
                    Ok(status) if watched.contains(&status.request_id) => {
                        if send_status(&mut socket, &status).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        // persisted state is authoritative; resync from it
                        warn!(skipped, "websocket session lagged, replaying persisted state");
                        let ids: Vec<String> = watched.iter().cloned().collect();
                        for request_id in ids {
                            if replay_request(&mut socket, &state, &request_id).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

async fn handle_command(
    socket: &mut WebSocket,
    state: &AppState,
    watched: &mut HashSet<String>,
    raw: &str,
) -> Result<(), axum::Error> {
    let envelope: Envelope = match serde_json::from_str(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            return send_json(
                socket,
                &serde_json::json!({ "type": "ERROR", "error": format!("malformed command: {e}") }),
            )
            .await;
        }
    };

    match envelope.kind.as_str() {
        CREATE_SOLUTIONS => {
            let payload = envelope.payload.unwrap_or_default();
            let submitted = match SolutionRequest::from_json(payload) {
                Ok(request) => request.dispatch(state.runtime.engine.clone()).await,
                Err(e) => Err(e),
            };
            match submitted {
                Ok(request_id) => {
                    watched.insert(request_id.clone());
                    send_json(
                        socket,
                        &serde_json::json!({
                            "type": CREATE_SOLUTIONS,
                            "requestId": request_id,
                            "session": envelope.session,
                            "success": true,
                        }),
                    )
                    .await
                }
                Err(e) => {
                    send_json(
                        socket,
                        &serde_json::json!({
                            "type": CREATE_SOLUTIONS,
                            "session": envelope.session,
                            "success": false,
                            "error": e.to_string(),
                        }),
                    )
                    .await
                }
            }
        }
        STOP_SOLUTION => {
            let request_id = envelope
                .request_id
                .or_else(|| {
                    envelope
                        .payload
                        .as_ref()
                        .and_then(|p| p.get("requestId"))
                        .and_then(|v| v.as_str())
                        .map(String::from)
                })
                .unwrap_or_default();
            let stopped = stop_solution_request(&state.runtime.engine, &request_id).await;
            send_json(
                socket,
                &serde_json::json!({
                    "type": STOP_SOLUTION,
                    "requestId": request_id,
                    "success": stopped.is_ok(),
                    "error": stopped.err().map(|e| e.to_string()),
                }),
            )
            .await
        }
        GET_SESSION => {
            let request_ids = state
                .runtime
                .engine
                .solutions
                .fetch_request_ids("")
                .await
                .unwrap_or_default();
            send_json(
                socket,
                &serde_json::json!({
                    "type": GET_SESSION,
                    "session": envelope.session,
                    "requestIds": request_ids.clone(),
                }),
            )
            .await?;
            for request_id in request_ids {
                watched.insert(request_id.clone());
                replay_request(socket, state, &request_id).await?;
            }
            Ok(())
        }
        other => {
            send_json(
                socket,
                &serde_json::json!({
                    "type": "ERROR",
                    "error": format!("unknown command type `{other}`"),
                }),
            )
            .await
        }
    }
}

/// Replays the last persisted state of a request and its solutions as
/// status events; the first thing a late subscriber observes.
async fn replay_request(
    socket: &mut WebSocket,
    state: &AppState,
    request_id: &str,
) -> Result<(), axum::Error> {
    let solutions = &state.runtime.engine.solutions;
    let request = match solutions.fetch_request(request_id).await {
        Ok(Some(request)) => request,
        Ok(None) => return Ok(()),
        Err(e) => {
            warn!(request_id, error = %e, "replay fetch failed");
            return Ok(());
        }
    };

    send_status(socket, &SolutionStatus::request(request_id, request.progress)).await?;

    if let Ok(known) = solutions.fetch_solutions(request_id).await {
        for solution in known {
            let mut status =
                SolutionStatus::solution(request_id, &solution.solution_id, solution.progress);
            if solution.progress == Progress::Completed {
                if let Some(result) = &solution.result {
                    status = status.with_result(&result.result_id);
                }
            }
            send_status(socket, &status).await?;
        }
    }
    Ok(())
}

async fn send_status(socket: &mut WebSocket, status: &SolutionStatus) -> Result<(), axum::Error> {
    let mut value = serde_json::to_value(status)
        .map_err(|e| axum::Error::new(Error::Serde(e)))?;
    if let Some(object) = value.as_object_mut() {
        object.insert("type".into(), serde_json::json!(SOLUTION_STATUS));
    }
    send_json(socket, &value).await
}

async fn send_json(
    socket: &mut WebSocket,
    value: &serde_json::Value,
) -> Result<(), axum::Error> {
    socket.send(Message::Text(value.to_string())).await
}
