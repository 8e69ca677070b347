//! WebSocket upgrade handler.

use std::future::ready;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{info, warn};

use channelhub_core::error::AppError;
use channelhub_realtime::{ClientIdentity, Frame, HubError, TransportError};

use crate::error::ApiError;
use crate::state::AppState;

/// Query parameters identifying the connecting client.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// User identity; connections of one user share a session.
    pub user: String,
    /// Transport session id.
    #[serde(default)]
    pub session: String,
    /// Group used for group-scoped channel rights.
    #[serde(default)]
    pub group: String,
}

/// GET /ws?user={id}&session={sid}&group={group}: WebSocket upgrade
pub async fn ws_upgrade(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
) -> Result<Response, ApiError> {
    if query.user.trim().is_empty() {
        return Err(AppError::validation("user must be provided").into());
    }
    if !state.hub.is_running() {
        return Err(HubError::NotRunning.into());
    }

    let identity = ClientIdentity::new(query.user)
        .with_session(query.session)
        .with_group(query.group);

    Ok(ws.on_upgrade(move |socket| handle_ws_connection(state, identity, socket)))
}

/// Hands an established WebSocket to the hub.
async fn handle_ws_connection(state: AppState, identity: ClientIdentity, socket: WebSocket) {
    let user_id = identity.user_id.clone();
    let (ws_tx, ws_rx) = socket.split();

    let stream = ws_rx.filter_map(|result| ready(inbound_frame(result)));
    let sink = ws_tx
        .sink_map_err(|e| TransportError::new(e.to_string()))
        .with(|frame: Frame| ready(Ok::<_, TransportError>(outbound_message(frame))));

    match state.hub.new_client(identity, stream, sink).await {
        Ok(conn) => info!(
            conn_id = %conn.id(),
            user_id = %user_id,
            "WebSocket connection established"
        ),
        Err(e) => warn!(user_id = %user_id, error = %e, "WebSocket connection rejected"),
    }
}

fn inbound_frame(result: Result<Message, axum::Error>) -> Option<Result<Frame, TransportError>> {
    match result {
        Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
        Ok(Message::Ping(data)) => Some(Ok(Frame::Ping(data.to_vec()))),
        Ok(Message::Pong(data)) => Some(Ok(Frame::Pong(data.to_vec()))),
        Ok(Message::Close(_)) => Some(Ok(Frame::Close)),
        Ok(Message::Binary(_)) => None,
        Err(e) => Some(Err(TransportError::new(e.to_string()))),
    }
}

fn outbound_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Ping(data) => Message::Ping(data.into()),
        Frame::Pong(data) => Message::Pong(data.into()),
        Frame::Close => Message::Close(None),
    }
}
