//! WebSocket transport.
//!
//! Client -> Server (JSON):
//! ```json
//! {"type": "send_direct", "to": "<user id>", "text": "hi"}
//! {"type": "mark_read", "message_id": "<message id>"}
//! ```
//!
//! Server -> Client (JSON):
//! ```json
//! {"type": "new_message", "message": {...}}
//! {"type": "presence_changed", "online": ["<user id>", ...]}
//! {"type": "error", "code": "permission_denied", "message": "..."}
//! ```
//!
//! Every inbound frame gets exactly one reply (`message_sent`, `ack`,
//! `message_deleted_for_all` or `error`), queued behind any pushes already
//! waiting for that connection. Pushes to a full queue are dropped; replies
//! wait for room.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use parley_shared::protocol::{ClientEvent, ServerEvent};
use parley_shared::UserId;
use parley_store::ChatStore;

use crate::api::AppState;
use crate::error::ServerError;
use crate::hub::ChatHub;
use crate::presence::Connection;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    user_id: UserId,
}

/// Upgrade handler for `GET /ws?user_id=<id>`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Result<Response, ServerError> {
    let limit = state.config.max_connections;
    if limit > 0 && state.hub.presence().len().await >= limit {
        warn!(limit, "Connection limit reached, refusing upgrade");
        return Err(ServerError::InvalidState("connection limit reached".into()));
    }
    if !state.hub.user_exists(params.user_id).await? {
        return Err(ServerError::NotFound(format!("user {}", params.user_id)));
    }

    let user = params.user_id;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user)))
}

/// Drive one connection until the client goes away.
///
/// A sender task drains the connection's outbound queue into the socket
/// while this task reads frames and dispatches them one at a time.
async fn handle_socket(socket: WebSocket, state: AppState, user: UserId) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (conn, mut rx) = Connection::open(user, state.config.outbound_queue);

    if let Err(e) = state.hub.on_connect(conn.clone()).await {
        warn!(user = %user, error = %e, "Connect rejected");
        return;
    }
    info!(user = %user, conn = %conn.id, "WebSocket connected");

    let sender_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let frame = match event.to_json() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "Failed to encode outbound event");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_receiver.next().await {
        match msg {
            Message::Text(text) => {
                let reply = reply_to_frame(&state.hub, &conn, &text).await;
                if !conn.reply(reply).await {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {} // Binary is not part of the protocol; pings are answered by axum.
        }
    }

    state.hub.on_disconnect(&conn).await;
    sender_task.abort();
    info!(
        user = %user,
        conn = %conn.id,
        secs = (Utc::now() - conn.opened_at).num_seconds(),
        "WebSocket disconnected"
    );
}

async fn reply_to_frame<S: ChatStore>(
    hub: &ChatHub<S>,
    conn: &Connection,
    frame: &str,
) -> ServerEvent {
    match ClientEvent::from_json(frame) {
        Ok(event) => hub.dispatch(conn, event).await,
        Err(e) => {
            debug!(user = %conn.user_id, error = %e, "Malformed frame");
            ServerError::BadRequest(e.to_string()).to_event()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::http::Uri;
    use parley_shared::protocol::ErrorCode;
    use parley_store::SqliteStore;

    #[test]
    fn params_from_query_string() {
        let user = UserId::new();
        let uri: Uri = format!("/ws?user_id={user}").parse().unwrap();
        let Query(params) = Query::<WsParams>::try_from_uri(&uri).unwrap();
        assert_eq!(params.user_id, user);

        let bad: Uri = "/ws?user_id=nope".parse().unwrap();
        assert!(Query::<WsParams>::try_from_uri(&bad).is_err());
    }

    #[tokio::test]
    async fn frames_are_dispatched_or_rejected() {
        let hub = ChatHub::new(Arc::new(SqliteStore::open_in_memory().unwrap()));
        let a = hub.create_user("a").await.unwrap().id;
        let b = hub.create_user("b").await.unwrap().id;
        let (conn, _rx) = Connection::open(a, 8);
        hub.on_connect(conn.clone()).await.unwrap();

        let frame = format!(r#"{{"type":"send_direct","to":"{b}","text":"hi"}}"#);
        assert!(matches!(
            reply_to_frame(&hub, &conn, &frame).await,
            ServerEvent::MessageSent { .. }
        ));

        for junk in ["", "{}", r#"{"type":"shout"}"#] {
            match reply_to_frame(&hub, &conn, junk).await {
                ServerEvent::Error { code, .. } => assert_eq!(code, ErrorCode::BadRequest),
                other => panic!("unexpected reply to {junk:?}: {other:?}"),
            }
        }
    }
}
