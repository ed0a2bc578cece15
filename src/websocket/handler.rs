//! WebSocket Handler
//!
//! Handles WebSocket upgrade requests and manages the connection lifecycle.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::messages::ClientFrame;
use crate::api::AppState;
use crate::hub::{Hub, Outbound};

/// WebSocket upgrade handler
///
/// This is the entry point for observer connections.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    let hub = Arc::clone(&state.hub);
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, hub: Arc<Hub>) {
    let (mut sender, mut receiver) = socket.split();

    // Channel feeding this connection's writer
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

    let connection_id = match hub.register(tx).await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(error = %e, "Rejecting observer connection");
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    let conn_id_for_send = connection_id.clone();

    // Task to forward queued frames to the WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Frame(text) => {
                    if sender.send(Message::Text(text.to_string())).await.is_err() {
                        tracing::debug!(
                            connection_id = %conn_id_for_send,
                            "WebSocket send failed, closing connection"
                        );
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let hub_for_recv = Arc::clone(&hub);
    let conn_id_for_recv = connection_id.clone();

    // Task to receive frames from the WebSocket and handle them
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(msg) => {
                    if !handle_ws_message(&hub_for_recv, &conn_id_for_recv, msg).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        connection_id = %conn_id_for_recv,
                        error = %e,
                        "WebSocket receive error"
                    );
                    break;
                }
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }

    hub.unregister(&connection_id).await;
}

/// Handle a received WebSocket message
///
/// Returns false if the connection should be closed.
async fn handle_ws_message(hub: &Arc<Hub>, connection_id: &str, message: Message) -> bool {
    match message {
        Message::Text(text) => {
            match ClientFrame::parse(&text) {
                Ok(frame) => handle_client_frame(hub, connection_id, frame).await,
                Err(e) => {
                    // Malformed frames are dropped; the connection stays open
                    tracing::debug!(
                        connection_id = %connection_id,
                        error = %e,
                        "Invalid client frame"
                    );
                }
            }
            true
        }
        Message::Binary(_) => {
            tracing::debug!(connection_id = %connection_id, "Ignoring binary frame");
            true
        }
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            tracing::debug!(connection_id = %connection_id, "Client requested close");
            false
        }
    }
}

/// Handle a parsed client frame
pub(crate) async fn handle_client_frame(hub: &Arc<Hub>, connection_id: &str, frame: ClientFrame) {
    match frame {
        ClientFrame::Subscribe {
            topic_name,
            max_update_rate,
        } => {
            match hub
                .set_interest(connection_id, &topic_name, max_update_rate)
                .await
            {
                Ok(_) => {
                    hub.reconcile().await;
                }
                Err(e) => {
                    tracing::warn!(
                        connection_id = %connection_id,
                        topic = %topic_name,
                        error = %e,
                        "Subscribe error"
                    );
                }
            }
        }
        ClientFrame::Unsubscribe { topic_name } => {
            if hub.clear_interest(connection_id, &topic_name).await {
                hub.reconcile().await;
            }
        }
        ClientFrame::Pong { seq } => {
            hub.handle_pong(connection_id, seq).await;
        }
        ClientFrame::Publish {
            topic_name,
            topic_type,
            message,
        } => {
            if let Err(e) = hub.publish(&topic_name, &topic_type, &message).await {
                tracing::warn!(
                    connection_id = %connection_id,
                    topic = %topic_name,
                    type_id = %topic_type,
                    error = %e,
                    "Publish failed"
                );
            }
        }
    }
}
