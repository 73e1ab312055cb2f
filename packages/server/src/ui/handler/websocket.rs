//! WebSocket connection handlers.

use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc;

use crate::{domain::ConnectionId, ui::state::AppState, usecase::Session};

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Spawns a task that receives messages from the rx channel and pushes them to the WebSocket sender.
///
/// The loop ends when the channel is closed, i.e. when the connection is
/// unregistered from the MessagePusher (session replaced, expired or evicted).
/// A close frame is sent in that case so the server closes the connection.
///
/// # Arguments
///
/// * `rx` - Channel receiver for events addressed to this connection
/// * `sender` - WebSocket sink to send messages to this client
///
/// # Returns
///
/// A `JoinHandle` for the spawned task
fn pusher_loop(
    mut rx: mpsc::UnboundedReceiver<String>,
    mut sender: futures_util::stream::SplitSink<WebSocket, Message>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg.into())).await.is_err() {
                return;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    })
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id = ConnectionId::generate();
    let shutdown = state.coordinator.shutdown_token();

    // Create a channel for this connection to receive events
    let (tx, rx) = mpsc::unbounded_channel();
    state
        .message_pusher
        .register_client(connection_id, tx)
        .await;
    tracing::info!("Connection {} opened", connection_id);

    let (sender, mut receiver) = socket.split();
    let mut send_task = pusher_loop(rx, sender);
    let mut session = Session::new(connection_id);

    // 受信イベントは到着順に 1 つずつ処理する
    // 送信側の終了（置き換え・期限切れ）を受信済みフレームより優先する
    loop {
        tokio::select! {
            biased;
            _ = &mut send_task => {
                tracing::debug!("Outbound channel of connection {} closed", connection_id);
                break;
            }
            _ = shutdown.cancelled() => break,
            msg = receiver.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        tracing::warn!("WebSocket error on connection {}: {}", connection_id, e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => {
                        tracing::trace!("Received text on {}: {}", connection_id, text.as_str());
                        state
                            .dispatcher
                            .handle_text(&mut session, text.as_str())
                            .await;
                    }
                    Message::Ping(_) => {
                        // Ping/pong is handled automatically by the WebSocket protocol
                        tracing::trace!("Received ping on {}", connection_id);
                    }
                    Message::Close(_) => {
                        tracing::info!("Connection {} requested close", connection_id);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    // 処理中の操作が終わってから切断処理を行う（disconnect は冪等）
    state.dispatcher.handle_disconnect(&session).await;
    send_task.abort();
    tracing::info!(
        "Connection {} closed (user: {:?})",
        connection_id,
        session.user_id.map(|id| id.value())
    );
}
