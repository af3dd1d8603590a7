use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use piggies_types::events::GatewayEvent;

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Drive one authenticated WebSocket until it closes. The token was checked
/// at the HTTP upgrade. `presence` is called with `true` when this is the
/// user's first live connection and with `false` when their last one ends.
pub async fn handle_connection<F>(
    socket: WebSocket,
    dispatcher: Dispatcher,
    user_id: Uuid,
    presence: F,
) where
    F: Fn(bool) + Send + Sync + 'static,
{
    let (mut sender, receiver) = socket.split();

    if !send_event(&mut sender, &GatewayEvent::Ready { user_id }).await {
        return;
    }

    let (conn_id, user_rx, first) = dispatcher.register(user_id).await;
    info!("{} connected to gateway (conn {})", user_id, conn_id);
    if first {
        presence(true);
    }

    run_connection_loop(sender, receiver, user_rx, user_id).await;

    if dispatcher.unregister(user_id, conn_id).await {
        presence(false);
    }
    info!("{} disconnected from gateway (conn {})", user_id, conn_id);
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut user_rx: tokio::sync::mpsc::UnboundedReceiver<GatewayEvent>,
    user_id: Uuid,
) {
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Targeted events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = user_rx.recv() => {
                    let Some(event) = result else { break };
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!(
                                "Heartbeat timeout (missed {} pongs), dropping connection",
                                missed_heartbeats
                            );
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // The channel is server-push only; client frames just keep it alive
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Pong(_) => pong_flag_recv.store(true, Ordering::Release),
                Message::Close(_) => break,
                Message::Text(text) => {
                    trace!("{} sent ignored text frame ({} bytes)", user_id, text.len());
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &GatewayEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            debug!("Failed to encode gateway event: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}
