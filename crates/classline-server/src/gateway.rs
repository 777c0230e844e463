use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::{
    Extension,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message as WsMessage, WebSocket},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};

use classline_types::events::ChatEvent;
use classline_types::models::Actor;

use crate::AppState;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

pub async fn ws_upgrade(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state, actor))
}

/// Push actor-scoped message events until the client goes away. The
/// actor was already resolved at the HTTP upgrade layer.
async fn handle_connection(socket: WebSocket, state: AppState, actor: Actor) {
    let (mut sender, mut receiver) = socket.split();

    info!("{} connected to gateway", actor.id);

    let ready = ChatEvent::Ready {
        user_id: actor.id,
        role: actor.role,
    };
    let Ok(text) = serde_json::to_string(&ready) else {
        return;
    };
    if sender.send(WsMessage::Text(text.into())).await.is_err() {
        return;
    }

    let mut feed = state.store.subscribe_inserts();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward inserts involving this actor, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = feed.recv() => {
                    let message = match result {
                        Ok(message) => message,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Gateway feed lagged by {} messages", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    let event = ChatEvent::MessageCreate { message };

                    // Only conversations the actor takes part in.
                    if let Some((from, to)) = event.participants() {
                        if from != actor.id && to != actor.id {
                            continue;
                        }
                    }

                    let Ok(text) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if sender.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                WsMessage::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("{} disconnected from gateway", actor.id);
}
