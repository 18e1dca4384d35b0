use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};

use tandem_types::events::{GatewayCommand, GatewayEvent};

use crate::coordinator::Coordinator;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle one WebSocket connection for its whole life: accepted pending,
/// authenticated in-band via the `authenticate` action, closed on socket
/// drop or heartbeat timeout.
pub async fn handle_socket(socket: WebSocket, coordinator: Arc<Coordinator>) {
    let (conn_id, mut outbound_rx) = coordinator.registry().register().await;
    let (mut sender, mut receiver) = socket.split();

    info!("connection {conn_id} accepted (pending authentication)");

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward coordinator-pushed events to the client, with heartbeat.
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = outbound_rx.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            error!("event serialization failed: {e}");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("heartbeat timeout on {conn_id} (missed {missed_heartbeats} pongs), dropping");
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read client actions and hand each to the coordinator as one unit of
    // work; failures surface as an `error` event on this connection only.
    let recv_coordinator = coordinator.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        if let Err(e) = recv_coordinator.handle_command(conn_id, cmd).await {
                            debug!("command on {conn_id} failed: {e}");
                            recv_coordinator
                                .registry()
                                .push(
                                    conn_id,
                                    GatewayEvent::Error {
                                        error: e.code().to_string(),
                                    },
                                )
                                .await;
                        }
                    }
                    Err(e) => {
                        let preview: String = text.chars().take(200).collect();
                        warn!("{conn_id} bad action: {e} -- raw: {preview}");
                        recv_coordinator
                            .registry()
                            .push(
                                conn_id,
                                GatewayEvent::Error {
                                    error: "invalid_request".to_string(),
                                },
                            )
                            .await;
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    coordinator.disconnect(conn_id).await;
    info!("connection {conn_id} closed");
}
