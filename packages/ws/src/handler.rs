//! WebSocket session handler.
//!
//! This module implements the established-session message loop for one client
//! connection. It registers the connection with the [`server::WsServer`]
//! actor, relays queued outbound messages onto the socket one at a time (in
//! queue order), dispatches inbound frames to the routing commands, maintains
//! connection health via heartbeats, and deregisters on the way out.
//!
//! [`server::WsServer`]: crate::server::WsServer

use std::time::{Duration, Instant};

use actix_ws::Message;
use futures_util::{
    future::{select, Either},
    StreamExt as _,
};
use tokio::{pin, sync::mpsc, time::interval};

use crate::models::InboundPayload;
use crate::server::WsServerHandle;
use crate::ConnId;

/// How often heartbeat pings are sent
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// How long before lack of client response causes a timeout
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle the lifecycle of one established WebSocket connection.
///
/// Runs until the client closes, the stream errors, the heartbeat times out,
/// or the registry drops this connection's queue (slow-consumer overflow).
/// Deregistration happens exactly once, after the loop exits.
pub async fn session_ws(
    ws_server: WsServerHandle,
    mut session: actix_ws::Session,
    mut msg_stream: actix_ws::MessageStream,
    queue_capacity: usize,
) {
    log::debug!("Connected");

    let mut last_heartbeat = Instant::now();
    let mut interval = interval(HEARTBEAT_INTERVAL);

    let (conn_tx, mut conn_rx) = mpsc::channel(queue_capacity);

    let conn_id = ws_server.connect(conn_tx).await;

    log::debug!("Connection id: {conn_id}");

    let close_reason = loop {
        // most of the futures we process need to be stack-pinned to work with select()

        let tick = interval.tick();
        pin!(tick);

        let msg_rx = conn_rx.recv();
        pin!(msg_rx);

        let messages = select(msg_stream.next(), msg_rx);
        pin!(messages);

        match select(messages, tick).await {
            // commands & messages received from client
            Either::Left((Either::Left((Some(Ok(msg)), _)), _)) => match msg {
                Message::Ping(bytes) => {
                    last_heartbeat = Instant::now();
                    if session.pong(&bytes).await.is_err() {
                        break None;
                    }
                }

                Message::Pong(_) => {
                    last_heartbeat = Instant::now();
                }

                Message::Text(text) => {
                    last_heartbeat = Instant::now();
                    dispatch(&ws_server, &conn_id, text.as_ref());
                }

                Message::Binary(_) => {
                    last_heartbeat = Instant::now();
                    log::debug!("Ignoring binary frame from {conn_id}");
                }

                Message::Close(reason) => break reason,

                _ => {
                    break None;
                }
            },

            // client WebSocket stream error
            Either::Left((Either::Left((Some(Err(err)), _)), _)) => {
                log::error!("WebSocket stream error: {err}");
                break None;
            }

            // client WebSocket stream ended
            Either::Left((Either::Left((None, _)), _)) => {
                log::debug!("WebSocket stream ended");
                break None;
            }

            // messages queued for this connection by the registry
            Either::Left((Either::Right((Some(ws_msg), _)), _)) => {
                if let Err(err) = session.text(ws_msg).await {
                    log::error!("Failed to send text message to {conn_id}: {err:?}");
                    break None;
                }
            }

            // the registry dropped this connection's queue; it has already
            // been deregistered (e.g. as a slow consumer)
            Either::Left((Either::Right((None, _)), _)) => {
                log::info!("Outbound queue for {conn_id} was dropped by the server");
                break None;
            }

            // heartbeat interval tick
            Either::Right((_inst, _)) => {
                // if no heartbeat ping/pong received recently, close the connection
                if Instant::now().duration_since(last_heartbeat) > CLIENT_TIMEOUT {
                    log::info!(
                        "client has not sent heartbeat in over {CLIENT_TIMEOUT:?}; disconnecting"
                    );
                    break None;
                }

                // send heartbeat ping
                let _ = session.ping(b"").await;
            }
        }
    };

    log::debug!("session_ws: disconnecting connection");
    ws_server.disconnect(conn_id);

    // attempt to close connection gracefully
    log::debug!("session_ws: closing connection");
    let _ = session.close(close_reason).await;
}

/// Parse one inbound text frame and hand it to the registry.
///
/// Unparseable input is logged and ignored; it never tears down the
/// connection.
fn dispatch(ws_server: &WsServerHandle, conn_id: &ConnId, text: &str) {
    match serde_json::from_str::<InboundPayload>(text) {
        Ok(InboundPayload::JoinGroup(payload)) => {
            ws_server.join_group(conn_id.clone(), payload.group);
        }
        Ok(InboundPayload::LeaveGroup(payload)) => {
            ws_server.leave_group(conn_id.clone(), payload.group);
        }
        Ok(InboundPayload::SendGroup(payload)) => {
            ws_server.send_to_group(payload.group, conn_id.clone(), payload.message);
        }
        Ok(InboundPayload::SendTo(payload)) => {
            ws_server.send_to_connection(conn_id.clone(), payload.connection_id, payload.message);
        }
        Ok(InboundPayload::Broadcast(payload)) => {
            ws_server.broadcast_all(payload.message);
        }
        Err(err) => {
            log::error!("Invalid message from {conn_id}: {err:?}");
        }
    }
}
