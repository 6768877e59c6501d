// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket server implementation.
//!
//! Each `sync` message runs as its own task so a connection can keep many
//! pages in flight; responses are written back in completion order and
//! matched to requests by id.

use std::collections::HashMap;
use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tl_core::{ClientMessage, ServerMessage};

use crate::state::ServerState;

/// Finished sync tasks waiting to be written, tagged with the request id.
type Outbox = mpsc::UnboundedSender<(u64, ServerMessage)>;

/// Run the WebSocket server on the given address until `state` shuts down.
pub async fn run(addr: SocketAddr, state: ServerState) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on: {}", listener.local_addr()?);
    serve(listener, state)
        .await
        .map_err(|e| e as Box<dyn std::error::Error>)?;
    Ok(())
}

/// Accepts connections on `listener` until `state` shuts down.
pub(crate) async fn serve(
    listener: TcpListener,
    state: ServerState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let scope = state.connection_scope();
    loop {
        let (stream, peer_addr) = tokio::select! {
            _ = scope.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted?,
        };
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer_addr, state).await {
                error!("Connection error from {}: {}", peer_addr, e);
            }
        });
    }
}

/// Handle a single WebSocket connection.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: ServerState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    info!("New WebSocket connection from: {}", peer_addr);

    let (mut ws_sink, mut ws_stream) = ws_stream.split();
    let (outbox, mut finished) = mpsc::unbounded_channel();
    let scope = state.connection_scope();
    // Abandons whatever this client still waits for, however the loop ends.
    let _abandon = scope.clone().drop_guard();
    let mut in_flight: HashMap<u64, CancellationToken> = HashMap::new();

    let result = loop {
        tokio::select! {
            _ = scope.cancelled() => break Ok(()),

            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_client_message(
                            text.as_str(),
                            &state,
                            &scope,
                            &mut in_flight,
                            &outbox,
                        );
                        if let Some(reply) = reply {
                            ws_sink.send(Message::text(reply.to_json()?)).await?;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client {} disconnected", peer_addr);
                        break Ok(());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        ws_sink.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", peer_addr, e);
                        break Ok(());
                    }
                    None => {
                        info!("Client {} stream ended", peer_addr);
                        break Ok(());
                    }
                }
            }

            Some((id, reply)) = finished.recv() => {
                in_flight.remove(&id);
                if let Err(e) = ws_sink.send(Message::text(reply.to_json()?)).await {
                    break Err(e.into());
                }
            }
        }
    };

    info!("Connection closed: {} ({} requests abandoned)", peer_addr, in_flight.len());
    result
}

/// Processes one text frame. Returns a reply to send right away; sync
/// replies arrive later through `outbox`.
fn handle_client_message(
    text: &str,
    state: &ServerState,
    scope: &CancellationToken,
    in_flight: &mut HashMap<u64, CancellationToken>,
    outbox: &Outbox,
) -> Option<ServerMessage> {
    let msg = match ClientMessage::from_json(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!("Malformed message: {}", e);
            return Some(ServerMessage::bad_request(format!("malformed message: {e}")));
        }
    };

    match msg {
        ClientMessage::Sync { id, request } => {
            if in_flight.contains_key(&id) {
                return Some(ServerMessage::bad_request(format!(
                    "request id {id} is already in flight"
                )));
            }
            debug!(
                id,
                operation = %request.operation_id,
                record_type = %request.requested_type,
                page = request.page(),
                "sync request"
            );
            let request_scope = scope.child_token();
            in_flight.insert(id, request_scope.clone());
            let state = state.clone();
            let outbox = outbox.clone();
            tokio::spawn(async move {
                let reply = match state.sync(request, &request_scope).await {
                    Ok(response) => ServerMessage::sync_response(id, response),
                    Err(err) => ServerMessage::error(Some(id), &err),
                };
                let _ = outbox.send((id, reply));
            });
            None
        }

        ClientMessage::Cancel { id } => {
            match in_flight.get(&id) {
                Some(request_scope) => {
                    debug!(id, "cancelling request");
                    request_scope.cancel();
                }
                None => debug!(id, "cancel for unknown request"),
            }
            None
        }

        ClientMessage::Ping { id } => Some(ServerMessage::pong(id)),
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
