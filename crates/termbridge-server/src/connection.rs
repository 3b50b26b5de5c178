//! Per-connection handler: parse client events, dispatch them, and stream
//! server events back in emission order.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use termbridge_common::ServerEvent;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{ConnectionState, Dispatcher};
use crate::protocol::ClientEvent;

/// Handle a single WebSocket connection until it closes or the server
/// shuts down. Sessions connected through it are disconnected afterwards.
pub async fn handle_connection<S>(
    ws: tokio_tungstenite::WebSocketStream<S>,
    addr: SocketAddr,
    dispatcher: Dispatcher,
    cancel: CancellationToken,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let mut conn = ConnectionState::new(Arc::new(tx));

    tracing::info!(peer = %addr, "client connected");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }

            // Server events → this client's WebSocket
            Some(event) = rx.recv() => {
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::warn!(peer = %addr, error = %e, "failed to encode event");
                        continue;
                    }
                };
                if sink.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }

            // Client frames → dispatcher
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => match ClientEvent::parse(&text) {
                        Ok(event) => dispatcher.dispatch(event, &mut conn).await,
                        Err(e) => {
                            tracing::debug!(peer = %addr, error = %e, "invalid client event");
                            conn.events.emit(ServerEvent::Error {
                                session_id: None,
                                task_id: None,
                                error: format!("Invalid event: {e}"),
                            });
                        }
                    },
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(peer = %addr, error = %e, "WS error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    tracing::info!(peer = %addr, sessions = conn.owned.len(), "client disconnected");
    dispatcher.release(&mut conn).await;
}
