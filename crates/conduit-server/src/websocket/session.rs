//! Socket session: one reader loop and one writer task per connection.
//!
//! The reader handles frames strictly in arrival order. The writer is the
//! only task that touches the socket sink; everything else queues
//! [`OutboundFrame`]s.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use conduit_core::{CloseCode, DisconnectReason, RejectReason};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use super::connection::{Connection, OutboundFrame};
use crate::gateway::{Accepted, ConnectionGateway, InboundOutcome};

/// How long teardown waits for the writer to flush and send the close frame.
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

fn close_message(code: CloseCode) -> Message {
    Message::Close(Some(CloseFrame {
        code: code.code,
        reason: code.reason.into(),
    }))
}

fn to_message(frame: OutboundFrame) -> Message {
    match frame {
        OutboundFrame::Text(text) => Message::Text(text.as_str().into()),
        OutboundFrame::Ping => Message::Ping(Vec::new().into()),
    }
}

/// Close a socket whose handshake was refused.
pub async fn reject(mut socket: WebSocket, reason: RejectReason) {
    debug!(reason = reason.as_str(), "rejecting websocket");
    let _ = socket.send(close_message(reason.close_code())).await;
}

/// Drain the frame queue into the socket until teardown.
///
/// Returns `true` if a write failed.
async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    conn: Arc<Connection>,
) -> bool {
    loop {
        tokio::select! {
            biased;
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if sink.send(to_message(frame)).await.is_err() {
                        return true;
                    }
                }
                None => break,
            },
            () = conn.cancelled() => break,
        }
    }

    // Frames queued before teardown started still go out, then the close.
    while let Ok(frame) = outbound.try_recv() {
        if sink.send(to_message(frame)).await.is_err() {
            return true;
        }
    }
    if let Some(code) = conn.close_code() {
        let _ = sink.send(close_message(code)).await;
    }
    let _ = sink.close().await;
    false
}

/// Serve an accepted connection until either side ends it.
#[instrument(skip_all, fields(connection_id = %accepted.connection.id))]
pub async fn run_ws_session(socket: WebSocket, gateway: Arc<ConnectionGateway>, accepted: Accepted) {
    let Accepted {
        connection: conn,
        outbound,
    } = accepted;
    let (sink, mut stream) = socket.split();
    let mut writer = tokio::spawn(write_frames(sink, outbound, Arc::clone(&conn)));
    let mut writer_done = false;

    let reason = loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let InboundOutcome::Close(reason) = gateway.handle_inbound(&conn, text.as_str()).await {
                        break reason;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => {
                        if let InboundOutcome::Close(reason) = gateway.handle_inbound(&conn, text).await {
                            break reason;
                        }
                    }
                    Err(_) => {
                        let _ = conn.send_json(&json!({
                            "type": "error",
                            "message": "Invalid message format: binary frame is not UTF-8",
                        }));
                    }
                },
                Some(Ok(Message::Ping(_))) => conn.touch(),
                Some(Ok(Message::Pong(_))) => gateway.record_heartbeat(&conn).await,
                Some(Ok(Message::Close(_))) | None => break DisconnectReason::ClientClosed,
                Some(Err(e)) => {
                    debug!(error = %e, "socket read failed");
                    break DisconnectReason::ClientClosed;
                }
            },
            // Torn down elsewhere (eviction, shutdown); teardown below is a no-op.
            () = conn.cancelled() => break DisconnectReason::ClientClosed,
            result = &mut writer => {
                writer_done = true;
                break if matches!(result, Ok(true)) {
                    DisconnectReason::WriteFailed
                } else {
                    DisconnectReason::ClientClosed
                };
            }
        }
    };

    let _ = gateway.teardown(&conn.id, reason).await;
    if !writer_done && tokio::time::timeout(WRITER_FLUSH_TIMEOUT, &mut writer).await.is_err() {
        warn!("writer did not flush before deadline, aborting");
        writer.abort();
    }
}
