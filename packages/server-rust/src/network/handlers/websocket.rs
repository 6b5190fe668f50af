//! Persistent channel: WebSocket upgrade and per-connection session loop.

use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{Sink, SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use topicast_core::{ConnectionId, ErrorCode, GraphQlError, HttpResponse, Transport};
use tracing::{debug, info, instrument, warn};

use super::AppState;
use crate::network::connection::{ConnectionHandle, OutboundMessage};
use crate::service::router::SUBSCRIBE_ACK;

/// How long a closing session waits for its queued frames to flush.
const WRITER_GRACE: Duration = Duration::from_secs(1);

/// Upgrades `GET /ws` to a persistent connection.
pub async fn ws_upgrade_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    if !state.shutdown.is_accepting() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let conn = &state.config.connection;
    ws.write_buffer_size(conn.ws_write_buffer_size)
        .max_write_buffer_size(conn.ws_max_write_buffer_size)
        .on_upgrade(move |socket| run_session(socket, state))
}

// ---------------------------------------------------------------------------
// Inbound frames
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum ControlFrame {
    Unsubscribe { topic: String },
}

/// What a text frame asks the server to do.
#[derive(Debug, PartialEq, Eq)]
enum InboundFrame {
    /// `{"action": "unsubscribe", "topic": "..."}`
    Unsubscribe(String),
    /// Anything else is submitted as an operation body.
    Operation(String),
}

fn parse_frame(text: String) -> InboundFrame {
    match serde_json::from_str::<ControlFrame>(&text) {
        Ok(ControlFrame::Unsubscribe { topic }) => InboundFrame::Unsubscribe(topic),
        Err(_) => InboundFrame::Operation(text),
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Runs one connection from upgrade until close.
///
/// 1. Registers the connection (no directory write)
/// 2. Forwards queued frames (replies and pushes) from the registry channel
/// 3. Submits every inbound text frame and queues the reply body
/// 4. On close, idle timeout or server shutdown, removes the connection and
///    tears down its subscriptions
#[instrument(skip_all, fields(connection_id = tracing::field::Empty))]
async fn run_session(socket: WebSocket, state: AppState) {
    let (handle, outbound_rx) = state.registry.register();
    let connection_id = handle.id.clone();
    tracing::Span::current().record("connection_id", connection_id.as_str());

    info!("connection opened");
    counter!("topicast_ws_connections_total").increment(1);
    gauge!("topicast_ws_connections_active").increment(1.0);

    let (ws_tx, mut ws_rx) = socket.split();
    let writer = tokio::spawn(write_loop(
        ws_tx,
        outbound_rx,
        state.config.connection.ping_interval,
    ));

    let idle_timeout = state.config.connection.idle_timeout;
    let mut shutdown_rx = state.shutdown.shutdown_receiver();

    loop {
        let next = tokio::select! {
            _ = shutdown_rx.changed() => {
                handle.close("server shutting down");
                break;
            }
            next = tokio::time::timeout(idle_timeout, ws_rx.next()) => next,
        };

        let msg = match next {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(err))) => {
                debug!(error = %err, "websocket read failed");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                info!(?idle_timeout, "closing idle connection");
                handle.close("idle timeout");
                break;
            }
        };

        let text = match msg {
            Message::Text(text) => text.to_string(),
            Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                    continue;
                }
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        let reply = handle_frame(&state, &handle, parse_frame(text)).await;
        if let Err(err) = handle.deliver(reply, state.config.connection.send_timeout).await {
            warn!(error = %err, "failed to queue reply");
            break;
        }
    }

    disconnect(&state, &connection_id).await;
    let lifetime = handle.age();
    drop(handle);
    if tokio::time::timeout(WRITER_GRACE, writer).await.is_err() {
        debug!("writer still flushing after close");
    }

    info!("connection closed");
    counter!("topicast_ws_disconnections_total").increment(1);
    gauge!("topicast_ws_connections_active").decrement(1.0);
    histogram!("topicast_ws_connection_duration_seconds").record(lifetime.as_secs_f64());
}

async fn handle_frame(state: &AppState, handle: &ConnectionHandle, frame: InboundFrame) -> String {
    let _guard = state.shutdown.in_flight_guard();
    match frame {
        InboundFrame::Operation(body) => {
            let transport = Transport::persistent(handle.id.clone());
            state.ingress.handle(&body, transport).await.body
        }
        InboundFrame::Unsubscribe(topic) => {
            match state.subscriptions.on_unsubscribe(&topic, &handle.id).await {
                Ok(()) => SUBSCRIBE_ACK.to_string(),
                Err(err) => {
                    warn!(%topic, error = %err, "unsubscribe failed");
                    let entry = GraphQlError::new(ErrorCode::Internal, "Internal server error");
                    HttpResponse::errors(500, &[entry]).body
                }
            }
        }
    }
}

/// Removes the connection and deletes its subscriptions.
pub(crate) async fn disconnect(state: &AppState, connection_id: &ConnectionId) {
    state.registry.remove(connection_id);
    match state.subscriptions.on_disconnect(connection_id).await {
        Ok(report) if !report.failed.is_empty() => {
            warn!(connection = %connection_id, failed = ?report.failed, "teardown left records to expire");
        }
        Ok(_) => {}
        Err(err) => warn!(connection = %connection_id, error = %err, "teardown lookup failed"),
    }
}

/// Forwards queued frames to the socket and pings it every `ping_every`.
async fn write_loop<S>(
    mut ws_tx: S,
    mut outbound_rx: mpsc::Receiver<OutboundMessage>,
    ping_every: Duration,
) where
    S: Sink<Message> + Unpin,
{
    let ping_every = ping_every.max(Duration::from_millis(1));
    let mut pings = tokio::time::interval_at(tokio::time::Instant::now() + ping_every, ping_every);
    pings.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let frame = tokio::select! {
            next = outbound_rx.recv() => match next {
                Some(OutboundMessage::Text(text)) => Message::Text(text.into()),
                Some(OutboundMessage::Close(reason)) => {
                    let frame = CloseFrame {
                        code: close_code::AWAY,
                        reason: reason.unwrap_or_default().into(),
                    };
                    let _ = ws_tx.send(Message::Close(Some(frame))).await;
                    break;
                }
                None => break,
            },
            _ = pings.tick() => Message::Ping(Vec::new().into()),
        };
        if ws_tx.send(frame).await.is_err() {
            break;
        }
    }
    let _ = ws_tx.close().await;
}

#[cfg(test)]
mod tests {
    use futures_util::sink;

    use super::*;

    /// A sink that forwards every frame into a channel.
    fn recording_sink() -> (
        impl Sink<Message> + Unpin,
        mpsc::UnboundedReceiver<Message>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = sink::unfold(tx, |tx, frame: Message| async move {
            tx.send(frame).map_err(|_| ())?;
            Ok::<_, ()>(tx)
        });
        (Box::pin(sink), rx)
    }

    #[test]
    fn unsubscribe_frames_are_recognised() {
        assert_eq!(
            parse_frame(r#"{"action":"unsubscribe","topic":"room1"}"#.to_string()),
            InboundFrame::Unsubscribe("room1".to_string())
        );
        let body = r#"{"query":"{ getEvent }"}"#.to_string();
        assert_eq!(parse_frame(body.clone()), InboundFrame::Operation(body));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_writer_pings_on_schedule() {
        let (ws_tx, mut frames) = recording_sink();
        let (queue, outbound_rx) = mpsc::channel(4);
        let writer = tokio::spawn(write_loop(ws_tx, outbound_rx, Duration::from_secs(30)));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(matches!(frames.recv().await, Some(Message::Ping(_))));
        assert!(matches!(frames.recv().await, Some(Message::Ping(_))));

        queue.send(OutboundMessage::Text("push".into())).await.unwrap();
        queue.send(OutboundMessage::Close(Some("bye".into()))).await.unwrap();
        writer.await.unwrap();

        assert!(matches!(frames.recv().await, Some(Message::Text(t)) if t.as_str() == "push"));
        assert!(matches!(frames.recv().await, Some(Message::Close(Some(f))) if f.reason.as_str() == "bye"));
    }
}
