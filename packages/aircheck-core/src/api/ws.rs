//! WebSocket push channel.
//!
//! Each connection subscribes to the event bridge and receives frames
//! (`track_update`, `history_update`, `dj_state`). A subscriber that falls
//! behind loses the oldest frames and gets a `lag_hint` telling it how many;
//! the store remains the ordered truth for anything missed. Writes carry a
//! timeout so one wedged client cannot pin the handler.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::sink::SinkExt;
use futures::stream::{SplitSink, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;

use crate::api::AppState;
use crate::events::RadioEvent;

/// Incoming WebSocket message envelope.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsIncoming {
    Heartbeat,
}

/// Outgoing WebSocket frames.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsFrame {
    /// The on-air track (sent on connect and on every change).
    TrackUpdate { payload: serde_json::Value },
    /// The play history grew.
    HistoryUpdate { payload: serde_json::Value },
    /// A DJ job changed state.
    DjState { payload: serde_json::Value },
    /// Frames were dropped because this subscriber lagged.
    LagHint { dropped: u64 },
    /// Answer to a client heartbeat.
    HeartbeatAck,
}

impl WsFrame {
    fn from_event(event: RadioEvent) -> Option<Self> {
        let frame = match &event {
            RadioEvent::Track(inner) => Self::TrackUpdate {
                payload: serde_json::to_value(inner).ok()?,
            },
            RadioEvent::History(inner) => Self::HistoryUpdate {
                payload: serde_json::to_value(inner).ok()?,
            },
            RadioEvent::Dj(inner) => Self::DjState {
                payload: serde_json::to_value(inner).ok()?,
            },
        };
        Some(frame)
    }

    fn to_message(&self) -> Option<Message> {
        serde_json::to_string(self).ok().map(Message::from)
    }
}

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Sends one frame with the configured write timeout. Returns `false` when
/// the connection should be torn down.
async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &WsFrame,
    write_timeout: Duration,
) -> bool {
    let Some(message) = frame.to_message() else {
        return true;
    };
    match tokio::time::timeout(write_timeout, sender.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            log::debug!("[WS] Send failed: {}", e);
            false
        }
        Err(_) => {
            log::warn!("[WS] Write timed out; closing slow connection");
            false
        }
    }
}

/// Main WebSocket connection handler.
async fn handle_ws(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.event_bridge.subscribe();
    let write_timeout = Duration::from_millis(state.bus_config.ws_write_timeout_ms);

    // Register connection for tracking and force-close capability.
    let conn_guard = state.ws_manager.register();
    let cancel_token = conn_guard.cancel_token().clone();

    // Current view immediately on connect, so clients render without waiting
    // for the next change.
    let initial = WsFrame::TrackUpdate {
        payload: json!({
            "now": state.cache.now_snapshot(),
            "stale": state.cache.is_stale(),
        }),
    };
    if !send_frame(&mut sender, &initial, write_timeout).await {
        return;
    }

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                log::info!("[WS] Connection force-closed: {}", conn_guard.id());
                break;
            }
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if let Some(frame) = WsFrame::from_event(event) {
                            if !send_frame(&mut sender, &frame, write_timeout).await {
                                break;
                            }
                        }
                    }
                    Err(RecvError::Lagged(dropped)) => {
                        state.ws_manager.record_dropped(conn_guard.id(), dropped);
                        let hint = WsFrame::LagHint { dropped };
                        if !send_frame(&mut sender, &hint, write_timeout).await {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(WsIncoming::Heartbeat) = serde_json::from_str(&text) {
                            if !send_frame(&mut sender, &WsFrame::HeartbeatAck, write_timeout).await {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::debug!("[WS] Receive error: {}", e);
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TrackEvent;

    #[test]
    fn frames_serialize_with_snake_case_types() {
        let frame = WsFrame::LagHint { dropped: 3 };
        let text = serde_json::to_string(&frame).unwrap();
        assert!(text.contains("\"type\":\"lag_hint\""));
        assert!(text.contains("\"dropped\":3"));
    }

    #[test]
    fn track_events_map_to_track_update_frames() {
        let event = RadioEvent::Track(TrackEvent::Changed {
            title: "Song".to_string(),
            artist: "Band".to_string(),
            album: String::new(),
            artwork_ref: None,
            started_at_ms: 1,
            timestamp: 2,
        });
        let frame = WsFrame::from_event(event).unwrap();
        let text = serde_json::to_string(&frame).unwrap();
        assert!(text.contains("\"type\":\"track_update\""));
        assert!(text.contains("\"title\":\"Song\""));
    }

    #[test]
    fn heartbeat_parses_from_client_json() {
        let parsed: Result<WsIncoming, _> = serde_json::from_str(r#"{"type":"heartbeat"}"#);
        assert!(matches!(parsed, Ok(WsIncoming::Heartbeat)));
    }
}
