//! # Relay Front-End
//!
//! The read-side WebSocket surface. Clients open a connection, issue `REQ`
//! to subscribe, receive matching stored events followed by `EOSE`, and then
//! keep receiving events admitted afterward that match their open
//! subscriptions — fed by a process-wide broadcast of every event the BLS
//! accepts. `EVENT` from a client (an attempt to write directly, bypassing
//! payment) is rejected with `NOTICE`; all writes go through the BLS.

use crate::event::Event;
use crate::protocol::{parse_client_message, ClientMessage, RelayMessage, SubId};
use crate::store::{EventStore, Filter};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

type Sink = SplitSink<WebSocket, Message>;

/// Shared state for the relay's WebSocket server.
#[derive(Clone)]
pub struct RelayState {
    pub store: Arc<dyn EventStore>,
    pub publisher: broadcast::Sender<Event>,
}

/// Build the relay axum router.
pub fn router(state: RelayState) -> Router {
    Router::new().route("/ws", get(ws_upgrade)).with_state(state)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<RelayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: RelayState) {
    let (mut sink, mut stream) = socket.split();
    let mut subscriptions: HashMap<SubId, Vec<Filter>> = HashMap::new();
    let mut live = state.publisher.subscribe();

    loop {
        tokio::select! {
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if !dispatch_text(&text, &state, &mut sink, &mut subscriptions).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
            live_event = live.recv() => {
                match live_event {
                    Ok(event) => {
                        for (sub_id, filters) in &subscriptions {
                            if filters.iter().any(|f| f.matches(&event)) {
                                let frame = RelayMessage::Event {
                                    sub_id: sub_id.clone(),
                                    event: event.clone(),
                                };
                                if sink.send(Message::Text(frame.to_json())).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("relay connection lagged behind live fan-out by {skipped} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

/// Handle one inbound text frame. Returns `false` if the connection should
/// close.
async fn dispatch_text(
    text: &str,
    state: &RelayState,
    sink: &mut Sink,
    subscriptions: &mut HashMap<SubId, Vec<Filter>>,
) -> bool {
    match parse_client_message(text) {
        Ok(ClientMessage::Req { sub_id, filters }) => {
            match state.store.query(&filters) {
                Ok(events) => {
                    for event in events {
                        let frame = RelayMessage::Event {
                            sub_id: sub_id.clone(),
                            event,
                        };
                        if sink.send(Message::Text(frame.to_json())).await.is_err() {
                            return false;
                        }
                    }
                    let eose = RelayMessage::Eose {
                        sub_id: sub_id.clone(),
                    };
                    if sink.send(Message::Text(eose.to_json())).await.is_err() {
                        return false;
                    }
                    subscriptions.insert(sub_id, filters);
                }
                Err(e) => {
                    log::warn!("query failed for subscription '{sub_id}': {e}");
                    let notice = RelayMessage::Notice {
                        message: format!("query failed: {e}"),
                    };
                    let _ = sink.send(Message::Text(notice.to_json())).await;
                }
            }
            true
        }
        Ok(ClientMessage::Close { sub_id }) => {
            // Idempotent: closing an unknown or already-closed subId is a
            // silent no-op.
            subscriptions.remove(&sub_id);
            true
        }
        Ok(ClientMessage::Event(_)) => {
            let notice = RelayMessage::Notice {
                message: "writes must go through the BLS /handle-packet endpoint".to_string(),
            };
            sink.send(Message::Text(notice.to_json())).await.is_ok()
        }
        Err(e) => {
            let notice = RelayMessage::Notice {
                message: e.to_string(),
            };
            sink.send(Message::Text(notice.to_json())).await.is_ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn event(id: &str, kind: u32, created_at: i64) -> Event {
        Event {
            id: id.into(),
            pubkey: "p".into(),
            created_at,
            kind,
            tags: vec![],
            content: String::new(),
            sig: "0".repeat(128),
        }
    }

    #[test]
    fn subscription_matches_against_live_events() {
        let filters = vec![Filter {
            kinds: vec![1],
            ..Default::default()
        }];
        let matching = event("a", 1, 100);
        let non_matching = event("b", 2, 100);
        assert!(filters.iter().any(|f| f.matches(&matching)));
        assert!(!filters.iter().any(|f| f.matches(&non_matching)));
    }

    #[tokio::test]
    async fn router_builds_without_panicking() {
        let (tx, _rx) = broadcast::channel(16);
        let state = RelayState {
            store: Arc::new(MemoryStore::new()),
            publisher: tx,
        };
        let _router = router(state);
    }
}
