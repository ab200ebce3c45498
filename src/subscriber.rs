//! # Subscriber (optional)
//!
//! An outbound client that opens a single `REQ` against a configured
//! upstream relay, verifies every event it receives, and stores the ones
//! that pass into the local event store. Intended for mirroring or seeding
//! a relay from another one; entirely optional and independent of the
//! BLS/relay write path.

use crate::event::Event;
use crate::protocol::{parse_relay_message, ClientMessage, RelayMessage};
use crate::store::{EventStore, Filter};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Failures establishing or running a subscription.
#[derive(Debug, Error)]
pub enum SubscriberError {
    #[error("failed to connect to upstream relay: {0}")]
    Connect(String),
    #[error("websocket transport error: {0}")]
    Transport(String),
}

type WsWrite = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    WsMessage,
>;

/// A single outbound subscription against one upstream relay.
pub struct Subscriber {
    store: Arc<dyn EventStore>,
    sub_id: String,
    upstream_url: String,
    filters: Vec<Filter>,
    write: Mutex<Option<WsWrite>>,
    closed: AtomicBool,
}

impl Subscriber {
    pub fn new(
        store: Arc<dyn EventStore>,
        sub_id: impl Into<String>,
        upstream_url: impl Into<String>,
        filters: Vec<Filter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            sub_id: sub_id.into(),
            upstream_url: upstream_url.into(),
            filters,
            write: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Connect to the upstream relay, send `REQ`, and process events until
    /// the connection closes or [`unsubscribe`](Self::unsubscribe) is called.
    pub async fn run(self: &Arc<Self>) -> Result<(), SubscriberError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.upstream_url)
            .await
            .map_err(|e| SubscriberError::Connect(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let req = ClientMessage::Req {
            sub_id: self.sub_id.clone(),
            filters: self.filters.clone(),
        };
        write
            .send(WsMessage::Text(req.to_json()))
            .await
            .map_err(|e| SubscriberError::Transport(e.to_string()))?;

        *self.write.lock().await = Some(write);

        while let Some(message) = read.next().await {
            if self.closed.load(Ordering::SeqCst) {
                break;
            }
            let message = message.map_err(|e| SubscriberError::Transport(e.to_string()))?;
            let WsMessage::Text(text) = message else {
                continue;
            };
            self.handle_text(&text);
        }

        Ok(())
    }

    fn handle_text(&self, text: &str) {
        match parse_relay_message(text) {
            Ok(RelayMessage::Event { sub_id, event }) if sub_id == self.sub_id => {
                self.ingest(event);
            }
            Ok(RelayMessage::Eose { sub_id }) if sub_id == self.sub_id => {
                log::info!("subscriber '{}' received EOSE from upstream", self.sub_id);
            }
            Ok(RelayMessage::Notice { message }) => {
                log::warn!("upstream notice for subscriber '{}': {message}", self.sub_id);
            }
            Ok(_) => {}
            Err(e) => {
                log::warn!("subscriber '{}' ignoring unparseable message: {e}", self.sub_id);
            }
        }
    }

    fn ingest(&self, event: Event) {
        if let Err(e) = event.verify() {
            log::warn!(
                "subscriber '{}' discarding event with invalid signature: {e}",
                self.sub_id
            );
            return;
        }
        if let Err(e) = self.store.store(&event) {
            log::warn!("subscriber '{}' failed to store event: {e}", self.sub_id);
        }
    }

    /// Close this subscription. Sends `CLOSE` upstream if the connection is
    /// still open; a no-op if already closed or never connected.
    pub async fn unsubscribe(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut guard = self.write.lock().await;
        if let Some(write) = guard.as_mut() {
            let close = ClientMessage::Close {
                sub_id: self.sub_id.clone(),
            };
            let _ = write.send(WsMessage::Text(close.to_json())).await;
        }
        *guard = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use secp256k1::{Keypair, Message, Secp256k1};

    fn signed_event() -> Event {
        let secp = Secp256k1::new();
        let (secret_key, _) = secp.generate_keypair(&mut rand::thread_rng());
        let keypair = Keypair::from_secret_key(&secp, &secret_key);
        let (xonly, _) = keypair.x_only_public_key();

        let mut event = Event {
            id: String::new(),
            pubkey: hex::encode(xonly.serialize()),
            created_at: 1,
            kind: 1,
            tags: vec![],
            content: "mirrored".into(),
            sig: String::new(),
        };
        let id = event.compute_id();
        event.id = hex::encode(id);
        let message = Message::from_digest(id);
        let sig = secp.sign_schnorr(&message, &keypair);
        event.sig = hex::encode(sig.as_ref());
        event
    }

    fn subscriber() -> Arc<Subscriber> {
        Subscriber::new(
            Arc::new(MemoryStore::new()),
            "sub1",
            "ws://localhost:0/ws",
            vec![Filter::default()],
        )
    }

    #[test]
    fn ingest_stores_a_validly_signed_event() {
        let sub = subscriber();
        let event = signed_event();
        sub.ingest(event.clone());
        let results = sub.store.query(&[Filter::default()]).unwrap();
        assert_eq!(results, vec![event]);
    }

    #[test]
    fn ingest_discards_a_tampered_event() {
        let sub = subscriber();
        let mut event = signed_event();
        event.content = "tampered".into();
        sub.ingest(event);
        let results = sub.store.query(&[Filter::default()]).unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_before_connecting_is_a_noop() {
        let sub = subscriber();
        sub.unsubscribe().await;
        sub.unsubscribe().await;
    }
}
