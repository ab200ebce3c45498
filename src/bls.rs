//! # Business Logic Server
//!
//! The payment-gated write path. Every `POST /handle-packet` request walks
//! the same pipeline: decode the ILP packet's payload, decode and verify the
//! embedded Nostr event, price it, check the attached payment covers that
//! price, store the event, and return the fulfillment bound to it.
//!
//! ```text
//! RECEIVED -> DECODED_BASE64 -> DECODED_EVENT -> VERIFIED -> PRICED -> STORED -> FULFILLED
//! ```
//!
//! Two escapes short-circuit pricing: the configured owner's pubkey always
//! passes for free, and SPSP probe events (`kind == spsp_kind`) have their
//! price capped at a configured ceiling regardless of length.

use crate::codec;
use crate::event::Event;
use crate::pricing::PricingConfig;
use crate::store::EventStore;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Shared state for the BLS HTTP server.
#[derive(Clone)]
pub struct BlsState {
    pub store: Arc<dyn EventStore>,
    pub pricing: PricingConfig,
    /// The pubkey that writes for free, if configured.
    pub owner_pubkey: Option<String>,
    /// Admitted events are broadcast here for the relay's live subscribers.
    pub publisher: broadcast::Sender<Event>,
}

/// The body of an ILP `POST /handle-packet` request, per spec.md §6. The
/// BLS does not itself validate `destination`/`sourceAccount`: packet
/// routing is an external collaborator's concern (spec.md §1).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacketRequest {
    /// Decimal-encoded unsigned payment amount.
    pub amount: String,
    /// The ILP address the packet was addressed to.
    pub destination: String,
    /// Base64-encoded TOON bytes of the Nostr event being written.
    pub data: String,
    /// The ILP address the payment originated from, if known.
    #[serde(default)]
    pub source_account: Option<String>,
}

/// ILP error codes this server can return, per spec.md §4.D.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IlpErrorCode {
    /// Bad request: malformed payload, bad signature.
    BadRequest,
    /// Insufficient payment: the attached amount does not cover the price.
    InsufficientAmount,
    /// Temporary failure: the storage backend is unavailable.
    Temporary,
}

impl IlpErrorCode {
    fn as_str(self) -> &'static str {
        match self {
            IlpErrorCode::BadRequest => "F00",
            IlpErrorCode::InsufficientAmount => "F06",
            IlpErrorCode::Temporary => "T00",
        }
    }

    /// The HTTP status this ILP code is carried over, per spec.md §6's
    /// "4xx/5xx" reject contract.
    fn http_status(self) -> StatusCode {
        match self {
            IlpErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            IlpErrorCode::InsufficientAmount => StatusCode::PAYMENT_REQUIRED,
            IlpErrorCode::Temporary => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Metadata accompanying a reject: the required and received amounts, only
/// present for `F06 INSUFFICIENT_AMOUNT`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RejectMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<String>,
}

/// Metadata accompanying an accept: the id of the stored event and when it
/// was committed.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AcceptMetadata {
    pub event_id: String,
    pub stored_at: i64,
}

/// The body of a `POST /handle-packet` response, per spec.md §6.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PacketResponse {
    pub accept: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fulfillment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,

    #[serde(skip, default = "default_http_status")]
    http_status: StatusCode,
}

fn default_http_status() -> StatusCode {
    StatusCode::OK
}

impl PacketResponse {
    fn fulfilled(fulfillment: [u8; 32], event_id: &str, stored_at_ms: i64) -> Self {
        PacketResponse {
            accept: true,
            fulfillment: Some(BASE64.encode(fulfillment)),
            code: None,
            message: None,
            metadata: Some(
                serde_json::to_value(AcceptMetadata {
                    event_id: event_id.to_string(),
                    stored_at: stored_at_ms,
                })
                .expect("AcceptMetadata always serializes"),
            ),
            http_status: StatusCode::OK,
        }
    }

    fn rejected(code: IlpErrorCode, message: impl Into<String>, metadata: Option<RejectMetadata>) -> Self {
        PacketResponse {
            accept: false,
            fulfillment: None,
            code: Some(code.as_str().to_string()),
            message: Some(message.into()),
            metadata: metadata.map(|m| serde_json::to_value(m).expect("RejectMetadata always serializes")),
            http_status: code.http_status(),
        }
    }
}

impl IntoResponse for PacketResponse {
    fn into_response(self) -> axum::response::Response {
        let status = self.http_status;
        (status, Json(self)).into_response()
    }
}

/// Build the BLS axum router.
pub fn router(state: BlsState) -> Router {
    Router::new()
        .route("/handle-packet", post(handle_packet))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}

/// Compute the fulfillment bound to `event`: SHA-256 of its raw 32-byte id.
/// Two different events never share a fulfillment, so a fulfillment
/// obtained for one packet cannot satisfy the condition of another.
pub fn compute_fulfillment(event: &Event) -> [u8; 32] {
    let digest = Sha256::digest(event.id_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// The ILP execution condition for a fulfillment: `SHA-256(fulfillment)`.
/// Produced by the sender, not consulted by the BLS itself (spec.md §3's
/// "Fulfillment" note — condition matching is the connector's job).
pub fn condition_for(fulfillment: &[u8; 32]) -> [u8; 32] {
    let digest = Sha256::digest(fulfillment);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

async fn handle_packet(
    State(state): State<BlsState>,
    Json(request): Json<PacketRequest>,
) -> PacketResponse {
    match process_packet(&state, &request) {
        Ok((fulfillment, event_id, stored_at_ms)) => {
            log::info!("packet fulfilled for event {event_id}");
            PacketResponse::fulfilled(fulfillment, &event_id, stored_at_ms)
        }
        Err((code, message, metadata)) => {
            log::warn!("packet rejected ({}): {message}", code.as_str());
            PacketResponse::rejected(code, message, metadata)
        }
    }
}

type RejectOutcome = (IlpErrorCode, String, Option<RejectMetadata>);

fn reject(code: IlpErrorCode, message: impl Into<String>) -> RejectOutcome {
    (code, message.into(), None)
}

fn process_packet(
    state: &BlsState,
    request: &PacketRequest,
) -> Result<([u8; 32], String, i64), RejectOutcome> {
    // DECODED_BASE64
    let bytes = BASE64
        .decode(&request.data)
        .map_err(|e| reject(IlpErrorCode::BadRequest, format!("invalid base64 payload: {e}")))?;

    // DECODED_EVENT
    let event = codec::decode(&bytes)
        .map_err(|e| reject(IlpErrorCode::BadRequest, format!("invalid event payload: {e}")))?;

    // VERIFIED
    event
        .verify()
        .map_err(|_| reject(IlpErrorCode::BadRequest, "Invalid event signature"))?;

    let is_owner = state
        .owner_pubkey
        .as_deref()
        .map(|owner| owner.eq_ignore_ascii_case(&event.pubkey))
        .unwrap_or(false);

    // PRICED
    if !is_owner {
        let encoded_len = codec::encode(&event)
            .map_err(|e| reject(IlpErrorCode::BadRequest, format!("failed to measure event: {e}")))?
            .len();
        let price = state.pricing.price(encoded_len, event.kind);

        let amount = BigUint::from_str(&request.amount)
            .map_err(|_| reject(IlpErrorCode::BadRequest, "amount is not a valid non-negative integer"))?;

        if amount < price {
            return Err((
                IlpErrorCode::InsufficientAmount,
                format!("payment of {amount} does not cover price of {price}"),
                Some(RejectMetadata {
                    required: Some(price.to_string()),
                    received: Some(amount.to_string()),
                }),
            ));
        }
    }

    // STORED
    state
        .store
        .store(&event)
        .map_err(|e| reject(IlpErrorCode::Temporary, format!("storage backend failure: {e}")))?;

    let stored_at_ms = now_unix_ms();
    let event_id = event.id.clone();
    let fulfillment = compute_fulfillment(&event);

    let _ = state.publisher.send(event);

    // FULFILLED
    Ok((fulfillment, event_id, stored_at_ms))
}

fn now_unix_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
