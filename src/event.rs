//! # Nostr Event Model
//!
//! This module defines the single first-class record in Crosstown: the
//! Nostr event. It carries the seven attributes described by NIP-01
//! (id, pubkey, kind, created_at, tags, content, sig), the replacement-class
//! rules that govern how the event store treats it, and signature
//! verification.
//!
//! ## Kind Classes
//!
//! Every kind falls into exactly one of four classes, which determines
//! whether and how the event store retains it:
//! - **Regular**: every valid event is retained.
//! - **Replaceable**: only the newest event per `(pubkey, kind)` survives.
//! - **Ephemeral**: never persisted, live subscribers only.
//! - **Parameterized-replaceable**: only the newest event per
//!   `(pubkey, kind, d-tag)` survives.

use secp256k1::schnorr::Signature as SchnorrSignature;
use secp256k1::{Message, Secp256k1, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// A single Nostr event.
///
/// `id`, `pubkey` are lowercase hex-encoded 32-byte values; `sig` is a
/// lowercase hex-encoded 64-byte value. Tags are ordered and each tag is a
/// non-empty sequence of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: i64,
    pub kind: u32,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

/// Errors that can occur while validating or verifying an event.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("id is not 64 lowercase hex characters")]
    InvalidId,
    #[error("pubkey is not 64 lowercase hex characters")]
    InvalidPubkey,
    #[error("sig is not 128 lowercase hex characters")]
    InvalidSig,
    #[error("computed id does not match event.id")]
    IdMismatch,
    #[error("signature verification failed")]
    BadSignature,
}

/// Retention class of an event, derived solely from its `kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindClass {
    Regular,
    Replaceable,
    Ephemeral,
    ParameterizedReplaceable,
}

/// Classify a kind per spec.md §3.
pub fn classify(kind: u32) -> KindClass {
    if kind == 0 || kind == 3 || (10000..20000).contains(&kind) {
        KindClass::Replaceable
    } else if (20000..30000).contains(&kind) {
        KindClass::Ephemeral
    } else if (30000..40000).contains(&kind) {
        KindClass::ParameterizedReplaceable
    } else {
        KindClass::Regular
    }
}

/// The key two events must share to compete for the same storage slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReplacementKey {
    PubkeyKind(String, u32),
    PubkeyKindD(String, u32, String),
}

impl Event {
    /// The `d` tag value for a parameterized-replaceable event, or `""` if
    /// absent, per spec.md §3.
    pub fn d_tag(&self) -> String {
        self.tags
            .iter()
            .find(|t| t.first().map(|s| s.as_str()) == Some("d"))
            .and_then(|t| t.get(1))
            .cloned()
            .unwrap_or_default()
    }

    /// The replacement key for this event, if its kind class has one.
    pub fn replacement_key(&self) -> Option<ReplacementKey> {
        match classify(self.kind) {
            KindClass::Replaceable => {
                Some(ReplacementKey::PubkeyKind(self.pubkey.clone(), self.kind))
            }
            KindClass::ParameterizedReplaceable => Some(ReplacementKey::PubkeyKindD(
                self.pubkey.clone(),
                self.kind,
                self.d_tag(),
            )),
            KindClass::Regular | KindClass::Ephemeral => None,
        }
    }

    /// Compute the NIP-01 identifier: SHA-256 of the canonical
    /// `[0, pubkey, created_at, kind, tags, content]` JSON array.
    pub fn compute_id(&self) -> [u8; 32] {
        let arr = serde_json::json!([0, self.pubkey, self.created_at, self.kind, self.tags, self.content]);
        let serialized = serde_json::to_vec(&arr).expect("event preimage is always serializable");
        let digest = Sha256::digest(&serialized);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        out
    }

    /// Validate hex-field shapes and that `id` and `sig` are cryptographically
    /// sound for this event. Does not consult the store.
    pub fn verify(&self) -> Result<(), EventError> {
        let id_bytes = decode_fixed_hex::<32>(&self.id).map_err(|_| EventError::InvalidId)?;
        let pubkey_bytes =
            decode_fixed_hex::<32>(&self.pubkey).map_err(|_| EventError::InvalidPubkey)?;
        let sig_bytes = decode_fixed_hex::<64>(&self.sig).map_err(|_| EventError::InvalidSig)?;

        if self.compute_id() != id_bytes {
            return Err(EventError::IdMismatch);
        }

        let pubkey =
            XOnlyPublicKey::from_slice(&pubkey_bytes).map_err(|_| EventError::InvalidPubkey)?;
        let signature =
            SchnorrSignature::from_slice(&sig_bytes).map_err(|_| EventError::InvalidSig)?;
        let message = Message::from_digest(id_bytes);
        let secp = Secp256k1::verification_only();
        secp.verify_schnorr(&signature, &message, &pubkey)
            .map_err(|_| EventError::BadSignature)
    }

    /// The raw 32-byte id, assuming `verify()` (or equivalent hex validation)
    /// has already accepted this event.
    pub fn id_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        if let Ok(bytes) = decode_fixed_hex::<32>(&self.id) {
            out.copy_from_slice(&bytes);
        }
        out
    }
}

fn decode_fixed_hex<const N: usize>(s: &str) -> Result<[u8; N], hex::FromHexError> {
    let bytes = hex::decode(s)?;
    if bytes.len() != N || s.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(hex::FromHexError::InvalidStringLength);
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}
