//! # TOON — Typed Ordered Octet Notation
//!
//! The wire codec used for both ILP payment payloads and relay `EVENT`
//! bodies. TOON is a length-prefixed binary encoding of the seven Nostr
//! event attributes, laid out in a fixed field order so that structurally
//! equal events always produce byte-identical output:
//!
//! ```text
//! id          32 bytes, fixed
//! pubkey      32 bytes, fixed
//! created_at  8 bytes, big-endian i64
//! kind        4 bytes, big-endian u32
//! tags        4 bytes tag count, then per tag:
//!               4 bytes element count, then per element:
//!                 4 bytes byte length, then the UTF-8 bytes
//! content     4 bytes byte length, then the UTF-8 bytes
//! sig         64 bytes, fixed
//! ```
//!
//! No field is optional and no field is re-ordered: a decoder that stops
//! early always knows exactly how many bytes it has consumed.

use crate::event::Event;
use thiserror::Error;

const ID_LEN: usize = 32;
const PUBKEY_LEN: usize = 32;
const SIG_LEN: usize = 64;

/// Failures while turning an [`Event`] into TOON bytes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    /// A variable-length field's byte length does not fit in a `u32` prefix.
    #[error("field '{field}' is {len} bytes, which exceeds the u32 length prefix")]
    FieldTooLarge { field: &'static str, len: usize },
    /// `id`, `pubkey`, or `sig` is not valid hex of the expected byte length.
    #[error("field '{field}' is not valid hex of the expected length")]
    InvalidFixedField { field: &'static str },
}

/// Failures while turning TOON bytes back into an [`Event`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of input while reading '{field}'")]
    Truncated { field: &'static str },
    #[error("field '{field}' is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },
    #[error("trailing bytes after a complete event")]
    TrailingBytes,
}

/// Structural violations caught after a successful decode, before the event
/// is handed to the rest of the system.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("tag at index {index} has zero elements")]
    EmptyTag { index: usize },
}

/// The unified error type returned by [`decode`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Encode `event` as TOON bytes.
pub fn encode(event: &Event) -> Result<Vec<u8>, EncodeError> {
    let id = parse_fixed_hex(&event.id, ID_LEN, "id")?;
    let pubkey = parse_fixed_hex(&event.pubkey, PUBKEY_LEN, "pubkey")?;
    let sig = parse_fixed_hex(&event.sig, SIG_LEN, "sig")?;

    let mut out = Vec::with_capacity(
        ID_LEN + PUBKEY_LEN + 8 + 4 + 4 + SIG_LEN + event.content.len() + 32,
    );
    out.extend_from_slice(&id);
    out.extend_from_slice(&pubkey);
    out.extend_from_slice(&event.created_at.to_be_bytes());
    out.extend_from_slice(&event.kind.to_be_bytes());

    write_u32(&mut out, event.tags.len(), "tags")?;
    for tag in &event.tags {
        write_u32(&mut out, tag.len(), "tag element count")?;
        for element in tag {
            write_len_prefixed(&mut out, element.as_bytes(), "tag element")?;
        }
    }

    write_len_prefixed(&mut out, event.content.as_bytes(), "content")?;
    out.extend_from_slice(&sig);

    Ok(out)
}

/// Decode TOON bytes back into an [`Event`]. The returned event's `id`,
/// `pubkey`, and `sig` are lowercase hex.
pub fn decode(bytes: &[u8]) -> Result<Event, CodecError> {
    let mut cursor = Cursor::new(bytes);

    let id = cursor.take_fixed::<ID_LEN>("id")?;
    let pubkey = cursor.take_fixed::<PUBKEY_LEN>("pubkey")?;
    let created_at = cursor.take_i64("created_at")?;
    let kind = cursor.take_u32("kind")?;

    let tag_count = cursor.take_u32("tags")? as usize;
    let mut tags = Vec::with_capacity(tag_count.min(1024));
    for index in 0..tag_count {
        let element_count = cursor.take_u32("tag element count")? as usize;
        if element_count == 0 {
            return Err(SchemaError::EmptyTag { index }.into());
        }
        let mut tag = Vec::with_capacity(element_count.min(1024));
        for _ in 0..element_count {
            tag.push(cursor.take_string("tag element")?);
        }
        tags.push(tag);
    }

    let content = cursor.take_string("content")?;
    let sig = cursor.take_fixed::<SIG_LEN>("sig")?;

    if !cursor.is_empty() {
        return Err(DecodeError::TrailingBytes.into());
    }

    Ok(Event {
        id: hex::encode(id),
        pubkey: hex::encode(pubkey),
        created_at,
        kind,
        tags,
        content,
        sig: hex::encode(sig),
    })
}

fn parse_fixed_hex(
    s: &str,
    len: usize,
    field: &'static str,
) -> Result<Vec<u8>, EncodeError> {
    let bytes = hex::decode(s).map_err(|_| EncodeError::InvalidFixedField { field })?;
    if bytes.len() != len {
        return Err(EncodeError::InvalidFixedField { field });
    }
    Ok(bytes)
}

fn write_u32(out: &mut Vec<u8>, len: usize, field: &'static str) -> Result<(), EncodeError> {
    let value: u32 = len
        .try_into()
        .map_err(|_| EncodeError::FieldTooLarge { field, len })?;
    out.extend_from_slice(&value.to_be_bytes());
    Ok(())
}

fn write_len_prefixed(
    out: &mut Vec<u8>,
    bytes: &[u8],
    field: &'static str,
) -> Result<(), EncodeError> {
    write_u32(out, bytes.len(), field)?;
    out.extend_from_slice(bytes);
    Ok(())
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos == self.bytes.len()
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], DecodeError> {
        if self.bytes.len() - self.pos < n {
            return Err(DecodeError::Truncated { field });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_fixed<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], DecodeError> {
        let slice = self.take(N, field)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn take_u32(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        let slice = self.take(4, field)?;
        Ok(u32::from_be_bytes(slice.try_into().unwrap()))
    }

    fn take_i64(&mut self, field: &'static str) -> Result<i64, DecodeError> {
        let slice = self.take(8, field)?;
        Ok(i64::from_be_bytes(slice.try_into().unwrap()))
    }

    fn take_string(&mut self, field: &'static str) -> Result<String, DecodeError> {
        let len = self.take_u32(field)? as usize;
        let slice = self.take(len, field)?;
        String::from_utf8(slice.to_vec()).map_err(|_| DecodeError::InvalidUtf8 { field })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> Event {
        Event {
            id: "aa".repeat(32),
            pubkey: "bb".repeat(32),
            created_at: 1_700_000_000,
            kind: 1,
            tags: vec![
                vec!["e".into(), "cc".repeat(32)],
                vec!["p".into(), "dd".repeat(32), "relay-hint".into()],
            ],
            content: "hello, crosstown".into(),
            sig: "ee".repeat(64),
        }
    }

    #[test]
    fn round_trips() {
        let event = sample_event();
        let bytes = encode(&event).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn encoding_is_deterministic() {
        let event = sample_event();
        let a = encode(&event).unwrap();
        let b = encode(&event).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn no_tags_round_trips() {
        let mut event = sample_event();
        event.tags = vec![];
        let bytes = encode(&event).unwrap();
        assert_eq!(decode(&bytes).unwrap(), event);
    }

    #[test]
    fn empty_content_round_trips() {
        let mut event = sample_event();
        event.content = String::new();
        let bytes = encode(&event).unwrap();
        assert_eq!(decode(&bytes).unwrap(), event);
    }

    #[test]
    fn unicode_content_round_trips() {
        let mut event = sample_event();
        event.content = "日本語 🚀 crosstown".into();
        let bytes = encode(&event).unwrap();
        assert_eq!(decode(&bytes).unwrap(), event);
    }

    #[test]
    fn truncated_input_is_rejected() {
        let event = sample_event();
        let bytes = encode(&event).unwrap();
        for cut in [0, 1, 10, ID_LEN, ID_LEN + PUBKEY_LEN, bytes.len() - 1] {
            let truncated = &bytes[..cut];
            assert!(decode(truncated).is_err(), "cut at {cut} should fail");
        }
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let event = sample_event();
        let mut bytes = encode(&event).unwrap();
        bytes.push(0xFF);
        assert_eq!(decode(&bytes), Err(DecodeError::TrailingBytes.into()));
    }

    #[test]
    fn non_utf8_content_is_rejected() {
        let event = sample_event();
        let mut bytes = encode(&event).unwrap();
        // Overwrite the content bytes (after the fixed+tag prefix) with invalid UTF-8,
        // keeping the declared length the same so only the utf8 check can fire.
        let content_len_pos = bytes.len() - SIG_LEN - event.content.len();
        bytes[content_len_pos] = 0xFF;
        bytes[content_len_pos + 1] = 0xFE;
        assert!(matches!(
            decode(&bytes),
            Err(CodecError::Decode(DecodeError::InvalidUtf8 { field: "content" }))
        ));
    }

    #[test]
    fn empty_tag_is_rejected_by_schema() {
        let mut event = sample_event();
        event.tags = vec![vec![]];
        // Hand-build bytes since `encode` would also accept this; the schema
        // check lives on the decode path per spec.md's error taxonomy.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&parse_fixed_hex(&event.id, ID_LEN, "id").unwrap());
        bytes.extend_from_slice(&parse_fixed_hex(&event.pubkey, PUBKEY_LEN, "pubkey").unwrap());
        bytes.extend_from_slice(&event.created_at.to_be_bytes());
        bytes.extend_from_slice(&event.kind.to_be_bytes());
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes());
        bytes.extend_from_slice(&write_content(&event.content));
        bytes.extend_from_slice(&parse_fixed_hex(&event.sig, SIG_LEN, "sig").unwrap());

        assert_eq!(
            decode(&bytes),
            Err(SchemaError::EmptyTag { index: 0 }.into())
        );
    }

    fn write_content(content: &str) -> Vec<u8> {
        let mut out = Vec::new();
        write_len_prefixed(&mut out, content.as_bytes(), "content").unwrap();
        out
    }

    #[test]
    fn invalid_fixed_field_hex_is_rejected_on_encode() {
        let mut event = sample_event();
        event.id = "not-hex".into();
        assert_eq!(
            encode(&event),
            Err(EncodeError::InvalidFixedField { field: "id" })
        );
    }

    proptest::proptest! {
        #[test]
        fn arbitrary_events_round_trip(
            kind in 0u32..65535,
            created_at in -1_000_000_000i64..2_000_000_000,
            content in ".*",
            tag_values in proptest::collection::vec(".+", 0..4),
        ) {
            let event = Event {
                id: "11".repeat(32),
                pubkey: "22".repeat(32),
                created_at,
                kind,
                tags: if tag_values.is_empty() {
                    vec![]
                } else {
                    vec![tag_values]
                },
                content,
                sig: "33".repeat(64),
            };
            let bytes = encode(&event).unwrap();
            let decoded = decode(&bytes).unwrap();
            proptest::prop_assert_eq!(event, decoded);
        }
    }
}
