//! # Relay Wire Protocol
//!
//! Parses and renders the JSON-array messages exchanged over the relay's
//! WebSocket connection: `["EVENT", <event>]`, `["REQ", <subId>, <filter>...]`,
//! and `["CLOSE", <subId>]` inbound; `["EVENT", <subId>, <event>]`,
//! `["EOSE", <subId>]`, `["NOTICE", <message>]`, and
//! `["OK", <eventId>, <accepted>, <message>]` outbound.
//!
//! Per spec.md §4.E, the event body of a server-originated (and, for the
//! subscriber's sake, upstream-originated) `EVENT` message is the
//! TOON-encoded event, base64'd so it fits in a JSON string — not the
//! JSON object form canonical Nostr uses. A client's own attempted
//! `EVENT` write is always rejected by the relay regardless of its
//! payload (writes go through the BLS only), so the inbound client path
//! still accepts the JSON object form for that one rejected case.

use crate::codec;
use crate::event::Event;
use crate::store::Filter;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// A subscription identifier, opaque to the relay beyond equality.
pub type SubId = String;

/// A message received from a client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Event(Event),
    Req { sub_id: SubId, filters: Vec<Filter> },
    Close { sub_id: SubId },
}

/// A message sent to a client.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    Event { sub_id: SubId, event: Event },
    Eose { sub_id: SubId },
    Notice { message: String },
    Ok { event_id: String, accepted: bool, message: String },
}

/// Failures while parsing an inbound client message. Per spec.md §7, all of
/// these are reported to the client as `NOTICE` without closing the
/// connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("message is not valid JSON")]
    InvalidJson,
    #[error("message is not a JSON array")]
    NotAnArray,
    #[error("message array is empty")]
    EmptyArray,
    #[error("unknown message type '{0}'")]
    UnknownType(String),
    #[error("'{0}' message is missing its subscription id")]
    MissingSubId(&'static str),
    #[error("subscription id must be a string")]
    InvalidSubId,
    #[error("'REQ' message has no filters")]
    MissingFilters,
    #[error("filter is not a JSON object")]
    InvalidFilter,
    #[error("filter field '{0}' has the wrong type")]
    InvalidFilterField(&'static str),
    #[error("'EVENT' message is missing its event payload")]
    MissingEventPayload,
    #[error("event payload does not match the expected shape: {0}")]
    InvalidEventPayload(String),
    #[error("event payload is not valid base64: {0}")]
    InvalidEventEncoding(String),
    #[error("TOON-encoded event payload does not decode: {0}")]
    InvalidEventCodec(String),
}

/// Parse one line of client input into a [`ClientMessage`].
pub fn parse_client_message(input: &str) -> Result<ClientMessage, ProtocolError> {
    let value: Value = serde_json::from_str(input).map_err(|_| ProtocolError::InvalidJson)?;
    let array = value.as_array().ok_or(ProtocolError::NotAnArray)?;
    let first = array.first().ok_or(ProtocolError::EmptyArray)?;
    let message_type = first.as_str().ok_or(ProtocolError::NotAnArray)?;

    match message_type {
        "EVENT" => {
            let payload = array.get(1).ok_or(ProtocolError::MissingEventPayload)?;
            let event: Event = serde_json::from_value(payload.clone())
                .map_err(|e| ProtocolError::InvalidEventPayload(e.to_string()))?;
            Ok(ClientMessage::Event(event))
        }
        "REQ" => {
            let sub_id = array
                .get(1)
                .ok_or(ProtocolError::MissingSubId("REQ"))?
                .as_str()
                .ok_or(ProtocolError::InvalidSubId)?
                .to_string();
            if array.len() < 3 {
                return Err(ProtocolError::MissingFilters);
            }
            let mut filters = Vec::new();
            for raw in &array[2..] {
                filters.push(parse_filter(raw)?);
            }
            Ok(ClientMessage::Req { sub_id, filters })
        }
        "CLOSE" => {
            let sub_id = array
                .get(1)
                .ok_or(ProtocolError::MissingSubId("CLOSE"))?
                .as_str()
                .ok_or(ProtocolError::InvalidSubId)?
                .to_string();
            Ok(ClientMessage::Close { sub_id })
        }
        other => Err(ProtocolError::UnknownType(other.to_string())),
    }
}

/// Parse a message sent by an upstream relay (the direction a [`crate::subscriber::Subscriber`]
/// reads), the inverse of [`RelayMessage::to_json`].
pub fn parse_relay_message(input: &str) -> Result<RelayMessage, ProtocolError> {
    let value: Value = serde_json::from_str(input).map_err(|_| ProtocolError::InvalidJson)?;
    let array = value.as_array().ok_or(ProtocolError::NotAnArray)?;
    let first = array.first().ok_or(ProtocolError::EmptyArray)?;
    let message_type = first.as_str().ok_or(ProtocolError::NotAnArray)?;

    match message_type {
        "EVENT" => {
            let sub_id = array
                .get(1)
                .ok_or(ProtocolError::MissingSubId("EVENT"))?
                .as_str()
                .ok_or(ProtocolError::InvalidSubId)?
                .to_string();
            let payload = array
                .get(2)
                .and_then(|v| v.as_str())
                .ok_or(ProtocolError::MissingEventPayload)?;
            let bytes = BASE64
                .decode(payload)
                .map_err(|e| ProtocolError::InvalidEventEncoding(e.to_string()))?;
            let event = codec::decode(&bytes)
                .map_err(|e| ProtocolError::InvalidEventCodec(e.to_string()))?;
            Ok(RelayMessage::Event { sub_id, event })
        }
        "EOSE" => {
            let sub_id = array
                .get(1)
                .ok_or(ProtocolError::MissingSubId("EOSE"))?
                .as_str()
                .ok_or(ProtocolError::InvalidSubId)?
                .to_string();
            Ok(RelayMessage::Eose { sub_id })
        }
        "NOTICE" => {
            let message = array
                .get(1)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            Ok(RelayMessage::Notice { message })
        }
        "OK" => {
            let event_id = array
                .get(1)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let accepted = array.get(2).and_then(|v| v.as_bool()).unwrap_or(false);
            let message = array
                .get(3)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            Ok(RelayMessage::Ok {
                event_id,
                accepted,
                message,
            })
        }
        other => Err(ProtocolError::UnknownType(other.to_string())),
    }
}

fn parse_filter(raw: &Value) -> Result<Filter, ProtocolError> {
    let object = raw.as_object().ok_or(ProtocolError::InvalidFilter)?;
    let mut filter = Filter::default();

    if let Some(ids) = object.get("ids") {
        filter.ids = string_array(ids, "ids")?;
    }
    if let Some(authors) = object.get("authors") {
        filter.authors = string_array(authors, "authors")?;
    }
    if let Some(kinds) = object.get("kinds") {
        filter.kinds = kinds
            .as_array()
            .ok_or(ProtocolError::InvalidFilterField("kinds"))?
            .iter()
            .map(|v| v.as_u64().map(|k| k as u32))
            .collect::<Option<Vec<u32>>>()
            .ok_or(ProtocolError::InvalidFilterField("kinds"))?;
    }
    if let Some(since) = object.get("since") {
        filter.since = Some(since.as_i64().ok_or(ProtocolError::InvalidFilterField("since"))?);
    }
    if let Some(until) = object.get("until") {
        filter.until = Some(until.as_i64().ok_or(ProtocolError::InvalidFilterField("until"))?);
    }
    if let Some(limit) = object.get("limit") {
        filter.limit = Some(
            limit
                .as_u64()
                .ok_or(ProtocolError::InvalidFilterField("limit"))? as usize,
        );
    }

    let mut tags = HashMap::new();
    for (key, value) in object {
        if key.len() == 2 && key.starts_with('#') {
            let letter = key.chars().nth(1).unwrap();
            tags.insert(letter, string_array(value, "tag filter")?);
        }
    }
    filter.tags = tags;

    Ok(filter)
}

fn string_array(value: &Value, field: &'static str) -> Result<Vec<String>, ProtocolError> {
    value
        .as_array()
        .ok_or(ProtocolError::InvalidFilterField(field))?
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect::<Option<Vec<String>>>()
        .ok_or(ProtocolError::InvalidFilterField(field))
}

impl RelayMessage {
    /// Render this message as the JSON-array text frame clients expect.
    pub fn to_json(&self) -> String {
        match self {
            RelayMessage::Event { sub_id, event } => {
                let bytes = codec::encode(event).expect("event already passed validation on store");
                serde_json::json!(["EVENT", sub_id, BASE64.encode(bytes)]).to_string()
            }
            RelayMessage::Eose { sub_id } => serde_json::json!(["EOSE", sub_id]).to_string(),
            RelayMessage::Notice { message } => {
                serde_json::json!(["NOTICE", message]).to_string()
            }
            RelayMessage::Ok {
                event_id,
                accepted,
                message,
            } => serde_json::json!(["OK", event_id, accepted, message]).to_string(),
        }
    }
}

/// Render a [`Filter`] back into the JSON object shape `parse_filter` reads.
pub fn filter_to_json(filter: &Filter) -> Value {
    let mut object = serde_json::Map::new();
    if !filter.ids.is_empty() {
        object.insert("ids".into(), serde_json::json!(filter.ids));
    }
    if !filter.authors.is_empty() {
        object.insert("authors".into(), serde_json::json!(filter.authors));
    }
    if !filter.kinds.is_empty() {
        object.insert("kinds".into(), serde_json::json!(filter.kinds));
    }
    if let Some(since) = filter.since {
        object.insert("since".into(), serde_json::json!(since));
    }
    if let Some(until) = filter.until {
        object.insert("until".into(), serde_json::json!(until));
    }
    if let Some(limit) = filter.limit {
        object.insert("limit".into(), serde_json::json!(limit));
    }
    for (letter, values) in &filter.tags {
        object.insert(format!("#{letter}"), serde_json::json!(values));
    }
    Value::Object(object)
}

impl ClientMessage {
    /// Render this message as the JSON-array text frame a relay expects.
    pub fn to_json(&self) -> String {
        match self {
            ClientMessage::Event(event) => serde_json::json!(["EVENT", event]).to_string(),
            ClientMessage::Req { sub_id, filters } => {
                let mut array = vec![Value::String("REQ".into()), Value::String(sub_id.clone())];
                array.extend(filters.iter().map(filter_to_json));
                Value::Array(array).to_string()
            }
            ClientMessage::Close { sub_id } => {
                serde_json::json!(["CLOSE", sub_id]).to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event_json() -> Value {
        serde_json::json!({
            "id": "aa".repeat(32),
            "pubkey": "bb".repeat(32),
            "created_at": 100,
            "kind": 1,
            "tags": [],
            "content": "hi",
            "sig": "cc".repeat(64),
        })
    }

    fn sample_event() -> Event {
        serde_json::from_value(sample_event_json()).unwrap()
    }

    fn sample_event_toon_b64() -> String {
        BASE64.encode(codec::encode(&sample_event()).unwrap())
    }

    #[test]
    fn parses_event_message() {
        let input = serde_json::json!(["EVENT", sample_event_json()]).to_string();
        let parsed = parse_client_message(&input).unwrap();
        assert!(matches!(parsed, ClientMessage::Event(_)));
    }

    #[test]
    fn parses_req_with_one_filter() {
        let input = r#"["REQ", "sub1", {"kinds": [1], "limit": 10}]"#;
        let parsed = parse_client_message(input).unwrap();
        match parsed {
            ClientMessage::Req { sub_id, filters } => {
                assert_eq!(sub_id, "sub1");
                assert_eq!(filters.len(), 1);
                assert_eq!(filters[0].kinds, vec![1]);
                assert_eq!(filters[0].limit, Some(10));
            }
            _ => panic!("expected Req"),
        }
    }

    #[test]
    fn parses_req_with_multiple_filters() {
        let input = r#"["REQ", "sub1", {"kinds": [1]}, {"kinds": [2]}]"#;
        let parsed = parse_client_message(input).unwrap();
        match parsed {
            ClientMessage::Req { filters, .. } => assert_eq!(filters.len(), 2),
            _ => panic!("expected Req"),
        }
    }

    #[test]
    fn parses_req_tag_filter() {
        let input = r#"["REQ", "sub1", {"#e": ["deadbeef"]}]"#;
        let parsed = parse_client_message(input).unwrap();
        match parsed {
            ClientMessage::Req { filters, .. } => {
                assert_eq!(filters[0].tags.get(&'e'), Some(&vec!["deadbeef".to_string()]));
            }
            _ => panic!("expected Req"),
        }
    }

    #[test]
    fn parses_close() {
        let input = r#"["CLOSE", "sub1"]"#;
        let parsed = parse_client_message(input).unwrap();
        assert_eq!(parsed, ClientMessage::Close { sub_id: "sub1".into() });
    }

    #[test]
    fn rejects_invalid_json() {
        assert_eq!(parse_client_message("not json"), Err(ProtocolError::InvalidJson));
    }

    #[test]
    fn rejects_non_array() {
        assert_eq!(parse_client_message("{}"), Err(ProtocolError::NotAnArray));
    }

    #[test]
    fn rejects_empty_array() {
        assert_eq!(parse_client_message("[]"), Err(ProtocolError::EmptyArray));
    }

    #[test]
    fn rejects_unknown_type() {
        assert_eq!(
            parse_client_message(r#"["BOGUS"]"#),
            Err(ProtocolError::UnknownType("BOGUS".into()))
        );
    }

    #[test]
    fn rejects_req_without_sub_id() {
        assert_eq!(
            parse_client_message(r#"["REQ"]"#),
            Err(ProtocolError::MissingSubId("REQ"))
        );
    }

    #[test]
    fn rejects_req_with_non_string_sub_id() {
        assert_eq!(
            parse_client_message(r#"["REQ", 1, {}]"#),
            Err(ProtocolError::InvalidSubId)
        );
    }

    #[test]
    fn rejects_req_without_filters() {
        assert_eq!(
            parse_client_message(r#"["REQ", "sub1"]"#),
            Err(ProtocolError::MissingFilters)
        );
    }

    #[test]
    fn rejects_close_without_sub_id() {
        assert_eq!(
            parse_client_message(r#"["CLOSE"]"#),
            Err(ProtocolError::MissingSubId("CLOSE"))
        );
    }

    #[test]
    fn rejects_event_without_payload() {
        assert_eq!(
            parse_client_message(r#"["EVENT"]"#),
            Err(ProtocolError::MissingEventPayload)
        );
    }

    #[test]
    fn rejects_malformed_event_payload() {
        let input = r#"["EVENT", {"id": "not enough fields"}]"#;
        assert!(matches!(
            parse_client_message(input),
            Err(ProtocolError::InvalidEventPayload(_))
        ));
    }

    #[test]
    fn renders_event_message() {
        let msg = RelayMessage::Event {
            sub_id: "sub1".into(),
            event: sample_event(),
        };
        let json = msg.to_json();
        assert!(json.starts_with(r#"["EVENT","sub1""#));
        assert!(json.contains(&sample_event_toon_b64()));
    }

    #[test]
    fn renders_eose_message() {
        let msg = RelayMessage::Eose { sub_id: "sub1".into() };
        assert_eq!(msg.to_json(), r#"["EOSE","sub1"]"#);
    }

    #[test]
    fn renders_notice_message() {
        let msg = RelayMessage::Notice {
            message: "bad request".into(),
        };
        assert_eq!(msg.to_json(), r#"["NOTICE","bad request"]"#);
    }

    #[test]
    fn renders_ok_message() {
        let msg = RelayMessage::Ok {
            event_id: "a".repeat(64),
            accepted: true,
            message: "".into(),
        };
        let json = msg.to_json();
        assert!(json.starts_with(r#"["OK","#));
        assert!(json.contains("true"));
    }

    #[test]
    fn client_req_round_trips_through_json() {
        let original = ClientMessage::Req {
            sub_id: "sub1".into(),
            filters: vec![Filter {
                kinds: vec![1, 2],
                limit: Some(5),
                ..Default::default()
            }],
        };
        let json = original.to_json();
        let parsed = parse_client_message(&json).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn client_close_round_trips_through_json() {
        let original = ClientMessage::Close { sub_id: "sub1".into() };
        let json = original.to_json();
        assert_eq!(parse_client_message(&json).unwrap(), original);
    }

    #[test]
    fn parses_relay_event_message() {
        let input = serde_json::json!(["EVENT", "sub1", sample_event_toon_b64()]).to_string();
        let parsed = parse_relay_message(&input).unwrap();
        match parsed {
            RelayMessage::Event { sub_id, event } => {
                assert_eq!(sub_id, "sub1");
                assert_eq!(event, sample_event());
            }
            _ => panic!("expected Event"),
        }
    }

    #[test]
    fn rejects_relay_event_with_non_base64_payload() {
        let input = r#"["EVENT", "sub1", "not valid base64!!"]"#;
        assert!(matches!(
            parse_relay_message(input),
            Err(ProtocolError::InvalidEventEncoding(_))
        ));
    }

    #[test]
    fn rejects_relay_event_with_json_object_payload() {
        // The canonical Nostr JSON-object form is rejected on this path;
        // the relay's EVENT body is TOON, not JSON.
        let input = serde_json::json!(["EVENT", "sub1", sample_event_json()]).to_string();
        assert_eq!(
            parse_relay_message(&input),
            Err(ProtocolError::MissingEventPayload)
        );
    }

    #[test]
    fn parses_relay_eose_message() {
        let input = r#"["EOSE", "sub1"]"#;
        assert_eq!(
            parse_relay_message(input).unwrap(),
            RelayMessage::Eose { sub_id: "sub1".into() }
        );
    }

    #[test]
    fn parses_relay_notice_message() {
        let input = r#"["NOTICE", "bad filter"]"#;
        assert_eq!(
            parse_relay_message(input).unwrap(),
            RelayMessage::Notice {
                message: "bad filter".into()
            }
        );
    }

    #[test]
    fn parses_relay_ok_message() {
        let input = r#"["OK", "abcd", true, "stored"]"#;
        assert_eq!(
            parse_relay_message(input).unwrap(),
            RelayMessage::Ok {
                event_id: "abcd".into(),
                accepted: true,
                message: "stored".into(),
            }
        );
    }

    #[test]
    fn relay_message_round_trips_through_json() {
        let original = RelayMessage::Event {
            sub_id: "sub1".into(),
            event: sample_event(),
        };
        let json = original.to_json();
        assert_eq!(parse_relay_message(&json).unwrap(), original);
    }
}
