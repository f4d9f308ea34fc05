//! Fixed WBXML test vectors.
//!
//! Each vector pairs a document with the events it decodes to, or with
//! the kind of error the decoder must report. Vectors serialize to JSON so
//! other implementations of the codec can replay them.

use easync_wbxml::codepage::{airsync, airsync_base, page};
use easync_wbxml::{decode_all, encode, push_text_element, WbxmlError, WbxmlEvent};
use serde::{Deserialize, Serialize};

use crate::golden::{hex_decode, hex_encode};

/// A test vector that can be shared across implementations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WbxmlVector {
    /// Unique identifier for this vector.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// Document bytes (hex-encoded).
    pub hex: String,
    /// Decoded events, for valid documents. Decoding starts in code page 0.
    pub events: Option<Vec<WbxmlEvent>>,
    /// Expected error kind, for invalid documents.
    pub error: Option<String>,
}

impl WbxmlVector {
    fn valid(id: &str, description: &str, hex: &str, events: Vec<WbxmlEvent>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            hex: hex.into(),
            events: Some(events),
            error: None,
        }
    }

    fn invalid(id: &str, description: &str, hex: &str, error: &str) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            hex: hex.into(),
            events: None,
            error: Some(error.into()),
        }
    }

    /// Document bytes.
    pub fn bytes(&self) -> Vec<u8> {
        hex_decode(&self.hex)
    }

    /// Replay the vector against the codec.
    ///
    /// Valid vectors must decode to `events` and re-encode to the same
    /// bytes. Invalid vectors must fail with the named error kind.
    ///
    /// # Errors
    ///
    /// Returns a description of the first mismatch.
    pub fn check(&self) -> Result<(), String> {
        let bytes = self.bytes();
        let decoded = decode_all(&bytes, page::AIRSYNC);
        match (&self.events, &self.error, decoded) {
            (Some(expected), _, Ok(actual)) => {
                if &actual != expected {
                    return Err(format!("{}: decoded {actual:?}", self.id));
                }
                let encoded = encode(expected, page::AIRSYNC)
                    .map_err(|e| format!("{}: encode failed: {e}", self.id))?;
                if encoded != bytes {
                    return Err(format!("{}: encoded {}", self.id, hex_encode(&encoded)));
                }
                Ok(())
            }
            (Some(_), _, Err(e)) => Err(format!("{}: decode failed: {e}", self.id)),
            (None, Some(kind), Err(e)) if error_kind(&e) == kind => Ok(()),
            (None, Some(kind), Err(e)) => {
                Err(format!("{}: expected {kind}, got {}", self.id, error_kind(&e)))
            }
            (None, _, Ok(events)) => Err(format!("{}: decoded {events:?}", self.id)),
            (None, None, Err(e)) => Err(format!("{}: no expectation for {e}", self.id)),
        }
    }
}

/// Variant name of a decoder error.
pub fn error_kind(error: &WbxmlError) -> &'static str {
    match error {
        WbxmlError::MalformedStream { .. } => "MalformedStream",
        WbxmlError::TruncatedStream { .. } => "TruncatedStream",
        WbxmlError::UnknownToken { .. } => "UnknownToken",
        WbxmlError::UnknownTag { .. } => "UnknownTag",
        WbxmlError::UnknownCodepage(_) => "UnknownCodepage",
        WbxmlError::InvalidEvent(_) => "InvalidEvent",
        WbxmlError::Io(_) => "Io",
    }
}

fn initial_request_events() -> Vec<WbxmlEvent> {
    let mut events = vec![
        WbxmlEvent::start(page::AIRSYNC, airsync::SYNC),
        WbxmlEvent::start(page::AIRSYNC, airsync::COLLECTIONS),
        WbxmlEvent::start(page::AIRSYNC, airsync::COLLECTION),
    ];
    push_text_element(&mut events, page::AIRSYNC, airsync::SYNC_KEY, "0");
    push_text_element(&mut events, page::AIRSYNC, airsync::COLLECTION_ID, "C1");
    events.extend([WbxmlEvent::EndTag, WbxmlEvent::EndTag, WbxmlEvent::EndTag]);
    events
}

/// The standard WBXML vectors.
pub fn wbxml_vectors() -> Vec<WbxmlVector> {
    let base = page::AIRSYNC_BASE;
    let mut status_response = vec![WbxmlEvent::start(page::AIRSYNC, airsync::SYNC)];
    push_text_element(&mut status_response, page::AIRSYNC, airsync::STATUS, "5");
    status_response.push(WbxmlEvent::EndTag);

    vec![
        WbxmlVector::valid("empty_document", "Header only", "03016a00", Vec::new()),
        WbxmlVector::valid(
            "initial_sync_request",
            "Sync with SyncKey 0 for collection C1",
            "03016a00 455c4f4b 03300001 52034331 00010101 01",
            initial_request_events(),
        ),
        WbxmlVector::valid(
            "status_only_response",
            "Sync carrying request-level status 5",
            "03016a00 454e0335 000101",
            status_response,
        ),
        WbxmlVector::valid(
            "code_page_switch",
            "Empty AirSyncBase:Body inside AirSync:Sync",
            "03016a00 4500110a 01",
            vec![
                WbxmlEvent::start(page::AIRSYNC, airsync::SYNC),
                WbxmlEvent::SwitchCodepage(base),
                WbxmlEvent::empty(base, airsync_base::BODY),
                WbxmlEvent::EndTag,
            ],
        ),
        WbxmlVector::valid(
            "opaque_data",
            "AirSyncBase:Data with two opaque bytes",
            "03016a00 00114bc3 02dead01",
            vec![
                WbxmlEvent::SwitchCodepage(base),
                WbxmlEvent::start(base, airsync_base::DATA),
                WbxmlEvent::Opaque(vec![0xde, 0xad]),
                WbxmlEvent::EndTag,
            ],
        ),
        WbxmlVector::valid(
            "entity",
            "Character entity U+263A as a two-byte mb_u_int32",
            "03016a00 4502cc3a 01",
            vec![
                WbxmlEvent::start(page::AIRSYNC, airsync::SYNC),
                WbxmlEvent::EntityRef(0x263a),
                WbxmlEvent::EndTag,
            ],
        ),
        WbxmlVector::invalid(
            "open_tag_at_eof",
            "Input ends with elements still open",
            "03016a00 455c",
            "TruncatedStream",
        ),
        WbxmlVector::invalid(
            "unterminated_string",
            "Inline string without NUL",
            "03016a00 450361",
            "TruncatedStream",
        ),
        WbxmlVector::invalid(
            "unknown_token",
            "Token 0x3f is not defined in AirSync",
            "03016a00 7f",
            "MalformedStream",
        ),
        WbxmlVector::invalid(
            "string_table_reference",
            "STR_T is not supported",
            "03016a00 45830001",
            "MalformedStream",
        ),
        WbxmlVector::invalid(
            "end_at_root",
            "END with no open element",
            "03016a00 01",
            "MalformedStream",
        ),
    ]
}

/// The standard vectors as pretty JSON.
///
/// # Errors
///
/// Returns the serializer's error.
pub fn wbxml_vectors_json() -> serde_json::Result<String> {
    serde_json::to_string_pretty(&wbxml_vectors())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_vectors_hold() {
        for vector in wbxml_vectors() {
            vector.check().unwrap();
        }
    }

    #[test]
    fn ids_are_unique() {
        let vectors = wbxml_vectors();
        let mut ids: Vec<_> = vectors.iter().map(|v| v.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), vectors.len());
    }

    #[test]
    fn json_round_trip() {
        let json = wbxml_vectors_json().unwrap();
        let parsed: Vec<WbxmlVector> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, wbxml_vectors());
    }

    #[test]
    fn mismatch_is_reported() {
        let mut vector = wbxml_vectors().remove(1);
        vector.hex = "03016a00 4501".into();
        assert!(vector.check().is_err());
    }
}
