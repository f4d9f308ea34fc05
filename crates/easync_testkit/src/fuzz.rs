//! Fuzz testing harnesses for easync.
//!
//! Fuzz targets that can be driven by cargo-fuzz or by proptest. None of
//! them may panic on any input.

use easync_protocol::SyncRequest;
use easync_server::TransportRequest;
use easync_wbxml::{decode, decode_all, encode, normalize, WbxmlEvent};

use crate::fixtures::ServerFixture;

/// Fuzz target for WBXML decoding.
///
/// Arbitrary bytes either decode or yield an error; the decoder is fused
/// after the first error.
pub fn fuzz_decode(data: &[u8]) {
    let mut decoder = decode(data, 0);
    for event in decoder.by_ref() {
        if event.is_err() {
            break;
        }
    }
    assert!(decoder.next().is_none(), "Decoder yielded after an error");
}

/// Fuzz target for decode/encode stability.
///
/// Whatever decodes must re-encode and decode to the same events.
pub fn fuzz_roundtrip(data: &[u8]) {
    let Ok(events) = decode_all(data, 0) else {
        return;
    };
    let Ok(encoded) = encode(&events, 0) else {
        return;
    };
    let decoded = decode_all(&encoded, 0).expect("Re-encoded document must decode");
    assert_eq!(decoded, normalize(&events, 0), "Roundtrip mismatch");
}

/// Fuzz target for the request parser.
pub fn fuzz_sync_request(data: &[u8]) {
    let _ = SyncRequest::from_wbxml(data);
}

/// Fuzz target for the request parser over well-formed event streams.
pub fn fuzz_sync_events(events: &[WbxmlEvent]) {
    let _ = SyncRequest::from_events(events.iter().cloned().map(Ok));
}

/// Fuzz target for the server.
///
/// Every body gets an HTTP status; only 200 carries a body.
pub fn fuzz_server(data: &[u8]) {
    let fixture = ServerFixture::memory();
    fixture.seed("C1", 2);
    let response = fixture.server.handle(&TransportRequest::new("fuzz", data.to_vec()));
    assert!(
        matches!(response.status, 200 | 400 | 413 | 500 | 501 | 503),
        "Unexpected status {}",
        response.status
    );
    if response.status == 200 {
        assert!(decode_all(&response.body, 0).is_ok(), "200 with undecodable body");
    } else {
        assert!(response.body.is_empty());
    }
}
