//! # easync WBXML
//!
//! Streaming WBXML 1.3 encoding/decoding with the ActiveSync
//! (MS-ASWBXML) code page tables.
//!
//! Documents are handled as a flat sequence of [`WbxmlEvent`]s; no tree
//! is ever built. The decoder is an iterator over any `Read`, the encoder
//! writes incrementally into a buffer.
//!
//! ## Wire rules
//!
//! - Header: version 0x03, public id 0x01, charset UTF-8 (0x6A), empty
//!   string table
//! - Tag byte: low six bits are the token, 0x40 marks content, 0x80 marks
//!   attributes
//! - Multi-byte integers are big-endian base-128 and at most five bytes
//! - String table references and extension tokens are rejected
//!
//! ## Usage
//!
//! ```
//! use easync_wbxml::{decode_all, encode, WbxmlEvent};
//! use easync_wbxml::codepage::airsync;
//!
//! let events = vec![
//!     WbxmlEvent::start(0, airsync::SYNC),
//!     WbxmlEvent::start(0, airsync::SYNC_KEY),
//!     WbxmlEvent::text("0"),
//!     WbxmlEvent::EndTag,
//!     WbxmlEvent::EndTag,
//! ];
//! let bytes = encode(&events, 0).unwrap();
//! assert_eq!(decode_all(&bytes, 0).unwrap(), events);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod codepage;
mod decoder;
mod encoder;
mod error;
mod event;
pub mod token;

pub use codepage::{
    codepage, codepage_by_namespace, lookup_tag, lookup_token, qualified_name, Codepage,
};
pub use decoder::{decode, decode_all, Decoder, Header, MAX_DEPTH, MAX_OPAQUE_LEN};
pub use encoder::{encode, Encoder};
pub use error::{WbxmlError, WbxmlResult};
pub use event::{normalize, push_text_element, WbxmlEvent};

#[cfg(test)]
mod tests {
    use super::*;
    use codepage::{airsync, airsync_base, page};
    use proptest::prelude::*;

    fn roundtrip(events: &[WbxmlEvent]) -> Vec<WbxmlEvent> {
        let bytes = encode(events, 0).unwrap();
        decode_all(&bytes, 0).unwrap()
    }

    #[test]
    fn opaque_boundary_sizes() {
        for size in [0usize, 1, 100_000] {
            let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            let events = vec![
                WbxmlEvent::start(page::AIRSYNC_BASE, airsync_base::DATA),
                WbxmlEvent::Opaque(data),
                WbxmlEvent::EndTag,
            ];
            assert_eq!(roundtrip(&events), normalize(&events, 0), "size {size}");
        }
    }

    #[test]
    fn encoding_is_deterministic() {
        let events = vec![
            WbxmlEvent::start(0, airsync::SYNC),
            WbxmlEvent::start(17, airsync_base::BODY),
            WbxmlEvent::text("hello"),
            WbxmlEvent::EndTag,
            WbxmlEvent::EntityRef(0x263a),
            WbxmlEvent::EndTag,
        ];
        let a = encode(&events, 0).unwrap();
        let b = encode(&events, 0).unwrap();
        assert_eq!(a, b);
        assert_eq!(decode_all(&a, 0).unwrap(), normalize(&events, 0));
    }

    #[test]
    fn initial_codepage_is_respected() {
        let events = vec![WbxmlEvent::empty(7, 0x16)];
        let bytes = encode(&events, 7).unwrap();
        assert_eq!(&bytes[4..], &[0x16]);
        assert_eq!(decode_all(&bytes, 7).unwrap(), events);
    }

    fn arb_tag() -> impl Strategy<Value = (u8, u8)> {
        (0u8..25).prop_flat_map(|cp| {
            let tags = codepage(cp).unwrap().tags();
            (Just(cp), prop::sample::select(tags.to_vec()).prop_map(|(t, _)| t))
        })
    }

    fn arb_leaf() -> impl Strategy<Value = Vec<WbxmlEvent>> {
        prop_oneof![
            "[a-zA-Z0-9 ]{0,16}".prop_map(|s| vec![WbxmlEvent::text(s)]),
            prop::collection::vec(any::<u8>(), 0..32).prop_map(|b| vec![WbxmlEvent::Opaque(b)]),
            any::<u32>().prop_map(|v| vec![WbxmlEvent::EntityRef(v)]),
            arb_tag().prop_map(|(cp, t)| vec![WbxmlEvent::empty(cp, t)]),
        ]
    }

    fn arb_element() -> impl Strategy<Value = Vec<WbxmlEvent>> {
        arb_leaf().prop_recursive(4, 48, 6, |inner| {
            (arb_tag(), prop::collection::vec(inner, 0..6)).prop_map(|((cp, t), children)| {
                let mut events = vec![WbxmlEvent::start(cp, t)];
                events.extend(children.into_iter().flatten());
                events.push(WbxmlEvent::EndTag);
                events
            })
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        #[test]
        fn decode_encode_roundtrip(events in arb_element()) {
            let bytes = encode(&events, 0).unwrap();
            let decoded = decode_all(&bytes, 0).unwrap();
            prop_assert_eq!(&decoded, &normalize(&events, 0));
            // Decoded form re-encodes to the same bytes.
            prop_assert_eq!(encode(&decoded, 0).unwrap(), bytes);
        }

        #[test]
        fn decoder_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            for event in decode(bytes.as_slice(), 0) {
                if event.is_err() {
                    break;
                }
            }
        }
    }
}
