//! The streaming WBXML event model.

use serde::{Deserialize, Serialize};

/// One element of a WBXML document, in wire order.
///
/// Documents are never materialized as a tree; producers and consumers
/// walk the event sequence. Attribute lists and processing instructions
/// are carried as their raw attribute-token bytes (everything between the
/// introducing byte and the closing `END`, exclusive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WbxmlEvent {
    /// Opening tag.
    StartTag {
        /// Code page the token belongs to.
        codepage: u8,
        /// Token within the page (0x05..=0x3f).
        token: u8,
        /// Raw attribute bytes when the tag carries attributes.
        attributes: Option<Vec<u8>>,
        /// Whether content (and a matching `EndTag`) follows.
        has_content: bool,
    },
    /// Closes the innermost open tag with content.
    EndTag,
    /// Inline string. Never contains NUL.
    Text(Vec<u8>),
    /// Length-prefixed binary payload.
    Opaque(Vec<u8>),
    /// Explicit code page switch.
    SwitchCodepage(u8),
    /// Character entity.
    EntityRef(u32),
    /// Processing instruction body.
    ProcessingInstruction(Vec<u8>),
}

impl WbxmlEvent {
    /// Opening tag with content and no attributes.
    pub fn start(codepage: u8, token: u8) -> Self {
        Self::StartTag {
            codepage,
            token,
            attributes: None,
            has_content: true,
        }
    }

    /// Empty tag (`<Tag/>`).
    pub fn empty(codepage: u8, token: u8) -> Self {
        Self::StartTag {
            codepage,
            token,
            attributes: None,
            has_content: false,
        }
    }

    /// Text from a string slice.
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into().into_bytes())
    }

    /// Returns `(codepage, token)` if this is a start tag.
    pub fn tag(&self) -> Option<(u8, u8)> {
        match self {
            Self::StartTag {
                codepage, token, ..
            } => Some((*codepage, *token)),
            _ => None,
        }
    }

    /// True for a start tag whose content is followed by an `EndTag`.
    pub fn opens_element(&self) -> bool {
        matches!(
            self,
            Self::StartTag {
                has_content: true,
                ..
            }
        )
    }
}

/// Append `<tag>text</tag>` to an event list.
pub fn push_text_element(events: &mut Vec<WbxmlEvent>, codepage: u8, token: u8, text: &str) {
    events.push(WbxmlEvent::start(codepage, token));
    events.push(WbxmlEvent::text(text));
    events.push(WbxmlEvent::EndTag);
}

/// Rewrite `events` into the form the decoder yields for the encoder's
/// output.
///
/// Code page changes become explicit `SwitchCodepage` events placed right
/// before the tag that needs them, and redundant switches are dropped.
/// `decode(encode(events)) == normalize(events)` for every encodable
/// sequence.
pub fn normalize(events: &[WbxmlEvent], initial_codepage: u8) -> Vec<WbxmlEvent> {
    let mut out = Vec::with_capacity(events.len());
    let mut cursor = initial_codepage;
    for event in events {
        match event {
            WbxmlEvent::SwitchCodepage(cp) => {
                if *cp != cursor {
                    out.push(WbxmlEvent::SwitchCodepage(*cp));
                    cursor = *cp;
                }
            }
            WbxmlEvent::StartTag { codepage, .. } => {
                if *codepage != cursor {
                    out.push(WbxmlEvent::SwitchCodepage(*codepage));
                    cursor = *codepage;
                }
                out.push(event.clone());
            }
            other => out.push(other.clone()),
        }
    }
    out
}
