//! Deterministic WBXML encoder.

use crate::codepage;
use crate::error::{WbxmlError, WbxmlResult};
use crate::event::WbxmlEvent;
use crate::token;

/// Encode a complete event sequence into a WBXML document.
///
/// Output is deterministic: the same events always produce the same bytes.
/// No string table is used.
///
/// # Errors
///
/// Returns `InvalidEvent` for events that cannot be serialized, or if the
/// sequence leaves elements open.
pub fn encode<'a, I>(events: I, initial_codepage: u8) -> WbxmlResult<Vec<u8>>
where
    I: IntoIterator<Item = &'a WbxmlEvent>,
{
    let mut encoder = Encoder::new(initial_codepage);
    for event in events {
        encoder.write_event(event)?;
    }
    encoder.finish()
}

/// An incremental WBXML encoder.
///
/// The header is written on construction. Each event is validated before
/// any byte of it is written, so a rejected event leaves the buffer
/// unchanged.
pub struct Encoder {
    buffer: Vec<u8>,
    codepage: u8,
    depth: usize,
}

impl Encoder {
    /// Create a new encoder whose code page cursor starts at
    /// `initial_codepage`.
    pub fn new(initial_codepage: u8) -> Self {
        Self::with_capacity(64, initial_codepage)
    }

    /// Create a new encoder with the specified capacity.
    pub fn with_capacity(capacity: usize, initial_codepage: u8) -> Self {
        let mut buffer = Vec::with_capacity(capacity.max(token::HEADER.len()));
        buffer.extend_from_slice(&token::HEADER);
        Self {
            buffer,
            codepage: initial_codepage,
            depth: 0,
        }
    }

    /// Active code page.
    pub fn codepage(&self) -> u8 {
        self.codepage
    }

    /// Number of currently open elements.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Write one event.
    ///
    /// # Errors
    ///
    /// Returns `InvalidEvent` for an unknown token, NUL inside text,
    /// malformed attribute bytes, or an `EndTag` with nothing open.
    pub fn write_event(&mut self, event: &WbxmlEvent) -> WbxmlResult<()> {
        match event {
            WbxmlEvent::StartTag {
                codepage,
                token: tag,
                attributes,
                has_content,
            } => {
                codepage::lookup_tag(*codepage, *tag).map_err(|e| {
                    WbxmlError::invalid_event(format!("start tag: {e}"))
                })?;
                if let Some(attrs) = attributes {
                    validate_attribute_bytes(attrs)?;
                }
                self.switch_to(*codepage);
                let mut byte = *tag;
                if *has_content {
                    byte |= token::TAG_CONTENT;
                }
                if attributes.is_some() {
                    byte |= token::TAG_ATTRIBUTES;
                }
                self.buffer.push(byte);
                if let Some(attrs) = attributes {
                    self.buffer.extend_from_slice(attrs);
                    self.buffer.push(token::END);
                }
                if *has_content {
                    self.depth += 1;
                }
            }
            WbxmlEvent::EndTag => {
                if self.depth == 0 {
                    return Err(WbxmlError::invalid_event("EndTag without open element"));
                }
                self.depth -= 1;
                self.buffer.push(token::END);
            }
            WbxmlEvent::Text(text) => {
                if text.contains(&0) {
                    return Err(WbxmlError::invalid_event("NUL byte inside text"));
                }
                self.buffer.push(token::STR_I);
                self.buffer.extend_from_slice(text);
                self.buffer.push(0);
            }
            WbxmlEvent::Opaque(data) => {
                let len = u32::try_from(data.len())
                    .map_err(|_| WbxmlError::invalid_event("opaque body longer than u32"))?;
                self.buffer.push(token::OPAQUE);
                token::write_mb_u_int32(&mut self.buffer, len);
                self.buffer.extend_from_slice(data);
            }
            WbxmlEvent::SwitchCodepage(page) => {
                codepage::codepage(*page)
                    .map_err(|e| WbxmlError::invalid_event(e.to_string()))?;
                self.switch_to(*page);
            }
            WbxmlEvent::EntityRef(value) => {
                self.buffer.push(token::ENTITY);
                token::write_mb_u_int32(&mut self.buffer, *value);
            }
            WbxmlEvent::ProcessingInstruction(body) => {
                validate_attribute_bytes(body)?;
                self.buffer.push(token::PI);
                self.buffer.extend_from_slice(body);
                self.buffer.push(token::END);
            }
        }
        Ok(())
    }

    /// Open an element with content.
    ///
    /// # Errors
    ///
    /// Same as [`Encoder::write_event`].
    pub fn start(&mut self, codepage: u8, tag: u8) -> WbxmlResult<()> {
        self.write_event(&WbxmlEvent::start(codepage, tag))
    }

    /// Close the innermost element.
    ///
    /// # Errors
    ///
    /// Same as [`Encoder::write_event`].
    pub fn end(&mut self) -> WbxmlResult<()> {
        self.write_event(&WbxmlEvent::EndTag)
    }

    /// Write `<tag>text</tag>`.
    ///
    /// # Errors
    ///
    /// Same as [`Encoder::write_event`].
    pub fn text_element(&mut self, codepage: u8, tag: u8, text: &str) -> WbxmlResult<()> {
        self.start(codepage, tag)?;
        self.write_event(&WbxmlEvent::text(text))?;
        self.end()
    }

    /// Write `<tag/>`.
    ///
    /// # Errors
    ///
    /// Same as [`Encoder::write_event`].
    pub fn empty_element(&mut self, codepage: u8, tag: u8) -> WbxmlResult<()> {
        self.write_event(&WbxmlEvent::empty(codepage, tag))
    }

    /// Get a reference to the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume this encoder and return the encoded bytes, checking that
    /// every element was closed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidEvent` if elements remain open.
    pub fn finish(self) -> WbxmlResult<Vec<u8>> {
        if self.depth != 0 {
            return Err(WbxmlError::invalid_event(format!(
                "{} element(s) left open",
                self.depth
            )));
        }
        Ok(self.buffer)
    }

    /// Consume this encoder and return the encoded bytes unchecked.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    fn switch_to(&mut self, page: u8) {
        if page != self.codepage {
            self.buffer.push(token::SWITCH_PAGE);
            self.buffer.push(page);
            self.codepage = page;
        }
    }
}

/// Check that raw attribute bytes form a token list the decoder can walk
/// back to the closing `END`.
fn validate_attribute_bytes(bytes: &[u8]) -> WbxmlResult<()> {
    let invalid = |msg: &str| WbxmlError::invalid_event(format!("attribute bytes: {msg}"));
    let mut idx = 0;
    while idx < bytes.len() {
        let byte = bytes[idx];
        idx += 1;
        match byte {
            token::END => return Err(invalid("embedded END")),
            token::SWITCH_PAGE => {
                if idx >= bytes.len() {
                    return Err(invalid("SWITCH_PAGE without page"));
                }
                idx += 1;
            }
            token::STR_I => {
                let nul = bytes[idx..]
                    .iter()
                    .position(|&b| b == 0)
                    .ok_or_else(|| invalid("unterminated string"))?;
                idx += nul + 1;
            }
            token::ENTITY | token::OPAQUE => {
                let (value, used) = read_canonical_mb(&bytes[idx..])
                    .ok_or_else(|| invalid("bad multi-byte integer"))?;
                idx += used;
                if byte == token::OPAQUE {
                    let len = value as usize;
                    if bytes.len() - idx < len {
                        return Err(invalid("short opaque body"));
                    }
                    idx += len;
                }
            }
            token::LITERAL
            | token::STR_T
            | token::EXT_I_0..=token::EXT_I_2
            | token::EXT_T_0..=token::EXT_T_2
            | token::EXT_0..=token::EXT_2 => {
                return Err(invalid("unsupported token"));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Parse a shortest-form mb_u_int32 from the front of `bytes`.
fn read_canonical_mb(bytes: &[u8]) -> Option<(u32, usize)> {
    let first = *bytes.first()?;
    if first == 0x80 {
        return None;
    }
    let mut value: u64 = 0;
    for (i, &b) in bytes.iter().take(token::MAX_MB_UINT_LEN).enumerate() {
        value = (value << 7) | u64::from(b & 0x7f);
        if b & 0x80 == 0 {
            return u32::try_from(value).ok().map(|v| (v, i + 1));
        }
    }
    None
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new(codepage::page::AIRSYNC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codepage::{airsync, airsync_base, page};

    fn body(bytes: &[u8]) -> &[u8] {
        &bytes[token::HEADER.len()..]
    }

    #[test]
    fn header_only_for_empty_input() {
        assert_eq!(encode(std::iter::empty(), 0).unwrap(), token::HEADER.to_vec());
    }

    #[test]
    fn encodes_nested_sync_key() {
        let mut enc = Encoder::default();
        enc.start(page::AIRSYNC, airsync::SYNC).unwrap();
        enc.text_element(page::AIRSYNC, airsync::SYNC_KEY, "1").unwrap();
        enc.empty_element(page::AIRSYNC, airsync::MORE_AVAILABLE).unwrap();
        enc.end().unwrap();
        let bytes = enc.finish().unwrap();
        assert_eq!(
            body(&bytes),
            &[0x45, 0x4b, 0x03, b'1', 0x00, 0x01, 0x14, 0x01]
        );
    }

    #[test]
    fn switches_page_only_when_needed() {
        let events = vec![
            WbxmlEvent::start(0, airsync::SYNC),
            WbxmlEvent::SwitchCodepage(0),
            WbxmlEvent::start(17, airsync_base::BODY),
            WbxmlEvent::empty(17, airsync_base::DATA),
            WbxmlEvent::EndTag,
            WbxmlEvent::start(0, airsync::STATUS),
            WbxmlEvent::EndTag,
            WbxmlEvent::EndTag,
        ];
        let bytes = encode(&events, 0).unwrap();
        assert_eq!(
            body(&bytes),
            &[0x45, 0x00, 0x11, 0x4a, 0x0b, 0x01, 0x00, 0x00, 0x4e, 0x01, 0x01]
        );
    }

    #[test]
    fn opaque_uses_varint_length() {
        let data = vec![7u8; 200];
        let bytes = encode(&[WbxmlEvent::Opaque(data)], 0).unwrap();
        assert_eq!(&body(&bytes)[..3], &[0xc3, 0x81, 0x48]);
        assert_eq!(body(&bytes).len(), 3 + 200);
    }

    #[test]
    fn contract_violations() {
        let mut enc = Encoder::new(0);
        assert!(matches!(
            enc.write_event(&WbxmlEvent::Text(b"a\0b".to_vec())),
            Err(WbxmlError::InvalidEvent(_))
        ));
        assert!(matches!(enc.end(), Err(WbxmlError::InvalidEvent(_))));
        assert!(matches!(enc.start(0, 0x3f), Err(WbxmlError::InvalidEvent(_))));
        assert!(matches!(
            enc.write_event(&WbxmlEvent::SwitchCodepage(40)),
            Err(WbxmlError::InvalidEvent(_))
        ));
        assert!(matches!(
            enc.write_event(&WbxmlEvent::StartTag {
                codepage: 0,
                token: airsync::SYNC,
                attributes: Some(vec![0x05, 0x01]),
                has_content: false,
            }),
            Err(WbxmlError::InvalidEvent(_))
        ));
        // Rejected events leave the buffer untouched.
        assert_eq!(enc.as_bytes(), &token::HEADER);

        enc.start(0, airsync::SYNC).unwrap();
        assert!(matches!(enc.finish(), Err(WbxmlError::InvalidEvent(_))));
    }

    #[test]
    fn attributes_and_pi_written_with_end() {
        let events = vec![
            WbxmlEvent::StartTag {
                codepage: 0,
                token: airsync::SYNC,
                attributes: Some(vec![0x06, token::STR_I, b'v', 0x00]),
                has_content: false,
            },
            WbxmlEvent::ProcessingInstruction(vec![0x05]),
        ];
        let bytes = encode(&events, 0).unwrap();
        assert_eq!(
            body(&bytes),
            &[0x85, 0x06, 0x03, b'v', 0x00, 0x01, 0x43, 0x05, 0x01]
        );
    }
}
