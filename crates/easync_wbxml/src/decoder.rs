//! Streaming WBXML decoder.

use std::io::{self, Read};

use crate::codepage;
use crate::error::{WbxmlError, WbxmlResult};
use crate::event::WbxmlEvent;
use crate::token;

/// Maximum allowed opaque body or string table length.
/// This prevents allocation-based DoS from untrusted input.
pub const MAX_OPAQUE_LEN: u32 = 64 * 1024 * 1024;

/// Maximum element nesting depth.
pub const MAX_DEPTH: usize = 256;

/// Start decoding `reader`, with `initial_codepage` active before the
/// first `SWITCH_PAGE`.
pub fn decode<R: Read>(reader: R, initial_codepage: u8) -> Decoder<R> {
    Decoder::new(reader, initial_codepage)
}

/// Decode a complete in-memory document into an event list.
///
/// # Errors
///
/// Returns the first error the decoder reports.
pub fn decode_all(bytes: &[u8], initial_codepage: u8) -> WbxmlResult<Vec<WbxmlEvent>> {
    Decoder::new(bytes, initial_codepage).collect()
}

/// Parsed document header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// WBXML version byte.
    pub version: u8,
    /// Public identifier (0 means it was given as a string table index).
    pub public_id: u32,
    /// Charset MIBenum.
    pub charset: u32,
    /// Raw string table. Kept for inspection only; references into it are
    /// rejected.
    pub string_table: Vec<u8>,
}

/// A streaming WBXML decoder.
///
/// Yields one [`WbxmlEvent`] per wire construct. The header is consumed on
/// the first call to `next`. After any error the iterator is fused and
/// only returns `None`.
pub struct Decoder<R> {
    reader: R,
    pos: u64,
    codepage: u8,
    depth: usize,
    header: Option<Header>,
    done: bool,
    max_depth: usize,
    max_opaque_len: u32,
}

impl<R: Read> Decoder<R> {
    /// Create a decoder over `reader`.
    pub fn new(reader: R, initial_codepage: u8) -> Self {
        Self {
            reader,
            pos: 0,
            codepage: initial_codepage,
            depth: 0,
            header: None,
            done: false,
            max_depth: MAX_DEPTH,
            max_opaque_len: MAX_OPAQUE_LEN,
        }
    }

    /// Override the nesting limit.
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Override the opaque/string-table length limit.
    #[must_use]
    pub fn with_max_opaque_len(mut self, max_opaque_len: u32) -> Self {
        self.max_opaque_len = max_opaque_len;
        self
    }

    /// The document header, once it has been read.
    pub fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    /// Active code page.
    pub fn codepage(&self) -> u8 {
        self.codepage
    }

    /// Number of currently open elements.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> u64 {
        self.pos
    }

    fn read_optional_byte(&mut self) -> WbxmlResult<Option<u8>> {
        let mut buf = [0u8; 1];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    self.pos += 1;
                    return Ok(Some(buf[0]));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(WbxmlError::Io(e)),
            }
        }
    }

    #[inline]
    fn read_byte(&mut self, expected: &'static str) -> WbxmlResult<u8> {
        self.read_optional_byte()?
            .ok_or(WbxmlError::TruncatedStream {
                offset: self.pos,
                expected,
            })
    }

    fn read_bytes(&mut self, len: u32, expected: &'static str) -> WbxmlResult<Vec<u8>> {
        if len > self.max_opaque_len {
            return Err(WbxmlError::malformed(
                self.pos,
                format!("length {len} exceeds limit {}", self.max_opaque_len),
            ));
        }
        let mut buf = Vec::new();
        (&mut self.reader)
            .take(u64::from(len))
            .read_to_end(&mut buf)?;
        self.pos += buf.len() as u64;
        if buf.len() as u64 != u64::from(len) {
            return Err(WbxmlError::TruncatedStream {
                offset: self.pos,
                expected,
            });
        }
        Ok(buf)
    }

    /// Read a big-endian base-128 integer of at most five bytes.
    fn read_mb_u_int32(&mut self, expected: &'static str) -> WbxmlResult<u32> {
        let start = self.pos;
        let mut value: u64 = 0;
        for _ in 0..token::MAX_MB_UINT_LEN {
            let byte = self.read_byte(expected)?;
            value = (value << 7) | u64::from(byte & 0x7f);
            if byte & 0x80 == 0 {
                return u32::try_from(value)
                    .map_err(|_| WbxmlError::malformed(start, "multi-byte integer overflows u32"));
            }
        }
        Err(WbxmlError::malformed(
            start,
            "multi-byte integer longer than 5 bytes",
        ))
    }

    fn read_inline_string(&mut self) -> WbxmlResult<Vec<u8>> {
        let mut buf = Vec::new();
        loop {
            let byte = self.read_byte("string terminator")?;
            if byte == 0 {
                return Ok(buf);
            }
            if buf.len() as u64 >= u64::from(self.max_opaque_len) {
                return Err(WbxmlError::malformed(self.pos, "inline string too long"));
            }
            buf.push(byte);
        }
    }

    fn read_header(&mut self) -> WbxmlResult<Header> {
        let version = self.read_byte("version")?;
        if version > token::VERSION_1_3 {
            return Err(WbxmlError::malformed(
                0,
                format!("unsupported WBXML version 0x{version:02x}"),
            ));
        }
        let public_id = self.read_mb_u_int32("public id")?;
        if public_id == 0 {
            // Given as a string table index; the index itself is not needed.
            self.read_mb_u_int32("public id index")?;
        }
        let charset = self.read_mb_u_int32("charset")?;
        let table_len = self.read_mb_u_int32("string table length")?;
        let string_table = self.read_bytes(table_len, "string table")?;
        Ok(Header {
            version,
            public_id,
            charset,
            string_table,
        })
    }

    /// Copy an attribute-token list up to (not including) its `END`.
    fn read_attribute_list(&mut self) -> WbxmlResult<Vec<u8>> {
        let mut raw = Vec::new();
        loop {
            let offset = self.pos;
            let byte = self.read_byte("attribute list END")?;
            match byte {
                token::END => return Ok(raw),
                token::SWITCH_PAGE => {
                    raw.push(byte);
                    raw.push(self.read_byte("attribute code page")?);
                }
                token::STR_I => {
                    raw.push(byte);
                    raw.extend(self.read_inline_string()?);
                    raw.push(0);
                }
                token::ENTITY => {
                    raw.push(byte);
                    let value = self.read_mb_u_int32("entity")?;
                    token::write_mb_u_int32(&mut raw, value);
                }
                token::OPAQUE => {
                    raw.push(byte);
                    let len = self.read_mb_u_int32("opaque length")?;
                    token::write_mb_u_int32(&mut raw, len);
                    raw.extend(self.read_bytes(len, "opaque body")?);
                }
                token::LITERAL
                | token::STR_T
                | token::EXT_I_0..=token::EXT_I_2
                | token::EXT_T_0..=token::EXT_T_2
                | token::EXT_0..=token::EXT_2 => {
                    return Err(WbxmlError::malformed(
                        offset,
                        format!("unsupported attribute token 0x{byte:02x}"),
                    ));
                }
                _ => raw.push(byte),
            }
        }
    }

    fn next_event(&mut self) -> WbxmlResult<Option<WbxmlEvent>> {
        if self.header.is_none() {
            self.header = Some(self.read_header()?);
        }
        let offset = self.pos;
        let Some(byte) = self.read_optional_byte()? else {
            if self.depth > 0 {
                return Err(WbxmlError::TruncatedStream {
                    offset,
                    expected: "END for open element",
                });
            }
            return Ok(None);
        };

        let event = match byte {
            token::SWITCH_PAGE => {
                let page = self.read_byte("code page")?;
                codepage::codepage(page)
                    .map_err(|e| WbxmlError::malformed(offset, e.to_string()))?;
                self.codepage = page;
                WbxmlEvent::SwitchCodepage(page)
            }
            token::END => {
                if self.depth == 0 {
                    return Err(WbxmlError::malformed(offset, "END without open element"));
                }
                self.depth -= 1;
                WbxmlEvent::EndTag
            }
            token::ENTITY => WbxmlEvent::EntityRef(self.read_mb_u_int32("entity")?),
            token::STR_I => WbxmlEvent::Text(self.read_inline_string()?),
            token::OPAQUE => {
                let len = self.read_mb_u_int32("opaque length")?;
                WbxmlEvent::Opaque(self.read_bytes(len, "opaque body")?)
            }
            token::PI => WbxmlEvent::ProcessingInstruction(self.read_attribute_list()?),
            _ if byte & token::TAG_MASK < codepage::MIN_TAG_TOKEN => {
                // LITERAL*, STR_T and the extension tokens.
                return Err(WbxmlError::malformed(
                    offset,
                    format!("unsupported global token 0x{byte:02x}"),
                ));
            }
            _ => {
                let tag = byte & token::TAG_MASK;
                codepage::lookup_tag(self.codepage, tag)
                    .map_err(|e| WbxmlError::malformed(offset, e.to_string()))?;
                let attributes = if byte & token::TAG_ATTRIBUTES != 0 {
                    Some(self.read_attribute_list()?)
                } else {
                    None
                };
                let has_content = byte & token::TAG_CONTENT != 0;
                if has_content {
                    if self.depth >= self.max_depth {
                        return Err(WbxmlError::malformed(offset, "nesting too deep"));
                    }
                    self.depth += 1;
                }
                WbxmlEvent::StartTag {
                    codepage: self.codepage,
                    token: tag,
                    attributes,
                    has_content,
                }
            }
        };
        Ok(Some(event))
    }
}

impl<R: Read> Iterator for Decoder<R> {
    type Item = WbxmlResult<WbxmlEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_event() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<R: Read> std::iter::FusedIterator for Decoder<R> {}
