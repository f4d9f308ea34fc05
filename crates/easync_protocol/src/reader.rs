//! Single-pass element reader over a WBXML event stream.

use easync_wbxml::{qualified_name, WbxmlEvent, WbxmlResult};

use crate::error::{ProtocolError, ProtocolResult};

/// A start tag seen by the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Element {
    pub codepage: u8,
    pub token: u8,
    pub has_content: bool,
}

impl Element {
    pub fn is(&self, codepage: u8, token: u8) -> bool {
        self.codepage == codepage && self.token == token
    }

    pub fn name(&self) -> String {
        qualified_name(self.codepage, self.token)
            .unwrap_or_else(|_| format!("{}:0x{:02x}", self.codepage, self.token))
    }
}

/// Walks events one element at a time. Code page switches are consumed
/// silently; every start tag already carries its page.
pub(crate) struct EventReader<I> {
    events: I,
}

impl<I> EventReader<I>
where
    I: Iterator<Item = WbxmlResult<WbxmlEvent>>,
{
    pub fn new(events: I) -> Self {
        Self { events }
    }

    fn next_event(&mut self) -> ProtocolResult<Option<WbxmlEvent>> {
        loop {
            match self.events.next() {
                None => return Ok(None),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(WbxmlEvent::SwitchCodepage(_))) => continue,
                Some(Ok(event)) => return Ok(Some(event)),
            }
        }
    }

    /// The document's root element.
    pub fn root(&mut self) -> ProtocolResult<Option<Element>> {
        loop {
            match self.next_event()? {
                None => return Ok(None),
                Some(WbxmlEvent::ProcessingInstruction(_)) => continue,
                Some(WbxmlEvent::StartTag {
                    codepage,
                    token,
                    has_content,
                    ..
                }) => {
                    return Ok(Some(Element {
                        codepage,
                        token,
                        has_content,
                    }))
                }
                Some(other) => {
                    return Err(ProtocolError::UnexpectedElement(format!(
                        "{other:?} before root element"
                    )))
                }
            }
        }
    }

    /// Next child of the element being read, or `None` once its `EndTag`
    /// is consumed. Must only be called inside an element with content.
    pub fn next_child(&mut self) -> ProtocolResult<Option<Element>> {
        match self.next_event()? {
            None => Err(ProtocolError::MissingElement("end tag")),
            Some(WbxmlEvent::EndTag) => Ok(None),
            Some(WbxmlEvent::StartTag {
                codepage,
                token,
                has_content,
                ..
            }) => Ok(Some(Element {
                codepage,
                token,
                has_content,
            })),
            Some(other) => Err(ProtocolError::UnexpectedElement(format!(
                "{other:?} inside container"
            ))),
        }
    }

    /// Text content of a leaf element.
    pub fn text(&mut self, element: &Element, name: &'static str) -> ProtocolResult<String> {
        if !element.has_content {
            return Ok(String::new());
        }
        let mut bytes = Vec::new();
        loop {
            match self.next_event()? {
                None => return Err(ProtocolError::MissingElement("end tag")),
                Some(WbxmlEvent::EndTag) => break,
                Some(WbxmlEvent::Text(t) | WbxmlEvent::Opaque(t)) => bytes.extend(t),
                Some(WbxmlEvent::EntityRef(cp)) => {
                    let c = char::from_u32(cp)
                        .ok_or_else(|| ProtocolError::invalid_value(name, format!("&#{cp};")))?;
                    let mut buf = [0u8; 4];
                    bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                }
                Some(other) => {
                    return Err(ProtocolError::UnexpectedElement(format!(
                        "{other:?} inside {name}"
                    )))
                }
            }
        }
        String::from_utf8(bytes).map_err(|e| {
            ProtocolError::invalid_value(name, String::from_utf8_lossy(e.as_bytes()).into_owned())
        })
    }

    /// Unsigned integer content of a leaf element.
    pub fn number(&mut self, element: &Element, name: &'static str) -> ProtocolResult<u32> {
        let text = self.text(element, name)?;
        text.trim()
            .parse()
            .map_err(|_| ProtocolError::invalid_value(name, text))
    }

    /// Boolean leaf: an empty tag or a non-zero number is true.
    pub fn flag(&mut self, element: &Element, name: &'static str) -> ProtocolResult<bool> {
        if !element.has_content {
            return Ok(true);
        }
        let text = self.text(element, name)?;
        match text.trim() {
            "" | "1" => Ok(true),
            "0" => Ok(false),
            _ => Err(ProtocolError::invalid_value(name, text)),
        }
    }

    /// Everything inside an element, for opaque pass-through.
    pub fn capture(&mut self, element: &Element) -> ProtocolResult<Vec<WbxmlEvent>> {
        let mut captured = Vec::new();
        if !element.has_content {
            return Ok(captured);
        }
        let mut depth = 0usize;
        loop {
            let event = self
                .next_event()?
                .ok_or(ProtocolError::MissingElement("end tag"))?;
            match &event {
                WbxmlEvent::EndTag if depth == 0 => return Ok(captured),
                WbxmlEvent::EndTag => depth -= 1,
                e if e.opens_element() => depth += 1,
                _ => {}
            }
            captured.push(event);
        }
    }

    /// Discard an element and its content.
    pub fn skip(&mut self, element: &Element) -> ProtocolResult<()> {
        self.capture(element).map(|_| ())
    }

    /// Consume the rest of the stream after the root element. Only
    /// processing instructions may follow it.
    pub fn finish(&mut self) -> ProtocolResult<()> {
        loop {
            match self.next_event()? {
                None => return Ok(()),
                Some(WbxmlEvent::ProcessingInstruction(_)) => continue,
                Some(other) => {
                    return Err(ProtocolError::UnexpectedElement(format!(
                        "{other:?} after root element"
                    )))
                }
            }
        }
    }
}
