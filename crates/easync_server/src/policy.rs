//! Per-device body preference and truncation.

use std::ops::Range;

use easync_protocol::{BodyPreference, PayloadFilter};
use easync_wbxml::codepage::{airsync_base, page};
use easync_wbxml::WbxmlEvent;

/// What a device accepts in `AirSyncBase:Body`.
///
/// Applied to every item payload written to the device: when a payload
/// carries several `Body` variants only the preferred type is kept, and
/// `Data` longer than the truncation size is cut with `Truncated` set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DevicePolicy {
    /// Preferred `AirSyncBase:Type` (1 plain, 2 HTML, 3 RTF, 4 MIME).
    pub body_type: Option<u32>,
    /// Maximum `Data` size in bytes.
    pub truncation_size: Option<u32>,
    /// Send an empty `Data` instead of a truncated one.
    pub all_or_none: bool,
}

impl DevicePolicy {
    /// A policy that changes nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the preferred body type.
    pub fn with_body_type(mut self, body_type: u32) -> Self {
        self.body_type = Some(body_type);
        self
    }

    /// Sets the truncation size.
    pub fn with_truncation_size(mut self, size: u32) -> Self {
        self.truncation_size = Some(size);
        self
    }

    /// Drop oversized bodies entirely instead of truncating them.
    pub fn with_all_or_none(mut self, all_or_none: bool) -> Self {
        self.all_or_none = all_or_none;
        self
    }

    /// Narrow this policy by the client's first `BodyPreference`. The
    /// client picks the type; the smaller truncation size wins, and
    /// `AllOrNone` from either side holds.
    pub fn narrowed_by(&self, preferences: &[BodyPreference]) -> Self {
        let Some(pref) = preferences.first() else {
            return self.clone();
        };
        let truncation_size = match (self.truncation_size, pref.truncation_size) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            body_type: Some(pref.body_type),
            truncation_size,
            all_or_none: self.all_or_none || pref.all_or_none,
        }
    }

    fn rewrite_body(&self, body: &[WbxmlEvent]) -> Vec<WbxmlEvent> {
        let Some(limit) = self.truncation_size else {
            return body.to_vec();
        };
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        if body.len() < 2 || !body[0].opens_element() {
            return body.to_vec();
        }
        let inner = &body[1..body.len() - 1];
        let children = elements(inner);
        let oversized = children.iter().any(|r| {
            is_tag(&inner[r.start], airsync_base::DATA) && content_len(&inner[r.clone()]) > limit
        });
        if !oversized {
            return body.to_vec();
        }

        let mut out = Vec::with_capacity(body.len() + 3);
        out.push(body[0].clone());
        for range in children {
            let child = &inner[range];
            if is_tag(&child[0], airsync_base::TRUNCATED) {
                continue;
            }
            if is_tag(&child[0], airsync_base::DATA) {
                let (cut, kept) = truncate(child, limit);
                if cut {
                    out.push(WbxmlEvent::start(page::AIRSYNC_BASE, airsync_base::TRUNCATED));
                    out.push(WbxmlEvent::text("1"));
                    out.push(WbxmlEvent::EndTag);
                }
                if cut && self.all_or_none {
                    out.push(WbxmlEvent::empty(page::AIRSYNC_BASE, airsync_base::DATA));
                } else {
                    out.extend(kept);
                }
                continue;
            }
            out.extend_from_slice(child);
        }
        out.push(WbxmlEvent::EndTag);
        out
    }
}

impl PayloadFilter for DevicePolicy {
    fn filter(&self, payload: &[WbxmlEvent]) -> Vec<WbxmlEvent> {
        let parts = elements(payload);
        let keep = self.body_type.filter(|wanted| {
            parts.iter().any(|r| {
                is_tag(&payload[r.start], airsync_base::BODY)
                    && body_type(&payload[r.clone()]) == Some(*wanted)
            })
        });

        let mut out = Vec::with_capacity(payload.len());
        for range in parts {
            let part = &payload[range];
            if !is_tag(&part[0], airsync_base::BODY) {
                out.extend_from_slice(part);
                continue;
            }
            if keep.is_some_and(|wanted| body_type(part) != Some(wanted)) {
                continue;
            }
            out.extend(self.rewrite_body(part));
        }
        out
    }
}

/// Ranges of the top-level elements and loose events in `events`.
fn elements(events: &[WbxmlEvent]) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, event) in events.iter().enumerate() {
        if depth == 0 {
            start = i;
        }
        if event.opens_element() {
            depth += 1;
        } else if *event == WbxmlEvent::EndTag {
            depth = depth.saturating_sub(1);
        }
        if depth == 0 {
            ranges.push(start..i + 1);
        }
    }
    if depth > 0 {
        ranges.push(start..events.len());
    }
    ranges
}

fn is_tag(event: &WbxmlEvent, token: u8) -> bool {
    event.tag() == Some((page::AIRSYNC_BASE, token))
}

fn text_of(element: &[WbxmlEvent]) -> Vec<u8> {
    element
        .iter()
        .filter_map(|e| match e {
            WbxmlEvent::Text(t) | WbxmlEvent::Opaque(t) => Some(t.as_slice()),
            _ => None,
        })
        .flatten()
        .copied()
        .collect()
}

fn content_len(element: &[WbxmlEvent]) -> usize {
    element
        .iter()
        .map(|e| match e {
            WbxmlEvent::Text(t) | WbxmlEvent::Opaque(t) => t.len(),
            _ => 0,
        })
        .sum()
}

/// `AirSyncBase:Type` of a `Body` element.
fn body_type(body: &[WbxmlEvent]) -> Option<u32> {
    if body.len() < 2 {
        return None;
    }
    let inner = &body[1..body.len() - 1];
    elements(inner)
        .into_iter()
        .find(|r| is_tag(&inner[r.start], airsync_base::TYPE))
        .and_then(|r| String::from_utf8(text_of(&inner[r])).ok())
        .and_then(|t| t.trim().parse().ok())
}

/// Cut a `Data` element's content to `limit` bytes, keeping UTF-8 text on
/// a character boundary.
fn truncate(data: &[WbxmlEvent], limit: usize) -> (bool, Vec<WbxmlEvent>) {
    let opaque = data.iter().any(|e| matches!(e, WbxmlEvent::Opaque(_)));
    let mut bytes = text_of(data);
    if bytes.len() <= limit {
        return (false, data.to_vec());
    }
    let mut end = limit;
    if !opaque {
        while end > 0 && bytes[end] & 0xc0 == 0x80 {
            end -= 1;
        }
    }
    bytes.truncate(end);
    if bytes.is_empty() {
        return (true, vec![WbxmlEvent::empty(page::AIRSYNC_BASE, airsync_base::DATA)]);
    }
    let content = if opaque {
        WbxmlEvent::Opaque(bytes)
    } else {
        WbxmlEvent::Text(bytes)
    };
    let events = vec![
        WbxmlEvent::start(page::AIRSYNC_BASE, airsync_base::DATA),
        content,
        WbxmlEvent::EndTag,
    ];
    (true, events)
}
