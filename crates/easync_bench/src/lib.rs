//! Benchmark utilities.

#![warn(missing_docs)]

use easync_engine::MemoryBackend;
use easync_wbxml::codepage::{airsync, airsync_base, page};
use easync_wbxml::{push_text_element, WbxmlEvent};
use rand::Rng;

/// Generate random bytes of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate random lowercase text of the specified length.
pub fn random_text(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen_range(b'a'..=b'z') as char).collect()
}

/// An email payload whose body holds `body_len` bytes of text.
pub fn email_item(body_len: usize) -> Vec<WbxmlEvent> {
    let mut events = Vec::new();
    push_text_element(&mut events, page::EMAIL, 0x14, &random_text(24));
    events.push(WbxmlEvent::start(page::AIRSYNC_BASE, airsync_base::BODY));
    push_text_element(&mut events, page::AIRSYNC_BASE, airsync_base::TYPE, "1");
    push_text_element(&mut events, page::AIRSYNC_BASE, airsync_base::DATA, &random_text(body_len));
    events.push(WbxmlEvent::EndTag);
    events
}

/// A `Sync` document with `items` server adds, shaped like a response.
pub fn sync_document(items: usize, body_len: usize) -> Vec<WbxmlEvent> {
    let mut events = vec![
        WbxmlEvent::start(page::AIRSYNC, airsync::SYNC),
        WbxmlEvent::start(page::AIRSYNC, airsync::COLLECTIONS),
        WbxmlEvent::start(page::AIRSYNC, airsync::COLLECTION),
    ];
    push_text_element(&mut events, page::AIRSYNC, airsync::SYNC_KEY, "1");
    push_text_element(&mut events, page::AIRSYNC, airsync::COLLECTION_ID, "inbox");
    events.push(WbxmlEvent::start(page::AIRSYNC, airsync::COMMANDS));
    for i in 0..items {
        events.push(WbxmlEvent::start(page::AIRSYNC, airsync::ADD));
        push_text_element(&mut events, page::AIRSYNC, airsync::SERVER_ID, &format!("inbox:{i}"));
        events.push(WbxmlEvent::start(page::AIRSYNC, airsync::APPLICATION_DATA));
        events.extend(email_item(body_len));
        events.push(WbxmlEvent::EndTag);
        events.push(WbxmlEvent::EndTag);
    }
    events.extend([
        WbxmlEvent::EndTag,
        WbxmlEvent::EndTag,
        WbxmlEvent::EndTag,
        WbxmlEvent::EndTag,
    ]);
    events
}

/// A backend with `items` email items in `collection_id`.
pub fn populated_backend(collection_id: &str, items: usize, body_len: usize) -> MemoryBackend {
    let backend = MemoryBackend::new();
    for i in 0..items {
        backend.add(collection_id, &format!("item-{i}"), email_item(body_len));
    }
    backend
}
