//! Property-based test generators using proptest.
//!
//! Provides strategies for generating event sequences, sync keys, change
//! operations and request documents that keep the codec's invariants.

use easync_state::{ChangeOp, SyncKey};
use easync_wbxml::codepage::{self, airsync_base, page};
use easync_wbxml::{push_text_element, WbxmlEvent};
use proptest::prelude::*;
use uuid::Uuid;

use crate::fixtures::{email_payload, SyncRequestBuilder};

/// Strategy for a `(codepage, token)` pair defined in the tables.
pub fn tag_strategy() -> impl Strategy<Value = (u8, u8)> {
    let pages = u8::try_from(codepage::codepage_count()).unwrap_or(u8::MAX);
    (0..pages).prop_flat_map(|cp| {
        let tags = codepage::codepage(cp).map(|c| c.tags().to_vec()).unwrap_or_default();
        (Just(cp), prop::sample::select(tags).prop_map(|(token, _)| token))
    })
}

/// Strategy for text content without NUL bytes.
pub fn text_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9 .,:@äöü€]{0,24}").expect("Invalid regex")
}

/// Strategy for a leaf: text, opaque data, an entity or an empty tag.
pub fn leaf_strategy() -> impl Strategy<Value = Vec<WbxmlEvent>> {
    prop_oneof![
        3 => text_strategy().prop_map(|s| vec![WbxmlEvent::text(s)]),
        2 => prop::collection::vec(any::<u8>(), 0..64).prop_map(|b| vec![WbxmlEvent::Opaque(b)]),
        1 => (1u32..0x10_ffff).prop_map(|v| vec![WbxmlEvent::EntityRef(v)]),
        2 => tag_strategy().prop_map(|(cp, t)| vec![WbxmlEvent::empty(cp, t)]),
    ]
}

/// Strategy for one well-formed element with nested content.
pub fn element_strategy() -> impl Strategy<Value = Vec<WbxmlEvent>> {
    leaf_strategy().prop_recursive(4, 64, 6, |inner| {
        (tag_strategy(), prop::collection::vec(inner, 0..6)).prop_map(|((cp, t), children)| {
            let mut events = vec![WbxmlEvent::start(cp, t)];
            events.extend(children.into_iter().flatten());
            events.push(WbxmlEvent::EndTag);
            events
        })
    })
}

/// Strategy for a whole document: one root element.
pub fn document_strategy() -> impl Strategy<Value = Vec<WbxmlEvent>> {
    (tag_strategy(), prop::collection::vec(element_strategy(), 0..4)).prop_map(
        |((cp, t), children)| {
            let mut events = vec![WbxmlEvent::start(cp, t)];
            events.extend(children.into_iter().flatten());
            events.push(WbxmlEvent::EndTag);
            events
        },
    )
}

/// Strategy for sync keys in both styles.
pub fn sync_key_strategy() -> impl Strategy<Value = SyncKey> {
    prop_oneof![
        Just(SyncKey::initial()),
        (1u64..1_000_000).prop_map(SyncKey::counter),
        (any::<u128>(), 1u64..1_000_000)
            .prop_map(|(g, n)| SyncKey::with_guid(Uuid::from_u128(g), n)),
    ]
}

/// Strategy for item ids from a small pool, so operations collide.
pub fn item_id_strategy(pool: u8) -> impl Strategy<Value = String> {
    (0..pool.max(1)).prop_map(|i| format!("item-{i}"))
}

/// Strategy for a body payload of a given type.
pub fn body_payload_strategy() -> impl Strategy<Value = Vec<WbxmlEvent>> {
    (1u32..=4, "[a-z ]{0,200}").prop_map(|(body_type, data)| {
        let base = page::AIRSYNC_BASE;
        let mut events = vec![WbxmlEvent::start(base, airsync_base::BODY)];
        push_text_element(&mut events, base, airsync_base::TYPE, &body_type.to_string());
        push_text_element(&mut events, base, airsync_base::DATA, &data);
        events.push(WbxmlEvent::EndTag);
        events
    })
}

/// Strategy for one server change against a small item pool.
pub fn change_op_strategy(pool: u8) -> impl Strategy<Value = ChangeOp> {
    prop_oneof![
        3 => (item_id_strategy(pool), text_strategy())
            .prop_map(|(id, s)| ChangeOp::add(id, email_payload(&s, "body"))),
        2 => (item_id_strategy(pool), text_strategy())
            .prop_map(|(id, s)| ChangeOp::change(id, email_payload(&s, "body"))),
        1 => item_id_strategy(pool).prop_map(ChangeOp::delete),
        1 => item_id_strategy(pool).prop_map(ChangeOp::soft_delete),
    ]
}

/// Strategy for a sequence of server changes.
pub fn change_sequence_strategy(
    pool: u8,
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<ChangeOp>> {
    prop::collection::vec(change_op_strategy(pool), min_ops..max_ops)
}

/// A client command as generated for request documents.
#[derive(Debug, Clone)]
pub enum ClientOp {
    /// Client `Add` with a client id.
    Add(String),
    /// Client `Change` of a server id.
    Change(String),
    /// Client `Delete` of a server id.
    Delete(String),
    /// Client `Fetch` of a server id.
    Fetch(String),
}

/// Strategy for client commands.
pub fn client_op_strategy() -> impl Strategy<Value = ClientOp> {
    let id = || prop::string::string_regex("[a-z0-9:]{1,12}").expect("Invalid regex");
    prop_oneof![
        3 => id().prop_map(ClientOp::Add),
        2 => id().prop_map(ClientOp::Change),
        1 => id().prop_map(ClientOp::Delete),
        1 => id().prop_map(ClientOp::Fetch),
    ]
}

/// Strategy for a request document with one collection.
pub fn sync_request_strategy() -> impl Strategy<Value = Vec<u8>> {
    (
        sync_key_strategy(),
        "[A-Za-z0-9]{1,8}",
        prop::option::of(any::<bool>()),
        prop::option::of(0u32..600),
        prop::collection::vec(client_op_strategy(), 0..6),
    )
        .prop_map(|(key, collection, get_changes, window, ops)| {
            let mut builder = SyncRequestBuilder::new().collection(&key.to_string(), &collection);
            if let Some(get) = get_changes {
                builder = builder.get_changes(get);
            }
            if let Some(size) = window {
                builder = builder.window_size(size);
            }
            for op in ops {
                builder = match op {
                    ClientOp::Add(id) => builder.add(&id, email_payload("subject", "body")),
                    ClientOp::Change(id) => builder.change(&id, email_payload("edited", "body")),
                    ClientOp::Delete(id) => builder.delete(&id),
                    ClientOp::Fetch(id) => builder.fetch(&id),
                };
            }
            builder.build()
        })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
