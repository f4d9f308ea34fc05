//! The server side of a `Sync` exchange.

use std::collections::HashMap;

use easync_state::{ChangeKind, ChangeOp, ClientReply, ReplyKind};
use easync_wbxml::codepage::{airsync, page};
use easync_wbxml::{Encoder, WbxmlEvent, WbxmlResult};

use crate::status::SyncStatus;

/// Rewrites item payloads on their way to the device.
///
/// Applied to every `ApplicationData` written, so a device policy (body
/// preference, truncation) is enforced in one place.
pub trait PayloadFilter {
    /// Return the events to write for `payload`.
    fn filter(&self, payload: &[WbxmlEvent]) -> Vec<WbxmlEvent>;
}

/// Writes payloads unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unfiltered;

impl PayloadFilter for Unfiltered {
    fn filter(&self, payload: &[WbxmlEvent]) -> Vec<WbxmlEvent> {
        payload.to_vec()
    }
}

/// Picks the payload filter for each collection of a response.
pub trait ResponseFilter {
    /// Filter for the payloads of `collection_id`.
    fn for_collection(&self, collection_id: &str) -> &dyn PayloadFilter;
}

impl<F: PayloadFilter> ResponseFilter for F {
    fn for_collection(&self, _collection_id: &str) -> &dyn PayloadFilter {
        self
    }
}

/// One filter per collection, with a fallback for the rest.
#[derive(Debug, Clone, Default)]
pub struct PerCollection<F> {
    fallback: F,
    collections: HashMap<String, F>,
}

impl<F: PayloadFilter> PerCollection<F> {
    /// Use `fallback` for collections without their own filter.
    pub fn new(fallback: F) -> Self {
        Self {
            fallback,
            collections: HashMap::new(),
        }
    }

    /// Set the filter for one collection.
    pub fn insert(&mut self, collection_id: impl Into<String>, filter: F) {
        self.collections.insert(collection_id.into(), filter);
    }

    /// Filter that applies to `collection_id`.
    pub fn get(&self, collection_id: &str) -> &F {
        self.collections.get(collection_id).unwrap_or(&self.fallback)
    }
}

impl<F: PayloadFilter> ResponseFilter for PerCollection<F> {
    fn for_collection(&self, collection_id: &str) -> &dyn PayloadFilter {
        self.get(collection_id)
    }
}

/// One `AirSync:Collection` of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionResponse {
    /// Echoed collection class.
    pub class: Option<String>,
    /// Key the client must present next.
    pub sync_key: String,
    /// Collection id.
    pub collection_id: String,
    /// Collection status.
    pub status: SyncStatus,
    /// Replies to client commands.
    pub replies: Vec<ClientReply>,
    /// Server changes.
    pub commands: Vec<ChangeOp>,
    /// More server changes are waiting.
    pub more_available: bool,
    /// Emit an (possibly empty) `Commands` element.
    pub send_commands: bool,
}

impl CollectionResponse {
    /// A status-only collection, as sent for an invalid key.
    pub fn status_only(
        class: Option<String>,
        sync_key: impl Into<String>,
        collection_id: impl Into<String>,
        status: SyncStatus,
    ) -> Self {
        Self {
            class,
            sync_key: sync_key.into(),
            collection_id: collection_id.into(),
            status,
            replies: Vec::new(),
            commands: Vec::new(),
            more_available: false,
            send_commands: false,
        }
    }

    /// Write this collection.
    ///
    /// # Errors
    ///
    /// Returns the encoder's error if a payload event cannot be written.
    pub fn write(&self, enc: &mut Encoder, filter: &dyn PayloadFilter) -> WbxmlResult<()> {
        enc.start(page::AIRSYNC, airsync::COLLECTION)?;
        if let Some(class) = &self.class {
            enc.text_element(page::AIRSYNC, airsync::CLASS, class)?;
        }
        enc.text_element(page::AIRSYNC, airsync::SYNC_KEY, &self.sync_key)?;
        enc.text_element(page::AIRSYNC, airsync::COLLECTION_ID, &self.collection_id)?;
        enc.text_element(page::AIRSYNC, airsync::STATUS, &self.status.to_string())?;

        if !self.replies.is_empty() {
            enc.start(page::AIRSYNC, airsync::RESPONSES)?;
            for reply in &self.replies {
                write_reply(enc, reply, filter)?;
            }
            enc.end()?;
        }

        if self.more_available {
            enc.empty_element(page::AIRSYNC, airsync::MORE_AVAILABLE)?;
        }

        if self.send_commands || !self.commands.is_empty() {
            enc.start(page::AIRSYNC, airsync::COMMANDS)?;
            for op in &self.commands {
                write_change(enc, op, filter)?;
            }
            enc.end()?;
        }
        enc.end()
    }
}

/// A complete `AirSync:Sync` response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncResponse {
    /// Request-level status, sent only when the whole request failed.
    pub status: Option<SyncStatus>,
    /// Per-collection results.
    pub collections: Vec<CollectionResponse>,
}

impl SyncResponse {
    /// A response that only carries a request-level status.
    pub fn with_status(status: SyncStatus) -> Self {
        Self {
            status: Some(status),
            collections: Vec::new(),
        }
    }

    /// Write the response into an encoder.
    ///
    /// # Errors
    ///
    /// Returns the encoder's error if any event cannot be written.
    pub fn write(&self, enc: &mut Encoder, filters: &dyn ResponseFilter) -> WbxmlResult<()> {
        enc.start(page::AIRSYNC, airsync::SYNC)?;
        if let Some(status) = self.status {
            enc.text_element(page::AIRSYNC, airsync::STATUS, &status.to_string())?;
        }
        if !self.collections.is_empty() {
            enc.start(page::AIRSYNC, airsync::COLLECTIONS)?;
            for collection in &self.collections {
                collection.write(enc, filters.for_collection(&collection.collection_id))?;
            }
            enc.end()?;
        }
        enc.end()
    }

    /// Encode the response as a complete WBXML document.
    ///
    /// # Errors
    ///
    /// Returns the encoder's error if any event cannot be written.
    pub fn to_wbxml(&self, filters: &dyn ResponseFilter) -> WbxmlResult<Vec<u8>> {
        let mut enc = Encoder::new(page::AIRSYNC);
        self.write(&mut enc, filters)?;
        enc.finish()
    }
}

fn write_application_data(
    enc: &mut Encoder,
    payload: &[WbxmlEvent],
    filter: &dyn PayloadFilter,
) -> WbxmlResult<()> {
    enc.start(page::AIRSYNC, airsync::APPLICATION_DATA)?;
    for event in filter.filter(payload) {
        enc.write_event(&event)?;
    }
    enc.end()
}

fn write_change(enc: &mut Encoder, op: &ChangeOp, filter: &dyn PayloadFilter) -> WbxmlResult<()> {
    let token = match op.kind {
        ChangeKind::Add => airsync::ADD,
        ChangeKind::Change => airsync::CHANGE,
        ChangeKind::Delete => airsync::DELETE,
        ChangeKind::SoftDelete => airsync::SOFT_DELETE,
    };
    enc.start(page::AIRSYNC, token)?;
    enc.text_element(page::AIRSYNC, airsync::SERVER_ID, &op.item_id)?;
    if let Some(payload) = &op.payload {
        if matches!(op.kind, ChangeKind::Add | ChangeKind::Change) {
            write_application_data(enc, payload, filter)?;
        }
    }
    enc.end()
}

fn write_reply(
    enc: &mut Encoder,
    reply: &ClientReply,
    filter: &dyn PayloadFilter,
) -> WbxmlResult<()> {
    let token = match reply.kind {
        ReplyKind::Add => airsync::ADD,
        ReplyKind::Change => airsync::CHANGE,
        ReplyKind::Delete => airsync::DELETE,
        ReplyKind::Fetch => airsync::FETCH,
    };
    enc.start(page::AIRSYNC, token)?;
    if let Some(client_id) = &reply.client_id {
        enc.text_element(page::AIRSYNC, airsync::CLIENT_ID, client_id)?;
    }
    if let Some(server_id) = &reply.server_id {
        enc.text_element(page::AIRSYNC, airsync::SERVER_ID, server_id)?;
    }
    enc.text_element(page::AIRSYNC, airsync::STATUS, &reply.status.to_string())?;
    if let Some(data) = &reply.data {
        write_application_data(enc, data, filter)?;
    }
    enc.end()
}
