//! The client side of a `Sync` exchange.

use std::collections::HashSet;

use easync_wbxml::codepage::{airsync, airsync_base, page};
use easync_wbxml::{decode, WbxmlEvent, WbxmlResult};
use tracing::debug;

use crate::error::{ProtocolError, ProtocolResult};
use crate::reader::{Element, EventReader};

/// `AirSyncBase:BodyPreference`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyPreference {
    /// Body type: 1 plain, 2 HTML, 3 RTF, 4 MIME.
    pub body_type: u32,
    /// Truncate `Data` beyond this many bytes.
    pub truncation_size: Option<u32>,
    /// Send nothing rather than a truncated body.
    pub all_or_none: bool,
}

/// `AirSync:Options` of one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionOptions {
    /// Age filter.
    pub filter_type: Option<u32>,
    /// Body preferences, in client order.
    pub body_preferences: Vec<BodyPreference>,
    /// MIME support level.
    pub mime_support: Option<u32>,
    /// Conflict resolution: 0 client wins, 1 server wins.
    pub conflict: Option<u32>,
}

/// Who wins when the client changes an item the server also changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// The client's change replaces the server's.
    ClientWins,
    /// The client's change is refused and the server's is sent.
    ServerWins,
}

impl CollectionOptions {
    /// Resolution asked for by `Conflict`; the server wins unless the
    /// client sent 0.
    pub fn conflict_resolution(&self) -> ConflictResolution {
        match self.conflict {
            Some(0) => ConflictResolution::ClientWins,
            _ => ConflictResolution::ServerWins,
        }
    }
}

/// A change the client pushes to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// New item created on the device.
    Add {
        /// Device-local id, echoed in the reply.
        client_id: String,
        /// Item class, when given per item.
        class: Option<String>,
        /// `ApplicationData` content.
        data: Vec<WbxmlEvent>,
    },
    /// Item modified on the device.
    Change {
        /// Server id of the item.
        server_id: String,
        /// `ApplicationData` content.
        data: Vec<WbxmlEvent>,
    },
    /// Item deleted on the device.
    Delete {
        /// Server id of the item.
        server_id: String,
    },
    /// Full item requested by the device.
    Fetch {
        /// Server id of the item.
        server_id: String,
    },
}

/// One `AirSync:Collection` of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionRequest {
    /// Collection class (`Email`, `Calendar`, ...).
    pub class: Option<String>,
    /// Key presented by the client, unparsed.
    pub sync_key: String,
    /// Collection id.
    pub collection_id: String,
    /// Move deleted items to the trash.
    pub deletes_as_moves: Option<bool>,
    /// Whether the client wants server changes.
    pub get_changes: Option<bool>,
    /// Per-collection window size.
    pub window_size: Option<u32>,
    /// Options.
    pub options: CollectionOptions,
    /// Client changes, in document order.
    pub commands: Vec<ClientCommand>,
}

impl CollectionRequest {
    /// Server changes are sent unless the client opted out with
    /// `GetChanges` set to 0.
    pub fn wants_changes(&self) -> bool {
        self.get_changes.unwrap_or(true)
    }
}

/// A parsed `AirSync:Sync` request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRequest {
    /// Collections, in document order.
    pub collections: Vec<CollectionRequest>,
    /// Wait interval in minutes.
    pub wait: Option<u32>,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval: Option<u32>,
    /// Request-wide window size.
    pub window_size: Option<u32>,
    /// Partial request flag.
    pub partial: bool,
}

impl SyncRequest {
    /// Decode and parse a WBXML body.
    ///
    /// # Errors
    ///
    /// Returns `Wbxml` for a malformed stream, or a structural error if the
    /// document is not a `Sync` request.
    pub fn from_wbxml(body: &[u8]) -> ProtocolResult<Self> {
        Self::from_events(decode(body, page::AIRSYNC))
    }

    /// Parse a request from a stream of decoded events in one pass.
    ///
    /// # Errors
    ///
    /// Same as [`SyncRequest::from_wbxml`].
    pub fn from_events<I>(events: I) -> ProtocolResult<Self>
    where
        I: IntoIterator<Item = WbxmlResult<WbxmlEvent>>,
    {
        let mut reader = EventReader::new(events.into_iter());
        let root = reader.root()?.ok_or(ProtocolError::MissingElement("Sync"))?;
        if !root.is(page::AIRSYNC, airsync::SYNC) {
            return Err(ProtocolError::UnexpectedElement(root.name()));
        }
        let mut request = SyncRequest::default();
        if !root.has_content {
            reader.finish()?;
            return Ok(request);
        }
        while let Some(child) = reader.next_child()? {
            match (child.codepage, child.token) {
                (page::AIRSYNC, airsync::COLLECTIONS) => {
                    if child.has_content {
                        while let Some(c) = reader.next_child()? {
                            if c.is(page::AIRSYNC, airsync::COLLECTION) {
                                request.collections.push(parse_collection(&mut reader, &c)?);
                            } else {
                                return Err(ProtocolError::UnexpectedElement(c.name()));
                            }
                        }
                    }
                }
                (page::AIRSYNC, airsync::WAIT) => {
                    request.wait = Some(reader.number(&child, "Wait")?);
                }
                (page::AIRSYNC, airsync::HEARTBEAT_INTERVAL) => {
                    request.heartbeat_interval = Some(reader.number(&child, "HeartbeatInterval")?);
                }
                (page::AIRSYNC, airsync::WINDOW_SIZE) => {
                    request.window_size = Some(reader.number(&child, "WindowSize")?);
                }
                (page::AIRSYNC, airsync::PARTIAL) => {
                    request.partial = reader.flag(&child, "Partial")?;
                }
                _ => {
                    debug!(element = %child.name(), "skipping unknown Sync child");
                    reader.skip(&child)?;
                }
            }
        }
        reader.finish()?;
        request.check_unique_collections()?;
        Ok(request)
    }

    /// Every collection may appear once per request.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` naming the first repeated `CollectionId`.
    pub fn check_unique_collections(&self) -> ProtocolResult<()> {
        let mut seen = HashSet::with_capacity(self.collections.len());
        match self
            .collections
            .iter()
            .find(|c| !seen.insert(c.collection_id.as_str()))
        {
            Some(repeated) => Err(ProtocolError::invalid_value(
                "CollectionId",
                repeated.collection_id.clone(),
            )),
            None => Ok(()),
        }
    }
}

fn parse_collection<I>(
    reader: &mut EventReader<I>,
    element: &Element,
) -> ProtocolResult<CollectionRequest>
where
    I: Iterator<Item = WbxmlResult<WbxmlEvent>>,
{
    let mut collection = CollectionRequest::default();
    let mut sync_key = None;
    let mut collection_id = None;
    if element.has_content {
        while let Some(child) = reader.next_child()? {
            match (child.codepage, child.token) {
                (page::AIRSYNC, airsync::CLASS) => {
                    collection.class = Some(reader.text(&child, "Class")?);
                }
                (page::AIRSYNC, airsync::SYNC_KEY) => {
                    sync_key = Some(reader.text(&child, "SyncKey")?);
                }
                (page::AIRSYNC, airsync::COLLECTION_ID) => {
                    collection_id = Some(reader.text(&child, "CollectionId")?);
                }
                (page::AIRSYNC, airsync::DELETES_AS_MOVES) => {
                    collection.deletes_as_moves = Some(reader.flag(&child, "DeletesAsMoves")?);
                }
                (page::AIRSYNC, airsync::GET_CHANGES) => {
                    collection.get_changes = Some(reader.flag(&child, "GetChanges")?);
                }
                (page::AIRSYNC, airsync::WINDOW_SIZE) => {
                    collection.window_size = Some(reader.number(&child, "WindowSize")?);
                }
                (page::AIRSYNC, airsync::OPTIONS) => {
                    parse_options(reader, &child, &mut collection.options)?;
                }
                (page::AIRSYNC, airsync::COMMANDS) => {
                    if child.has_content {
                        while let Some(cmd) = reader.next_child()? {
                            collection.commands.push(parse_command(reader, &cmd)?);
                        }
                    }
                }
                _ => {
                    debug!(element = %child.name(), "skipping unknown Collection child");
                    reader.skip(&child)?;
                }
            }
        }
    }
    collection.sync_key = sync_key.ok_or(ProtocolError::MissingElement("SyncKey"))?;
    collection.collection_id =
        collection_id.ok_or(ProtocolError::MissingElement("CollectionId"))?;
    Ok(collection)
}

fn parse_options<I>(
    reader: &mut EventReader<I>,
    element: &Element,
    options: &mut CollectionOptions,
) -> ProtocolResult<()>
where
    I: Iterator<Item = WbxmlResult<WbxmlEvent>>,
{
    if !element.has_content {
        return Ok(());
    }
    while let Some(child) = reader.next_child()? {
        match (child.codepage, child.token) {
            (page::AIRSYNC, airsync::FILTER_TYPE) => {
                options.filter_type = Some(reader.number(&child, "FilterType")?);
            }
            (page::AIRSYNC, airsync::MIME_SUPPORT) => {
                options.mime_support = Some(reader.number(&child, "MIMESupport")?);
            }
            (page::AIRSYNC, airsync::CONFLICT) => {
                options.conflict = Some(reader.number(&child, "Conflict")?);
            }
            (page::AIRSYNC_BASE, airsync_base::BODY_PREFERENCE) => {
                options
                    .body_preferences
                    .push(parse_body_preference(reader, &child)?);
            }
            _ => reader.skip(&child)?,
        }
    }
    Ok(())
}

fn parse_body_preference<I>(
    reader: &mut EventReader<I>,
    element: &Element,
) -> ProtocolResult<BodyPreference>
where
    I: Iterator<Item = WbxmlResult<WbxmlEvent>>,
{
    let mut body_type = None;
    let mut preference = BodyPreference {
        body_type: 0,
        truncation_size: None,
        all_or_none: false,
    };
    if element.has_content {
        while let Some(child) = reader.next_child()? {
            match (child.codepage, child.token) {
                (page::AIRSYNC_BASE, airsync_base::TYPE) => {
                    body_type = Some(reader.number(&child, "Type")?);
                }
                (page::AIRSYNC_BASE, airsync_base::TRUNCATION_SIZE) => {
                    preference.truncation_size = Some(reader.number(&child, "TruncationSize")?);
                }
                (page::AIRSYNC_BASE, airsync_base::ALL_OR_NONE) => {
                    preference.all_or_none = reader.flag(&child, "AllOrNone")?;
                }
                _ => reader.skip(&child)?,
            }
        }
    }
    preference.body_type = body_type.ok_or(ProtocolError::MissingElement("Type"))?;
    Ok(preference)
}

fn parse_command<I>(reader: &mut EventReader<I>, element: &Element) -> ProtocolResult<ClientCommand>
where
    I: Iterator<Item = WbxmlResult<WbxmlEvent>>,
{
    let token = match (element.codepage, element.token) {
        (page::AIRSYNC, t @ (airsync::ADD | airsync::CHANGE | airsync::DELETE | airsync::FETCH)) => t,
        _ => return Err(ProtocolError::UnexpectedElement(element.name())),
    };
    let mut client_id = None;
    let mut server_id = None;
    let mut class = None;
    let mut data = None;
    if element.has_content {
        while let Some(child) = reader.next_child()? {
            match (child.codepage, child.token) {
                (page::AIRSYNC, airsync::CLIENT_ID) => {
                    client_id = Some(reader.text(&child, "ClientId")?);
                }
                (page::AIRSYNC, airsync::SERVER_ID) => {
                    server_id = Some(reader.text(&child, "ServerId")?);
                }
                (page::AIRSYNC, airsync::CLASS) => {
                    class = Some(reader.text(&child, "Class")?);
                }
                (page::AIRSYNC, airsync::APPLICATION_DATA) => {
                    data = Some(reader.capture(&child)?);
                }
                _ => reader.skip(&child)?,
            }
        }
    }
    let command = match token {
        airsync::ADD => ClientCommand::Add {
            client_id: client_id.ok_or(ProtocolError::MissingElement("ClientId"))?,
            class,
            data: data.ok_or(ProtocolError::MissingElement("ApplicationData"))?,
        },
        airsync::CHANGE => ClientCommand::Change {
            server_id: server_id.ok_or(ProtocolError::MissingElement("ServerId"))?,
            data: data.ok_or(ProtocolError::MissingElement("ApplicationData"))?,
        },
        airsync::DELETE => ClientCommand::Delete {
            server_id: server_id.ok_or(ProtocolError::MissingElement("ServerId"))?,
        },
        _ => ClientCommand::Fetch {
            server_id: server_id.ok_or(ProtocolError::MissingElement("ServerId"))?,
        },
    };
    Ok(command)
}
