//! ActiveSync code page dictionary.
//!
//! Every code page is a static, sorted `(token, name)` table. Lookups are
//! lock-free and the tables are shared by reference for the life of the
//! process.

mod tables;

use crate::error::{WbxmlError, WbxmlResult};

/// Lowest token value a code page may assign to a tag.
pub const MIN_TAG_TOKEN: u8 = 0x05;

/// Highest token value a code page may assign to a tag.
pub const MAX_TAG_TOKEN: u8 = 0x3f;

/// A single WBXML code page.
#[derive(Debug)]
pub struct Codepage {
    id: u8,
    name: &'static str,
    namespace: &'static str,
    tags: &'static [(u8, &'static str)],
}

impl Codepage {
    const fn new(
        id: u8,
        name: &'static str,
        namespace: &'static str,
        tags: &'static [(u8, &'static str)],
    ) -> Self {
        Self {
            id,
            name,
            namespace,
            tags,
        }
    }

    /// Code page number as used by `SWITCH_PAGE`.
    pub fn id(&self) -> u8 {
        self.id
    }

    /// Human-readable page name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// XML namespace of the page.
    pub fn namespace(&self) -> &'static str {
        self.namespace
    }

    /// All `(token, name)` pairs, sorted by token.
    pub fn tags(&self) -> &'static [(u8, &'static str)] {
        self.tags
    }

    /// Find the tag name for a token.
    pub fn tag(&self, token: u8) -> Option<&'static str> {
        self.tags
            .binary_search_by_key(&token, |&(t, _)| t)
            .ok()
            .map(|idx| self.tags[idx].1)
    }

    /// Find the token for a tag name.
    pub fn token(&self, name: &str) -> Option<u8> {
        self.tags
            .iter()
            .find(|&&(_, n)| n == name)
            .map(|&(t, _)| t)
    }
}

/// Code page constants for the pages the sync engine speaks directly.
pub mod page {
    /// AirSync.
    pub const AIRSYNC: u8 = 0;
    /// POOMCONTACTS.
    pub const CONTACTS: u8 = 1;
    /// POOMMAIL.
    pub const EMAIL: u8 = 2;
    /// POOMCAL.
    pub const CALENDAR: u8 = 4;
    /// FolderHierarchy.
    pub const FOLDER_HIERARCHY: u8 = 7;
    /// POOMTASKS.
    pub const TASKS: u8 = 9;
    /// Ping.
    pub const PING: u8 = 13;
    /// AirSyncBase.
    pub const AIRSYNC_BASE: u8 = 17;
    /// Notes.
    pub const NOTES: u8 = 23;
}

/// Tokens in the AirSync code page.
#[allow(missing_docs)]
pub mod airsync {
    pub const SYNC: u8 = 0x05;
    pub const RESPONSES: u8 = 0x06;
    pub const ADD: u8 = 0x07;
    pub const CHANGE: u8 = 0x08;
    pub const DELETE: u8 = 0x09;
    pub const FETCH: u8 = 0x0a;
    pub const SYNC_KEY: u8 = 0x0b;
    pub const CLIENT_ID: u8 = 0x0c;
    pub const SERVER_ID: u8 = 0x0d;
    pub const STATUS: u8 = 0x0e;
    pub const COLLECTION: u8 = 0x0f;
    pub const CLASS: u8 = 0x10;
    pub const COLLECTION_ID: u8 = 0x12;
    pub const GET_CHANGES: u8 = 0x13;
    pub const MORE_AVAILABLE: u8 = 0x14;
    pub const WINDOW_SIZE: u8 = 0x15;
    pub const COMMANDS: u8 = 0x16;
    pub const OPTIONS: u8 = 0x17;
    pub const FILTER_TYPE: u8 = 0x18;
    pub const CONFLICT: u8 = 0x1b;
    pub const COLLECTIONS: u8 = 0x1c;
    pub const APPLICATION_DATA: u8 = 0x1d;
    pub const DELETES_AS_MOVES: u8 = 0x1e;
    pub const SUPPORTED: u8 = 0x20;
    pub const SOFT_DELETE: u8 = 0x21;
    pub const MIME_SUPPORT: u8 = 0x22;
    pub const MIME_TRUNCATION: u8 = 0x23;
    pub const WAIT: u8 = 0x24;
    pub const LIMIT: u8 = 0x25;
    pub const PARTIAL: u8 = 0x26;
    pub const CONVERSATION_MODE: u8 = 0x27;
    pub const MAX_ITEMS: u8 = 0x28;
    pub const HEARTBEAT_INTERVAL: u8 = 0x29;
}

/// Tokens in the AirSyncBase code page.
#[allow(missing_docs)]
pub mod airsync_base {
    pub const BODY_PREFERENCE: u8 = 0x05;
    pub const TYPE: u8 = 0x06;
    pub const TRUNCATION_SIZE: u8 = 0x07;
    pub const ALL_OR_NONE: u8 = 0x08;
    pub const BODY: u8 = 0x0a;
    pub const DATA: u8 = 0x0b;
    pub const ESTIMATED_DATA_SIZE: u8 = 0x0c;
    pub const TRUNCATED: u8 = 0x0d;
    pub const ATTACHMENTS: u8 = 0x0e;
    pub const ATTACHMENT: u8 = 0x0f;
    pub const NATIVE_BODY_TYPE: u8 = 0x16;
    pub const PREVIEW: u8 = 0x18;
}

/// Number of defined code pages.
pub fn codepage_count() -> usize {
    tables::CODEPAGES.len()
}

/// Get a code page by id.
///
/// # Errors
///
/// Returns `UnknownCodepage` if no table exists for `id`.
pub fn codepage(id: u8) -> WbxmlResult<&'static Codepage> {
    tables::CODEPAGES
        .get(usize::from(id))
        .ok_or(WbxmlError::UnknownCodepage(id))
}

/// Get a code page by its XML namespace (case-insensitive).
pub fn codepage_by_namespace(namespace: &str) -> Option<&'static Codepage> {
    tables::CODEPAGES
        .iter()
        .find(|cp| cp.namespace.eq_ignore_ascii_case(namespace))
}

/// Resolve a token to `(namespace, tag name)`.
///
/// # Errors
///
/// Returns `UnknownToken` if the page has no such token, or
/// `UnknownCodepage` if the page itself is undefined.
pub fn lookup_tag(codepage_id: u8, token: u8) -> WbxmlResult<(&'static str, &'static str)> {
    let cp = codepage(codepage_id)?;
    cp.tag(token)
        .map(|name| (cp.namespace, name))
        .ok_or(WbxmlError::UnknownToken {
            codepage: codepage_id,
            token,
        })
}

/// Resolve a tag name to its token.
///
/// # Errors
///
/// Returns `UnknownTag` if the page has no such tag, or
/// `UnknownCodepage` if the page itself is undefined.
pub fn lookup_token(codepage_id: u8, name: &str) -> WbxmlResult<u8> {
    codepage(codepage_id)?
        .token(name)
        .ok_or_else(|| WbxmlError::UnknownTag {
            codepage: codepage_id,
            name: name.to_string(),
        })
}

/// Render `Namespace:Tag` for a token, as used in dumps and logs.
///
/// # Errors
///
/// Same as [`lookup_tag`].
pub fn qualified_name(codepage_id: u8, token: u8) -> WbxmlResult<String> {
    let (ns, name) = lookup_tag(codepage_id, token)?;
    Ok(format!("{ns}:{name}"))
}
