//! AirSync `Sync` status codes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status values carried in `AirSync:Status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStatus {
    /// 1
    Success,
    /// 3: the client must restart from key "0".
    InvalidSyncKey,
    /// 4
    ProtocolError,
    /// 5
    ServerError,
    /// 6
    ConversionError,
    /// 7
    Conflict,
    /// 8
    ObjectNotFound,
    /// 9
    CouldNotComplete,
    /// 12
    HierarchyChanged,
    /// 13
    IncompleteRequest,
    /// 14
    InvalidWaitOrHeartbeat,
    /// 15
    InvalidCommand,
    /// 16
    Retry,
}

impl SyncStatus {
    /// Wire value.
    pub fn code(self) -> u16 {
        match self {
            SyncStatus::Success => 1,
            SyncStatus::InvalidSyncKey => 3,
            SyncStatus::ProtocolError => 4,
            SyncStatus::ServerError => 5,
            SyncStatus::ConversionError => 6,
            SyncStatus::Conflict => 7,
            SyncStatus::ObjectNotFound => 8,
            SyncStatus::CouldNotComplete => 9,
            SyncStatus::HierarchyChanged => 12,
            SyncStatus::IncompleteRequest => 13,
            SyncStatus::InvalidWaitOrHeartbeat => 14,
            SyncStatus::InvalidCommand => 15,
            SyncStatus::Retry => 16,
        }
    }

    /// Parse a wire value.
    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            1 => SyncStatus::Success,
            3 => SyncStatus::InvalidSyncKey,
            4 => SyncStatus::ProtocolError,
            5 => SyncStatus::ServerError,
            6 => SyncStatus::ConversionError,
            7 => SyncStatus::Conflict,
            8 => SyncStatus::ObjectNotFound,
            9 => SyncStatus::CouldNotComplete,
            12 => SyncStatus::HierarchyChanged,
            13 => SyncStatus::IncompleteRequest,
            14 => SyncStatus::InvalidWaitOrHeartbeat,
            15 => SyncStatus::InvalidCommand,
            16 => SyncStatus::Retry,
            _ => return None,
        })
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
