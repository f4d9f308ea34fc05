//! Sync keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// How freshly issued keys are shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeyStyle {
    /// Plain decimal counter: `1`, `2`, ...
    #[default]
    Counter,
    /// GUID plus counter: `{a6c1...}1`. A reset mints a new GUID.
    Guid,
}

/// A sync key.
///
/// Textual forms are `"0"` (initial), `"N"` and `"{uuid}N"`. Keys are
/// compared structurally, so `"{g}3"` and `"3"` are different keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncKey {
    guid: Option<Uuid>,
    counter: u64,
}

/// A string could not be parsed as a sync key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid sync key {0:?}")]
pub struct ParseKeyError(pub String);

impl SyncKey {
    /// The initial key `"0"`.
    pub const fn initial() -> Self {
        Self {
            guid: None,
            counter: 0,
        }
    }

    /// Plain counter key.
    pub const fn counter(counter: u64) -> Self {
        Self {
            guid: None,
            counter,
        }
    }

    /// GUID-style key.
    pub const fn with_guid(guid: Uuid, counter: u64) -> Self {
        Self {
            guid: Some(guid),
            counter,
        }
    }

    /// First key of a brand new GUID series.
    pub fn fresh_guid() -> Self {
        Self::with_guid(Uuid::new_v4(), 1)
    }

    /// True for `"0"`.
    pub fn is_initial(&self) -> bool {
        self.guid.is_none() && self.counter == 0
    }

    /// Counter part of the key.
    pub fn counter_value(&self) -> u64 {
        self.counter
    }

    /// GUID part of the key, if any.
    pub fn guid(&self) -> Option<Uuid> {
        self.guid
    }

    /// Next key in the same series.
    #[must_use]
    pub fn increment(&self) -> Self {
        Self {
            guid: self.guid,
            counter: self.counter + 1,
        }
    }

    /// Key to issue when a client restarts from `"0"`.
    ///
    /// Counter keys continue past `existing` so no key is ever reused; GUID
    /// keys start a new series.
    pub fn after_reset(existing: Option<&SyncKey>, style: KeyStyle) -> Self {
        match style {
            KeyStyle::Guid => Self::fresh_guid(),
            KeyStyle::Counter => {
                let last = existing
                    .filter(|k| k.guid.is_none())
                    .map_or(0, |k| k.counter);
                Self::counter(last + 1)
            }
        }
    }
}

impl Default for SyncKey {
    fn default() -> Self {
        Self::initial()
    }
}

impl fmt::Display for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.guid {
            Some(guid) => write!(f, "{{{guid}}}{}", self.counter),
            None => write!(f, "{}", self.counter),
        }
    }
}

impl FromStr for SyncKey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseKeyError(s.to_string());
        let (guid, digits) = match s.strip_prefix('{') {
            Some(rest) => {
                let (guid, digits) = rest.split_once('}').ok_or_else(err)?;
                (Some(Uuid::parse_str(guid).map_err(|_| err())?), digits)
            }
            None => (None, s),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(err());
        }
        let counter = digits.parse::<u64>().map_err(|_| err())?;
        Ok(Self { guid, counter })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        assert!("0".parse::<SyncKey>().unwrap().is_initial());
        assert_eq!("42".parse::<SyncKey>().unwrap(), SyncKey::counter(42));
        let text = "{6ba7b810-9dad-11d1-80b4-00c04fd430c8}7";
        let key: SyncKey = text.parse().unwrap();
        assert_eq!(key.counter_value(), 7);
        assert_eq!(key.to_string(), text);
        assert_eq!(key.increment().to_string(), "{6ba7b810-9dad-11d1-80b4-00c04fd430c8}8");
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "-1", "+3", "abc", "{nope}1", "{6ba7b810-9dad-11d1-80b4-00c04fd430c8}", "1 ", "99999999999999999999999"] {
            assert!(bad.parse::<SyncKey>().is_err(), "{bad:?}");
        }
    }

    #[test]
    fn guid_key_is_not_initial() {
        let key = SyncKey::with_guid(Uuid::new_v4(), 0);
        assert!(!key.is_initial());
        assert_ne!(key, SyncKey::initial());
    }

    #[test]
    fn reset_never_reuses_counter_keys() {
        let existing = SyncKey::counter(5);
        assert_eq!(SyncKey::after_reset(Some(&existing), KeyStyle::Counter), SyncKey::counter(6));
        assert_eq!(SyncKey::after_reset(None, KeyStyle::Counter), SyncKey::counter(1));

        let a = SyncKey::after_reset(Some(&existing), KeyStyle::Guid);
        let b = SyncKey::after_reset(Some(&a), KeyStyle::Guid);
        assert_eq!(a.counter_value(), 1);
        assert_ne!(a.guid(), b.guid());
    }
}
