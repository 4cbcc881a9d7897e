//! Settings map exchanged once per handshake side.
//!
//! A settings frame carries a small key-value map of per-connection limits.
//! The client builds its outbound map from caller overrides plus mandatory
//! defaults; inbound maps from the peer are merged into session limits with
//! unknown keys silently ignored.

use std::collections::BTreeMap;

use crate::SettingsError;

/// Known setting identifiers.
pub mod setting {
    pub const HEADER_TABLE_SIZE: u16 = 0x1;
    pub const MAX_CONCURRENT_STREAMS: u16 = 0x3;
    pub const INITIAL_WINDOW_SIZE: u16 = 0x4;
    pub const MAX_FRAME_SIZE: u16 = 0x5;
}

/// Largest legal flow-control window (and initial-window setting value).
pub const MAX_WINDOW_SIZE: u32 = (1 << 31) - 1;

/// Bounds for the max-frame-size setting.
pub const MIN_FRAME_SIZE: u32 = 1 << 14;
pub const MAX_FRAME_SIZE_LIMIT: u32 = (1 << 24) - 1;

/// An ordered settings map.
///
/// Ordered so that emitted frames are deterministic, which keeps peers (and
/// tests) from observing map-iteration noise.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    entries: BTreeMap<u16, u32>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: u16) -> Option<u32> {
        self.entries.get(&key).copied()
    }

    pub fn set(&mut self, key: u16, value: u32) {
        self.entries.insert(key, value);
    }

    /// Insert only if the key is absent. Caller overrides always win.
    pub fn set_if_absent(&mut self, key: u16, value: u32) {
        self.entries.entry(key).or_insert(value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, u32)> + '_ {
        self.entries.iter().map(|(k, v)| (*k, *v))
    }

    /// Range-check every known key.
    ///
    /// Unknown keys pass untouched; only values we understand can be
    /// rejected. Called before transmission so an illegal value never
    /// reaches the wire.
    pub fn validate(&self) -> Result<(), SettingsError> {
        for (key, value) in self.iter() {
            match key {
                setting::INITIAL_WINDOW_SIZE => {
                    if value > MAX_WINDOW_SIZE {
                        return Err(SettingsError {
                            key,
                            value,
                            min: 0,
                            max: MAX_WINDOW_SIZE,
                        });
                    }
                }
                setting::MAX_FRAME_SIZE => {
                    if !(MIN_FRAME_SIZE..=MAX_FRAME_SIZE_LIMIT).contains(&value) {
                        return Err(SettingsError {
                            key,
                            value,
                            min: MIN_FRAME_SIZE,
                            max: MAX_FRAME_SIZE_LIMIT,
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl FromIterator<(u16, u32)> for Settings {
    fn from_iter<I: IntoIterator<Item = (u16, u32)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
