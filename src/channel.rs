//! IMC power channels and the channel → device table.
//!
//! The IMC switches four power circuits. Each circuit is identified by an integer id
//! (1..=4) and is wired to one physical device. The mapping is fixed when the driver is
//! constructed and never changes afterwards.

use crate::error::{AppResult, ImcError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Number of power channels on the IMC.
pub const CHANNEL_COUNT: u8 = 4;

/// A validated IMC channel id in the range 1..=4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ChannelId(u8);

impl ChannelId {
    /// Create a channel id, rejecting anything outside 1..=4.
    pub fn new(id: u8) -> AppResult<Self> {
        if (1..=CHANNEL_COUNT).contains(&id) {
            Ok(Self(id))
        } else {
            Err(ImcError::InvalidChannel(id))
        }
    }

    /// Raw channel number as sent on the wire.
    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for ChannelId {
    type Error = ImcError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ChannelId> for u8 {
    fn from(value: ChannelId) -> Self {
        value.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One `[[imc.channels]]` entry in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEntry {
    /// Channel number (1..=4)
    pub id: u8,
    /// Device powered by this channel
    pub device: String,
}

/// Immutable channel → device-name table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTable {
    devices: BTreeMap<ChannelId, String>,
}

impl ChannelTable {
    /// Build a table from configuration entries.
    ///
    /// # Errors
    /// Returns an error if an id is out of range, appears twice, or has an empty name.
    pub fn from_entries(entries: &[ChannelEntry]) -> AppResult<Self> {
        let mut devices = BTreeMap::new();
        for entry in entries {
            let id = ChannelId::new(entry.id)?;
            let name = entry.device.trim();
            if name.is_empty() {
                return Err(ImcError::Configuration(format!(
                    "Channel {} has an empty device name",
                    id
                )));
            }
            if devices.insert(id, name.to_string()).is_some() {
                return Err(ImcError::Configuration(format!(
                    "Channel {} is assigned more than once",
                    id
                )));
            }
        }
        Ok(Self { devices })
    }

    /// Device name for a channel, if one is assigned.
    pub fn device(&self, channel: ChannelId) -> Option<&str> {
        self.devices.get(&channel).map(String::as_str)
    }

    /// Device name for a channel, or a placeholder naming the channel.
    pub fn label(&self, channel: ChannelId) -> String {
        self.device(channel)
            .map(str::to_string)
            .unwrap_or_else(|| format!("CH{}", channel))
    }

    /// Resolve a telemetry token (e.g. `"3"`) to a mapped channel.
    pub fn resolve(&self, token: &str) -> Option<(ChannelId, &str)> {
        let raw: u8 = token.trim().parse().ok()?;
        let id = ChannelId::new(raw).ok()?;
        self.device(id).map(|device| (id, device))
    }

    /// Number of mapped channels.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether no channel is mapped.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Default wiring of the payload package.
pub fn default_channel_entries() -> Vec<ChannelEntry> {
    [(1, "companion"), (2, "secondary"), (3, "wqm"), (4, "par")]
        .into_iter()
        .map(|(id, device)| ChannelEntry {
            id,
            device: device.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ChannelTable {
        ChannelTable::from_entries(&default_channel_entries()).unwrap()
    }

    #[test]
    fn channel_ids_are_range_checked() {
        assert!(ChannelId::new(1).is_ok());
        assert!(ChannelId::new(4).is_ok());
        assert!(matches!(ChannelId::new(0), Err(ImcError::InvalidChannel(0))));
        assert!(matches!(ChannelId::new(9), Err(ImcError::InvalidChannel(9))));
    }

    #[test]
    fn resolves_mapped_tokens() {
        let table = table();
        let (id, device) = table.resolve(" 3 ").unwrap();
        assert_eq!(id.get(), 3);
        assert_eq!(device, "wqm");
    }

    #[test]
    fn rejects_unmapped_and_garbage_tokens() {
        let table = table();
        assert!(table.resolve("9").is_none());
        assert!(table.resolve("x").is_none());
        assert!(table.resolve("").is_none());
        assert!(table.resolve("-1").is_none());
    }

    #[test]
    fn partial_table_leaves_gaps() {
        let table = ChannelTable::from_entries(&[ChannelEntry {
            id: 2,
            device: "secondary".into(),
        }])
        .unwrap();
        assert!(table.resolve("1").is_none());
        assert_eq!(table.label(ChannelId::new(1).unwrap()), "CH1");
        assert_eq!(table.label(ChannelId::new(2).unwrap()), "secondary");
    }

    #[test]
    fn duplicate_and_empty_entries_are_rejected() {
        let dup = vec![
            ChannelEntry { id: 1, device: "a".into() },
            ChannelEntry { id: 1, device: "b".into() },
        ];
        assert!(ChannelTable::from_entries(&dup).is_err());

        let empty = vec![ChannelEntry { id: 1, device: "  ".into() }];
        assert!(ChannelTable::from_entries(&empty).is_err());
    }
}
