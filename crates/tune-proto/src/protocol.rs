use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A now-playing update pushed to every connected client.
///
/// Empty fields are left out of the wire form entirely, so the all-empty
/// event serializes as `{}` and means "nothing is playing".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub station: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub track: String,
}

impl Event {
    /// The "nothing playing" sentinel.
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn is_idle(&self) -> bool {
        self.station.is_empty() && self.channel.is_empty() && self.track.is_empty()
    }
}

/// One entry of the `/channels.json` listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: u32,
    pub name: String,
}

/// Station name -> channels sorted by name.
pub type ChannelListing = BTreeMap<String, Vec<ChannelInfo>>;
