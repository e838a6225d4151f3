//! Channel catalog: station name -> channels keyed by a small integer id.
//!
//! The catalog is read once at startup and never mutated afterwards.  It is
//! stored as TOML:
//!
//! ```toml
//! [[station]]
//! name = "di"
//!
//! [[station.channel]]
//! id = 3
//! name = "Deep House"
//! playlist = "http://listen.di.fm/premium_high/deephouse.pls"
//! ```
use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use tracing::info;

use crate::protocol::{ChannelInfo, ChannelListing};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub name: String,
    pub playlist: String,
}

impl Channel {
    pub fn new(name: impl Into<String>, playlist: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            playlist: playlist.into(),
        }
    }

    /// Playlist URL with the listen key attached as the query string.
    pub fn stream_url(&self, listen_key: &str) -> String {
        if listen_key.is_empty() {
            self.playlist.clone()
        } else {
            format!("{}?{}", self.playlist, listen_key)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    stations: BTreeMap<String, BTreeMap<u32, Channel>>,
}

impl Catalog {
    /// Add a channel.  Fails if the station already has a channel with `id`.
    pub fn insert(&mut self, station: &str, id: u32, channel: Channel) -> anyhow::Result<()> {
        let channels = self.stations.entry(station.to_string()).or_default();
        if channels.contains_key(&id) {
            anyhow::bail!("station '{}' has duplicate channel id {}", station, id);
        }
        channels.insert(id, channel);
        Ok(())
    }

    pub fn get(&self, station: &str, id: u32) -> Option<&Channel> {
        self.stations.get(station)?.get(&id)
    }

    pub fn station_count(&self) -> usize {
        self.stations.len()
    }

    pub fn channel_count(&self) -> usize {
        self.stations.values().map(BTreeMap::len).sum()
    }

    /// Listing for the web UI: stations by name, channels sorted by name.
    pub fn listing(&self) -> ChannelListing {
        self.stations
            .iter()
            .map(|(station, channels)| {
                let mut infos: Vec<ChannelInfo> = channels
                    .iter()
                    .map(|(id, c)| ChannelInfo {
                        id: *id,
                        name: c.name.clone(),
                    })
                    .collect();
                infos.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
                (station.clone(), infos)
            })
            .collect()
    }
}

// ── TOML loader ───────────────────────────────────────────────────────────────

/// Intermediate structs matching the TOML `[[station]]` tables.
#[derive(Debug, Deserialize)]
struct TomlCatalogFile {
    #[serde(default)]
    station: Vec<TomlStation>,
}

#[derive(Debug, Deserialize)]
struct TomlStation {
    name: String,
    #[serde(default)]
    channel: Vec<TomlChannel>,
}

#[derive(Debug, Deserialize)]
struct TomlChannel {
    id: u32,
    name: String,
    playlist: String,
}

pub fn parse_catalog_from_toml_str(content: &str) -> anyhow::Result<Catalog> {
    let file: TomlCatalogFile = toml::from_str(content)?;
    let mut catalog = Catalog::default();
    for station in file.station {
        for c in station.channel {
            catalog.insert(&station.name, c.id, Channel::new(c.name, c.playlist))?;
        }
    }
    Ok(catalog)
}

pub fn load_catalog_from_toml(path: &Path) -> anyhow::Result<Catalog> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read catalog {}", path.display()))?;
    parse_catalog_from_toml_str(&content)
        .with_context(|| format!("failed to parse catalog {}", path.display()))
}

async fn fetch_catalog_url(url: &str) -> anyhow::Result<Catalog> {
    let response = reqwest::get(url).await?;
    if !response.status().is_success() {
        anyhow::bail!("HTTP {}", response.status());
    }
    let text = response.text().await?;
    parse_catalog_from_toml_str(&text)
}

/// Load the catalog from an http(s) URL or a local file path.
pub async fn load_catalog(source: &str) -> anyhow::Result<Catalog> {
    let catalog = if source.starts_with("http://") || source.starts_with("https://") {
        fetch_catalog_url(source)
            .await
            .with_context(|| format!("failed to fetch catalog from {}", source))?
    } else {
        load_catalog_from_toml(Path::new(source))?
    };
    info!(
        "Loaded {} channels in {} stations from {}",
        catalog.channel_count(),
        catalog.station_count(),
        source
    );
    Ok(catalog)
}
