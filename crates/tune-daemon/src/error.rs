use thiserror::Error;

/// Errors surfaced to whoever issued a play or stop command.
#[derive(Debug, Error)]
pub enum PlayerError {
    /// The station or channel id is not in the catalog.
    #[error("channel not found: {station}/{id}")]
    NotFound { station: String, id: u32 },
    /// Spawning or killing the player process failed.
    #[error("player process error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlayerError {
    pub fn not_found(station: &str, id: u32) -> Self {
        Self::NotFound {
            station: station.to_string(),
            id,
        }
    }
}
