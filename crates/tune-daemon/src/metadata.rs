//! Title extraction from the player's stdout.
//!
//! mpv prints stream tags as indented `key: value` lines.  Only lines that
//! start with [`TITLE_PREFIX`] carry a track change; everything else is
//! status noise and dropped.
use std::borrow::Cow;

use futures_util::stream::{self, Stream, StreamExt};
use tokio::io::AsyncRead;
use tokio_util::codec::{AnyDelimiterCodec, FramedRead};
use tracing::{debug, warn};
use tune_proto::protocol::Event;

pub const TITLE_PREFIX: &str = " icy-title: ";

/// Longest line accepted from the player, not counting the newline.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Station and channel a player process was started for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayContext {
    pub station: String,
    pub channel: String,
}

impl PlayContext {
    pub fn new(station: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            station: station.into(),
            channel: channel.into(),
        }
    }

    pub fn event_for_line(&self, line: &str) -> Option<Event> {
        let track = parse_title_line(line)?;
        Some(Event {
            station: self.station.clone(),
            channel: self.channel.clone(),
            track: track.to_string(),
        })
    }
}

/// Returns the track text if `line` is a title update.  Exact prefix match,
/// the remainder is returned untouched.
pub fn parse_title_line(line: &str) -> Option<&str> {
    line.strip_prefix(TITLE_PREFIX)
}

fn decode_line(raw: &[u8]) -> Cow<'_, str> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw)
}

/// Lazily turn a line-oriented reader into title events.
///
/// The stream ends at EOF.  A read error or a line longer than
/// [`MAX_LINE_LENGTH`] is logged and also ends the stream.
pub fn title_events<R>(reader: R, context: PlayContext) -> impl Stream<Item = Event>
where
    R: AsyncRead + Unpin,
{
    let codec =
        AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), Vec::new(), MAX_LINE_LENGTH);
    stream::unfold(
        (FramedRead::new(reader, codec), context),
        |(mut lines, context)| async move {
            loop {
                match lines.next().await {
                    Some(Ok(raw)) => {
                        if let Some(event) = context.event_for_line(&decode_line(&raw)) {
                            return Some((event, (lines, context)));
                        }
                    }
                    None => {
                        debug!(
                            "metadata: output closed for {}/{}",
                            context.station, context.channel
                        );
                        return None;
                    }
                    Some(Err(e)) => {
                        warn!(
                            "metadata: giving up on output of {}/{}: {}",
                            context.station, context.channel, e
                        );
                        return None;
                    }
                }
            }
        },
    )
}
