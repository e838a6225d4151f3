/// Player process manager: at most one external player at a time.
///
/// ```text
///   Player::play(station, id)        (current-process lock held throughout)
///         │
///         ├── kill previous process, if any
///         ├── spawn `<binary> <args..> <playlist>?<listen key>`, stdout piped
///         ├── reader_task  ← stdout → metadata::title_events → event feed
///         └── reaper_task  ← owns the Child: waits for exit, or kills on request
/// ```
///
/// The event feed is the `mpsc::Receiver<Event>` returned by [`Player::new`];
/// the broker drains it.  A stopped process's reader is cancelled before the
/// stop returns, so no title from it can follow the idle event.
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tune_proto::catalog::{Catalog, Channel};
use tune_proto::config::PlayerConfig;
use tune_proto::platform;
use tune_proto::protocol::Event;

use crate::error::PlayerError;
use crate::metadata::{self, PlayContext};

pub const EVENT_FEED_CAPACITY: usize = 16;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// How to launch the player for a channel.
#[derive(Debug, Clone)]
pub struct PlayerCommand {
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub listen_key: String,
}

impl PlayerCommand {
    pub fn from_config(config: &PlayerConfig) -> Self {
        Self {
            binary: platform::resolve_player_binary(&config.binary),
            args: config.args.clone(),
            listen_key: config.listen_key.clone(),
        }
    }
}

/// What the running process was started for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NowPlaying {
    pub station: String,
    pub channel_id: u32,
    pub channel: String,
    pub pid: Option<u32>,
}

type KillReply = oneshot::Sender<std::io::Result<()>>;

// ── one running process ───────────────────────────────────────────────────────

struct PlayerProcess {
    now_playing: NowPlaying,
    cancel: CancellationToken,
    kill_tx: Option<oneshot::Sender<KillReply>>,
    reader: JoinHandle<()>,
    reaper: JoinHandle<()>,
}

impl PlayerProcess {
    fn spawn(
        command: &PlayerCommand,
        station: &str,
        id: u32,
        channel: &Channel,
        events: mpsc::Sender<Event>,
    ) -> std::io::Result<Self> {
        let mut child = Command::new(&command.binary)
            .args(&command.args)
            .arg(channel.stream_url(&command.listen_key))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("player stdout was not captured"))?;

        let now_playing = NowPlaying {
            station: station.to_string(),
            channel_id: id,
            channel: channel.name.clone(),
            pid: child.id(),
        };
        let label = format!("{}/{} (pid {:?})", station, id, now_playing.pid);

        let cancel = CancellationToken::new();
        let reader = tokio::spawn(reader_task(
            stdout,
            PlayContext::new(station, &channel.name),
            events,
            cancel.clone(),
        ));
        let (kill_tx, kill_rx) = oneshot::channel();
        let reaper = tokio::spawn(reaper_task(child, kill_rx, label));

        Ok(Self {
            now_playing,
            cancel,
            kill_tx: Some(kill_tx),
            reader,
            reaper,
        })
    }

    /// Cancel the reader and kill the process.  A process that has already
    /// exited counts as killed.
    async fn kill(&mut self) -> std::io::Result<()> {
        self.cancel.cancel();
        let Some(kill_tx) = self.kill_tx.take() else {
            return Ok(());
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        if kill_tx.send(reply_tx).is_err() {
            debug!(
                "player: {}/{} had already exited",
                self.now_playing.station, self.now_playing.channel_id
            );
            return Ok(());
        }
        reply_rx.await.unwrap_or(Ok(()))
    }

    async fn join(self, timeout: Duration) {
        let Self {
            now_playing,
            reader,
            reaper,
            ..
        } = self;
        let tasks = async {
            let _ = reader.await;
            let _ = reaper.await;
        };
        if tokio::time::timeout(timeout, tasks).await.is_err() {
            warn!(
                "player: {}/{} did not exit within {:?}",
                now_playing.station, now_playing.channel_id, timeout
            );
        }
    }
}

async fn reader_task(
    stdout: ChildStdout,
    context: PlayContext,
    events: mpsc::Sender<Event>,
    cancel: CancellationToken,
) {
    let titles = metadata::title_events(stdout, context);
    tokio::pin!(titles);
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = titles.next() => match next {
                Some(event) => event,
                None => break,
            },
        };
        debug!("player: title {:?}", event.track);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = events.send(event) => if sent.is_err() {
                debug!("player: event feed closed");
                break;
            },
        }
    }
}

async fn reaper_task(mut child: Child, kill_rx: oneshot::Receiver<KillReply>, label: String) {
    let status = tokio::select! {
        status = child.wait() => status,
        request = kill_rx => {
            let result = child.start_kill();
            match request {
                Ok(reply) => {
                    let _ = reply.send(result);
                }
                Err(_) => {
                    if let Err(e) = result {
                        warn!("player: failed to kill orphaned {}: {}", label, e);
                    }
                }
            }
            child.wait().await
        }
    };
    match status {
        Ok(status) => debug!("player: {} exited with {}", label, status),
        Err(e) => warn!("player: failed to reap {}: {}", label, e),
    }
}

// ── manager ───────────────────────────────────────────────────────────────────

pub struct Player {
    catalog: Arc<Catalog>,
    command: PlayerCommand,
    current: Mutex<Option<PlayerProcess>>,
    events: mpsc::Sender<Event>,
}

impl Player {
    pub fn new(catalog: Arc<Catalog>, command: PlayerCommand) -> (Self, mpsc::Receiver<Event>) {
        let (events, feed) = mpsc::channel(EVENT_FEED_CAPACITY);
        let player = Self {
            catalog,
            command,
            current: Mutex::new(None),
            events,
        };
        (player, feed)
    }

    /// Stop whatever is playing and start `station`/`id`.
    ///
    /// An unknown channel leaves the current process alone.  Once the lookup
    /// succeeds the old process is gone, even if the new one fails to start.
    pub async fn play(&self, station: &str, id: u32) -> Result<(), PlayerError> {
        let channel = self
            .catalog
            .get(station, id)
            .ok_or_else(|| PlayerError::not_found(station, id))?;

        let mut current = self.current.lock().await;
        if let Some(mut previous) = current.take() {
            info!(
                "player: replacing {}/{}",
                previous.now_playing.station, previous.now_playing.channel_id
            );
            previous.kill().await?;
        }

        let process =
            PlayerProcess::spawn(&self.command, station, id, channel, self.events.clone())
                .inspect_err(|e| {
                    warn!(
                        "player: failed to start {:?} for {}/{}: {}",
                        self.command.binary, station, id, e
                    )
                })?;
        info!(
            "player: playing {}/{} '{}' (pid {:?})",
            station, id, channel.name, process.now_playing.pid
        );
        *current = Some(process);
        Ok(())
    }

    /// Stop the current process, then announce the idle state.  Nothing is
    /// announced when nothing was playing.
    ///
    /// The idle event is queued before the lock is released, so a `play`
    /// that follows cannot have its titles land ahead of it.
    pub async fn stop(&self) -> Result<(), PlayerError> {
        let mut current = self.current.lock().await;
        let Some(mut process) = current.take() else {
            debug!("player: stop with nothing playing");
            return Ok(());
        };
        process.kill().await?;
        info!(
            "player: stopped {}/{}",
            process.now_playing.station, process.now_playing.channel_id
        );
        if self.events.send(Event::idle()).await.is_err() {
            debug!("player: event feed closed");
        }
        Ok(())
    }

    pub async fn now_playing(&self) -> Option<NowPlaying> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|p| p.now_playing.clone())
    }

    /// Kill the current process and wait briefly for its tasks to finish.
    pub async fn shutdown(&self) {
        let previous = self.current.lock().await.take();
        let Some(mut process) = previous else {
            return;
        };
        info!(
            "player: shutting down {}/{}",
            process.now_playing.station, process.now_playing.channel_id
        );
        if let Err(e) = process.kill().await {
            warn!("player: kill during shutdown failed: {}", e);
        }
        process.join(SHUTDOWN_TIMEOUT).await;
    }
}
