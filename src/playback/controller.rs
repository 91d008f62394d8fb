// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use url::Url;

use crate::download::LocalMedia;
use crate::error::PlaybackError;
use crate::model::{Episode, Show};
use crate::store::{CheckpointStore, PlaybackCheckpoint};

use super::session::{MediaBackend, MediaSession, NowPlaying, NowPlayingInfo, RemoteCommand};
use super::state::{PlaybackState, ProgressTick, SKIP_BACKWARD_SECS, SKIP_FORWARD_SECS};

const COMMAND_CAPACITY: usize = 32;
const PROGRESS_CAPACITY: usize = 64;
const MIN_PROGRESS_INTERVAL: Duration = Duration::from_millis(1);

/// Tunables for the playback controller
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackSettings {
    /// How often progress is reported while a session is live
    pub progress_interval: Duration,
    /// Checkpoints are only written from this position on
    pub checkpoint_min_position: f64,
    /// Checkpoints are only written with at least this much left
    pub checkpoint_min_remaining: f64,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            progress_interval: Duration::from_millis(500),
            checkpoint_min_position: 5.0,
            checkpoint_min_remaining: 3.0,
        }
    }
}

impl PlaybackSettings {
    /// Whether a pause at `position` of `duration` is worth resuming from
    pub fn should_checkpoint(&self, position: f64, duration: f64) -> bool {
        position.is_finite()
            && duration.is_finite()
            && position >= self.checkpoint_min_position
            && duration - position >= self.checkpoint_min_remaining
    }
}

enum Op {
    PlayEpisode {
        episode: Box<Episode>,
        show: Option<Show>,
    },
    PlayUrl(Url),
    Pause,
    Stop,
    Toggle(Url),
    Seek(f64),
    SetRate(f64),
    Checkpoint,
    Restore,
    Remote(RemoteCommand),
}

struct Command {
    op: Op,
    reply: oneshot::Sender<PlaybackState>,
}

/// Metadata for the source held by the live session
struct Loaded {
    episode: Episode,
    show_title: String,
    artist: Option<String>,
    artwork_url: Option<Url>,
    source: Url,
}

impl Loaded {
    fn new(episode: Episode, show: Option<&Show>, source: Url) -> Self {
        let show_title = show
            .map(|s| s.title.clone())
            .or_else(|| episode.show_title.clone())
            .unwrap_or_default();
        let artwork_url = episode
            .artwork_url
            .clone()
            .or_else(|| show.and_then(|s| s.artwork_url.clone()));

        Self {
            show_title,
            artist: show.and_then(|s| s.artist.clone()),
            artwork_url,
            source,
            episode,
        }
    }

    fn artist(&self) -> Option<String> {
        self.artist.clone().or_else(|| {
            Some(self.show_title.clone()).filter(|title| !title.is_empty())
        })
    }
}

/// Single owner of the media session and the playback state
///
/// Runs as a task; every operation arrives through a [`PlaybackHandle`] and is
/// applied in order, so two concurrent `play` calls cannot both open a session.
pub struct PlaybackController {
    backend: Arc<dyn MediaBackend>,
    local_media: Arc<dyn LocalMedia>,
    checkpoints: Arc<dyn CheckpointStore>,
    now_playing: Arc<dyn NowPlaying>,
    settings: PlaybackSettings,
    state: PlaybackState,
    session: Option<Box<dyn MediaSession>>,
    loaded: Option<Loaded>,
    rate: f64,
    state_tx: watch::Sender<PlaybackState>,
    episode_tx: watch::Sender<Option<Episode>>,
    progress_tx: broadcast::Sender<ProgressTick>,
}

impl PlaybackController {
    /// Start the controller task and return a handle to it
    ///
    /// The task ends once every handle has been dropped.
    pub fn spawn(
        backend: Arc<dyn MediaBackend>,
        local_media: Arc<dyn LocalMedia>,
        checkpoints: Arc<dyn CheckpointStore>,
        now_playing: Arc<dyn NowPlaying>,
        settings: PlaybackSettings,
    ) -> PlaybackHandle {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (state_tx, state_rx) = watch::channel(PlaybackState::Stopped);
        let (episode_tx, episode_rx) = watch::channel(None);
        let (progress_tx, _) = broadcast::channel(PROGRESS_CAPACITY);

        let controller = Self {
            backend,
            local_media,
            checkpoints,
            now_playing,
            settings,
            state: PlaybackState::Stopped,
            session: None,
            loaded: None,
            rate: 1.0,
            state_tx,
            episode_tx,
            progress_tx: progress_tx.clone(),
        };
        tokio::spawn(controller.run(commands_rx));

        PlaybackHandle {
            commands: commands_tx,
            state: state_rx,
            episode: episode_rx,
            progress: progress_tx,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let mut ticker = tokio::time::interval(
            self.settings.progress_interval.max(MIN_PROGRESS_INTERVAL),
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(Command { op, reply }) = command else {
                        break;
                    };
                    let state = self.apply(op).await;
                    // The caller may have stopped waiting
                    let _ = reply.send(state);
                }
                _ = ticker.tick(), if self.session.is_some() => self.observe(),
            }
        }

        self.release_session();
        tracing::debug!("playback controller stopped");
    }

    async fn apply(&mut self, op: Op) -> PlaybackState {
        match op {
            Op::PlayEpisode { episode, show } => self.play_episode(*episode, show).await,
            Op::PlayUrl(source) => self.play_url(source).await,
            Op::Pause => self.pause().await,
            Op::Stop => self.stop(),
            Op::Toggle(source) => self.toggle(source).await,
            Op::Seek(position) => self.seek(position),
            Op::SetRate(rate) => self.set_rate(rate),
            Op::Checkpoint => self.write_checkpoint().await,
            Op::Restore => self.restore().await,
            Op::Remote(command) => self.remote(command).await,
        }
        self.state.clone()
    }

    async fn play_episode(&mut self, episode: Episode, show: Option<Show>) {
        let Some(source) = resolve_source(self.local_media.as_ref(), &episode).await else {
            let error = PlaybackError::SourceUnavailable {
                title: episode.title.clone(),
            };
            tracing::warn!(%error, "cannot play episode");
            return;
        };

        let loaded = Loaded::new(episode, show.as_ref(), source.clone());
        self.start(source, Some(loaded)).await;
    }

    async fn play_url(&mut self, source: Url) {
        let loaded = self.loaded.take().filter(|l| l.source == source);
        self.start(source, loaded).await;
    }

    async fn start(&mut self, source: Url, loaded: Option<Loaded>) {
        if self.session.is_some() && self.state.is_active(&source) {
            self.set_loaded(loaded);
            if !self.state.is_playing() {
                self.resume();
            }
            return;
        }

        self.release_session();

        match self.backend.open(&source, 0.0).await {
            Ok(mut session) => {
                session.set_rate(self.rate);
                session.play();
                self.session = Some(session);
                self.set_loaded(loaded);
                tracing::info!(source = %source, "playback started");
                self.set_state(PlaybackState::Playing(source));
                self.refresh_now_playing();
            }
            Err(error) => {
                tracing::error!(%error, "failed to start playback");
                self.set_loaded(None);
                self.set_state(PlaybackState::Stopped);
                self.now_playing.clear();
            }
        }
    }

    fn resume(&mut self) {
        let Some(source) = self.state.source().cloned() else {
            return;
        };
        if let Some(session) = self.session.as_mut() {
            session.set_rate(self.rate);
            session.play();
        }
        tracing::debug!(source = %source, "playback resumed");
        self.set_state(PlaybackState::Playing(source));
        self.refresh_now_playing();
        self.emit_tick();
    }

    async fn pause(&mut self) {
        let PlaybackState::Playing(source) = self.state.clone() else {
            return;
        };
        if let Some(session) = self.session.as_mut() {
            session.pause();
        }
        tracing::debug!(source = %source, "playback paused");
        self.set_state(PlaybackState::Paused(source));
        self.refresh_now_playing();
        self.write_checkpoint().await;
    }

    fn stop(&mut self) {
        self.release_session();
        self.set_loaded(None);
        self.set_state(PlaybackState::Stopped);
        self.now_playing.clear();
    }

    async fn toggle(&mut self, source: Url) {
        if self.state.is_playing() && self.state.is_active(&source) {
            self.pause().await;
        } else {
            self.play_url(source).await;
        }
    }

    fn seek(&mut self, position: f64) {
        if !position.is_finite() {
            return;
        }
        let duration = self.known_duration();
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let upper = if duration > 0.0 { duration } else { f64::MAX };
        session.seek(position.clamp(0.0, upper));
        self.refresh_now_playing();
        self.emit_tick();
    }

    fn set_rate(&mut self, rate: f64) {
        if !rate.is_finite() || rate <= 0.0 {
            tracing::warn!(rate, "ignoring invalid playback rate");
            return;
        }
        self.rate = rate;
        if self.state.is_playing()
            && let Some(session) = self.session.as_mut()
        {
            session.set_rate(rate);
        }
        self.refresh_now_playing();
    }

    async fn remote(&mut self, command: RemoteCommand) {
        tracing::debug!(?command, "remote command");
        match command {
            RemoteCommand::Play => {
                if let PlaybackState::Paused(source) = self.state.clone() {
                    self.play_url(source).await;
                }
            }
            RemoteCommand::Pause => self.pause().await,
            RemoteCommand::TogglePlayPause => match self.state.clone() {
                PlaybackState::Playing(_) => self.pause().await,
                PlaybackState::Paused(source) => self.play_url(source).await,
                PlaybackState::Stopped => {}
            },
            RemoteCommand::SkipForward(secs) => {
                if let Some(now) = self.current_time() {
                    self.seek(now + secs);
                }
            }
            RemoteCommand::SkipBackward(secs) => {
                if let Some(now) = self.current_time() {
                    self.seek(now - secs);
                }
            }
            RemoteCommand::SeekTo(position) => self.seek(position),
        }
    }

    async fn write_checkpoint(&mut self) {
        let checkpoint = {
            let (Some(session), Some(loaded)) = (self.session.as_ref(), self.loaded.as_ref()) else {
                return;
            };
            let position = session.current_time();
            let duration = self.known_duration();

            if !self.settings.should_checkpoint(position, duration) {
                tracing::debug!(position, duration, "position not worth a checkpoint");
                return;
            }

            PlaybackCheckpoint {
                episode: loaded.episode.clone(),
                show_title: loaded.show_title.clone(),
                artwork_url: loaded.artwork_url.clone(),
                position_secs: position,
                saved_at: Utc::now(),
            }
        };

        match self.checkpoints.save(&checkpoint).await {
            Ok(()) => tracing::debug!(
                episode = checkpoint.episode.id,
                position = checkpoint.position_secs,
                "checkpoint saved"
            ),
            Err(error) => tracing::warn!(%error, "failed to save checkpoint"),
        }
    }

    async fn restore(&mut self) {
        if self.session.is_some() {
            tracing::debug!("session already live, not restoring");
            return;
        }

        let checkpoint = match self.checkpoints.load().await {
            Ok(Some(checkpoint)) => checkpoint,
            Ok(None) => return,
            Err(error) => {
                tracing::warn!(%error, "failed to load checkpoint");
                return;
            }
        };

        let Some(source) = resolve_source(self.local_media.as_ref(), &checkpoint.episode).await
        else {
            let error = PlaybackError::SourceUnavailable {
                title: checkpoint.episode.title.clone(),
            };
            tracing::warn!(%error, "cannot restore last session");
            return;
        };

        let position = checkpoint.position_secs.max(0.0);
        match self.backend.open(&source, position).await {
            Ok(session) => {
                self.session = Some(session);
                self.set_loaded(Some(Loaded {
                    episode: checkpoint.episode,
                    show_title: checkpoint.show_title,
                    artist: None,
                    artwork_url: checkpoint.artwork_url,
                    source: source.clone(),
                }));
                tracing::info!(source = %source, position, "restored last session");
                self.set_state(PlaybackState::Paused(source));
                self.refresh_now_playing();
            }
            Err(error) => tracing::error!(%error, "failed to restore last session"),
        }
    }

    /// Periodic observation of the live session
    fn observe(&mut self) {
        let finished = match self.session.as_ref() {
            Some(session) => session.is_finished(),
            None => return,
        };

        if finished {
            tracing::info!("reached end of media");
            self.stop();
        } else if self.state.is_playing() {
            self.emit_tick();
        }
    }

    fn emit_tick(&self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let tick = ProgressTick {
            current_time: session.current_time(),
            duration: session.duration().filter(|d| valid_duration(*d)).unwrap_or(0.0),
            rate: self.rate,
        };
        // Nobody listening is fine
        let _ = self.progress_tx.send(tick);
    }

    fn refresh_now_playing(&self) {
        let Some(session) = self.session.as_ref() else {
            self.now_playing.clear();
            return;
        };

        let (title, artist, artwork_url) = match &self.loaded {
            Some(loaded) => (
                loaded.episode.title.clone(),
                loaded.artist(),
                loaded.artwork_url.clone(),
            ),
            None => (
                self.state.source().map(Url::to_string).unwrap_or_default(),
                None,
                None,
            ),
        };

        self.now_playing.update(&NowPlayingInfo {
            title,
            artist,
            artwork_url,
            duration: self.known_duration(),
            elapsed: session.current_time(),
            rate: if self.state.is_playing() { self.rate } else { 0.0 },
        });
    }

    fn current_time(&self) -> Option<f64> {
        self.session.as_ref().map(|s| s.current_time())
    }

    /// Session duration, else the episode's advertised one, else 0
    fn known_duration(&self) -> f64 {
        self.session
            .as_ref()
            .and_then(|s| s.duration())
            .filter(|d| valid_duration(*d))
            .or_else(|| self.loaded.as_ref().map(|l| l.episode.duration()))
            .unwrap_or(0.0)
    }

    fn release_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.pause();
            tracing::debug!("media session released");
        }
    }

    fn set_state(&mut self, state: PlaybackState) {
        self.state = state.clone();
        self.state_tx.send_replace(state);
    }

    fn set_loaded(&mut self, loaded: Option<Loaded>) {
        self.loaded = loaded;
        let episode = self.loaded.as_ref().map(|l| l.episode.clone());
        self.episode_tx.send_if_modified(|current| {
            if *current == episode {
                return false;
            }
            *current = episode;
            true
        });
    }
}

/// Prefer a downloaded copy over the remote stream
async fn resolve_source(local_media: &dyn LocalMedia, episode: &Episode) -> Option<Url> {
    if let Some(path) = local_media.local_file(episode).await {
        match std::path::absolute(&path)
            .ok()
            .and_then(|p| Url::from_file_path(p).ok())
        {
            Some(url) => return Some(url),
            None => {
                tracing::warn!(path = %path.display(), "local file cannot be addressed, streaming instead")
            }
        }
    }
    episode.source_url()
}

fn valid_duration(duration: f64) -> bool {
    duration.is_finite() && duration > 0.0
}

/// Cloneable front door to a running [`PlaybackController`]
///
/// Every operation returns the state after it was applied.
#[derive(Clone)]
pub struct PlaybackHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<PlaybackState>,
    episode: watch::Receiver<Option<Episode>>,
    progress: broadcast::Sender<ProgressTick>,
}

impl PlaybackHandle {
    async fn send(&self, op: Op) -> PlaybackState {
        let (reply, response) = oneshot::channel();
        if self.commands.send(Command { op, reply }).await.is_err() {
            tracing::warn!("playback controller is no longer running");
            return self.state();
        }
        response.await.unwrap_or_else(|_| self.state())
    }

    /// Play an episode, preferring its downloaded copy
    pub async fn play_episode(&self, episode: Episode, show: Option<Show>) -> PlaybackState {
        self.send(Op::PlayEpisode {
            episode: Box::new(episode),
            show,
        })
        .await
    }

    /// Play an already resolved source
    pub async fn play_url(&self, source: Url) -> PlaybackState {
        self.send(Op::PlayUrl(source)).await
    }

    pub async fn pause(&self) -> PlaybackState {
        self.send(Op::Pause).await
    }

    pub async fn stop(&self) -> PlaybackState {
        self.send(Op::Stop).await
    }

    /// Pause `source` if it is playing, otherwise play or resume it
    pub async fn toggle(&self, source: Url) -> PlaybackState {
        self.send(Op::Toggle(source)).await
    }

    /// Move to `position` seconds, clamped to the media
    pub async fn seek(&self, position: f64) -> PlaybackState {
        self.send(Op::Seek(position)).await
    }

    pub async fn set_playback_rate(&self, rate: f64) -> PlaybackState {
        self.send(Op::SetRate(rate)).await
    }

    pub async fn skip_forward(&self) -> PlaybackState {
        self.remote(RemoteCommand::SkipForward(SKIP_FORWARD_SECS))
            .await
    }

    pub async fn skip_backward(&self) -> PlaybackState {
        self.remote(RemoteCommand::SkipBackward(SKIP_BACKWARD_SECS))
            .await
    }

    /// Save a resume point now, e.g. when the app goes to the background
    pub async fn checkpoint_now(&self) -> PlaybackState {
        self.send(Op::Checkpoint).await
    }

    /// Load the last checkpoint into a paused session
    pub async fn restore_last_state(&self) -> PlaybackState {
        self.send(Op::Restore).await
    }

    /// Route a command from the OS media surface
    pub async fn remote(&self, command: RemoteCommand) -> PlaybackState {
        self.send(Op::Remote(command)).await
    }

    pub fn state(&self) -> PlaybackState {
        self.state.borrow().clone()
    }

    pub fn current_episode(&self) -> Option<Episode> {
        self.episode.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<PlaybackState> {
        self.state.clone()
    }

    pub fn watch_episode(&self) -> watch::Receiver<Option<Episode>> {
        self.episode.clone()
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressTick> {
        self.progress.subscribe()
    }
}
