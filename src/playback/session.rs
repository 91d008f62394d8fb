// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Seams to the platform's media stack.

use async_trait::async_trait;
use url::Url;

use crate::error::PlaybackError;

/// Creates media sessions for a source
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Load `source` positioned at `start_at` seconds
    ///
    /// The returned session is paused until [`MediaSession::play`] is called.
    async fn open(&self, source: &Url, start_at: f64) -> Result<Box<dyn MediaSession>, PlaybackError>;
}

/// A single loaded media item
///
/// Dropping the session releases it.
pub trait MediaSession: Send {
    fn play(&mut self);
    fn pause(&mut self);
    fn seek(&mut self, position: f64);
    fn set_rate(&mut self, rate: f64);
    fn current_time(&self) -> f64;

    /// Duration in seconds, `None` until the resource reports a finite value
    fn duration(&self) -> Option<f64>;

    /// Whether playback ran to the end of the media
    fn is_finished(&self) -> bool;
}

/// Metadata shown on the OS now-playing surface
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlayingInfo {
    pub title: String,
    pub artist: Option<String>,
    pub artwork_url: Option<Url>,
    pub duration: f64,
    pub elapsed: f64,
    /// 0 while paused
    pub rate: f64,
}

/// The OS now-playing surface
pub trait NowPlaying: Send + Sync {
    fn update(&self, info: &NowPlayingInfo);
    fn clear(&self);
}

/// Now-playing surface for hosts without one
#[derive(Debug, Default, Clone, Copy)]
pub struct NoNowPlaying;

impl NowPlaying for NoNowPlaying {
    fn update(&self, _info: &NowPlayingInfo) {}
    fn clear(&self) {}
}

/// Commands arriving from lock screens, headsets and similar
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RemoteCommand {
    Play,
    Pause,
    TogglePlayPause,
    SkipForward(f64),
    SkipBackward(f64),
    SeekTo(f64),
}
