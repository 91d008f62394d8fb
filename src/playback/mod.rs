//! Playback state machine.
//!
//! [`PlaybackController`] runs as a task owning the one live media session.
//! Callers talk to it through a cloneable [`PlaybackHandle`] and observe it
//! through watch and broadcast channels.

mod controller;
mod session;
mod state;

pub use controller::{PlaybackController, PlaybackHandle, PlaybackSettings};
pub use session::{MediaBackend, MediaSession, NoNowPlaying, NowPlaying, NowPlayingInfo, RemoteCommand};
pub use state::{
    PLAYBACK_RATES, PlaybackState, ProgressTick, SKIP_BACKWARD_SECS, SKIP_FORWARD_SECS,
    format_clock, next_rate,
};
