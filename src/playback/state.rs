// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use url::Url;

/// Playback rates offered by [`next_rate`], in cycling order
pub const PLAYBACK_RATES: [f64; 3] = [1.0, 1.5, 2.0];

/// Seconds jumped by a "skip forward" command
pub const SKIP_FORWARD_SECS: f64 = 30.0;

/// Seconds jumped by a "skip backward" command
pub const SKIP_BACKWARD_SECS: f64 = 15.0;

/// What the player is doing, and with which source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing(Url),
    Paused(Url),
}

impl PlaybackState {
    /// Source of the live session, if any
    pub fn source(&self) -> Option<&Url> {
        match self {
            PlaybackState::Stopped => None,
            PlaybackState::Playing(url) | PlaybackState::Paused(url) => Some(url),
        }
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, PlaybackState::Playing(_))
    }

    /// Whether `source` is the one currently loaded, playing or paused
    pub fn is_active(&self, source: &Url) -> bool {
        self.source() == Some(source)
    }
}

/// Periodic position report
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressTick {
    /// Raw media position in seconds
    pub current_time: f64,
    /// Media duration in seconds, 0 until known
    pub duration: f64,
    pub rate: f64,
}

impl ProgressTick {
    /// Elapsed time on the wall clock at the current rate
    pub fn display_elapsed(&self) -> f64 {
        self.current_time / self.effective_rate()
    }

    /// Remaining time on the wall clock at the current rate
    pub fn display_remaining(&self) -> f64 {
        (self.duration - self.current_time).max(0.0) / self.effective_rate()
    }

    fn effective_rate(&self) -> f64 {
        if self.rate.is_finite() && self.rate > 0.0 {
            self.rate
        } else {
            1.0
        }
    }
}

/// The rate following `current` in [`PLAYBACK_RATES`], wrapping to 1.0
pub fn next_rate(current: f64) -> f64 {
    PLAYBACK_RATES
        .iter()
        .position(|rate| (rate - current).abs() < 0.01)
        .and_then(|i| PLAYBACK_RATES.get(i + 1))
        .copied()
        .unwrap_or(PLAYBACK_RATES[0])
}

/// Format seconds as `mm:ss`, or `hh:mm:ss` from one hour on
pub fn format_clock(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };

    let hours = total / 3600;
    let minutes = (total / 60) % 60;
    let secs = total % 60;

    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes:02}:{secs:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_exposes_source() {
        let url = Url::parse("https://example.com/a.mp3").unwrap();
        let other = Url::parse("https://example.com/b.mp3").unwrap();

        assert_eq!(PlaybackState::Stopped.source(), None);
        assert!(PlaybackState::Paused(url.clone()).is_active(&url));
        assert!(!PlaybackState::Playing(url.clone()).is_active(&other));
        assert!(PlaybackState::Playing(url).is_playing());
    }

    #[test]
    fn rates_cycle() {
        assert_eq!(next_rate(1.0), 1.5);
        assert_eq!(next_rate(1.5), 2.0);
        assert_eq!(next_rate(2.0), 1.0);
        assert_eq!(next_rate(0.75), 1.0);
    }

    #[test]
    fn display_times_scale_with_rate() {
        let tick = ProgressTick {
            current_time: 900.0,
            duration: 1800.0,
            rate: 1.5,
        };

        assert_eq!(tick.display_elapsed(), 600.0);
        assert_eq!(tick.display_remaining(), 600.0);
    }

    #[test]
    fn display_times_ignore_invalid_rate() {
        let tick = ProgressTick {
            current_time: 10.0,
            duration: 5.0,
            rate: 0.0,
        };

        assert_eq!(tick.display_elapsed(), 10.0);
        assert_eq!(tick.display_remaining(), 0.0);
    }

    #[test]
    fn clock_formatting() {
        assert_eq!(format_clock(0.0), "00:00");
        assert_eq!(format_clock(65.9), "01:05");
        assert_eq!(format_clock(3723.0), "01:02:03");
        assert_eq!(format_clock(f64::NAN), "00:00");
        assert_eq!(format_clock(-4.0), "00:00");
    }
}
