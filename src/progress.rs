// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;
use std::time::Duration;

/// Events emitted during a library sync pass
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// The library was read and lookup targets were selected
    SyncStarted {
        total_shows: usize,
        /// Shows missing metadata, one lookup target each
        targets: usize,
    },

    /// A chunk of lookups is about to run
    ChunkStarted {
        /// Zero-based chunk index
        index: usize,
        total_chunks: usize,
        size: usize,
    },

    /// Waiting between chunks to respect catalog rate limits
    Throttling { delay: Duration },

    /// One target has been looked up
    LookupFinished {
        show_id: u64,
        title: String,
        resolved: bool,
    },

    /// Enriched records were written to the library
    LibraryUpdated { updated: usize },

    /// Sync pass completed
    SyncCompleted {
        updated: usize,
        /// Targets with no catalog match; they stay eligible for the next pass
        unresolved: usize,
    },
}

/// Trait for reporting progress events during a sync pass.
///
/// Implementations can use this to display progress bars, log messages,
/// or collect statistics.
pub trait ProgressReporter: Send + Sync {
    /// Report a progress event
    fn report(&self, event: ProgressEvent);
}

/// A shared reference to a progress reporter
pub type SharedProgressReporter = Arc<dyn ProgressReporter>;

/// A no-op progress reporter that silently ignores all events.
/// Useful for tests or quiet mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: ProgressEvent) {}
}

impl NoopReporter {
    /// Create a new NoopReporter wrapped in an Arc
    pub fn shared() -> SharedProgressReporter {
        Arc::new(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingReporter {
        events: Mutex<Vec<ProgressEvent>>,
    }

    impl ProgressReporter for CollectingReporter {
        fn report(&self, event: ProgressEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[test]
    fn noop_reporter_handles_all_events() {
        let reporter = NoopReporter::shared();

        reporter.report(ProgressEvent::SyncStarted {
            total_shows: 10,
            targets: 3,
        });
        reporter.report(ProgressEvent::ChunkStarted {
            index: 0,
            total_chunks: 1,
            size: 3,
        });
        reporter.report(ProgressEvent::Throttling {
            delay: Duration::from_millis(1500),
        });
        reporter.report(ProgressEvent::LookupFinished {
            show_id: 1,
            title: "Show".to_string(),
            resolved: true,
        });
        reporter.report(ProgressEvent::LibraryUpdated { updated: 1 });
        reporter.report(ProgressEvent::SyncCompleted {
            updated: 1,
            unresolved: 2,
        });
    }

    #[test]
    fn shared_reporter_receives_events_in_order() {
        let collector = Arc::new(CollectingReporter::default());
        let reporter: SharedProgressReporter = collector.clone();

        reporter.report(ProgressEvent::LibraryUpdated { updated: 2 });
        reporter.report(ProgressEvent::SyncCompleted {
            updated: 2,
            unresolved: 0,
        });

        let events = collector.events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                ProgressEvent::LibraryUpdated { updated: 2 },
                ProgressEvent::SyncCompleted {
                    updated: 2,
                    unresolved: 0
                },
            ]
        );
    }
}
