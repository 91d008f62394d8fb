// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;

use crate::catalog::Catalog;
use crate::error::{CatalogError, SyncError};
use crate::model::Show;
use crate::progress::{ProgressEvent, SharedProgressReporter};
use crate::store::{LibraryStore, ShowUpdate};

/// How catalog lookups are scheduled within a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupConcurrency {
    /// Every target at once
    Unbounded,
    /// `size` targets at a time, pausing `delay` between chunks
    Chunked { size: usize, delay: Duration },
}

/// Options for library synchronization
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub concurrency: LookupConcurrency,
    /// Upper bound for a single catalog lookup
    pub lookup_timeout: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            concurrency: LookupConcurrency::Chunked {
                size: 4,
                delay: Duration::from_millis(1500),
            },
            lookup_timeout: Duration::from_secs(10),
        }
    }
}

/// Lookup keys for one show missing metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    pub show_id: u64,
    pub title: String,
    /// Primary key
    pub feed_url: Option<String>,
    /// Fallback search term derived from the title
    pub search_term: Option<String>,
}

impl SyncTarget {
    pub fn for_show(show: &Show) -> Self {
        Self {
            show_id: show.id,
            title: show.title.clone(),
            feed_url: show
                .feed_url
                .as_deref()
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string),
            search_term: search_term(&show.title),
        }
    }
}

/// Fills in missing show metadata from the remote catalog
///
/// A pass looks up every show missing metadata, waits for all lookups, then
/// writes the enriched records to the library in a single batch. Passes are
/// serialized, so overlapping calls never interleave their writes.
pub struct LibrarySyncCoordinator {
    catalog: Arc<dyn Catalog>,
    library: Arc<dyn LibraryStore>,
    options: SyncOptions,
    reporter: SharedProgressReporter,
    pass: Mutex<()>,
}

impl LibrarySyncCoordinator {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        library: Arc<dyn LibraryStore>,
        options: SyncOptions,
        reporter: SharedProgressReporter,
    ) -> Self {
        Self {
            catalog,
            library,
            options,
            reporter,
            pass: Mutex::new(()),
        }
    }

    /// Enrich every show missing metadata; returns the number updated
    ///
    /// Lookup failures only leave their show unresolved. Library read and
    /// write failures are returned.
    pub async fn sync_missing_metadata(&self) -> Result<usize, SyncError> {
        let _pass = self.pass.lock().await;

        let shows = self.library.load_shows().await?;
        let targets: Vec<SyncTarget> = shows
            .iter()
            .filter(|show| show.is_missing_metadata())
            .map(SyncTarget::for_show)
            .collect();

        tracing::info!(
            total = shows.len(),
            targets = targets.len(),
            "starting library sync"
        );
        self.reporter.report(ProgressEvent::SyncStarted {
            total_shows: shows.len(),
            targets: targets.len(),
        });

        if targets.is_empty() {
            self.reporter.report(ProgressEvent::SyncCompleted {
                updated: 0,
                unresolved: 0,
            });
            return Ok(0);
        }

        let resolved = self.resolve_all(&targets).await;

        let updates: Vec<ShowUpdate> = shows
            .iter()
            .filter_map(|show| {
                let remote = resolved.get(&show.id)?;
                let merged = merge_show(show, remote);
                (merged != *show).then(|| ShowUpdate {
                    original_id: show.id,
                    show: merged,
                })
            })
            .collect();

        if !updates.is_empty() {
            self.library.apply_updates(&updates).await?;
            self.reporter.report(ProgressEvent::LibraryUpdated {
                updated: updates.len(),
            });
        }

        let unresolved = targets.len() - resolved.len();
        tracing::info!(updated = updates.len(), unresolved, "library sync finished");
        self.reporter.report(ProgressEvent::SyncCompleted {
            updated: updates.len(),
            unresolved,
        });

        Ok(updates.len())
    }

    async fn resolve_all(&self, targets: &[SyncTarget]) -> HashMap<u64, Show> {
        let results: Vec<Option<(u64, Show)>> = match self.options.concurrency {
            LookupConcurrency::Unbounded => {
                join_all(targets.iter().map(|target| self.resolve(target))).await
            }
            LookupConcurrency::Chunked { size, delay } => {
                let size = size.max(1);
                let total_chunks = targets.len().div_ceil(size);
                let mut results = Vec::with_capacity(targets.len());

                for (index, chunk) in targets.chunks(size).enumerate() {
                    if index > 0 && !delay.is_zero() {
                        self.reporter.report(ProgressEvent::Throttling { delay });
                        tokio::time::sleep(delay).await;
                    }
                    self.reporter.report(ProgressEvent::ChunkStarted {
                        index,
                        total_chunks,
                        size: chunk.len(),
                    });
                    results.extend(join_all(chunk.iter().map(|target| self.resolve(target))).await);
                }
                results
            }
        };

        results.into_iter().flatten().collect()
    }

    /// Try the feed URL, then the title search
    async fn resolve(&self, target: &SyncTarget) -> Option<(u64, Show)> {
        let mut found = None;

        if let Some(feed_url) = &target.feed_url {
            found = self
                .bounded(target, self.catalog.lookup_feed(feed_url))
                .await
                .flatten();
        }

        if found.is_none()
            && let Some(term) = &target.search_term
        {
            found = self
                .bounded(target, self.catalog.search_shows(term, 1))
                .await
                .and_then(|shows| shows.into_iter().next());
        }

        self.reporter.report(ProgressEvent::LookupFinished {
            show_id: target.show_id,
            title: target.title.clone(),
            resolved: found.is_some(),
        });

        found.map(|show| (target.show_id, show))
    }

    async fn bounded<T>(
        &self,
        target: &SyncTarget,
        lookup: impl Future<Output = Result<T, CatalogError>>,
    ) -> Option<T> {
        match tokio::time::timeout(self.options.lookup_timeout, lookup).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(error)) => {
                tracing::debug!(show_id = target.show_id, %error, "catalog lookup failed");
                None
            }
            Err(_) => {
                tracing::debug!(show_id = target.show_id, "catalog lookup timed out");
                None
            }
        }
    }
}

/// Apply the fields a catalog record supplies on top of the local one
pub fn merge_show(local: &Show, remote: &Show) -> Show {
    let mut merged = local.clone();

    if let Some(artist) = remote.artist.as_ref().filter(|a| !a.trim().is_empty()) {
        merged.artist = Some(artist.clone());
    }
    if !remote.title.trim().is_empty() {
        merged.title = remote.title.clone();
    }
    if remote.artwork_url.is_some() {
        merged.artwork_url = remote.artwork_url.clone();
    }
    if remote.genre.is_some() {
        merged.genre = remote.genre.clone();
    }
    if merged.feed_url.is_none() {
        merged.feed_url = remote.feed_url.clone();
    }
    if remote.id != 0 {
        merged.id = remote.id;
    }

    merged
}

/// Turn a show title into a catalog search term
///
/// Decodes HTML entities, drops the word "podcast" in any case and collapses
/// whitespace. Returns `None` when nothing is left.
pub fn search_term(title: &str) -> Option<String> {
    const NOISE: &str = "podcast";

    let decoded = html_escape::decode_html_entities(title);
    let lower = decoded.to_ascii_lowercase();

    let mut stripped = String::with_capacity(decoded.len());
    let mut rest = 0;
    for (index, _) in lower.match_indices(NOISE) {
        stripped.push_str(&decoded[rest..index]);
        stripped.push(' ');
        rest = index + NOISE.len();
    }
    stripped.push_str(&decoded[rest..]);

    let term = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    (!term.is_empty()).then_some(term)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PersistenceError;
    use crate::model::Episode;
    use crate::progress::{NoopReporter, ProgressReporter};
    use crate::store::JsonLibraryStore;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{TempDir, tempdir};
    use url::Url;

    #[derive(Default)]
    struct MockCatalog {
        by_feed: HashMap<String, Show>,
        by_term: HashMap<String, Show>,
        failing_feeds: HashSet<String>,
        slow_feeds: HashSet<String>,
        feed_lookups: Mutex<Vec<String>>,
        searches: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Catalog for MockCatalog {
        async fn fetch_show(&self, id: u64) -> Result<Show, CatalogError> {
            Err(CatalogError::NotFound(format!("show {id}")))
        }

        async fn search_shows(&self, term: &str, _limit: usize) -> Result<Vec<Show>, CatalogError> {
            self.searches.lock().await.push(term.to_string());
            Ok(self.by_term.get(term).cloned().into_iter().collect())
        }

        async fn lookup_feed(&self, feed_url: &str) -> Result<Option<Show>, CatalogError> {
            self.feed_lookups.lock().await.push(feed_url.to_string());
            if self.slow_feeds.contains(feed_url) {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if self.failing_feeds.contains(feed_url) {
                return Err(CatalogError::BadResponse {
                    url: feed_url.to_string(),
                    status: 503,
                });
            }
            Ok(self.by_feed.get(feed_url).cloned())
        }

        async fn fetch_episodes(&self, _feed_url: &str) -> Result<Vec<Episode>, CatalogError> {
            Ok(Vec::new())
        }
    }

    /// Counts batch writes on top of the JSON store
    struct CountingLibrary {
        inner: JsonLibraryStore,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl LibraryStore for CountingLibrary {
        async fn load_shows(&self) -> Result<Vec<Show>, PersistenceError> {
            self.inner.load_shows().await
        }

        async fn apply_updates(&self, updates: &[ShowUpdate]) -> Result<(), PersistenceError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.apply_updates(updates).await
        }
    }

    #[derive(Default)]
    struct CollectingReporter {
        events: std::sync::Mutex<Vec<ProgressEvent>>,
    }

    impl ProgressReporter for CollectingReporter {
        fn report(&self, event: ProgressEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn feed(id: u64) -> String {
        format!("https://example.com/{id}/feed.xml")
    }

    fn local_show(id: u64) -> Show {
        Show {
            id,
            title: format!("Show {id}"),
            artist: None,
            feed_url: Some(feed(id)),
            artwork_url: None,
            genre: None,
        }
    }

    fn remote_show(id: u64) -> Show {
        Show {
            id: 1000 + id,
            title: format!("Show {id} (Official)"),
            artist: Some(format!("Host {id}")),
            feed_url: Some(feed(id)),
            artwork_url: Url::parse(&format!("https://example.com/{id}.jpg")).ok(),
            genre: Some("Technology".to_string()),
        }
    }

    async fn library(shows: &[Show]) -> (TempDir, Arc<CountingLibrary>) {
        let dir = tempdir().unwrap();
        let inner = JsonLibraryStore::new(dir.path().join("library.json"));
        inner.replace_all(shows).await.unwrap();
        (
            dir,
            Arc::new(CountingLibrary {
                inner,
                writes: AtomicUsize::new(0),
            }),
        )
    }

    fn options(concurrency: LookupConcurrency) -> SyncOptions {
        SyncOptions {
            concurrency,
            lookup_timeout: Duration::from_secs(5),
        }
    }

    fn fast_chunks() -> LookupConcurrency {
        LookupConcurrency::Chunked {
            size: 3,
            delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn partial_resolution_updates_resolved_shows() {
        let shows: Vec<Show> = (1..=10).map(local_show).collect();
        let (_dir, library) = library(&shows).await;
        let mut catalog = MockCatalog::default();
        for id in 1..=7 {
            catalog.by_feed.insert(feed(id), remote_show(id));
        }

        let coordinator = LibrarySyncCoordinator::new(
            Arc::new(catalog),
            library.clone(),
            options(fast_chunks()),
            NoopReporter::shared(),
        );

        assert_eq!(coordinator.sync_missing_metadata().await.unwrap(), 7);
        assert_eq!(library.writes.load(Ordering::SeqCst), 1);

        let stored = library.load_shows().await.unwrap();
        let enriched = stored.iter().filter(|s| !s.is_missing_metadata()).count();
        assert_eq!(enriched, 7);
        assert!(stored.iter().any(|s| s.id == 1001 && s.title == "Show 1 (Official)"));
        assert_eq!(stored.iter().filter(|s| s.is_missing_metadata()).count(), 3);
    }

    #[tokio::test]
    async fn second_pass_is_a_no_op() {
        let shows: Vec<Show> = (1..=4).map(local_show).collect();
        let (_dir, library) = library(&shows).await;
        let mut catalog = MockCatalog::default();
        for id in 1..=4 {
            catalog.by_feed.insert(feed(id), remote_show(id));
        }
        let catalog = Arc::new(catalog);

        let coordinator = LibrarySyncCoordinator::new(
            catalog.clone(),
            library.clone(),
            options(LookupConcurrency::Unbounded),
            NoopReporter::shared(),
        );

        assert_eq!(coordinator.sync_missing_metadata().await.unwrap(), 4);
        let lookups = catalog.feed_lookups.lock().await.len();

        assert_eq!(coordinator.sync_missing_metadata().await.unwrap(), 0);
        assert_eq!(library.writes.load(Ordering::SeqCst), 1);
        assert_eq!(catalog.feed_lookups.lock().await.len(), lookups);
    }

    #[tokio::test]
    async fn enriched_library_performs_no_writes() {
        let shows: Vec<Show> = (1..=3).map(remote_show).collect();
        let (_dir, library) = library(&shows).await;

        let coordinator = LibrarySyncCoordinator::new(
            Arc::new(MockCatalog::default()),
            library.clone(),
            options(LookupConcurrency::Unbounded),
            NoopReporter::shared(),
        );

        assert_eq!(coordinator.sync_missing_metadata().await.unwrap(), 0);
        assert_eq!(library.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn title_search_is_the_fallback() {
        let mut show = local_show(1);
        show.title = "The Rust &amp; Friends Podcast\n".to_string();
        let (_dir, library) = library(&[show]).await;

        let mut catalog = MockCatalog::default();
        catalog
            .by_term
            .insert("The Rust & Friends".to_string(), remote_show(1));
        let catalog = Arc::new(catalog);

        let coordinator = LibrarySyncCoordinator::new(
            catalog.clone(),
            library.clone(),
            options(LookupConcurrency::Unbounded),
            NoopReporter::shared(),
        );

        assert_eq!(coordinator.sync_missing_metadata().await.unwrap(), 1);
        assert_eq!(*catalog.feed_lookups.lock().await, vec![feed(1)]);
        assert_eq!(
            *catalog.searches.lock().await,
            vec!["The Rust & Friends".to_string()]
        );
    }

    #[tokio::test]
    async fn lookup_failures_do_not_abort_the_pass() {
        let shows: Vec<Show> = (1..=3).map(local_show).collect();
        let (_dir, library) = library(&shows).await;

        let mut catalog = MockCatalog::default();
        catalog.failing_feeds.insert(feed(1));
        catalog.by_feed.insert(feed(2), remote_show(2));
        catalog.by_feed.insert(feed(3), remote_show(3));

        let coordinator = LibrarySyncCoordinator::new(
            Arc::new(catalog),
            library.clone(),
            options(fast_chunks()),
            NoopReporter::shared(),
        );

        assert_eq!(coordinator.sync_missing_metadata().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn slow_lookup_times_out() {
        let shows: Vec<Show> = (1..=2).map(local_show).collect();
        let (_dir, library) = library(&shows).await;

        let mut catalog = MockCatalog::default();
        catalog.slow_feeds.insert(feed(1));
        catalog.by_feed.insert(feed(2), remote_show(2));

        let coordinator = LibrarySyncCoordinator::new(
            Arc::new(catalog),
            library.clone(),
            SyncOptions {
                concurrency: LookupConcurrency::Unbounded,
                lookup_timeout: Duration::from_millis(50),
            },
            NoopReporter::shared(),
        );

        let updated = tokio::time::timeout(Duration::from_secs(5), coordinator.sync_missing_metadata())
            .await
            .expect("sync pass should not wait for the slow lookup")
            .unwrap();
        assert_eq!(updated, 1);
    }

    #[tokio::test]
    async fn chunked_pass_reports_chunks_and_throttling() {
        let shows: Vec<Show> = (1..=7).map(local_show).collect();
        let (_dir, library) = library(&shows).await;
        let reporter = Arc::new(CollectingReporter::default());

        let coordinator = LibrarySyncCoordinator::new(
            Arc::new(MockCatalog::default()),
            library,
            options(fast_chunks()),
            reporter.clone(),
        );

        assert_eq!(coordinator.sync_missing_metadata().await.unwrap(), 0);

        let events = reporter.events.lock().unwrap();
        let chunks: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::ChunkStarted { size, .. } => Some(*size),
                _ => None,
            })
            .collect();
        let throttles = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Throttling { .. }))
            .count();

        assert_eq!(chunks, vec![3, 3, 1]);
        assert_eq!(throttles, 2);
        assert_eq!(
            events.last(),
            Some(&ProgressEvent::SyncCompleted {
                updated: 0,
                unresolved: 7
            })
        );
    }

    #[tokio::test]
    async fn concurrent_passes_write_once() {
        let shows: Vec<Show> = (1..=5).map(local_show).collect();
        let (_dir, library) = library(&shows).await;
        let mut catalog = MockCatalog::default();
        for id in 1..=5 {
            catalog.by_feed.insert(feed(id), remote_show(id));
        }

        let coordinator = LibrarySyncCoordinator::new(
            Arc::new(catalog),
            library.clone(),
            options(LookupConcurrency::Unbounded),
            NoopReporter::shared(),
        );

        let (first, second) = tokio::join!(
            coordinator.sync_missing_metadata(),
            coordinator.sync_missing_metadata()
        );

        assert_eq!(first.unwrap() + second.unwrap(), 5);
        assert_eq!(library.writes.load(Ordering::SeqCst), 1);
        assert_eq!(library.load_shows().await.unwrap().len(), 5);
    }

    #[test]
    fn sync_target_trims_feed_url() {
        let mut show = local_show(9);
        show.feed_url = Some("  https://example.com/9/feed.xml \n".to_string());

        let target = SyncTarget::for_show(&show);
        assert_eq!(target.feed_url.as_deref(), Some("https://example.com/9/feed.xml"));

        show.feed_url = Some("   ".to_string());
        assert_eq!(SyncTarget::for_show(&show).feed_url, None);
    }

    #[test]
    fn search_term_cleanup() {
        assert_eq!(search_term("Daily PODCAST News").as_deref(), Some("Daily News"));
        assert_eq!(search_term("Tom &amp; Jerry\n\tShow").as_deref(), Some("Tom & Jerry Show"));
        assert_eq!(search_term("Podcast"), None);
        assert_eq!(search_term("  "), None);
    }

    #[test]
    fn merge_keeps_local_values_the_remote_lacks() {
        let mut local = local_show(1);
        local.artist = Some("Local Host".to_string());
        let remote = Show {
            id: 0,
            title: String::new(),
            artist: None,
            feed_url: None,
            artwork_url: Url::parse("https://example.com/a.jpg").ok(),
            genre: None,
        };

        let merged = merge_show(&local, &remote);

        assert_eq!(merged.id, 1);
        assert_eq!(merged.title, "Show 1");
        assert_eq!(merged.artist.as_deref(), Some("Local Host"));
        assert_eq!(merged.feed_url, local.feed_url);
        assert!(merged.artwork_url.is_some());
    }
}
