// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::DownloadError;
use crate::http::HttpClient;
use crate::model::Episode;
use crate::store::DownloadRegistry;

use super::filename::local_filename;
use super::transfer::transfer;

const EVENT_CAPACITY: usize = 256;
const PARTIAL_SUFFIX: &str = ".partial";

/// Download state of a single source
#[derive(Debug, Clone)]
pub enum DownloadStatus {
    NotDownloaded,
    /// Fraction complete, in `[0, 1]`
    Downloading(f64),
    Downloaded(PathBuf),
    Failed(Arc<DownloadError>),
}

impl DownloadStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DownloadStatus::Downloading(_))
    }
}

/// A status change for one canonical source URL
#[derive(Debug, Clone)]
pub struct DownloadEvent {
    pub source: Url,
    pub status: DownloadStatus,
}

/// Outcome of a startup reconciliation
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Registry entries whose file is present
    pub restored: usize,
    /// Registry entries dropped because their file is gone
    pub dropped: usize,
    /// Leftover partial files removed from the downloads directory
    pub partial_files_cleaned: usize,
}

/// Answers whether an episode has a playable local copy
#[async_trait]
pub trait LocalMedia: Send + Sync {
    async fn local_file(&self, episode: &Episode) -> Option<PathBuf>;
}

struct InFlight {
    id: u64,
    cancel: CancellationToken,
}

#[derive(Default)]
struct TransferTable {
    statuses: HashMap<Url, DownloadStatus>,
    in_flight: HashMap<Url, InFlight>,
}

struct Inner {
    client: Arc<dyn HttpClient>,
    downloads_dir: PathBuf,
    registry: Arc<dyn DownloadRegistry>,
    table: Mutex<TransferTable>,
    events: broadcast::Sender<DownloadEvent>,
    next_id: AtomicU64,
}

/// Owns every episode transfer and the status of each source
///
/// Cloning is cheap; all clones share the same transfer table. Statuses are
/// published on a broadcast channel in the order they are recorded.
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<Inner>,
}

impl DownloadManager {
    pub fn new(
        client: Arc<dyn HttpClient>,
        downloads_dir: impl Into<PathBuf>,
        registry: Arc<dyn DownloadRegistry>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                client,
                downloads_dir: downloads_dir.into(),
                registry,
                table: Mutex::new(TransferTable::default()),
                events,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Receive every status change from now on
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.inner.events.subscribe()
    }

    /// Directory completed downloads are stored in
    pub fn downloads_dir(&self) -> &Path {
        &self.inner.downloads_dir
    }

    /// Last published status for `source`
    pub fn status(&self, source: &Url) -> DownloadStatus {
        self.inner
            .table()
            .statuses
            .get(source)
            .cloned()
            .unwrap_or(DownloadStatus::NotDownloaded)
    }

    /// Snapshot of every known status
    pub fn statuses(&self) -> HashMap<Url, DownloadStatus> {
        self.inner.table().statuses.clone()
    }

    pub fn is_in_flight(&self, source: &Url) -> bool {
        self.inner.table().in_flight.contains_key(source)
    }

    /// Where the completed file for `source` lives
    pub fn local_path(&self, source: &Url) -> PathBuf {
        self.inner.local_path(source)
    }

    /// Start downloading an episode
    ///
    /// Republishes `Downloaded` if the file is already on disk and does
    /// nothing if a transfer for the same source is running.
    pub async fn start_download(&self, episode: &Episode) {
        let Some(source) = episode.source_url() else {
            tracing::warn!(title = %episode.title, "episode has no downloadable source");
            return;
        };

        if let Some(path) = self.has_local_file(episode).await {
            tracing::debug!(source = %source, "already downloaded");
            if let Err(e) = self.inner.registry.insert(&source).await {
                tracing::warn!(source = %source, error = %e, "failed to record download");
            }
            self.inner
                .table()
                .publish(&self.inner.events, &source, DownloadStatus::Downloaded(path));
            return;
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        {
            let mut table = self.inner.table();
            if table.in_flight.contains_key(&source) {
                tracing::debug!(source = %source, "transfer already in flight");
                return;
            }
            table.in_flight.insert(
                source.clone(),
                InFlight {
                    id,
                    cancel: cancel.clone(),
                },
            );
            table.publish(&self.inner.events, &source, DownloadStatus::Downloading(0.0));
        }

        tracing::info!(source = %source, title = %episode.title, "starting download");
        tokio::spawn(run_transfer(Arc::clone(&self.inner), source, id, cancel));
    }

    /// Cancel the running transfer for an episode, if any
    pub fn cancel_download(&self, episode: &Episode) {
        let Some(source) = episode.source_url() else {
            return;
        };

        let mut table = self.inner.table();
        if let Some(transfer) = table.in_flight.remove(&source) {
            transfer.cancel.cancel();
            tracing::info!(source = %source, "download cancelled");
            table.publish(&self.inner.events, &source, DownloadStatus::NotDownloaded);
        } else if !matches!(
            table.statuses.get(&source),
            Some(DownloadStatus::Downloaded(_))
        ) {
            table.publish(&self.inner.events, &source, DownloadStatus::NotDownloaded);
        }
    }

    /// Path of the completed file, if it is present on disk
    pub async fn has_local_file(&self, episode: &Episode) -> Option<PathBuf> {
        let source = episode.source_url()?;
        let path = self.inner.local_path(&source);
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Some(path),
            Ok(false) => None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to check local file");
                None
            }
        }
    }

    /// Remove the downloaded file and its registry entry
    pub async fn delete_local_file(&self, episode: &Episode) {
        let Some(path) = self.has_local_file(episode).await else {
            return;
        };
        let Some(source) = episode.source_url() else {
            return;
        };

        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::error!(path = %path.display(), error = %e, "failed to delete download");
            return;
        }
        if let Err(e) = self.inner.registry.remove(&source).await {
            tracing::warn!(source = %source, error = %e, "failed to update download registry");
        }

        tracing::info!(path = %path.display(), "deleted download");
        self.inner
            .table()
            .publish(&self.inner.events, &source, DownloadStatus::NotDownloaded);
    }

    /// Bring the registry in line with the files actually on disk
    ///
    /// Drops entries whose file is missing, publishes `Downloaded` for the rest
    /// and removes partial files left behind by an interrupted run.
    pub async fn reconcile(&self) -> ReconcileReport {
        let mut report = ReconcileReport {
            partial_files_cleaned: self.clean_partial_files().await,
            ..ReconcileReport::default()
        };

        let entries = match self.inner.registry.entries().await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(error = %e, "failed to read download registry");
                return report;
            }
        };

        for source in entries {
            let path = self.inner.local_path(&source);
            let present = tokio::fs::try_exists(&path).await.unwrap_or(false);

            if present {
                report.restored += 1;
                self.inner
                    .table()
                    .publish(&self.inner.events, &source, DownloadStatus::Downloaded(path));
            } else {
                report.dropped += 1;
                tracing::info!(source = %source, "dropping registry entry with missing file");
                if let Err(e) = self.inner.registry.remove(&source).await {
                    tracing::warn!(source = %source, error = %e, "failed to drop registry entry");
                }
                self.inner
                    .table()
                    .publish(&self.inner.events, &source, DownloadStatus::NotDownloaded);
            }
        }

        tracing::debug!(?report, "download registry reconciled");
        report
    }

    async fn clean_partial_files(&self) -> usize {
        let mut dir = match tokio::fs::read_dir(&self.inner.downloads_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list downloads directory");
                return 0;
            }
        };

        let mut cleaned = 0;
        while let Ok(Some(entry)) = dir.next_entry().await {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.ends_with(PARTIAL_SUFFIX) {
                continue;
            }
            // Ids are never reused, so a file whose id is not live is abandoned
            let live =
                partial_transfer_id(&name).is_some_and(|id| self.inner.table().is_live(id));
            if live {
                tracing::debug!(file = %name, "keeping partial file of running transfer");
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => cleaned += 1,
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "failed to remove partial file")
                }
            }
        }
        cleaned
    }
}

#[async_trait]
impl LocalMedia for DownloadManager {
    async fn local_file(&self, episode: &Episode) -> Option<PathBuf> {
        self.has_local_file(episode).await
    }
}

impl Inner {
    fn table(&self) -> MutexGuard<'_, TransferTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn local_path(&self, source: &Url) -> PathBuf {
        self.downloads_dir.join(local_filename(source))
    }

    fn report_progress(&self, source: &Url, id: u64, written: u64, expected: Option<u64>) {
        let fraction = match expected {
            Some(total) if total > 0 => (written as f64 / total as f64).clamp(0.0, 1.0),
            _ => 0.0,
        };

        let mut table = self.table();
        if !table.owns(source, id) {
            return;
        }
        if let Some(DownloadStatus::Downloading(current)) = table.statuses.get(source)
            && *current == fraction
        {
            return;
        }
        table.publish(&self.events, source, DownloadStatus::Downloading(fraction));
    }

    /// Record a terminal status if transfer `id` still owns `source`
    fn settle(&self, source: &Url, id: u64, status: DownloadStatus) -> bool {
        let mut table = self.table();
        if !table.owns(source, id) {
            return false;
        }
        table.in_flight.remove(source);
        table.publish(&self.events, source, status);
        true
    }

    async fn finish(&self, source: &Url, id: u64, partial: &Path, dest: &Path) {
        if !self.table().owns(source, id) {
            remove_if_present(partial).await;
            return;
        }

        if let Err(e) = remove_stale(dest).await {
            remove_if_present(partial).await;
            self.fail_fs(source, id, dest, e);
            return;
        }
        if let Err(e) = tokio::fs::rename(partial, dest).await {
            remove_if_present(partial).await;
            self.fail_fs(source, id, dest, e);
            return;
        }
        if let Err(e) = self.registry.insert(source).await {
            tracing::warn!(source = %source, error = %e, "failed to record download");
        }

        if self.settle(source, id, DownloadStatus::Downloaded(dest.to_path_buf())) {
            tracing::info!(source = %source, path = %dest.display(), "download complete");
            return;
        }

        // Cancelled while the file was being moved into place
        remove_if_present(dest).await;
        if let Err(e) = self.registry.remove(source).await {
            tracing::warn!(source = %source, error = %e, "failed to update download registry");
        }
    }

    fn fail_fs(&self, source: &Url, id: u64, path: &Path, error: std::io::Error) {
        tracing::error!(path = %path.display(), error = %error, "failed to move download into place");
        let error = DownloadError::FileSystem {
            path: path.to_path_buf(),
            source: error,
        };
        self.settle(source, id, DownloadStatus::Failed(Arc::new(error)));
    }
}

impl TransferTable {
    fn owns(&self, source: &Url, id: u64) -> bool {
        self.in_flight.get(source).is_some_and(|t| t.id == id)
    }

    fn is_live(&self, id: u64) -> bool {
        self.in_flight.values().any(|t| t.id == id)
    }

    fn publish(
        &mut self,
        events: &broadcast::Sender<DownloadEvent>,
        source: &Url,
        status: DownloadStatus,
    ) {
        self.statuses.insert(source.clone(), status.clone());
        // No subscribers is fine
        let _ = events.send(DownloadEvent {
            source: source.clone(),
            status,
        });
    }
}

async fn run_transfer(inner: Arc<Inner>, source: Url, id: u64, cancel: CancellationToken) {
    let filename = local_filename(&source);
    let dest = inner.downloads_dir.join(&filename);
    let partial = inner
        .downloads_dir
        .join(format!("{filename}.{id}{PARTIAL_SUFFIX}"));

    if let Err(e) = tokio::fs::create_dir_all(&inner.downloads_dir).await {
        inner.fail_fs(&source, id, &inner.downloads_dir, e);
        return;
    }

    let result = transfer(
        inner.client.as_ref(),
        &source,
        &partial,
        &cancel,
        |written, expected| inner.report_progress(&source, id, written, expected),
    )
    .await;

    match result {
        Ok(bytes) => {
            tracing::debug!(source = %source, bytes, "transfer finished");
            inner.finish(&source, id, &partial, &dest).await;
        }
        Err(e) if e.is_cancelled() => {
            inner.settle(&source, id, DownloadStatus::NotDownloaded);
        }
        Err(e) => {
            tracing::warn!(source = %source, error = %e, "download failed");
            inner.settle(&source, id, DownloadStatus::Failed(Arc::new(e)));
        }
    }
}

/// Transfer id encoded in a `<filename>.<id>.partial` name
fn partial_transfer_id(name: &str) -> Option<u64> {
    name.strip_suffix(PARTIAL_SUFFIX)?
        .rsplit_once('.')?
        .1
        .parse()
        .ok()
}

async fn remove_stale(path: &Path) -> Result<(), std::io::Error> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

async fn remove_if_present(path: &Path) {
    if let Err(e) = remove_stale(path).await {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove file");
    }
}
