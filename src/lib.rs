pub mod catalog;
pub mod config;
pub mod download;
pub mod error;
pub mod feed;
pub mod http;
pub mod logging;
pub mod model;
pub mod playback;
pub mod progress;
pub mod store;
pub mod sync;

// Re-export main types for convenience
pub use catalog::{Catalog, ItunesCatalog};
pub use config::Config;
pub use download::{DownloadEvent, DownloadManager, DownloadStatus, LocalMedia, ReconcileReport};
pub use error::{
    CatalogError, ConfigError, DownloadError, FeedError, PersistenceError, PlaybackError,
    SyncError,
};
pub use feed::{Feed, fetch_feed, is_url, parse_feed, parse_feed_file};
pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use model::{Episode, Show};
pub use playback::{
    MediaBackend, MediaSession, NowPlaying, PlaybackController, PlaybackHandle,
    PlaybackSettings, PlaybackState, ProgressTick, RemoteCommand,
};
pub use progress::{NoopReporter, ProgressEvent, ProgressReporter, SharedProgressReporter};
pub use store::{
    CheckpointStore, DownloadRegistry, JsonCheckpointStore, JsonDownloadRegistry,
    JsonLibraryStore, LibraryStore, PlaybackCheckpoint,
};
pub use sync::{LibrarySyncCoordinator, LookupConcurrency, SyncOptions};
