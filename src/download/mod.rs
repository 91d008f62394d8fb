mod filename;
mod manager;
mod transfer;

pub use filename::{audio_extension, local_filename};
pub use manager::{DownloadEvent, DownloadManager, DownloadStatus, LocalMedia, ReconcileReport};
pub use transfer::transfer;
