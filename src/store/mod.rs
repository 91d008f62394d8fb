// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! File-backed persistence collaborators.
//!
//! Every store keeps its state in a single JSON file that is replaced
//! atomically (write to a `.partial` sibling, then rename).

mod checkpoint;
mod library;
mod registry;

pub use checkpoint::{CheckpointStore, JsonCheckpointStore, PlaybackCheckpoint};
pub use library::{JsonLibraryStore, LibraryStore, ShowUpdate};
pub use registry::{DownloadRegistry, JsonDownloadRegistry};

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::PersistenceError;

/// Read and decode a JSON file, `None` if it does not exist
async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistenceError> {
    let content = match tokio::fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(PersistenceError::Read {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };

    serde_json::from_slice(&content)
        .map(Some)
        .map_err(|e| PersistenceError::Decode {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Encode `value` as JSON and atomically replace `path` with it
async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    let json = serde_json::to_vec_pretty(value)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PersistenceError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
    }

    let partial = partial_path(path);
    tokio::fs::write(&partial, json)
        .await
        .map_err(|e| PersistenceError::Write {
            path: partial.clone(),
            source: e,
        })?;

    tokio::fs::rename(&partial, path)
        .await
        .map_err(|e| PersistenceError::Write {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Delete `path`, treating a missing file as success
async fn remove_json(path: &Path) -> Result<(), PersistenceError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PersistenceError::Write {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn read_missing_file_is_none() {
        let dir = tempdir().unwrap();
        let value: Option<Vec<u32>> = read_json(&dir.path().join("missing.json")).await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn write_creates_parent_and_leaves_no_partial() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("values.json");

        write_json(&path, &vec![1u32, 2, 3]).await.unwrap();

        let value: Option<Vec<u32>> = read_json(&path).await.unwrap();
        assert_eq!(value, Some(vec![1, 2, 3]));
        assert!(!partial_path(&path).exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_decode_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{not json").unwrap();

        let result: Result<Option<Vec<u32>>, _> = read_json(&path).await;
        assert!(matches!(result, Err(PersistenceError::Decode { .. })));
    }

    #[tokio::test]
    async fn remove_missing_file_is_ok() {
        let dir = tempdir().unwrap();
        remove_json(&dir.path().join("nothing.json")).await.unwrap();
    }
}
