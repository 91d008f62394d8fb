// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::PersistenceError;
use crate::model::Episode;

use super::{read_json, remove_json, write_json};

/// Saved resume point for the episode that was last playing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackCheckpoint {
    pub episode: Episode,
    pub show_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork_url: Option<Url>,
    /// Position in seconds, within `0..=duration`
    pub position_secs: f64,
    pub saved_at: DateTime<Utc>,
}

/// Persistence for resume positions
///
/// There is one app-wide "last played" record: saving overwrites it and
/// loading returns it.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Store `checkpoint`, replacing any previous one
    async fn save(&self, checkpoint: &PlaybackCheckpoint) -> Result<(), PersistenceError>;

    /// Load the last saved checkpoint, if any
    async fn load(&self) -> Result<Option<PlaybackCheckpoint>, PersistenceError>;

    /// Remove the stored checkpoint
    async fn clear(&self) -> Result<(), PersistenceError>;
}

/// Checkpoint store writing a single JSON file
#[derive(Debug, Clone)]
pub struct JsonCheckpointStore {
    path: PathBuf,
}

impl JsonCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CheckpointStore for JsonCheckpointStore {
    async fn save(&self, checkpoint: &PlaybackCheckpoint) -> Result<(), PersistenceError> {
        write_json(&self.path, checkpoint).await
    }

    async fn load(&self) -> Result<Option<PlaybackCheckpoint>, PersistenceError> {
        read_json(&self.path).await
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        remove_json(&self.path).await
    }
}
