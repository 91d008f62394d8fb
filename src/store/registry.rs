// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeSet;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;
use url::Url;

use crate::error::PersistenceError;

use super::{read_json, write_json};

/// Durable set of canonical source URLs whose downloads completed
#[async_trait]
pub trait DownloadRegistry: Send + Sync {
    /// Record a completed download; inserting an existing URL is a no-op
    async fn insert(&self, source: &Url) -> Result<(), PersistenceError>;

    /// Forget a download; removing an unknown URL is a no-op
    async fn remove(&self, source: &Url) -> Result<(), PersistenceError>;

    /// All recorded source URLs
    async fn entries(&self) -> Result<BTreeSet<Url>, PersistenceError>;
}

/// Registry stored as a JSON array of URLs
#[derive(Debug)]
pub struct JsonDownloadRegistry {
    path: PathBuf,
    // Serializes read-modify-write cycles on the file
    lock: Mutex<()>,
}

impl JsonDownloadRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read(&self) -> Result<BTreeSet<Url>, PersistenceError> {
        Ok(read_json::<BTreeSet<Url>>(&self.path)
            .await?
            .unwrap_or_default())
    }
}

#[async_trait]
impl DownloadRegistry for JsonDownloadRegistry {
    async fn insert(&self, source: &Url) -> Result<(), PersistenceError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read().await?;
        if entries.insert(source.clone()) {
            write_json(&self.path, &entries).await?;
        }
        Ok(())
    }

    async fn remove(&self, source: &Url) -> Result<(), PersistenceError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read().await?;
        if entries.remove(source) {
            write_json(&self.path, &entries).await?;
        }
        Ok(())
    }

    async fn entries(&self) -> Result<BTreeSet<Url>, PersistenceError> {
        let _guard = self.lock.lock().await;
        self.read().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn empty_registry_has_no_entries() {
        let dir = tempdir().unwrap();
        let registry = JsonDownloadRegistry::new(dir.path().join("downloads.json"));

        assert!(registry.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn insert_and_remove_persist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("downloads.json");
        let registry = JsonDownloadRegistry::new(&path);

        registry.insert(&url("https://example.com/a.mp3")).await.unwrap();
        registry.insert(&url("https://example.com/b.mp3")).await.unwrap();
        registry.insert(&url("https://example.com/a.mp3")).await.unwrap();
        registry.remove(&url("https://example.com/b.mp3")).await.unwrap();

        // A fresh instance sees what the first one wrote
        let reopened = JsonDownloadRegistry::new(&path);
        let entries = reopened.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries.contains(&url("https://example.com/a.mp3")));
    }

    #[tokio::test]
    async fn removing_unknown_entry_is_noop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("downloads.json");
        let registry = JsonDownloadRegistry::new(&path);

        registry.remove(&url("https://example.com/a.mp3")).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn concurrent_inserts_are_not_lost() {
        let dir = tempdir().unwrap();
        let registry = Arc::new(JsonDownloadRegistry::new(dir.path().join("downloads.json")));

        let mut handles = Vec::new();
        for i in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .insert(&url(&format!("https://example.com/{i}.mp3")))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.entries().await.unwrap().len(), 8);
    }
}
