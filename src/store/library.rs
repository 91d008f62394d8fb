// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::PersistenceError;
use crate::model::Show;

use super::{read_json, write_json};

/// An enriched show replacing the record stored under `original_id`
///
/// The catalog may correct a show's id, so the record is located by the id it
/// had before enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct ShowUpdate {
    pub original_id: u64,
    pub show: Show,
}

/// Local library of followed shows
#[async_trait]
pub trait LibraryStore: Send + Sync {
    /// Load every stored show
    async fn load_shows(&self) -> Result<Vec<Show>, PersistenceError>;

    /// Apply a batch of updates in one write
    async fn apply_updates(&self, updates: &[ShowUpdate]) -> Result<(), PersistenceError>;
}

/// Library stored as a JSON array of shows
#[derive(Debug)]
pub struct JsonLibraryStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonLibraryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Replace the whole library, used when importing shows
    pub async fn replace_all(&self, shows: &[Show]) -> Result<(), PersistenceError> {
        let _guard = self.lock.lock().await;
        write_json(&self.path, shows).await
    }
}

#[async_trait]
impl LibraryStore for JsonLibraryStore {
    async fn load_shows(&self) -> Result<Vec<Show>, PersistenceError> {
        let _guard = self.lock.lock().await;
        Ok(read_json(&self.path).await?.unwrap_or_default())
    }

    async fn apply_updates(&self, updates: &[ShowUpdate]) -> Result<(), PersistenceError> {
        if updates.is_empty() {
            return Ok(());
        }

        let _guard = self.lock.lock().await;
        let mut shows: Vec<Show> = read_json(&self.path).await?.unwrap_or_default();

        // Keyed by the ids as loaded, before any update rewrites them
        let index: HashMap<u64, usize> = shows
            .iter()
            .enumerate()
            .map(|(i, show)| (show.id, i))
            .collect();

        for update in updates {
            match index.get(&update.original_id) {
                Some(&i) => shows[i] = update.show.clone(),
                None => tracing::warn!(
                    show_id = update.original_id,
                    "show vanished from library before update was applied"
                ),
            }
        }

        write_json(&self.path, &shows).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use url::Url;

    fn make_show(id: u64, title: &str) -> Show {
        Show {
            id,
            title: title.to_string(),
            artist: None,
            feed_url: Some(format!("https://example.com/{id}/feed.xml")),
            artwork_url: None,
            genre: None,
        }
    }

    #[tokio::test]
    async fn missing_library_is_empty() {
        let dir = tempdir().unwrap();
        let store = JsonLibraryStore::new(dir.path().join("library.json"));

        assert!(store.load_shows().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn apply_updates_replaces_by_original_id() {
        let dir = tempdir().unwrap();
        let store = JsonLibraryStore::new(dir.path().join("library.json"));
        store
            .replace_all(&[make_show(1, "One"), make_show(2, "Two")])
            .await
            .unwrap();

        let mut enriched = make_show(100, "One (Remastered)");
        enriched.artwork_url = Some(Url::parse("https://example.com/1.jpg").unwrap());

        store
            .apply_updates(&[ShowUpdate {
                original_id: 1,
                show: enriched.clone(),
            }])
            .await
            .unwrap();

        let shows = store.load_shows().await.unwrap();
        assert_eq!(shows.len(), 2);
        assert_eq!(shows[0], enriched);
        assert_eq!(shows[1].title, "Two");
    }

    #[tokio::test]
    async fn chained_id_corrections_apply_to_original_records() {
        let dir = tempdir().unwrap();
        let store = JsonLibraryStore::new(dir.path().join("library.json"));
        store
            .replace_all(&[make_show(1, "A"), make_show(2, "B")])
            .await
            .unwrap();

        store
            .apply_updates(&[
                ShowUpdate {
                    original_id: 1,
                    show: make_show(2, "A enriched"),
                },
                ShowUpdate {
                    original_id: 2,
                    show: make_show(3, "B enriched"),
                },
            ])
            .await
            .unwrap();

        let shows = store.load_shows().await.unwrap();
        assert_eq!(shows, vec![make_show(2, "A enriched"), make_show(3, "B enriched")]);
    }

    #[tokio::test]
    async fn empty_update_batch_does_not_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("library.json");
        let store = JsonLibraryStore::new(&path);

        store.apply_updates(&[]).await.unwrap();
        assert!(!path.exists());
    }
}
