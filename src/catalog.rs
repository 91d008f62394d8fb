// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Remote podcast catalog.
//!
//! The [`Catalog`] trait is what the sync coordinator and the CLI talk to.
//! [`ItunesCatalog`] implements it against the iTunes search/lookup API and
//! RSS feeds, mapping failures into [`CatalogError`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::CatalogError;
use crate::feed::fetch_feed;
use crate::http::HttpClient;
use crate::model::{Episode, Show};

/// Default catalog endpoint
pub const DEFAULT_CATALOG_URL: &str = "https://itunes.apple.com";

/// Remote catalog of shows and episodes
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Fetch a single show by its catalog id
    async fn fetch_show(&self, id: u64) -> Result<Show, CatalogError>;

    /// Search shows by free-text term
    async fn search_shows(&self, term: &str, limit: usize) -> Result<Vec<Show>, CatalogError>;

    /// Find the catalog entry whose feed URL matches `feed_url`
    async fn lookup_feed(&self, feed_url: &str) -> Result<Option<Show>, CatalogError>;

    /// Fetch the episode list of a show by parsing its feed
    async fn fetch_episodes(&self, feed_url: &str) -> Result<Vec<Episode>, CatalogError>;
}

/// Catalog backed by the iTunes search API
#[derive(Clone)]
pub struct ItunesCatalog<C> {
    client: C,
    base_url: Url,
    timeout: Duration,
}

impl<C: HttpClient> ItunesCatalog<C> {
    /// Create a catalog client for `base_url`, bounding each request by `timeout`
    pub fn new(client: C, base_url: &str, timeout: Duration) -> Result<Self, CatalogError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| CatalogError::InvalidRequest(format!("{base_url}: {e}")))?;
        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Result<Url, CatalogError> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| CatalogError::InvalidRequest(format!("{path}: {e}")))?;
        url.query_pairs_mut()
            .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, CatalogError> {
        tracing::debug!(url = %url, "catalog request");

        let response = tokio::time::timeout(self.timeout, self.client.get_bytes(url.as_str()))
            .await
            .map_err(|_| CatalogError::Timeout {
                url: url.to_string(),
            })?
            .map_err(|e| CatalogError::Transport {
                url: url.to_string(),
                source: e,
            })?;

        if !response.is_success() {
            tracing::warn!(url = %url, status = response.status, "catalog returned error status");
            return Err(CatalogError::BadResponse {
                url: url.to_string(),
                status: response.status,
            });
        }

        serde_json::from_slice(&response.body).map_err(|e| CatalogError::Decode {
            url: url.to_string(),
            source: e,
        })
    }

    async fn search(&self, term: &str, limit: usize) -> Result<Vec<Show>, CatalogError> {
        let term = term.trim();
        if term.is_empty() {
            return Err(CatalogError::InvalidRequest("empty search term".to_string()));
        }

        let url = self.endpoint(
            "search",
            &[
                ("term", term.to_string()),
                ("media", "podcast".to_string()),
                ("entity", "podcast".to_string()),
                ("limit", limit.max(1).to_string()),
            ],
        )?;

        let result: SearchResult = self.get_json(url).await?;
        Ok(result.results.into_iter().map(Show::from).collect())
    }
}

#[async_trait]
impl<C: HttpClient> Catalog for ItunesCatalog<C> {
    async fn fetch_show(&self, id: u64) -> Result<Show, CatalogError> {
        let url = self.endpoint("lookup", &[("id", id.to_string())])?;
        let result: SearchResult = self.get_json(url).await?;

        result
            .results
            .into_iter()
            .next()
            .map(Show::from)
            .ok_or_else(|| CatalogError::NotFound(format!("show {id}")))
    }

    async fn search_shows(&self, term: &str, limit: usize) -> Result<Vec<Show>, CatalogError> {
        self.search(term, limit).await
    }

    async fn lookup_feed(&self, feed_url: &str) -> Result<Option<Show>, CatalogError> {
        Ok(self.search(feed_url, 1).await?.into_iter().next())
    }

    async fn fetch_episodes(&self, feed_url: &str) -> Result<Vec<Episode>, CatalogError> {
        let feed = tokio::time::timeout(self.timeout, fetch_feed(&self.client, feed_url))
            .await
            .map_err(|_| CatalogError::Timeout {
                url: feed_url.to_string(),
            })??;
        Ok(feed.episodes)
    }
}

/// Wire format of search and lookup responses
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResult {
    #[serde(default)]
    results: Vec<CatalogShow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogShow {
    track_id: Option<u64>,
    collection_id: Option<u64>,
    artist_name: Option<String>,
    collection_name: Option<String>,
    artwork_url100: Option<String>,
    artwork_url600: Option<String>,
    feed_url: Option<String>,
    primary_genre_name: Option<String>,
}

impl From<CatalogShow> for Show {
    fn from(remote: CatalogShow) -> Self {
        let artwork_url = remote
            .artwork_url600
            .as_deref()
            .and_then(|u| Url::parse(u).ok())
            .or_else(|| remote.artwork_url100.as_deref().and_then(|u| Url::parse(u).ok()));

        Show {
            id: remote.collection_id.or(remote.track_id).unwrap_or(0),
            title: remote.collection_name.unwrap_or_default(),
            artist: remote.artist_name,
            feed_url: remote.feed_url,
            artwork_url,
            genre: remote.primary_genre_name,
        }
    }
}
