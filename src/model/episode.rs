// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// A single podcast episode
///
/// Immutable once fetched; the playback and download services only read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: u64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<DateTime<Utc>>,
    /// Duration in seconds, when the feed or catalog reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork_url: Option<Url>,
    #[serde(default)]
    pub show_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_title: Option<String>,
}

impl Episode {
    /// Duration in seconds, 0 when unknown
    pub fn duration(&self) -> f64 {
        self.duration_secs.filter(|d| d.is_finite() && *d > 0.0).unwrap_or(0.0)
    }

    /// Canonical source URL used as the download key
    pub fn source_url(&self) -> Option<Url> {
        self.stream_url.as_ref().map(canonical_source)
    }
}

/// Normalize a source URL into the key used by the registry and status map
///
/// Fragments never reach the server, so two URLs differing only there name the same audio.
pub fn canonical_source(url: &Url) -> Url {
    let mut canonical = url.clone();
    canonical.set_fragment(None);
    canonical
}
