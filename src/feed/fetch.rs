// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;

use bytes::Bytes;
use url::Url;

use crate::error::FeedError;
use crate::http::HttpClient;

use super::parse::{Feed, parse_feed};

/// Fetch raw feed bytes from a URL (without parsing)
pub async fn fetch_feed_bytes<C: HttpClient + ?Sized>(
    client: &C,
    url: &str,
) -> Result<Bytes, FeedError> {
    let response = client
        .get_bytes(url)
        .await
        .map_err(|e| FeedError::FetchFailed {
            url: url.to_string(),
            source: e,
        })?;

    if !response.is_success() {
        return Err(FeedError::HttpStatus {
            url: url.to_string(),
            status: response.status,
        });
    }

    Ok(response.body)
}

/// Construct a file:// URL for a local file path
///
/// Relative paths are resolved against the current directory first.
pub fn file_path_to_url(path: &Path) -> Option<Url> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().ok()?.join(path)
    };
    Url::from_file_path(absolute).ok()
}

/// Fetch and parse a podcast feed from a URL
pub async fn fetch_feed<C: HttpClient + ?Sized>(client: &C, url: &str) -> Result<Feed, FeedError> {
    let feed_url = Url::parse(url.trim())?;
    let bytes = fetch_feed_bytes(client, feed_url.as_str()).await?;
    parse_feed(&bytes, &feed_url)
}

/// Parse a podcast feed from a local file
pub async fn parse_feed_file(path: &Path) -> Result<Feed, FeedError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| FeedError::FileReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
    let feed_url = file_path_to_url(path).ok_or_else(|| FeedError::InvalidPath {
        path: path.to_path_buf(),
    })?;
    parse_feed(&bytes, &feed_url)
}

/// Determine if a string is a URL or a file path
pub fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{BytesResponse, HttpResponse};
    use async_trait::async_trait;

    struct StatusClient {
        status: u16,
        body: &'static str,
    }

    #[async_trait]
    impl HttpClient for StatusClient {
        async fn get_bytes(&self, _url: &str) -> Result<BytesResponse, reqwest::Error> {
            Ok(BytesResponse {
                status: self.status,
                body: Bytes::from_static(self.body.as_bytes()),
            })
        }

        async fn get_stream(&self, _url: &str) -> Result<HttpResponse, reqwest::Error> {
            unreachable!("feeds are fetched as buffered bytes")
        }
    }

    #[test]
    fn is_url_detects_http() {
        assert!(is_url("http://example.com/feed.xml"));
        assert!(is_url("https://example.com/feed.xml"));
    }

    #[test]
    fn is_url_rejects_file_paths() {
        assert!(!is_url("/path/to/feed.xml"));
        assert!(!is_url("./feed.xml"));
        assert!(!is_url("feed.xml"));
    }

    #[test]
    fn file_path_to_url_uses_file_scheme() {
        let url = file_path_to_url(Path::new("/tmp/feed.xml")).unwrap();
        assert_eq!(url.scheme(), "file");
    }

    #[tokio::test]
    async fn fetch_rejects_non_success_status() {
        let client = StatusClient {
            status: 503,
            body: "unavailable",
        };

        let result = fetch_feed(&client, "https://example.com/feed.xml").await;
        match result {
            Err(FeedError::HttpStatus { status, .. }) => assert_eq!(status, 503),
            other => panic!("Expected HttpStatus error, got {:?}", other.map(|f| f.show)),
        }
    }

    #[tokio::test]
    async fn parse_feed_file_reads_local_feed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.xml");
        std::fs::write(
            &path,
            r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Local</title>
            <description>d</description></channel></rss>"#,
        )
        .unwrap();

        let feed = parse_feed_file(&path).await.unwrap();
        assert_eq!(feed.show.title, "Local");
        assert_eq!(feed.show.feed_url.as_deref().map(|u| u.starts_with("file://")), Some(true));
    }
}
