// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;

use futures::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::DownloadError;
use crate::http::HttpClient;

/// Stream `source` into `partial_path`, reporting progress after every chunk
///
/// `on_progress` receives `(bytes_written, bytes_expected)`. The partial file
/// is removed whenever the transfer does not complete, including when
/// `cancel` fires. Returns the number of bytes written on success.
pub async fn transfer<C, F>(
    client: &C,
    source: &Url,
    partial_path: &Path,
    cancel: &CancellationToken,
    on_progress: F,
) -> Result<u64, DownloadError>
where
    C: HttpClient + ?Sized,
    F: FnMut(u64, Option<u64>),
{
    let result = stream_to_file(client, source, partial_path, cancel, on_progress).await;

    if result.is_err() {
        match tokio::fs::remove_file(partial_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %partial_path.display(), error = %e, "failed to remove partial file")
            }
        }
    }

    result
}

async fn stream_to_file<C, F>(
    client: &C,
    source: &Url,
    partial_path: &Path,
    cancel: &CancellationToken,
    mut on_progress: F,
) -> Result<u64, DownloadError>
where
    C: HttpClient + ?Sized,
    F: FnMut(u64, Option<u64>),
{
    let url = source.as_str();
    let cancelled = || DownloadError::Cancelled {
        url: url.to_string(),
    };

    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(cancelled()),
        response = client.get_stream(url) => response.map_err(|e| DownloadError::Transport {
            url: url.to_string(),
            source: e,
        })?,
    };

    if response.status >= 400 {
        return Err(DownloadError::HttpStatus {
            url: url.to_string(),
            status: response.status,
        });
    }

    let mut file = File::create(partial_path)
        .await
        .map_err(|e| DownloadError::FileSystem {
            path: partial_path.to_path_buf(),
            source: e,
        })?;

    let mut bytes_written: u64 = 0;
    let mut stream = response.body;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            next = stream.next() => next,
        };

        let Some(chunk_result) = next else {
            break;
        };

        let chunk = chunk_result.map_err(|e| DownloadError::Transport {
            url: url.to_string(),
            source: e,
        })?;

        file.write_all(&chunk)
            .await
            .map_err(|e| DownloadError::FileSystem {
                path: partial_path.to_path_buf(),
                source: e,
            })?;

        bytes_written += chunk.len() as u64;
        on_progress(bytes_written, response.content_length);
    }

    file.flush()
        .await
        .map_err(|e| DownloadError::FileSystem {
            path: partial_path.to_path_buf(),
            source: e,
        })?;

    Ok(bytes_written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{ByteStream, BytesResponse, HttpResponse};
    use async_trait::async_trait;
    use bytes::Bytes;
    use tempfile::tempdir;

    struct MockHttpClient {
        chunks: Vec<&'static [u8]>,
        status: u16,
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn get_bytes(&self, _url: &str) -> Result<BytesResponse, reqwest::Error> {
            unreachable!("transfers always stream")
        }

        async fn get_stream(&self, _url: &str) -> Result<HttpResponse, reqwest::Error> {
            let chunks: Vec<Result<Bytes, reqwest::Error>> = self
                .chunks
                .iter()
                .map(|c| Ok(Bytes::from_static(c)))
                .collect();
            let len = self.chunks.iter().map(|c| c.len() as u64).sum();

            let stream: ByteStream = Box::pin(futures::stream::iter(chunks));

            Ok(HttpResponse {
                status: self.status,
                content_length: Some(len),
                body: stream,
            })
        }
    }

    fn source() -> Url {
        Url::parse("https://example.com/episode.mp3").unwrap()
    }

    #[tokio::test]
    async fn transfer_writes_file_and_reports_progress() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("episode.mp3.partial");
        let client = MockHttpClient {
            chunks: vec![b"test ", b"audio ", b"content"],
            status: 200,
        };

        let mut progress = Vec::new();
        let bytes = transfer(
            &client,
            &source(),
            &path,
            &CancellationToken::new(),
            |written, expected| progress.push((written, expected)),
        )
        .await
        .unwrap();

        assert_eq!(bytes, 18);
        assert_eq!(std::fs::read(&path).unwrap(), b"test audio content");
        assert_eq!(
            progress,
            vec![(5, Some(18)), (11, Some(18)), (18, Some(18))]
        );
    }

    #[tokio::test]
    async fn transfer_fails_on_http_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("episode.mp3.partial");
        let client = MockHttpClient {
            chunks: vec![b"Not Found"],
            status: 404,
        };

        let result = transfer(&client, &source(), &path, &CancellationToken::new(), |_, _| {}).await;

        match result {
            Err(DownloadError::HttpStatus { status, .. }) => assert_eq!(status, 404),
            other => panic!("Expected HttpStatus error, got {:?}", other),
        }
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn cancelled_transfer_reports_cancellation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("episode.mp3.partial");
        let client = MockHttpClient {
            chunks: vec![b"data"],
            status: 200,
        };
        let token = CancellationToken::new();
        token.cancel();

        let result = transfer(&client, &source(), &path, &token, |_, _| {}).await;

        assert!(result.unwrap_err().is_cancelled());
        assert!(!path.exists());
    }
}
