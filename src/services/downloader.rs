//! Fetches previously rendered images over HTTP(S) into local scratch space.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode, Url};
use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("unsupported image url `{url}`")]
    InvalidUrl { url: String },
    #[error("work item `{id}` has no usable file name")]
    InvalidDestination { id: String },
    #[error("GET {url} into {}: {source}", .dest.display())]
    Request {
        url: String,
        dest: PathBuf,
        #[source]
        source: reqwest::Error,
    },
    #[error("GET {url} into {} returned {status}", .dest.display())]
    Status {
        url: String,
        dest: PathBuf,
        status: StatusCode,
    },
    #[error("writing {url} into {}: {source}", .dest.display())]
    Io {
        url: String,
        dest: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type DownloadResult<T> = Result<T, DownloadError>;

/// Retrieves a remote resource verbatim into a local file.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download `url` to `dest`, creating parent directories as needed.
    async fn fetch(&self, url: &str, dest: &Path) -> DownloadResult<PathBuf>;
}

/// `reqwest`-backed downloader. Cheap to clone; the client pools connections.
#[derive(Clone)]
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, url: &str, dest: &Path) -> DownloadResult<PathBuf> {
        let parsed = Url::parse(url).map_err(|_| DownloadError::InvalidUrl {
            url: url.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DownloadError::InvalidUrl {
                url: url.to_string(),
            });
        }

        let io_err = |source: io::Error| DownloadError::Io {
            url: url.to_string(),
            dest: dest.to_path_buf(),
            source,
        };
        let request_err = |source: reqwest::Error| DownloadError::Request {
            url: url.to_string(),
            dest: dest.to_path_buf(),
            source,
        };

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let response = self.client.get(parsed).send().await.map_err(request_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                dest: dest.to_path_buf(),
                status,
            });
        }

        let mut file = File::create(dest).await.map_err(io_err)?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(dest).await;
                    return Err(request_err(err));
                }
            };
            written += chunk.len() as u64;
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(dest).await;
                return Err(io_err(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(dest).await;
            return Err(io_err(err));
        }

        debug!(url, dest = %dest.display(), bytes = written, "downloaded image");
        Ok(dest.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn downloader() -> HttpDownloader {
        HttpDownloader::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn writes_body_and_creates_parents() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/images/A1B2C3.png")
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body(b"\x89PNG fake payload")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested").join("A1B2C3.png");
        let url = format!("{}/images/A1B2C3.png", server.url());

        let path = downloader().fetch(&url, &dest).await.unwrap();

        mock.assert_async().await;
        assert_eq!(path, dest);
        assert_eq!(std::fs::read(&dest).unwrap(), b"\x89PNG fake payload");
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/missing.png")
            .with_status(404)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("missing.png");
        let url = format!("{}/missing.png", server.url());

        let err = downloader().fetch(&url, &dest).await.unwrap_err();
        match err {
            DownloadError::Status {
                url: failed_url,
                dest: failed_dest,
                status,
            } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(failed_url, url);
                assert_eq!(failed_dest, dest);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn rejects_non_http_urls() {
        let dir = tempfile::tempdir().unwrap();
        let err = downloader()
            .fetch("file:///etc/passwd", &dir.path().join("x.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::InvalidUrl { .. }));

        let err = downloader()
            .fetch("not a url", &dir.path().join("x.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn unreachable_host_is_a_request_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = downloader()
            .fetch("http://127.0.0.1:9/nothing.png", &dir.path().join("n.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Request { .. }));
    }
}
