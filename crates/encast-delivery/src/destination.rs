//! Delivery destinations.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::error::{DeliveryError, DeliveryResult};

/// A place artifacts can be delivered to.
///
/// `put` must resolve only once the destination has durably accepted the
/// whole file; callers delete local copies on success.
#[async_trait]
pub trait Destination: Send + Sync {
    async fn put(&self, local: &Path, key: &str) -> DeliveryResult<()>;
}

/// Write-stream contract for filesystem-like destinations.
#[async_trait]
pub trait DestinationFilesystem: Send + Sync {
    /// Open a writer for `key`, creating parent directories as needed.
    async fn write(&self, key: &str) -> DeliveryResult<Box<dyn AsyncWrite + Send + Unpin>>;
}

/// Local directory implementing the write-stream contract.
pub struct LocalFilesystem {
    root: PathBuf,
}

impl LocalFilesystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl DestinationFilesystem for LocalFilesystem {
    async fn write(&self, key: &str) -> DeliveryResult<Box<dyn AsyncWrite + Send + Unpin>> {
        if Path::new(key)
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir))
        {
            return Err(DeliveryError::invalid_key(format!(
                "{key} escapes the destination root"
            )));
        }
        let target = self.root.join(key);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(&target).await?;
        Ok(Box::new(file))
    }
}

/// Destination backed by a write-stream filesystem.
pub struct FilesystemDestination<F: DestinationFilesystem> {
    fs: F,
}

impl<F: DestinationFilesystem> FilesystemDestination<F> {
    pub fn new(fs: F) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl<F: DestinationFilesystem> Destination for FilesystemDestination<F> {
    async fn put(&self, local: &Path, key: &str) -> DeliveryResult<()> {
        let mut reader = tokio::fs::File::open(local).await?;
        let mut writer = self.fs.write(key).await?;
        let bytes = tokio::io::copy(&mut reader, &mut writer).await?;
        // shutdown flushes; only then is the write confirmed.
        writer.shutdown().await?;
        debug!(key = %key, bytes, "Delivered artifact to filesystem");
        Ok(())
    }
}

/// HTTP destination: one streaming PUT per artifact.
pub struct HttpDestination {
    client: reqwest::Client,
    base: String,
    auth: Option<(String, String)>,
}

impl HttpDestination {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: base.into().trim_end_matches('/').to_string(),
            auth: None,
        }
    }

    /// Authenticate every request with HTTP basic auth.
    pub fn with_basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some((user.into(), password.into()));
        self
    }

    /// Keys are logical (percent-decoded) paths; every segment gets
    /// re-encoded for the wire.
    fn url_for(&self, key: &str) -> String {
        let encoded: Vec<String> = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("{}/{}", self.base, encoded.join("/"))
    }
}

#[async_trait]
impl Destination for HttpDestination {
    async fn put(&self, local: &Path, key: &str) -> DeliveryResult<()> {
        let file = tokio::fs::File::open(local).await?;
        let length = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        let mut request = self
            .client
            .put(self.url_for(key))
            .header(reqwest::header::CONTENT_LENGTH, length)
            .body(body);
        if let Some((user, password)) = &self.auth {
            request = request.basic_auth(user, Some(password));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(DeliveryError::rejected(key, response.status().as_u16()));
        }
        debug!(key = %key, bytes = length, "Delivered artifact over HTTP");
        Ok(())
    }
}
