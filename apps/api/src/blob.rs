use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use bytes::Bytes;
use tracing::debug;

/// Outcome of a lightweight existence probe against a delivery URL.
#[derive(Debug, Clone, Copy)]
pub struct ProbeResult {
    pub ok: bool,
    pub content_length: Option<u64>,
}

/// Blob delivery by URL: a HEAD existence probe plus a body fetch.
/// The store itself is opaque; all we rely on is HTTP semantics.
#[async_trait]
pub trait BlobDelivery: Send + Sync {
    async fn head_url(&self, url: &str) -> Result<ProbeResult>;

    async fn get_url(&self, url: &str) -> Result<Bytes>;
}

/// Produces a time-limited authenticated URL for a stored blob, used when
/// the public delivery URL is not reachable.
#[async_trait]
pub trait UrlSigner: Send + Sync {
    async fn sign_authenticated_url(&self, storage_key: &str, version: &str) -> Result<String>;
}

pub struct HttpBlobDelivery {
    client: reqwest::Client,
}

impl HttpBlobDelivery {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| anyhow!("Failed to build blob delivery client: {e}"))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BlobDelivery for HttpBlobDelivery {
    async fn head_url(&self, url: &str) -> Result<ProbeResult> {
        let response = self.client.head(url).send().await?;
        let content_length = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        debug!(
            "HEAD {} -> {} (content-length: {:?})",
            url,
            response.status(),
            content_length
        );
        Ok(ProbeResult {
            ok: response.status().is_success(),
            content_length,
        })
    }

    async fn get_url(&self, url: &str) -> Result<Bytes> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("GET {} returned {}", url, response.status()));
        }
        Ok(response.bytes().await?)
    }
}

/// Signs authenticated delivery URLs as presigned S3 GetObject requests.
pub struct S3UrlSigner {
    s3: aws_sdk_s3::Client,
    bucket: String,
    ttl: Duration,
}

impl S3UrlSigner {
    pub fn new(s3: aws_sdk_s3::Client, bucket: String) -> Self {
        Self {
            s3,
            bucket,
            ttl: Duration::from_secs(300),
        }
    }
}

#[async_trait]
impl UrlSigner for S3UrlSigner {
    async fn sign_authenticated_url(&self, storage_key: &str, version: &str) -> Result<String> {
        let presigned = self
            .s3
            .get_object()
            .bucket(&self.bucket)
            .key(storage_key)
            .version_id(version)
            .presigned(PresigningConfig::expires_in(self.ttl)?)
            .await
            .map_err(|e| anyhow!("Failed to presign URL for {storage_key}: {e}"))?;
        Ok(presigned.uri().to_string())
    }
}
