//! Document source resolution: caller-supplied inline bytes, or a remote
//! fetch that probes the public delivery URL first and falls back to an
//! authenticated URL when the public one is inaccessible.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::blob::{BlobDelivery, UrlSigner};
use crate::errors::AppError;
use crate::models::document::DocumentRow;

/// Base64 document bytes supplied directly in the analysis request.
#[derive(Debug, Clone, Deserialize)]
pub struct InlinePayload {
    pub data: String,
    pub mime_type: String,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid inline payload: {0}")]
    InvalidPayload(String),

    #[error("document exceeds the size limit ({size} > {limit} bytes)")]
    TooLarge { size: u64, limit: u64 },

    #[error("document fetch failed: {0}")]
    FetchFailed(String),
}

impl From<ResolveError> for AppError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::InvalidPayload(msg) => AppError::InvalidInlineBytes(msg),
            ResolveError::TooLarge { size, limit } => AppError::SizeExceeded(format!(
                "document exceeds the size limit ({size} > {limit} bytes)"
            )),
            ResolveError::FetchFailed(msg) => AppError::GatewayFetch(msg),
        }
    }
}

/// Produces the document bytes and mime type for analysis. A body fetch is
/// only ever issued against a URL whose existence probe succeeded.
pub async fn resolve(
    document: &DocumentRow,
    inline: Option<&InlinePayload>,
    delivery: &dyn BlobDelivery,
    signer: &dyn UrlSigner,
    max_bytes: u64,
) -> Result<(Bytes, String), ResolveError> {
    if let Some(payload) = inline {
        let decoded = BASE64.decode(payload.data.as_bytes()).map_err(|e| {
            ResolveError::InvalidPayload(format!("payload is not valid base64: {e}"))
        })?;
        if decoded.len() as u64 > max_bytes {
            return Err(ResolveError::TooLarge {
                size: decoded.len() as u64,
                limit: max_bytes,
            });
        }
        return Ok((Bytes::from(decoded), payload.mime_type.clone()));
    }

    let public_url = delivery_url(&document.file_url, &document.mime_type);
    let (url, probe) = match delivery.head_url(&public_url).await {
        Ok(probe) if probe.ok => (public_url, probe),
        other => {
            if let Err(e) = other {
                warn!("Probe of public URL failed for document {}: {e}", document.id);
            } else {
                debug!(
                    "Public delivery URL not reachable for document {}; trying authenticated URL",
                    document.id
                );
            }
            let signed = signer
                .sign_authenticated_url(&document.storage_key, &document.storage_version)
                .await
                .map_err(|e| {
                    ResolveError::FetchFailed(format!("failed to sign authenticated URL: {e}"))
                })?;
            let probe = delivery.head_url(&signed).await.map_err(|e| {
                ResolveError::FetchFailed(format!("probe of authenticated URL failed: {e}"))
            })?;
            if !probe.ok {
                return Err(ResolveError::FetchFailed(
                    "document not reachable via public or authenticated URL".to_string(),
                ));
            }
            (signed, probe)
        }
    };

    if let Some(reported) = probe.content_length {
        if reported > max_bytes {
            return Err(ResolveError::TooLarge {
                size: reported,
                limit: max_bytes,
            });
        }
    }

    let bytes = delivery
        .get_url(&url)
        .await
        .map_err(|e| ResolveError::FetchFailed(format!("download failed: {e}")))?;
    if bytes.len() as u64 > max_bytes {
        return Err(ResolveError::TooLarge {
            size: bytes.len() as u64,
            limit: max_bytes,
        });
    }
    Ok((bytes, document.mime_type.clone()))
}

/// Documents uploaded before the delivery-path migration carry an
/// image-style URL; document mime types must be served from the raw path.
fn delivery_url(file_url: &str, mime_type: &str) -> String {
    if is_document_mime(mime_type) && file_url.contains("/image/upload/") {
        file_url.replacen("/image/upload/", "/raw/upload/", 1)
    } else {
        file_url.to_string()
    }
}

fn is_document_mime(mime_type: &str) -> bool {
    matches!(
        mime_type,
        "application/pdf"
            | "application/msword"
            | "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            | "text/plain"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::ProbeResult;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct StubDelivery {
        probes: HashMap<String, ProbeResult>,
        bodies: HashMap<String, Vec<u8>>,
        gets: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BlobDelivery for StubDelivery {
        async fn head_url(&self, url: &str) -> anyhow::Result<ProbeResult> {
            Ok(self.probes.get(url).copied().unwrap_or(ProbeResult {
                ok: false,
                content_length: None,
            }))
        }

        async fn get_url(&self, url: &str) -> anyhow::Result<Bytes> {
            self.gets.lock().unwrap().push(url.to_string());
            self.bodies
                .get(url)
                .map(|b| Bytes::from(b.clone()))
                .ok_or_else(|| anyhow!("no body registered for {url}"))
        }
    }

    struct StubSigner(String);

    #[async_trait]
    impl UrlSigner for StubSigner {
        async fn sign_authenticated_url(
            &self,
            _storage_key: &str,
            _version: &str,
        ) -> anyhow::Result<String> {
            Ok(self.0.clone())
        }
    }

    fn make_document(file_url: &str, mime_type: &str) -> DocumentRow {
        DocumentRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            file_name: "resume.pdf".to_string(),
            file_url: file_url.to_string(),
            mime_type: mime_type.to_string(),
            size_bytes: 1024,
            storage_key: "documents/resume.pdf".to_string(),
            storage_version: "v1".to_string(),
            last_ats_score: None,
            last_analyzed_at: None,
            created_at: Utc::now(),
        }
    }

    fn ok_probe(len: Option<u64>) -> ProbeResult {
        ProbeResult {
            ok: true,
            content_length: len,
        }
    }

    const MAX: u64 = 10 * 1024 * 1024;

    #[tokio::test]
    async fn test_inline_payload_decodes_and_wins() {
        let doc = make_document("https://cdn.example.com/raw/upload/resume.pdf", "application/pdf");
        let inline = InlinePayload {
            data: BASE64.encode(b"hello resume"),
            mime_type: "application/pdf".to_string(),
        };
        let delivery = StubDelivery::default();
        let signer = StubSigner("unused".to_string());

        let (bytes, mime) = resolve(&doc, Some(&inline), &delivery, &signer, MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"hello resume");
        assert_eq!(mime, "application/pdf");
        assert!(delivery.gets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_base64_is_a_client_error() {
        let doc = make_document("https://cdn.example.com/raw/upload/resume.pdf", "application/pdf");
        let inline = InlinePayload {
            data: "!!!not-base64!!!".to_string(),
            mime_type: "application/pdf".to_string(),
        };
        let delivery = StubDelivery::default();
        let signer = StubSigner("unused".to_string());

        let err = resolve(&doc, Some(&inline), &delivery, &signer, MAX)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn test_oversized_inline_payload_is_rejected() {
        let doc = make_document("https://cdn.example.com/raw/upload/resume.pdf", "application/pdf");
        let inline = InlinePayload {
            data: BASE64.encode(vec![0u8; 32]),
            mime_type: "application/pdf".to_string(),
        };
        let delivery = StubDelivery::default();
        let signer = StubSigner("unused".to_string());

        let err = resolve(&doc, Some(&inline), &delivery, &signer, 16)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::TooLarge { size: 32, .. }));
    }

    #[tokio::test]
    async fn test_legacy_image_path_rewritten_for_documents() {
        assert_eq!(
            delivery_url(
                "https://cdn.example.com/image/upload/v1/resume.pdf",
                "application/pdf"
            ),
            "https://cdn.example.com/raw/upload/v1/resume.pdf"
        );
        // Non-document assets keep the image path.
        assert_eq!(
            delivery_url(
                "https://cdn.example.com/image/upload/v1/photo.png",
                "image/png"
            ),
            "https://cdn.example.com/image/upload/v1/photo.png"
        );
    }

    #[tokio::test]
    async fn test_public_url_fetched_when_probe_succeeds() {
        let url = "https://cdn.example.com/raw/upload/resume.pdf";
        let doc = make_document(url, "application/pdf");
        let mut delivery = StubDelivery::default();
        delivery.probes.insert(url.to_string(), ok_probe(Some(12)));
        delivery.bodies.insert(url.to_string(), b"resume bytes".to_vec());
        let signer = StubSigner("https://signed.example.com/x".to_string());

        let (bytes, _) = resolve(&doc, None, &delivery, &signer, MAX).await.unwrap();
        assert_eq!(&bytes[..], b"resume bytes");
        assert_eq!(*delivery.gets.lock().unwrap(), vec![url.to_string()]);
    }

    #[tokio::test]
    async fn test_falls_back_to_authenticated_url() {
        let public = "https://cdn.example.com/raw/upload/resume.pdf";
        let signed = "https://cdn.example.com/signed/resume.pdf?sig=abc";
        let doc = make_document(public, "application/pdf");
        let mut delivery = StubDelivery::default();
        delivery.probes.insert(signed.to_string(), ok_probe(None));
        delivery.bodies.insert(signed.to_string(), b"private bytes".to_vec());
        let signer = StubSigner(signed.to_string());

        let (bytes, _) = resolve(&doc, None, &delivery, &signer, MAX).await.unwrap();
        assert_eq!(&bytes[..], b"private bytes");
    }

    #[tokio::test]
    async fn test_both_probes_failing_is_fetch_failed() {
        let doc = make_document("https://cdn.example.com/raw/upload/gone.pdf", "application/pdf");
        let delivery = StubDelivery::default();
        let signer = StubSigner("https://cdn.example.com/signed/gone.pdf".to_string());

        let err = resolve(&doc, None, &delivery, &signer, MAX).await.unwrap_err();
        assert!(matches!(err, ResolveError::FetchFailed(_)));
        assert!(delivery.gets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_probed_size_over_limit_skips_download() {
        let url = "https://cdn.example.com/raw/upload/huge.pdf";
        let doc = make_document(url, "application/pdf");
        let mut delivery = StubDelivery::default();
        delivery
            .probes
            .insert(url.to_string(), ok_probe(Some(50 * 1024 * 1024)));
        let signer = StubSigner("unused".to_string());

        let err = resolve(&doc, None, &delivery, &signer, MAX).await.unwrap_err();
        assert!(matches!(err, ResolveError::TooLarge { .. }));
        assert!(delivery.gets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_downloaded_size_over_limit_is_rejected() {
        let url = "https://cdn.example.com/raw/upload/sneaky.pdf";
        let doc = make_document(url, "application/pdf");
        let mut delivery = StubDelivery::default();
        // Probe reports nothing; the body is bigger than the limit.
        delivery.probes.insert(url.to_string(), ok_probe(None));
        delivery.bodies.insert(url.to_string(), vec![0u8; 64]);
        let signer = StubSigner("unused".to_string());

        let err = resolve(&doc, None, &delivery, &signer, 32).await.unwrap_err();
        assert!(matches!(err, ResolveError::TooLarge { size: 64, .. }));
    }
}
