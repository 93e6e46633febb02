/// Remote analysis client — the single point of entry for all generative
/// model calls in AtScore.
///
/// ARCHITECTURAL RULE: No other module may call the generative-language API
/// directly. All model interactions MUST go through this module.
///
/// Submission is two-phase: documents are sent inline first, and any attempt
/// that comes back blank or with an abnormal finish indicator is retried
/// through the provider's temporary file store before the client gives up.
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::config::Config;
use crate::models::analysis::AnalysisResult;

pub mod prompts;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
/// A finish indicator other than this means the attempt cannot be trusted.
const NORMAL_FINISH: &str = "STOP";
const FILE_POLL_MAX_ATTEMPTS: u32 = 5;
const FILE_POLL_BASE_DELAY_MS: u64 = 300;
const DEFAULT_BACKOFF_MS: u64 = 500;
const BACKOFF_JITTER_MS: u64 = 250;
/// Wall-clock budget for the whole two-phase sequence in production.
const PRODUCTION_DEADLINE: Duration = Duration::from_secs(7);

/// Classification attached to `RemoteError::Parse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseCode {
    /// Blank or non-JSON output.
    Empty,
    /// Blank output observed under the production deadline regime.
    EmptyProd,
    /// The two-phase budget ran out before a phase could start.
    Timeout,
    /// Rejected by the provider's content policy.
    Safety,
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited after {retries} retries")]
    Quota {
        retries: u32,
        /// Earliest time the provider said a retry may succeed, if known.
        retry_at: Option<DateTime<Utc>>,
    },

    #[error("Unusable model output ({code:?}): {message}")]
    Parse { code: ParseCode, message: String },
}

/// The remote analysis capability consumed by the orchestrator.
/// Carried as `Arc<dyn RemoteAnalyzer>` so tests can substitute a stub.
#[async_trait]
pub trait RemoteAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        document: &[u8],
        mime_type: &str,
    ) -> Result<AnalysisResult, RemoteError>;
}

#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub api_key: String,
    /// Injectable so tests can point the client at a mock server.
    pub base_url: String,
    pub model: String,
    pub max_output_tokens: u32,
    pub max_retries: u32,
    pub max_backoff: Duration,
    /// Arms the wall-clock deadline and the EMPTY_PROD classification.
    pub production: bool,
}

impl GeminiSettings {
    /// Returns `None` when no API key is configured — the orchestrator then
    /// skips the remote attempt entirely.
    pub fn from_config(config: &Config) -> Option<Self> {
        let api_key = config.gemini_api_key.clone()?;
        Some(Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: config.gemini_model.clone(),
            max_output_tokens: config.gemini_max_output_tokens,
            max_retries: config.gemini_max_retries,
            max_backoff: Duration::from_millis(config.gemini_max_backoff_ms),
            production: config.is_production(),
        })
    }
}

pub struct GeminiClient {
    client: reqwest::Client,
    settings: GeminiSettings,
}

// ── wire types ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_data: Option<FileData>,
}

impl Part {
    fn text(text: &str) -> Self {
        Part {
            text: Some(text.to_string()),
            inline_data: None,
            file_data: None,
        }
    }

    fn inline(document: &[u8], mime_type: &str) -> Self {
        Part {
            text: None,
            inline_data: Some(InlineData {
                mime_type: mime_type.to_string(),
                data: BASE64.encode(document),
            }),
            file_data: None,
        }
    }

    fn stored_file(mime_type: &str, file_uri: &str) -> Self {
        Part {
            text: None,
            inline_data: None,
            file_data: Some(FileData {
                mime_type: mime_type.to_string(),
                file_uri: file_uri.to_string(),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileData {
    mime_type: String,
    file_uri: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: StoredFile,
}

#[derive(Debug, Deserialize)]
struct StoredFile {
    name: String,
    uri: String,
    state: Option<String>,
}

/// Text and finish indicator of one generation attempt. Decides whether the
/// file-store phase runs.
#[derive(Debug)]
struct AttemptOutcome {
    text: String,
    finish_reason: Option<String>,
}

impl AttemptOutcome {
    fn is_insufficient(&self) -> bool {
        self.text.trim().is_empty() || self.finish_reason.as_deref() != Some(NORMAL_FINISH)
    }
}

/// Per-attempt failure, before retry bookkeeping collapses it into `RemoteError`.
enum AttemptError {
    RateLimited { retry_hint: Option<Duration> },
    Fatal(RemoteError),
}

impl From<reqwest::Error> for AttemptError {
    fn from(e: reqwest::Error) -> Self {
        AttemptError::Fatal(RemoteError::Http(e))
    }
}

// ── client ──────────────────────────────────────────────────────────────────

impl GeminiClient {
    pub fn new(settings: GeminiSettings) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, settings })
    }

    fn generation_config(&self) -> GenerationConfig {
        GenerationConfig {
            response_mime_type: "application/json",
            max_output_tokens: self.settings.max_output_tokens,
        }
    }

    fn empty_code(&self) -> ParseCode {
        if self.settings.production {
            ParseCode::EmptyProd
        } else {
            ParseCode::Empty
        }
    }

    async fn inline_attempt(
        &self,
        document: &[u8],
        mime_type: &str,
        deadline: Option<Instant>,
    ) -> Result<AttemptOutcome, RemoteError> {
        check_deadline(deadline)?;
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part::inline(document, mime_type),
                    Part::text(prompts::ANALYSIS_PROMPT),
                ],
            }],
            generation_config: self.generation_config(),
        };
        self.generate_with_retry(&request, deadline).await
    }

    /// Uploads the document to the provider's temporary file store, waits for
    /// it to become active, and resubmits the request referencing it. The
    /// stored file is deleted afterward regardless of outcome.
    async fn file_store_attempt(
        &self,
        document: &[u8],
        mime_type: &str,
        deadline: Option<Instant>,
    ) -> Result<AttemptOutcome, RemoteError> {
        check_deadline(deadline)?;
        let stored = self.upload_file(document, mime_type).await?;
        let result = self.generate_from_stored(&stored, mime_type, deadline).await;
        if let Err(e) = self.delete_file(&stored.name).await {
            warn!("Failed to delete temporary stored file {}: {e}", stored.name);
        }
        result
    }

    async fn generate_from_stored(
        &self,
        stored: &StoredFile,
        mime_type: &str,
        deadline: Option<Instant>,
    ) -> Result<AttemptOutcome, RemoteError> {
        self.await_file_active(stored, deadline).await?;
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part::stored_file(mime_type, &stored.uri),
                    Part::text(prompts::ANALYSIS_PROMPT),
                ],
            }],
            generation_config: self.generation_config(),
        };
        self.generate_with_retry(&request, deadline).await
    }

    async fn upload_file(
        &self,
        document: &[u8],
        mime_type: &str,
    ) -> Result<StoredFile, RemoteError> {
        let url = format!(
            "{}/upload/v1beta/files?key={}",
            self.settings.base_url, self.settings.api_key
        );
        let response = self
            .client
            .post(&url)
            .header("X-Goog-Upload-Protocol", "raw")
            .header(reqwest::header::CONTENT_TYPE, mime_type)
            .body(document.to_vec())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        let upload: UploadResponse = response.json().await?;
        debug!("Uploaded document to file store as {}", upload.file.name);
        Ok(upload.file)
    }

    /// Polls the stored file with small exponential delays until it reports
    /// active, up to a capped number of attempts.
    async fn await_file_active(
        &self,
        stored: &StoredFile,
        deadline: Option<Instant>,
    ) -> Result<(), RemoteError> {
        if stored.state.as_deref() == Some("ACTIVE") {
            return Ok(());
        }
        for attempt in 0..FILE_POLL_MAX_ATTEMPTS {
            check_deadline(deadline)?;
            sleep(Duration::from_millis(FILE_POLL_BASE_DELAY_MS << attempt)).await;

            let url = format!(
                "{}/v1beta/{}?key={}",
                self.settings.base_url, stored.name, self.settings.api_key
            );
            let response = self.client.get(&url).send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(RemoteError::Api {
                    status: status.as_u16(),
                    message: body,
                });
            }
            let file: StoredFile = response.json().await?;
            match file.state.as_deref() {
                Some("ACTIVE") => return Ok(()),
                Some("FAILED") => {
                    return Err(RemoteError::Api {
                        status: status.as_u16(),
                        message: format!("stored file {} failed processing", stored.name),
                    })
                }
                _ => {}
            }
        }
        Err(RemoteError::Parse {
            code: self.empty_code(),
            message: format!("stored file {} never became active", stored.name),
        })
    }

    async fn delete_file(&self, name: &str) -> Result<(), RemoteError> {
        let url = format!(
            "{}/v1beta/{}?key={}",
            self.settings.base_url, name, self.settings.api_key
        );
        let response = self.client.delete(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    /// Retries rate-limited attempts up to `max_retries`, honoring the
    /// provider's retry hint when one is supplied.
    async fn generate_with_retry(
        &self,
        request: &GenerateRequest,
        deadline: Option<Instant>,
    ) -> Result<AttemptOutcome, RemoteError> {
        let mut hint: Option<Duration> = None;
        for attempt in 0..=self.settings.max_retries {
            check_deadline(deadline)?;
            if attempt > 0 {
                let delay = hint
                    .unwrap_or_else(|| default_backoff(attempt))
                    .min(self.settings.max_backoff);
                warn!(
                    "Rate limited; retrying attempt {attempt} after {}ms",
                    delay.as_millis()
                );
                sleep(delay).await;
                check_deadline(deadline)?;
            }
            match self.generate_once(request).await {
                Ok(outcome) => return Ok(outcome),
                Err(AttemptError::RateLimited { retry_hint }) => hint = retry_hint,
                Err(AttemptError::Fatal(err)) => return Err(err),
            }
        }
        let retry_at = hint
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| Utc::now() + d);
        Err(RemoteError::Quota {
            retries: self.settings.max_retries,
            retry_at,
        })
    }

    async fn generate_once(
        &self,
        request: &GenerateRequest,
    ) -> Result<AttemptOutcome, AttemptError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.settings.base_url, self.settings.model, self.settings.api_key
        );
        let response = self.client.post(&url).json(request).send().await?;
        let status = response.status();

        if status.as_u16() == 429 {
            let header_hint = retry_hint_from_headers(response.headers());
            let body = response.text().await.unwrap_or_default();
            warn!("Model API returned 429: {body}");
            return Err(AttemptError::RateLimited {
                retry_hint: header_hint.or_else(|| retry_hint_from_body(&body)),
            });
        }

        // 400 from this API is a malformed or policy-rejected payload; never retried.
        if status.as_u16() == 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError::Fatal(RemoteError::Parse {
                code: ParseCode::Safety,
                message: format!("request rejected by provider: {body}"),
            }));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError::Fatal(RemoteError::Api {
                status: status.as_u16(),
                message: body,
            }));
        }

        let parsed: GenerateResponse = response.json().await?;

        if let Some(reason) = parsed
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            return Err(AttemptError::Fatal(RemoteError::Parse {
                code: ParseCode::Safety,
                message: format!("prompt blocked: {reason}"),
            }));
        }

        let candidate = parsed.candidates.into_iter().next();
        let finish_reason = candidate.as_ref().and_then(|c| c.finish_reason.clone());
        let text = candidate
            .and_then(|c| c.content)
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        debug!(
            "Generate attempt finished (finish: {finish_reason:?}, {} chars)",
            text.len()
        );
        Ok(AttemptOutcome {
            text,
            finish_reason,
        })
    }
}

#[async_trait]
impl RemoteAnalyzer for GeminiClient {
    async fn analyze(
        &self,
        document: &[u8],
        mime_type: &str,
    ) -> Result<AnalysisResult, RemoteError> {
        let deadline = self
            .settings
            .production
            .then(|| Instant::now() + PRODUCTION_DEADLINE);

        let first = self.inline_attempt(document, mime_type, deadline).await?;
        let outcome = if first.is_insufficient() {
            warn!(
                "Inline submission insufficient (finish: {:?}); retrying via file store",
                first.finish_reason
            );
            self.file_store_attempt(document, mime_type, deadline)
                .await?
        } else {
            first
        };

        if outcome.is_insufficient() {
            return Err(RemoteError::Parse {
                code: self.empty_code(),
                message: format!(
                    "model produced no usable output (finish: {:?})",
                    outcome.finish_reason
                ),
            });
        }
        parse_analysis(&outcome.text)
    }
}

// ── helpers ─────────────────────────────────────────────────────────────────

fn check_deadline(deadline: Option<Instant>) -> Result<(), RemoteError> {
    match deadline {
        Some(at) if Instant::now() >= at => Err(RemoteError::Parse {
            code: ParseCode::Timeout,
            message: "analysis deadline exhausted".to_string(),
        }),
        _ => Ok(()),
    }
}

/// Exponential default delay with sub-second jitter: ~500ms, ~1s, ~2s...
fn default_backoff(attempt: u32) -> Duration {
    let base = DEFAULT_BACKOFF_MS << (attempt - 1);
    let jitter = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_millis()) % BACKOFF_JITTER_MS)
        .unwrap_or(0);
    Duration::from_millis(base + jitter)
}

fn retry_hint_from_headers(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Error payloads may carry a RetryInfo detail with `retryDelay: "<N>s"`.
fn retry_hint_from_body(body: &str) -> Option<Duration> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let details = value.get("error")?.get("details")?.as_array()?;
    for detail in details {
        if let Some(seconds) = detail
            .get("retryDelay")
            .and_then(|d| d.as_str())
            .and_then(|d| d.strip_suffix('s'))
            .and_then(|d| d.parse::<f64>().ok())
        {
            return Some(Duration::from_secs_f64(seconds));
        }
    }
    None
}

/// Parses and validates the model's JSON output. Accepts raw JSON; if that
/// fails, strips a single fenced code block and tries once more.
fn parse_analysis(text: &str) -> Result<AnalysisResult, RemoteError> {
    let result: AnalysisResult = serde_json::from_str(text)
        .or_else(|_| serde_json::from_str(strip_json_fences(text)))
        .map_err(|e| RemoteError::Parse {
            code: ParseCode::Empty,
            message: format!("model output is not valid analysis JSON: {e}"),
        })?;
    result.validate().map_err(|msg| RemoteError::Parse {
        code: ParseCode::Empty,
        message: msg,
    })?;
    Ok(result)
}

/// Strips ```json ... ``` or ``` ... ``` code fences from model output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}
