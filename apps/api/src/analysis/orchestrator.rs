//! Top-level coordinator for a single analysis request:
//! SIZE_CHECK → SOURCE_RESOLUTION → REMOTE_ATTEMPT → (SUCCESS | FALLBACK) →
//! PERSIST. Remote-service failures always degrade to the deterministic
//! keyword fallback; source failures never do, since without bytes there is
//! nothing to score.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::fallback::{dedupe_keywords, score_keywords};
use crate::analysis::resolver::{self, InlinePayload};
use crate::blob::{BlobDelivery, UrlSigner};
use crate::errors::AppError;
use crate::extract::TextExtractor;
use crate::llm_client::{ParseCode, RemoteAnalyzer, RemoteError};
use crate::models::analysis::{
    AnalysisResult, AnalysisRow, FallbackReason, Feedback, KeywordReport,
};
use crate::repo::{NewAnalysis, Repository};

/// Keywords scored when the request does not override them.
pub const DEFAULT_KEYWORDS: [&str; 5] = ["javascript", "react", "node", "typescript", "nextjs"];

/// Collaborators of the analysis pipeline. Everything is injected so tests
/// can isolate each seam without a database or network.
#[derive(Clone)]
pub struct AnalysisDeps {
    pub repo: Arc<dyn Repository>,
    pub delivery: Arc<dyn BlobDelivery>,
    pub signer: Arc<dyn UrlSigner>,
    pub extractor: Arc<dyn TextExtractor>,
    /// `None` when no remote credential is configured; every request then
    /// takes the fallback path.
    pub remote: Option<Arc<dyn RemoteAnalyzer>>,
    pub max_file_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct AnalyzeCommand {
    pub document_id: Uuid,
    pub user_id: Uuid,
    pub keywords: Option<Vec<String>>,
    pub inline: Option<InlinePayload>,
}

pub async fn run_analysis(
    deps: &AnalysisDeps,
    cmd: AnalyzeCommand,
) -> Result<AnalysisRow, AppError> {
    let document = deps
        .repo
        .find_document(cmd.document_id)
        .await?
        .filter(|d| d.user_id == cmd.user_id)
        .ok_or_else(|| AppError::NotFound(format!("Document {} not found", cmd.document_id)))?;

    // Recorded size is checked before any network work.
    if document.size_bytes as u64 > deps.max_file_bytes {
        return Err(AppError::SizeExceeded(format!(
            "document is {} bytes; limit is {} bytes",
            document.size_bytes, deps.max_file_bytes
        )));
    }

    let (bytes, mime_type) = resolver::resolve(
        &document,
        cmd.inline.as_ref(),
        deps.delivery.as_ref(),
        deps.signer.as_ref(),
        deps.max_file_bytes,
    )
    .await?;

    let keywords = cmd
        .keywords
        .filter(|k| !k.is_empty())
        .unwrap_or_else(|| DEFAULT_KEYWORDS.iter().map(|s| s.to_string()).collect());

    let (result, used_fallback, fallback_reason) = match &deps.remote {
        Some(remote) => match remote.analyze(&bytes, &mime_type).await {
            Ok(result) => (result, false, None),
            Err(err) => {
                let reason = classify_failure(&err);
                warn!("Remote analysis failed ({reason:?}): {err}; using keyword fallback");
                (
                    fallback_result(deps, &bytes, &mime_type, &keywords),
                    true,
                    Some(reason),
                )
            }
        },
        None => {
            info!("No remote credential configured; using keyword fallback");
            (
                fallback_result(deps, &bytes, &mime_type, &keywords),
                true,
                Some(FallbackReason::Parse),
            )
        }
    };

    let row = deps
        .repo
        .create_analysis(NewAnalysis {
            document_id: document.id,
            user_id: cmd.user_id,
            result: result.clone(),
            used_fallback,
            fallback_reason,
        })
        .await?;

    deps.repo
        .update_document_analysis_meta(document.id, result.ats_score, Utc::now())
        .await?;

    Ok(row)
}

/// Maps a remote-client failure onto the persisted fallback reason.
/// Deadline exhaustion and transport errors share the PARSE bucket.
fn classify_failure(err: &RemoteError) -> FallbackReason {
    match err {
        RemoteError::Quota { .. } => FallbackReason::Quota,
        RemoteError::Parse {
            code: ParseCode::Empty,
            ..
        } => FallbackReason::Empty,
        RemoteError::Parse {
            code: ParseCode::EmptyProd,
            ..
        } => FallbackReason::EmptyProd,
        RemoteError::Parse {
            code: ParseCode::Safety,
            ..
        } => FallbackReason::Safety,
        _ => FallbackReason::Parse,
    }
}

fn fallback_result(
    deps: &AnalysisDeps,
    bytes: &[u8],
    mime_type: &str,
    keywords: &[String],
) -> AnalysisResult {
    // A document we cannot extract text from still gets a (zero) score; the
    // fallback must never fail.
    let text = match deps.extractor.extract_text(bytes, mime_type) {
        Ok(text) => text,
        Err(e) => {
            warn!("Text extraction failed during fallback scoring: {e}");
            String::new()
        }
    };
    build_fallback_result(&text, keywords)
}

/// Assembles a fallback result with the same shape as a remote one.
fn build_fallback_result(text: &str, keywords: &[String]) -> AnalysisResult {
    let requested = dedupe_keywords(keywords);
    let scored = score_keywords(text, keywords);

    let matched_lower: HashSet<String> = scored.matched.iter().map(|k| k.to_lowercase()).collect();
    let missing: Vec<String> = requested
        .into_iter()
        .filter(|k| !matched_lower.contains(&k.to_lowercase()))
        .collect();

    let positive = scored
        .matched
        .iter()
        .map(|k| format!("Your resume already covers \"{k}\"."))
        .collect();
    let improvements = missing
        .iter()
        .map(|k| format!("Add evidence of \"{k}\" to improve keyword coverage."))
        .collect();

    AnalysisResult {
        ats_score: scored.score as i32,
        feedback: Feedback {
            positive,
            improvements,
        },
        keywords: KeywordReport {
            extracted: scored.matched,
            missing,
        },
    }
}
