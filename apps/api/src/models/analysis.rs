use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// The normalized analysis payload. Produced either by the remote model or by
/// the keyword fallback scorer; the shape is identical in both cases so
/// callers never branch on origin. Field names are camelCase on the wire —
/// the same JSON contract the model is instructed to emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub ats_score: i32,
    pub feedback: Feedback,
    pub keywords: KeywordReport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub positive: Vec<String>,
    pub improvements: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordReport {
    pub extracted: Vec<String>,
    pub missing: Vec<String>,
}

impl AnalysisResult {
    /// Schema validation beyond what serde enforces structurally.
    pub fn validate(&self) -> Result<(), String> {
        if !(0..=100).contains(&self.ats_score) {
            return Err(format!(
                "atsScore must be within 0-100, got {}",
                self.ats_score
            ));
        }
        Ok(())
    }
}

/// Why an analysis fell back to the deterministic keyword scorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FallbackReason {
    Quota,
    Parse,
    Empty,
    EmptyProd,
    Safety,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackReason::Quota => "QUOTA",
            FallbackReason::Parse => "PARSE",
            FallbackReason::Empty => "EMPTY",
            FallbackReason::EmptyProd => "EMPTY_PROD",
            FallbackReason::Safety => "SAFETY",
        }
    }
}

/// A persisted analysis. `fallback_reason` is non-null exactly when
/// `used_fallback` is true; `feedback` and `keywords` hold the same
/// two-list JSON objects found in [`AnalysisResult`].
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AnalysisRow {
    pub id: Uuid,
    pub document_id: Uuid,
    pub user_id: Uuid,
    pub ats_score: i32,
    pub feedback: Value,
    pub keywords: Value,
    pub used_fallback: bool,
    pub fallback_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}
