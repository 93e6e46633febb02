use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A stored résumé document. `file_url` is the public delivery URL recorded
/// at upload time; `storage_key`/`storage_version` identify the underlying
/// blob for authenticated delivery when the public URL is not reachable.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DocumentRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub file_name: String,
    pub file_url: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub storage_key: String,
    pub storage_version: String,
    /// Cached result of the most recent analysis, refreshed on every persist.
    pub last_ats_score: Option<i32>,
    pub last_analyzed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
