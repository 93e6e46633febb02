use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::analysis::{AnalysisResult, AnalysisRow, FallbackReason};
use crate::models::document::DocumentRow;

/// Everything the orchestrator needs to persist an analysis.
#[derive(Debug, Clone)]
pub struct NewAnalysis {
    pub document_id: Uuid,
    pub user_id: Uuid,
    pub result: AnalysisResult,
    pub used_fallback: bool,
    pub fallback_reason: Option<FallbackReason>,
}

/// Narrow persistence interface consumed by the analysis pipeline.
///
/// Carried as `Arc<dyn Repository>` so tests can inject an in-memory
/// implementation without a database.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn find_document(&self, id: Uuid) -> Result<Option<DocumentRow>, AppError>;

    async fn create_analysis(&self, new: NewAnalysis) -> Result<AnalysisRow, AppError>;

    /// Refreshes the document's cached last-score / last-analyzed fields.
    async fn update_document_analysis_meta(
        &self,
        id: Uuid,
        score: i32,
        analyzed_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    async fn list_analyses(
        &self,
        document_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<AnalysisRow>, AppError>;
}

pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn find_document(&self, id: Uuid) -> Result<Option<DocumentRow>, AppError> {
        Ok(
            sqlx::query_as::<_, DocumentRow>("SELECT * FROM documents WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn create_analysis(&self, new: NewAnalysis) -> Result<AnalysisRow, AppError> {
        let feedback = serde_json::to_value(&new.result.feedback)
            .map_err(|e| AppError::Internal(e.into()))?;
        let keywords = serde_json::to_value(&new.result.keywords)
            .map_err(|e| AppError::Internal(e.into()))?;

        let row = sqlx::query_as::<_, AnalysisRow>(
            r#"
            INSERT INTO analyses
                (id, document_id, user_id, ats_score, feedback, keywords,
                 used_fallback, fallback_reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.document_id)
        .bind(new.user_id)
        .bind(new.result.ats_score)
        .bind(feedback)
        .bind(keywords)
        .bind(new.used_fallback)
        .bind(new.fallback_reason.map(|r| r.as_str()))
        .fetch_one(&self.pool)
        .await?;

        info!(
            "Recorded analysis {} for document {} (fallback: {})",
            row.id, row.document_id, row.used_fallback
        );
        Ok(row)
    }

    async fn update_document_analysis_meta(
        &self,
        id: Uuid,
        score: i32,
        analyzed_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE documents SET last_ats_score = $1, last_analyzed_at = $2 WHERE id = $3",
        )
        .bind(score)
        .bind(analyzed_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_analyses(
        &self,
        document_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<AnalysisRow>, AppError> {
        Ok(sqlx::query_as::<_, AnalysisRow>(
            r#"
            SELECT * FROM analyses
            WHERE document_id = $1 AND user_id = $2
            ORDER BY created_at DESC
            "#,
        )
        .bind(document_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }
}
