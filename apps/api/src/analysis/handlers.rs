use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::analysis::orchestrator::{run_analysis, AnalyzeCommand};
use crate::analysis::resolver::InlinePayload;
use crate::errors::AppError;
use crate::models::analysis::AnalysisRow;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct UserIdQuery {
    pub user_id: Uuid,
}

#[derive(Deserialize)]
pub struct AnalyzeRequest {
    pub user_id: Uuid,
    /// Overrides the default keyword list when present and non-empty.
    pub keywords: Option<Vec<String>>,
    /// Base64 document bytes, bypassing the stored-blob fetch.
    pub file_data: Option<String>,
    pub mime_type: Option<String>,
}

/// POST /api/v1/documents/:id/analyze
pub async fn handle_analyze(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<AnalysisRow>, AppError> {
    if !state.throttle.allow(&req.user_id.to_string()) {
        return Err(AppError::RateLimited);
    }

    let inline = req.file_data.map(|data| InlinePayload {
        data,
        mime_type: req
            .mime_type
            .unwrap_or_else(|| "application/pdf".to_string()),
    });

    let row = run_analysis(
        &state.analysis,
        AnalyzeCommand {
            document_id: id,
            user_id: req.user_id,
            keywords: req.keywords,
            inline,
        },
    )
    .await?;
    Ok(Json(row))
}

/// GET /api/v1/documents/:id/analyses
pub async fn handle_list_analyses(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<Vec<AnalysisRow>>, AppError> {
    let rows = state.analysis.repo.list_analyses(id, params.user_id).await?;
    Ok(Json(rows))
}
