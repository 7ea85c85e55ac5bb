use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use photobackup_core::dedup::{self, LookupKind};
use photobackup_core::repository::PhotoRepository;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

pub const CHECKSUM_HEADER: &str = "x-checksum";
pub const PRE_CHECKSUM_HEADER: &str = "x-pre-checksum";

const DEFAULT_PAGE_SIZE: i64 = 50;

/// Wrap `data` in the `{code, message, data}` success envelope.
pub fn envelope(message: &str, data: impl Serialize) -> Json<Value> {
    Json(json!({
        "code": 0,
        "message": message,
        "data": data,
    }))
}

/// Run a repository call off the async executor.
async fn with_repo<T, F>(state: &AppState, f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&PhotoRepository) -> photobackup_core::error::Result<T> + Send + 'static,
{
    let repo = state.backup.repository().clone();
    Ok(tokio::task::spawn_blocking(move || f(&repo)).await??)
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

// ── Dedup ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ExistsRequest {
    pub path: String,
    /// `"1"` for a root-relative path, anything else for a file URI.
    #[serde(rename = "pathType", default)]
    pub path_type: String,
}

/// `POST /photo/exists`
pub async fn photo_exists(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ExistsRequest>,
) -> ApiResult<Json<Value>> {
    let pre_checksum = header(&headers, PRE_CHECKSUM_HEADER);
    let kind = LookupKind::from_wire(&req.path_type);
    let path = req.path.clone();
    let exists = with_repo(&state, move |repo| {
        dedup::exists(repo, &path, kind, pre_checksum.as_deref())
    })
    .await?;
    tracing::info!(path = %req.path, ?kind, exists, "existence check");
    Ok(envelope("", json!({ "exists": exists })))
}

/// `GET /photo/checksum`
pub async fn checksum_exists(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let checksum = header(&headers, CHECKSUM_HEADER)
        .ok_or_else(|| ApiError::BadRequest("missing X-Checksum header".to_string()))?;
    let exists = with_repo(&state, move |repo| dedup::checksum_exists(repo, &checksum)).await?;
    Ok(envelope("", json!({ "exists": exists })))
}

// ── Records ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// `GET /photo/list`
pub async fn list_photos(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let page = query.page.unwrap_or(1);
    let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    let result = with_repo(&state, move |repo| repo.list_photos(page, page_size)).await?;
    tracing::debug!(page, page_size, total = result.total, returned = result.photos.len(), "photos listed");
    Ok(envelope("", result))
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    pub path: String,
    #[serde(rename = "fileUri")]
    pub file_uri: String,
}

/// `POST /photo/update`: record where the client keeps its copy.
pub async fn update_photo(
    State(state): State<AppState>,
    Json(req): Json<UpdateRequest>,
) -> ApiResult<Json<Value>> {
    if req.path.trim().is_empty() {
        return Err(ApiError::BadRequest("path is required".to_string()));
    }
    let UpdateRequest { path, file_uri } = req;
    let updated_path = path.clone();
    let derived = with_repo(&state, move |repo| {
        let mut photo = repo.get_by_path(&path)?;
        photo.file_uri = file_uri.clone();
        repo.update(&photo)?;
        repo.update_file_uri_by_source_id(photo.id, &file_uri)
    })
    .await?;
    tracing::info!(path = %updated_path, derived, "file uri updated");
    Ok(envelope("updated", updated_path))
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    pub path: String,
}

/// `POST /photo/delete`
pub async fn delete_photo(
    State(state): State<AppState>,
    Json(req): Json<DeleteRequest>,
) -> ApiResult<Json<Value>> {
    if req.path.trim().is_empty() {
        return Err(ApiError::BadRequest("path is required".to_string()));
    }
    let photo = with_repo(&state, move |repo| repo.delete_by_path(&req.path)).await?;
    Ok(envelope("deleted", json!({ "path": photo.path })))
}
