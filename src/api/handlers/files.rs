use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::response::{ApiError, AppJson, AppQuery, JSend};
use crate::context::RequestContext;
use crate::files::{self, CreateFolder, ListFiles, Upload};
use crate::storage::models::FileRecord;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct FileResponse {
    pub created_at: String,
    pub file_size: u64,
    pub id: String,
    pub is_folder: bool,
    pub is_shared_drive: bool,
    pub mime_type: Option<String>,
    pub name: String,
    pub organisation_id: String,
    pub parent_id: Option<String>,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateFileRequest {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PreviewResponse {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct ListFilesParams {
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Any value other than empty, "false" or "0" selects shared drives.
    #[serde(default)]
    pub shared_drive: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn list_files(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    AppQuery(params): AppQuery<ListFilesParams>,
) -> Result<Json<JSend<Vec<FileResponse>>>, ApiError> {
    let query = ListFiles {
        parent_id: params.parent_id,
        shared_drive: is_truthy(params.shared_drive.as_deref()),
    };
    let files = files::list_files(&state, &ctx, &query).await?;
    Ok(JSend::success(files.iter().map(file_to_response).collect()))
}

pub async fn folder_children(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> Result<Json<JSend<Vec<FileResponse>>>, ApiError> {
    let files = files::folder_children(&state, &ctx, &id).await?;
    Ok(JSend::success(files.iter().map(file_to_response).collect()))
}

pub async fn shared_drives(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
) -> Result<Json<JSend<Vec<FileResponse>>>, ApiError> {
    let drives = files::shared_drives(&state, &ctx).await?;
    Ok(JSend::success(drives.iter().map(file_to_response).collect()))
}

/// Upload a file, or create a folder when `is_folder` is set.
pub async fn create_file(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    mut multipart: Multipart,
) -> Result<Json<JSend<FileResponse>>, ApiError> {
    // Reject before reading a possibly large body.
    ctx.require_caller()?;

    let mut file_data: Option<Bytes> = None;
    let mut file_name: Option<String> = None;
    let mut file_content_type: Option<String> = None;
    let mut name: Option<String> = None;
    let mut parent_id: Option<String> = None;
    let mut is_folder = false;
    let mut shared_drive = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart data: {e}")))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "file" => {
                file_name = field.file_name().map(|s| s.to_string());
                file_content_type = field.content_type().map(|s| s.to_string());
                file_data = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::bad_request(format!("Failed to read file: {e}")))?,
                );
            }
            "name" => {
                name = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::bad_request(format!("Invalid name: {e}")))?,
                );
            }
            "parent_id" => {
                parent_id = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::bad_request(format!("Invalid parent_id: {e}")))?,
                );
            }
            "is_folder" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Invalid is_folder: {e}")))?;
                is_folder = is_truthy(Some(&text));
            }
            "shared_drive" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Invalid shared_drive: {e}")))?;
                shared_drive = is_truthy(Some(&text));
            }
            _ => {
                // Ignore unknown fields
            }
        }
    }

    let record = if is_folder || shared_drive {
        let req = CreateFolder {
            name: name.unwrap_or_default(),
            parent_id,
            shared_drive,
        };
        files::create_folder(&state, &ctx, &req).await?
    } else {
        let data = file_data.ok_or_else(|| ApiError::bad_request("file field is required"))?;
        let upload = Upload {
            name: name
                .filter(|n| !n.trim().is_empty())
                .or(file_name)
                .unwrap_or_default(),
            mime_type: file_content_type,
            data,
            parent_id,
        };
        files::upload_file(&state, &ctx, upload).await?
    };

    Ok(JSend::success(file_to_response(&record)))
}

pub async fn update_file(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<String>,
    AppJson(req): AppJson<UpdateFileRequest>,
) -> Result<Json<JSend<FileResponse>>, ApiError> {
    let file = files::rename_file(&state, &ctx, &id, &req.name).await?;
    Ok(JSend::success(file_to_response(&file)))
}

pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> Result<Json<JSend<()>>, ApiError> {
    files::soft_delete_file(&state, &ctx, &id).await?;
    Ok(JSend::success(()))
}

pub async fn preview_file(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> Result<Json<JSend<PreviewResponse>>, ApiError> {
    let url = files::preview_url(&state, &ctx, &id).await?;
    Ok(JSend::success(PreviewResponse { url }))
}

/// Stream file content as an attachment.
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let (file, stream) = files::download_file(&state, &ctx, &id).await?;

    let mut response = (StatusCode::OK, Body::from_stream(stream)).into_response();
    let headers = response.headers_mut();

    headers.insert(
        header::CONTENT_TYPE,
        file.mime_type
            .as_deref()
            .and_then(|m| m.parse().ok())
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(file.file_size));

    let disposition = format!("attachment; filename=\"{}\"", quoted_filename(&file.name));
    headers.insert(
        header::CONTENT_DISPOSITION,
        disposition
            .parse()
            .unwrap_or(HeaderValue::from_static("attachment")),
    );

    Ok(response)
}

// ============================================================================
// Helpers
// ============================================================================

fn file_to_response(file: &FileRecord) -> FileResponse {
    FileResponse {
        created_at: file.created_at.to_rfc3339(),
        file_size: file.file_size,
        id: file.id.clone(),
        is_folder: file.is_folder,
        is_shared_drive: file.is_shared_drive,
        mime_type: file.mime_type.clone(),
        name: file.name.clone(),
        organisation_id: file.organisation_id.clone(),
        parent_id: file.parent_id.clone(),
        updated_at: file.updated_at.to_rfc3339(),
    }
}

fn is_truthy(value: Option<&str>) -> bool {
    match value.map(str::trim) {
        None | Some("") => false,
        Some(v) => !v.eq_ignore_ascii_case("false") && v != "0",
    }
}

/// File names are user input; keep the header value a single quoted string.
fn quoted_filename(name: &str) -> String {
    name.chars()
        .map(|c| if c == '"' || c == '\\' || c.is_control() { '_' } else { c })
        .collect()
}
