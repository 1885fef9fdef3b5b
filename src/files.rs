//! The file and folder catalogue, and its consistency with the object store.
//!
//! Every operation requires a resolved caller and is scoped to the caller's
//! organisation. Uploads are written in two phases: a pending catalogue row,
//! then the blob, then the row is committed. A failed or abandoned blob write
//! discards the pending row; rows left pending by a crash are reconciled by
//! [`sweep_stale_uploads`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::context::RequestContext;
use crate::error::{ServiceError, ServiceResult};
use crate::object_store::ByteStream;
use crate::storage::models::{FileRecord, NewFile, NewFolder, TenantId};
use crate::AppState;

const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Default)]
pub struct ListFiles {
    pub parent_id: Option<String>,
    /// Shared-drive roots only; takes precedence over `parent_id`.
    pub shared_drive: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CreateFolder {
    pub name: String,
    pub parent_id: Option<String>,
    pub shared_drive: bool,
}

#[derive(Debug, Clone)]
pub struct Upload {
    pub name: String,
    pub mime_type: Option<String>,
    pub data: Bytes,
    pub parent_id: Option<String>,
}

/// Ids of uploads whose blob write is running in this process. The sweeper
/// leaves their rows alone however old they are.
#[derive(Debug, Default)]
pub struct UploadsInFlight {
    ids: Mutex<HashSet<String>>,
}

impl UploadsInFlight {
    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains(id)
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Keeps an upload registered in [`UploadsInFlight`] until dropped.
struct InFlightUpload {
    state: Arc<AppState>,
    id: String,
}

impl InFlightUpload {
    fn track(state: &Arc<AppState>, id: &str) -> Self {
        state.uploads_in_flight.lock().insert(id.to_string());
        Self {
            state: Arc::clone(state),
            id: id.to_string(),
        }
    }
}

impl Drop for InFlightUpload {
    fn drop(&mut self) {
        self.state.uploads_in_flight.lock().remove(&self.id);
    }
}

/// List files in one of three modes: shared-drive roots, everything (flat),
/// or the children of one folder.
pub async fn list_files(
    state: &AppState,
    ctx: &RequestContext,
    query: &ListFiles,
) -> ServiceResult<Vec<FileRecord>> {
    let tenant = ctx.require_caller()?.tenant();

    let files = if query.shared_drive {
        state.db.file_find_shared_drives(&tenant)?
    } else {
        match query.parent_id.as_deref().filter(|p| !p.is_empty()) {
            None => state.db.file_find_all(&tenant)?,
            Some(parent_id) => state.db.file_find_by_parent_id(&tenant, parent_id)?,
        }
    };

    Ok(files)
}

/// Children of a folder. An unknown folder id lists as an empty folder.
pub async fn folder_children(
    state: &AppState,
    ctx: &RequestContext,
    folder_id: &str,
) -> ServiceResult<Vec<FileRecord>> {
    let query = ListFiles {
        parent_id: Some(folder_id.to_string()),
        shared_drive: false,
    };
    list_files(state, ctx, &query).await
}

pub async fn shared_drives(
    state: &AppState,
    ctx: &RequestContext,
) -> ServiceResult<Vec<FileRecord>> {
    let tenant = ctx.require_caller()?.tenant();
    Ok(state.db.file_find_shared_drives(&tenant)?)
}

/// Create a folder. Catalogue only; folders have no blob.
pub async fn create_folder(
    state: &AppState,
    ctx: &RequestContext,
    req: &CreateFolder,
) -> ServiceResult<FileRecord> {
    let tenant = ctx.require_caller()?.tenant();

    let name = req.name.trim();
    if name.is_empty() {
        return Err(ServiceError::bad_request("name is required"));
    }
    let parent_id = non_empty(req.parent_id.as_deref());
    if req.shared_drive && parent_id.is_some() {
        return Err(ServiceError::bad_request(
            "a shared drive cannot have a parent folder",
        ));
    }
    validate_parent(state, &tenant, parent_id)?;

    let folder = state.db.file_create_folder(
        &tenant,
        &NewFolder {
            name: name.to_string(),
            parent_id: parent_id.map(str::to_string),
            is_shared_drive: req.shared_drive,
        },
    )?;

    tracing::debug!(file_id = %folder.id, organisation_id = %tenant, "Created folder");
    Ok(folder)
}

/// Store a blob-backed file. The catalogue row becomes visible only once the
/// blob is written; on failure neither remains.
pub async fn upload_file(
    state: &Arc<AppState>,
    ctx: &RequestContext,
    upload: Upload,
) -> ServiceResult<FileRecord> {
    let tenant = ctx.require_caller()?.tenant();

    let file_size = upload.data.len() as u64;
    if file_size > state.config.uploads.max_upload_size {
        return Err(ServiceError::bad_request(format!(
            "file exceeds maximum upload size of {} bytes",
            state.config.uploads.max_upload_size
        )));
    }

    let name = upload.name.trim();
    if name.is_empty() {
        return Err(ServiceError::bad_request("file name is required"));
    }
    let parent_id = non_empty(upload.parent_id.as_deref());
    validate_parent(state, &tenant, parent_id)?;

    let pending = state.db.file_create(
        &tenant,
        &NewFile {
            name: name.to_string(),
            mime_type: Some(resolve_mime_type(upload.mime_type.as_deref(), name)),
            file_size,
            parent_id: parent_id.map(str::to_string),
        },
    )?;

    // Runs detached so that a dropped request cannot stop it between phases.
    let in_flight = InFlightUpload::track(state, &pending.id);
    let task_state = Arc::clone(state);
    let cancel = ctx.cancel.clone();
    let data = upload.data;
    let handle = tokio::spawn(async move {
        let result = write_blob_and_commit(&task_state, &tenant, pending, data, cancel).await;
        drop(in_flight);
        result
    });

    handle
        .await
        .map_err(|e| ServiceError::internal(format!("upload task failed: {e}")))?
}

async fn write_blob_and_commit(
    state: &AppState,
    tenant: &TenantId,
    pending: FileRecord,
    data: Bytes,
    cancel: CancellationToken,
) -> ServiceResult<FileRecord> {
    if cancel.is_cancelled() {
        discard_pending(state, tenant, &pending.id);
        return Err(ServiceError::internal("upload cancelled before blob write"));
    }

    if let Err(e) = state.object_store.put(&pending.id, data).await {
        discard_pending(state, tenant, &pending.id);
        return Err(ServiceError::internal(format!("failed to store blob: {e}")));
    }

    match state.db.file_commit_upload(tenant, &pending.id) {
        Ok(Some(file)) => {
            tracing::debug!(file_id = %file.id, organisation_id = %tenant, size = file.file_size, "Uploaded file");
            Ok(file)
        }
        Ok(None) => {
            remove_orphan_blob(state, &pending.id).await;
            Err(ServiceError::internal(format!(
                "pending upload {} disappeared before commit",
                pending.id
            )))
        }
        Err(e) => {
            remove_orphan_blob(state, &pending.id).await;
            discard_pending(state, tenant, &pending.id);
            Err(e.into())
        }
    }
}

fn discard_pending(state: &AppState, tenant: &TenantId, id: &str) {
    if let Err(e) = state.db.file_discard_upload(tenant, id) {
        // Left for the sweeper.
        tracing::warn!(file_id = %id, error = %e, "Failed to discard pending upload");
    }
}

async fn remove_orphan_blob(state: &AppState, id: &str) {
    if let Err(e) = state.object_store.delete(id).await {
        tracing::warn!(file_id = %id, error = %e, "Failed to delete orphaned blob");
    }
}

/// Mark a file or folder deleted. Its blob is kept.
pub async fn soft_delete_file(state: &AppState, ctx: &RequestContext, id: &str) -> ServiceResult<()> {
    let tenant = ctx.require_caller()?.tenant();

    if !state.db.file_soft_delete(&tenant, id, Utc::now())? {
        return Err(ServiceError::NotFound);
    }

    tracing::debug!(file_id = %id, organisation_id = %tenant, "Soft-deleted file");
    Ok(())
}

pub async fn rename_file(
    state: &AppState,
    ctx: &RequestContext,
    id: &str,
    new_name: &str,
) -> ServiceResult<FileRecord> {
    let tenant = ctx.require_caller()?.tenant();

    let new_name = new_name.trim();
    if new_name.is_empty() {
        return Err(ServiceError::bad_request("name is required"));
    }

    state
        .db
        .file_update_name(&tenant, id, new_name)?
        .ok_or(ServiceError::NotFound)
}

/// A short-lived URL the client can fetch the blob from directly.
pub async fn preview_url(state: &AppState, ctx: &RequestContext, id: &str) -> ServiceResult<String> {
    let file = find_blob_backed(state, ctx, id)?;

    let url = state
        .object_store
        .presign_get(&file.id, state.config.auth.preview_url_ttl())
        .await
        .map_err(|e| ServiceError::internal(format!("failed to presign {}: {e}", file.id)))?;

    Ok(url)
}

/// The file record and its blob, streamed through this service.
pub async fn download_file(
    state: &AppState,
    ctx: &RequestContext,
    id: &str,
) -> ServiceResult<(FileRecord, ByteStream)> {
    let file = find_blob_backed(state, ctx, id)?;
    let stream = state.object_store.get(&file.id).await?;
    Ok((file, stream))
}

/// Reconcile uploads left pending longer than `older_than`: the blob (if the
/// write got that far) is deleted, then the row. Uploads still being written
/// by this process are skipped. Returns rows discarded.
pub async fn sweep_stale_uploads(
    state: &AppState,
    older_than: chrono::Duration,
) -> ServiceResult<usize> {
    let stale = state.db.file_find_stale_uploads(Utc::now() - older_than)?;

    let mut discarded = 0;
    for file in stale {
        if state.uploads_in_flight.contains(&file.id) {
            tracing::debug!(file_id = %file.id, "Skipping stale upload still in flight");
            continue;
        }
        if let Err(e) = state.object_store.delete(&file.id).await {
            tracing::warn!(file_id = %file.id, error = %e, "Failed to delete blob of stale upload");
            continue;
        }
        if state.db.file_discard_upload(&file.tenant(), &file.id)? {
            discarded += 1;
        }
    }

    if discarded > 0 {
        tracing::info!(discarded, "Discarded stale pending uploads");
    }
    Ok(discarded)
}

fn find_blob_backed(state: &AppState, ctx: &RequestContext, id: &str) -> ServiceResult<FileRecord> {
    let tenant = ctx.require_caller()?.tenant();

    let file = state
        .db
        .file_find_by_id(&tenant, id)?
        .ok_or(ServiceError::NotFound)?;

    if file.is_folder {
        return Err(ServiceError::bad_request("folders have no content"));
    }
    Ok(file)
}

/// A parent must be a live folder of the same organisation. This is also
/// where ancestry checks belong once items can be moved.
fn validate_parent(
    state: &AppState,
    tenant: &TenantId,
    parent_id: Option<&str>,
) -> ServiceResult<()> {
    let Some(parent_id) = parent_id else {
        return Ok(());
    };

    let parent = state
        .db
        .file_find_by_id(tenant, parent_id)?
        .ok_or(ServiceError::NotFound)?;

    if !parent.is_folder {
        return Err(ServiceError::bad_request("parent must be a folder"));
    }
    Ok(())
}

/// Client-declared type, else a guess from the file name.
fn resolve_mime_type(declared: Option<&str>, name: &str) -> String {
    declared
        .map(str::trim)
        .filter(|ct| !ct.is_empty() && *ct != FALLBACK_MIME_TYPE)
        .map(str::to_string)
        .or_else(|| mime_guess::from_path(name).first().map(|m| m.to_string()))
        .unwrap_or_else(|| FALLBACK_MIME_TYPE.to_string())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
