use chrono::{DateTime, Utc};
use redb::{ReadableTable, WriteTransaction};

use super::db::{Database, DatabaseError};
use super::models::{FileRecord, NewFile, NewFolder, TenantId, UploadState};
use super::tables::*;

impl Database {
    // ========================================================================
    // File operations
    //
    // Every method takes the caller's tenant and builds its keys from it, so
    // rows of other organisations cannot be addressed at all.
    // ========================================================================

    /// Insert a blob-backed file in the pending state. The row stays invisible
    /// until `file_commit_upload` confirms its blob was written.
    pub fn file_create(
        &self,
        tenant: &TenantId,
        new_file: &NewFile,
    ) -> Result<FileRecord, DatabaseError> {
        let now = Utc::now();
        let file = FileRecord {
            id: uuid::Uuid::new_v4().to_string(),
            name: new_file.name.clone(),
            mime_type: new_file.mime_type.clone(),
            file_size: new_file.file_size,
            parent_id: new_file.parent_id.clone(),
            organisation_id: tenant.to_string(),
            is_folder: false,
            is_shared_drive: false,
            upload_state: UploadState::Pending,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.insert_file(tenant, &file)?;
        Ok(file)
    }

    /// Insert a folder. Folders have no blob and are committed immediately.
    pub fn file_create_folder(
        &self,
        tenant: &TenantId,
        folder: &NewFolder,
    ) -> Result<FileRecord, DatabaseError> {
        let now = Utc::now();
        let file = FileRecord {
            id: uuid::Uuid::new_v4().to_string(),
            name: folder.name.clone(),
            mime_type: None,
            file_size: 0,
            parent_id: folder.parent_id.clone(),
            organisation_id: tenant.to_string(),
            is_folder: true,
            is_shared_drive: folder.is_shared_drive,
            upload_state: UploadState::Committed,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.insert_file(tenant, &file)?;
        Ok(file)
    }

    /// Mark a pending upload as committed once its blob exists.
    pub fn file_commit_upload(
        &self,
        tenant: &TenantId,
        id: &str,
    ) -> Result<Option<FileRecord>, DatabaseError> {
        let Some(key) = file_key(tenant, id) else {
            return Ok(None);
        };

        let write_txn = self.begin_write()?;
        let committed = match get_file(&write_txn, &key)? {
            Some(mut file) if file.upload_state == UploadState::Pending => {
                file.upload_state = UploadState::Committed;
                file.updated_at = Utc::now();
                put_file(&write_txn, &key, &file)?;
                write_txn.open_table(PENDING_UPLOADS)?.remove(key.as_str())?;
                Some(file)
            }
            _ => None,
        };
        write_txn.commit()?;
        Ok(committed)
    }

    /// Remove a pending upload row whose blob could not be written.
    /// Committed rows are never removed.
    pub fn file_discard_upload(&self, tenant: &TenantId, id: &str) -> Result<bool, DatabaseError> {
        let Some(key) = file_key(tenant, id) else {
            return Ok(false);
        };

        let write_txn = self.begin_write()?;
        let discarded = match get_file(&write_txn, &key)? {
            Some(file) if file.upload_state == UploadState::Pending => {
                write_txn.open_table(FILES)?.remove(key.as_str())?;
                write_txn.open_table(PENDING_UPLOADS)?.remove(key.as_str())?;
                if let Some(parent_id) = file.parent_id.as_deref() {
                    let child = child_key(tenant, parent_id, &file.id);
                    write_txn.open_table(FILE_CHILDREN)?.remove(child.as_str())?;
                }
                true
            }
            _ => false,
        };
        write_txn.commit()?;
        Ok(discarded)
    }

    /// All live files and folders of the tenant, flat.
    pub fn file_find_all(&self, tenant: &TenantId) -> Result<Vec<FileRecord>, DatabaseError> {
        let mut files = self.tenant_files(tenant)?;
        files.retain(FileRecord::is_live);
        sort_listing(&mut files);
        Ok(files)
    }

    /// Live children of a folder, via the parent index. A missing folder
    /// yields an empty list.
    pub fn file_find_by_parent_id(
        &self,
        tenant: &TenantId,
        parent_id: &str,
    ) -> Result<Vec<FileRecord>, DatabaseError> {
        let Some(parent_key) = file_key(tenant, parent_id) else {
            return Ok(Vec::new());
        };
        let (start, end) = prefix_range(&parent_key);

        let read_txn = self.begin_read()?;
        let children = read_txn.open_table(FILE_CHILDREN)?;
        let table = read_txn.open_table(FILES)?;

        let mut files = Vec::new();
        for entry in children.range(start.as_str()..end.as_str())? {
            let (_, child_id) = entry?;
            let key = format!("{}/{}", tenant.as_str(), child_id.value());
            if let Some(data) = table.get(key.as_str())? {
                let file: FileRecord = rmp_serde::from_slice(data.value())?;
                if file.is_live() {
                    files.push(file);
                }
            }
        }

        sort_listing(&mut files);
        Ok(files)
    }

    /// Live shared-drive roots of the tenant.
    pub fn file_find_shared_drives(
        &self,
        tenant: &TenantId,
    ) -> Result<Vec<FileRecord>, DatabaseError> {
        let mut files = self.tenant_files(tenant)?;
        files.retain(|f| f.is_live() && f.is_shared_drive && f.parent_id.is_none());
        sort_listing(&mut files);
        Ok(files)
    }

    /// Get a live file or folder by id
    pub fn file_find_by_id(
        &self,
        tenant: &TenantId,
        id: &str,
    ) -> Result<Option<FileRecord>, DatabaseError> {
        let Some(key) = file_key(tenant, id) else {
            return Ok(None);
        };

        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(FILES)?;

        let file: Option<FileRecord> = match table.get(key.as_str())? {
            Some(data) => Some(rmp_serde::from_slice(data.value())?),
            None => None,
        };

        Ok(file.filter(FileRecord::is_live))
    }

    /// Rename a live file or folder. Returns the updated record, or None if
    /// no live row matches.
    pub fn file_update_name(
        &self,
        tenant: &TenantId,
        id: &str,
        name: &str,
    ) -> Result<Option<FileRecord>, DatabaseError> {
        let Some(key) = file_key(tenant, id) else {
            return Ok(None);
        };

        let write_txn = self.begin_write()?;
        let updated = match get_file(&write_txn, &key)? {
            Some(mut file) if file.is_live() => {
                file.name = name.to_string();
                file.updated_at = Utc::now();
                put_file(&write_txn, &key, &file)?;
                Some(file)
            }
            _ => None,
        };
        write_txn.commit()?;
        Ok(updated)
    }

    /// Soft-delete a live file or folder. The row and its blob are kept.
    /// Returns false if no live row matches.
    pub fn file_soft_delete(
        &self,
        tenant: &TenantId,
        id: &str,
        deleted_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let Some(key) = file_key(tenant, id) else {
            return Ok(false);
        };

        let write_txn = self.begin_write()?;
        let deleted = match get_file(&write_txn, &key)? {
            Some(mut file) if file.is_live() => {
                file.deleted_at = Some(deleted_at);
                file.updated_at = deleted_at;
                put_file(&write_txn, &key, &file)?;
                true
            }
            _ => false,
        };
        write_txn.commit()?;
        Ok(deleted)
    }

    /// Pending uploads created before the cutoff, across all tenants.
    /// Used to reconcile uploads interrupted between their two phases.
    pub fn file_find_stale_uploads(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<FileRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let pending = read_txn.open_table(PENDING_UPLOADS)?;
        let table = read_txn.open_table(FILES)?;
        let cutoff = created_before.timestamp_millis();

        let mut stale = Vec::new();
        for entry in pending.iter()? {
            let (key, created_at) = entry?;
            if created_at.value() >= cutoff {
                continue;
            }
            if let Some(data) = table.get(key.value())? {
                let file: FileRecord = rmp_serde::from_slice(data.value())?;
                if file.upload_state == UploadState::Pending {
                    stale.push(file);
                }
            }
        }

        stale.sort_by_key(|f| f.created_at);
        Ok(stale)
    }

    /// Every row of the tenant regardless of state: one contiguous key range.
    fn tenant_files(&self, tenant: &TenantId) -> Result<Vec<FileRecord>, DatabaseError> {
        let (start, end) = prefix_range(tenant.as_str());

        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(FILES)?;

        let mut files = Vec::new();
        for entry in table.range(start.as_str()..end.as_str())? {
            let (_, data) = entry?;
            files.push(rmp_serde::from_slice(data.value())?);
        }

        Ok(files)
    }

    fn insert_file(&self, tenant: &TenantId, file: &FileRecord) -> Result<(), DatabaseError> {
        debug_assert!(!file.name.is_empty(), "file name must not be empty");
        let key = format!("{}/{}", tenant.as_str(), file.id);

        let write_txn = self.begin_write()?;
        {
            put_file(&write_txn, &key, file)?;

            if let Some(parent_id) = file.parent_id.as_deref() {
                let mut children = write_txn.open_table(FILE_CHILDREN)?;
                let child = child_key(tenant, parent_id, &file.id);
                children.insert(child.as_str(), file.id.as_str())?;
            }

            if file.upload_state == UploadState::Pending {
                let mut pending = write_txn.open_table(PENDING_UPLOADS)?;
                pending.insert(key.as_str(), file.created_at.timestamp_millis())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }
}

/// Primary key of a file row. Ids never contain the separator, so an id that
/// does cannot name any row.
fn file_key(tenant: &TenantId, id: &str) -> Option<String> {
    if id.is_empty() || id.contains('/') {
        return None;
    }
    Some(format!("{}/{}", tenant.as_str(), id))
}

fn child_key(tenant: &TenantId, parent_id: &str, id: &str) -> String {
    format!("{}/{}/{}", tenant.as_str(), parent_id, id)
}

/// Bounds covering every key that starts with `{prefix}/`. `0` is the byte
/// after `/`.
fn prefix_range(prefix: &str) -> (String, String) {
    (format!("{prefix}/"), format!("{prefix}0"))
}

/// Folders first, then by name, then by id for a stable order.
fn sort_listing(files: &mut [FileRecord]) {
    files.sort_by(|a, b| {
        b.is_folder
            .cmp(&a.is_folder)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn get_file(write_txn: &WriteTransaction, key: &str) -> Result<Option<FileRecord>, DatabaseError> {
    let table = write_txn.open_table(FILES)?;
    let result = match table.get(key)? {
        Some(data) => Some(rmp_serde::from_slice(data.value())?),
        None => None,
    };
    Ok(result)
}

fn put_file(write_txn: &WriteTransaction, key: &str, file: &FileRecord) -> Result<(), DatabaseError> {
    let mut table = write_txn.open_table(FILES)?;
    let data = rmp_serde::to_vec_named(file)?;
    table.insert(key, data.as_slice())?;
    Ok(())
}
