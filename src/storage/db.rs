use redb::{
    Database as RedbDatabase, ReadTransaction, ReadableTableMetadata, WriteTransaction,
};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use super::tables::*;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Commit error: {0}")]
    Commit(Box<redb::CommitError>),
    /// A uniqueness or reference constraint would be violated by the write.
    #[error("Constraint violation: {0}")]
    Constraint(String),
    #[error("Database error: {0}")]
    Redb(Box<redb::Error>),
    #[error("Database error: {0}")]
    RedbDatabase(Box<redb::DatabaseError>),
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),
    #[error("Storage error: {0}")]
    Storage(Box<redb::StorageError>),
    #[error("Table error: {0}")]
    Table(Box<redb::TableError>),
    #[error("Transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
}

impl From<redb::CommitError> for DatabaseError {
    fn from(e: redb::CommitError) -> Self {
        DatabaseError::Commit(Box::new(e))
    }
}

impl From<redb::DatabaseError> for DatabaseError {
    fn from(e: redb::DatabaseError) -> Self {
        DatabaseError::RedbDatabase(Box::new(e))
    }
}

impl From<redb::Error> for DatabaseError {
    fn from(e: redb::Error) -> Self {
        DatabaseError::Redb(Box::new(e))
    }
}

impl From<redb::StorageError> for DatabaseError {
    fn from(e: redb::StorageError) -> Self {
        DatabaseError::Storage(Box::new(e))
    }
}

impl From<redb::TableError> for DatabaseError {
    fn from(e: redb::TableError) -> Self {
        DatabaseError::Table(Box::new(e))
    }
}

impl From<redb::TransactionError> for DatabaseError {
    fn from(e: redb::TransactionError) -> Self {
        DatabaseError::Transaction(Box::new(e))
    }
}

/// The catalogue: organisations, users, sessions and file records.
pub struct Database {
    db: Arc<RedbDatabase>,
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
        }
    }
}

/// Statistics from a purge operation
#[derive(Debug, Default)]
pub struct PurgeStats {
    pub files: u64,
    pub organisations: u64,
    pub users: u64,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, DatabaseError> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        let db_path = data_dir.as_ref().join("drive.redb");
        let db = Arc::new(RedbDatabase::create(db_path)?);

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ORGANISATIONS)?;
            let _ = write_txn.open_table(ORGANISATION_NAMES)?;
            let _ = write_txn.open_table(USERS)?;
            let _ = write_txn.open_table(USER_EMAILS)?;
            let _ = write_txn.open_table(USER_RECOVERY_TOKENS)?;
            let _ = write_txn.open_table(SESSIONS)?;
            let _ = write_txn.open_table(FILES)?;
            let _ = write_txn.open_table(FILE_CHILDREN)?;
            let _ = write_txn.open_table(PENDING_UPLOADS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Begin a read transaction
    pub fn begin_read(&self) -> Result<ReadTransaction, DatabaseError> {
        Ok(self.db.begin_read()?)
    }

    /// Begin a write transaction
    pub fn begin_write(&self) -> Result<WriteTransaction, DatabaseError> {
        Ok(self.db.begin_write()?)
    }

    // ========================================================================
    // Admin operations
    // ========================================================================

    /// Purge all data - for testing only
    pub fn purge_all(&self) -> Result<PurgeStats, DatabaseError> {
        let write_txn = self.begin_write()?;
        let stats = {
            PurgeStats {
                files: write_txn.open_table(FILES)?.len()?,
                organisations: write_txn.open_table(ORGANISATIONS)?.len()?,
                users: write_txn.open_table(USERS)?.len()?,
            }
        };

        for table in [ORGANISATIONS, USERS, SESSIONS, FILES] {
            write_txn.delete_table(table)?;
            let _ = write_txn.open_table(table)?;
        }
        for table in [ORGANISATION_NAMES, USER_EMAILS, USER_RECOVERY_TOKENS, FILE_CHILDREN] {
            write_txn.delete_table(table)?;
            let _ = write_txn.open_table(table)?;
        }
        write_txn.delete_table(PENDING_UPLOADS)?;
        let _ = write_txn.open_table(PENDING_UPLOADS)?;

        write_txn.commit()?;
        Ok(stats)
    }
}
