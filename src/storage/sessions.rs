use chrono::Utc;
use redb::ReadableTable;

use super::db::{Database, DatabaseError};
use super::models::Session;
use super::tables::*;

impl Database {
    // ========================================================================
    // Session operations
    // ========================================================================

    /// Create a session for a user, keyed by its bearer token
    pub fn create_session(&self, user_id: &str, token: &str) -> Result<Session, DatabaseError> {
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            token: token.to_string(),
            created_at: Utc::now(),
        };
        self.insert_session(&session)?;
        Ok(session)
    }

    /// Store a fully-formed session. Fails with `Constraint` on a token collision.
    pub fn insert_session(&self, session: &Session) -> Result<(), DatabaseError> {
        debug_assert!(!session.token.is_empty(), "session token must not be empty");

        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(SESSIONS)?;
            if table.get(session.token.as_str())?.is_some() {
                return Err(DatabaseError::Constraint(
                    "session token already exists".to_string(),
                ));
            }
            let data = rmp_serde::to_vec_named(session)?;
            table.insert(session.token.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Get a session by its bearer token
    pub fn find_session_by_token(&self, token: &str) -> Result<Option<Session>, DatabaseError> {
        if token.is_empty() {
            return Ok(None);
        }

        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(SESSIONS)?;

        match table.get(token)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Remove the session matching both token and user. A token belonging to
    /// another user is left untouched. Returns whether a row was removed.
    pub fn remove_session(&self, token: &str, user_id: &str) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(SESSIONS)?;
            let owner: Option<String> = match table.get(token)? {
                Some(data) => {
                    let session: Session = rmp_serde::from_slice(data.value())?;
                    Some(session.user_id)
                }
                None => None,
            };

            match owner {
                Some(owner) if owner == user_id => {
                    table.remove(token)?;
                    true
                }
                _ => false,
            }
        };
        write_txn.commit()?;
        Ok(removed)
    }
}
