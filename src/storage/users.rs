use chrono::{DateTime, Utc};
use redb::{ReadableTable, WriteTransaction};

use super::db::{Database, DatabaseError};
use super::models::{NewUser, User};
use super::tables::*;

/// Emails are unique case-insensitively; stored and looked up in this form.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl Database {
    // ========================================================================
    // User operations
    // ========================================================================

    /// Create a user. Fails with `Constraint` if the email is taken or the
    /// organisation does not exist.
    pub fn create_user(&self, new_user: &NewUser) -> Result<User, DatabaseError> {
        let email = normalize_email(&new_user.email);
        debug_assert!(!email.is_empty(), "user email must not be empty");

        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            email,
            first_name: new_user.first_name.clone(),
            last_name: new_user.last_name.clone(),
            organisation_id: new_user.organisation_id.clone(),
            role: new_user.role,
            created_at: Utc::now(),
            recovery_token: None,
            recovery_sent_at: None,
        };

        let write_txn = self.begin_write()?;
        {
            let organisations = write_txn.open_table(ORGANISATIONS)?;
            if organisations.get(user.organisation_id.as_str())?.is_none() {
                return Err(DatabaseError::Constraint(format!(
                    "organisation '{}' does not exist",
                    user.organisation_id
                )));
            }

            let mut emails = write_txn.open_table(USER_EMAILS)?;
            if emails.get(user.email.as_str())?.is_some() {
                return Err(DatabaseError::Constraint(format!(
                    "email '{}' is already registered",
                    user.email
                )));
            }
            emails.insert(user.email.as_str(), user.id.as_str())?;

            put_user(&write_txn, &user)?;
        }
        write_txn.commit()?;
        Ok(user)
    }

    /// Get a user by UUID
    pub fn find_user_by_id(&self, id: &str) -> Result<Option<User>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(USERS)?;

        match table.get(id)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Get a user by email (case-insensitive)
    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>, DatabaseError> {
        let email = normalize_email(email);
        let read_txn = self.begin_read()?;
        let emails = read_txn.open_table(USER_EMAILS)?;

        let id = match emails.get(email.as_str())? {
            Some(data) => data.value().to_string(),
            None => return Ok(None),
        };

        let table = read_txn.open_table(USERS)?;
        match table.get(id.as_str())? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Store a pending one-time login token, replacing any previous one.
    /// Returns false if the user does not exist.
    pub fn set_recovery_token(
        &self,
        user_id: &str,
        token: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;
        let updated = match get_user(&write_txn, user_id)? {
            Some(mut user) => {
                let mut tokens = write_txn.open_table(USER_RECOVERY_TOKENS)?;
                if let Some(ref previous) = user.recovery_token {
                    tokens.remove(previous.as_str())?;
                }
                tokens.insert(token, user_id)?;
                drop(tokens);

                user.recovery_token = Some(token.to_string());
                user.recovery_sent_at = Some(sent_at);
                put_user(&write_txn, &user)?;
                true
            }
            None => false,
        };
        write_txn.commit()?;
        Ok(updated)
    }

    /// Consume a pending one-time login token. Removes it from the index and
    /// clears it on the user in a single write transaction, returning the user
    /// as it was before the clear. Only one caller can ever receive a given
    /// token.
    pub fn take_recovery_token(&self, token: &str) -> Result<Option<User>, DatabaseError> {
        if token.is_empty() {
            return Ok(None);
        }

        let write_txn = self.begin_write()?;
        let user_id = {
            let mut tokens = write_txn.open_table(USER_RECOVERY_TOKENS)?;
            let removed = tokens.remove(token)?;
            removed.map(|id| id.value().to_string())
        };

        let taken = match user_id {
            Some(id) => match get_user(&write_txn, &id)? {
                Some(user) => {
                    let mut cleared = user.clone();
                    cleared.recovery_token = None;
                    cleared.recovery_sent_at = None;
                    put_user(&write_txn, &cleared)?;
                    Some(user)
                }
                None => None,
            },
            None => None,
        };
        write_txn.commit()?;
        Ok(taken)
    }
}

fn get_user(write_txn: &WriteTransaction, id: &str) -> Result<Option<User>, DatabaseError> {
    let table = write_txn.open_table(USERS)?;
    let result = match table.get(id)? {
        Some(data) => Some(rmp_serde::from_slice(data.value())?),
        None => None,
    };
    Ok(result)
}

fn put_user(write_txn: &WriteTransaction, user: &User) -> Result<(), DatabaseError> {
    let mut table = write_txn.open_table(USERS)?;
    let data = rmp_serde::to_vec_named(user)?;
    table.insert(user.id.as_str(), data.as_slice())?;
    Ok(())
}
