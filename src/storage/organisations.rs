use chrono::Utc;
use redb::ReadableTable;

use super::db::{Database, DatabaseError};
use super::models::Organisation;
use super::tables::*;

impl Database {
    // ========================================================================
    // Organisation operations
    // ========================================================================

    /// Create an organisation. Fails with `Constraint` if the name is taken.
    pub fn create_organisation(&self, name: &str) -> Result<Organisation, DatabaseError> {
        debug_assert!(!name.is_empty(), "organisation name must not be empty");

        let organisation = Organisation {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };

        let write_txn = self.begin_write()?;
        {
            let mut names = write_txn.open_table(ORGANISATION_NAMES)?;
            if names.get(name)?.is_some() {
                return Err(DatabaseError::Constraint(format!(
                    "organisation name '{name}' is already in use"
                )));
            }
            names.insert(name, organisation.id.as_str())?;

            let mut table = write_txn.open_table(ORGANISATIONS)?;
            let data = rmp_serde::to_vec_named(&organisation)?;
            table.insert(organisation.id.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(organisation)
    }

    /// Get an organisation by its UUID
    pub fn find_organisation_by_id(&self, id: &str) -> Result<Option<Organisation>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(ORGANISATIONS)?;

        match table.get(id)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Get an organisation by its unique name
    pub fn find_organisation_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Organisation>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let names = read_txn.open_table(ORGANISATION_NAMES)?;

        let id = match names.get(name)? {
            Some(data) => data.value().to_string(),
            None => return Ok(None),
        };

        let table = read_txn.open_table(ORGANISATIONS)?;
        match table.get(id.as_str())? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }
}
