pub mod db;
mod files;
pub mod models;
mod organisations;
mod sessions;
mod tables;
mod users;

pub use db::{Database, DatabaseError};
pub use tables::*;
pub use users::normalize_email;
