mod admin;
mod auth;
mod files;
mod objects;

pub use admin::{admin_purge, health, root};
pub use auth::{log_out, one_time_login, sign_in, sign_up};
pub use files::{
    create_file, delete_file, download_file, folder_children, list_files, preview_file,
    shared_drives, update_file,
};
pub use objects::serve_object;
