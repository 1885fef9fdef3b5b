//! Passwordless sign-in: one-time tokens by email, bearer sessions.

mod service;
pub mod tokens;

pub use service::{
    issue_one_time_token, log_out, redeem_token, resolve_caller, sign_up, PublicUser, SignIn,
    SignUp,
};
