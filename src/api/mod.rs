//! HTTP surface: routing, the authorization boundary and JSend responses.

mod handlers;
pub mod middleware;
pub mod response;
mod routes;
#[cfg(test)]
mod tests;

pub use routes::create_router;
