//! The backend for the UMD FBLA chapter website.
//!
//! Public pages read events and resources through `/api`; officers manage
//! them, along with member accounts, through the GraphQL API at `/admin/api`.
//! All data lives in a durable key-value [store](crate::store).

use axum::Router;

pub mod auth;
pub mod cdn;
pub mod config;
pub mod error;
pub mod graphql;
pub mod guard;
pub mod models;
pub mod oauth;
pub mod routes;
pub mod session;
pub mod state;
pub mod store;
pub mod util;

#[cfg(test)]
mod tests;

pub use state::AppState;

/// The whole site, ready to be served.
pub fn app(state: AppState) -> Router {
    routes::router(state)
}
