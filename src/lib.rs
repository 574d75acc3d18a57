//! Resumable large-object uploads to S3-compatible storage.
//!
//! The server half (`services`, `handlers`, `routes`) issues presigned URLs
//! and finalizes multipart uploads without holding any per-upload state. The
//! client half (`client`) drives a file through that protocol, resuming from
//! whatever the store already holds.

pub mod client;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

use axum::Router;

/// The complete HTTP application for `state`.
pub fn app(state: state::AppState) -> Router {
    routes::routes::routes(&state.cors_origins).with_state(state)
}
