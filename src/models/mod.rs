//! Data models for the resumable upload service.
//!
//! `upload` holds the wire bodies of the HTTP surface, `multipart` the parts
//! reported by the store, and `session` the client-side resume hint. All of
//! them serialize as camelCase JSON via `serde`.

pub mod multipart;
pub mod session;
pub mod upload;
