//! Server-side services: key derivation, part sizing, the object-store seam
//! and the upload protocol built on top of it.

pub mod blob_store;
pub mod keys;
pub mod local_store;
pub mod part_size;
pub mod s3_store;
pub mod upload_service;
