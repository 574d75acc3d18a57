pub mod health_handlers;
pub mod local_handlers;
pub mod upload_handlers;
