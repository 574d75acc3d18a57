//! Route table for the upload API.
//!
//! ## Structure
//! - **Upload protocol**
//!   - `POST /presign`: plan an upload (single PUT or new multipart upload)
//!   - `POST /multipart/sign-part`: presign one part
//!   - `GET  /multipart/list-parts?key=&uploadId=`: committed parts
//!   - `POST /multipart/complete`: stitch parts into the object
//!   - `POST /multipart/abort`: discard an upload
//!
//! - **Local store** (only answers when the in-process store is active)
//!   - `PUT /local/{*key}`: presigned upload target
//!   - `GET /local/{*key}`: public URL of completed objects
//!
//! Every route sits behind a CORS layer so browser clients can call the API
//! and read `ETag` from part uploads.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        local_handlers::{get_local, put_local},
        upload_handlers::{abort, complete, list_parts, presign, sign_part},
    },
    services::local_store::LOCAL_ROUTE_PREFIX,
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    routing::{get, post, put},
};
use tower_http::cors::{Any, CorsLayer};

/// Parts can be up to 5 GiB; the local store buffers them in memory, so cap
/// what it accepts per request.
const LOCAL_BODY_LIMIT: usize = 1024 * 1024 * 1024;

pub fn routes(cors_origins: &[String]) -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/presign", post(presign))
        .route("/multipart/sign-part", post(sign_part))
        .route("/multipart/list-parts", get(list_parts))
        .route("/multipart/complete", post(complete))
        .route("/multipart/abort", post(abort))
        .route(
            &format!("/{}/{{*key}}", LOCAL_ROUTE_PREFIX),
            put(put_local)
                .get(get_local)
                .layer(DefaultBodyLimit::max(LOCAL_BODY_LIMIT)),
        )
        .layer(cors_layer(cors_origins))
}

/// CORS for browser uploads: JSON calls to the API and `Content-Type` PUTs
/// to presigned URLs, with `ETag` readable from the response.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .expose_headers([header::ETAG]);

    if origins.iter().any(|o| o == "*") {
        return cors.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    cors.allow_origin(origins)
}
