//! Routes backing the in-process store: the targets of its presigned URLs.
//!
//! - `PUT /local/{*key}` accepts a single object or one part, answers with the
//!   part's `ETag` header.
//! - `GET /local/{*key}` serves completed objects at their public URL.

use crate::{
    errors::AppError,
    services::local_store::{LocalBlobStore, LocalPutQuery, StoredObject},
    state::AppState,
};
use axum::{
    body::Body,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use bytes::BytesMut;
use futures::TryStreamExt;

fn local_store(state: &AppState) -> Result<&LocalBlobStore, AppError> {
    state
        .local
        .as_ref()
        .ok_or_else(|| AppError::not_found("local store is not enabled"))
}

/// Upload bytes to a local presigned URL.
pub async fn put_local(
    State(state): State<AppState>,
    Path(key): Path<String>,
    query: Result<Query<LocalPutQuery>, QueryRejection>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let store = local_store(&state)?;
    let Query(query) = query.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let bytes = body
        .into_data_stream()
        .try_fold(BytesMut::new(), |mut acc, chunk| async move {
            acc.extend_from_slice(&chunk);
            Ok(acc)
        })
        .await
        .map_err(|err| AppError::bad_request(format!("reading body: {}", err)))?
        .freeze();

    let etag = store
        .accept_put(&key, &query, content_type.as_deref(), bytes)
        .await?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    if let Ok(value) = HeaderValue::from_str(&etag) {
        response.headers_mut().insert(header::ETAG, value);
    }
    Ok(response)
}

/// Download a completed object.
pub async fn get_local(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let store = local_store(&state)?;
    let object = store.get_object(&key).await?;

    let mut headers = HeaderMap::new();
    set_object_headers(&mut headers, &object);

    let mut response = Response::new(Body::from(object.bytes));
    *response.status_mut() = StatusCode::OK;
    *response.headers_mut() = headers;
    Ok(response)
}

fn set_object_headers(headers: &mut HeaderMap, object: &StoredObject) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&object.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(object.bytes.len()));
    if let Ok(value) = HeaderValue::from_str(&object.etag) {
        headers.insert(header::ETAG, value);
    }
    if let Ok(value) = HeaderValue::from_str(&object.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
