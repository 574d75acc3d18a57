//! HTTP handlers for the upload protocol.
//!
//! Thin adapters: decode the JSON or query body, call `UploadService`, and
//! let `AppError` map failures to status codes. Rejected extractors are
//! turned into the same `{"error", "status"}` body as every other failure.

use crate::{
    errors::AppError,
    models::upload::{
        AbortRequest, AbortResponse, CompleteRequest, CompleteResponse, ListPartsQuery,
        ListPartsResponse, PresignRequest, PresignResponse, SignPartRequest, SignPartResponse,
    },
    state::AppState,
};
use axum::{
    Json,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
};

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::bad_request(rejection.body_text()))
}

/// `POST /presign`
pub async fn presign(
    State(state): State<AppState>,
    payload: Result<Json<PresignRequest>, JsonRejection>,
) -> Result<Json<PresignResponse>, AppError> {
    let req = json_body(payload)?;
    Ok(Json(state.uploads.presign(&req).await?))
}

/// `POST /multipart/sign-part`
pub async fn sign_part(
    State(state): State<AppState>,
    payload: Result<Json<SignPartRequest>, JsonRejection>,
) -> Result<Json<SignPartResponse>, AppError> {
    let req = json_body(payload)?;
    Ok(Json(state.uploads.sign_part(&req).await?))
}

/// `GET /multipart/list-parts?key=&uploadId=`
pub async fn list_parts(
    State(state): State<AppState>,
    query: Result<Query<ListPartsQuery>, QueryRejection>,
) -> Result<Json<ListPartsResponse>, AppError> {
    let Query(query) = query.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    Ok(Json(
        state.uploads.list_parts(&query.key, &query.upload_id).await?,
    ))
}

/// `POST /multipart/complete`
pub async fn complete(
    State(state): State<AppState>,
    payload: Result<Json<CompleteRequest>, JsonRejection>,
) -> Result<Json<CompleteResponse>, AppError> {
    let req = json_body(payload)?;
    Ok(Json(state.uploads.complete(&req).await?))
}

/// `POST /multipart/abort`
pub async fn abort(
    State(state): State<AppState>,
    payload: Result<Json<AbortRequest>, JsonRejection>,
) -> Result<Json<AbortResponse>, AppError> {
    let req = json_body(payload)?;
    Ok(Json(state.uploads.abort(&req).await?))
}
