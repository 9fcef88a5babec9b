//! Request extraction helpers shared by the handlers

use crate::error::AppError;
use crate::models::{Actor, TableKind};
use axum::extract::{FromRequestParts, Multipart};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::body::Bytes;

/// Acting user, set by the upstream auth proxy
pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

const DEFAULT_USER_ID: &str = "system";
const DEFAULT_USER_ROLE: &str = "admin";

/// Multipart field carrying the uploaded document
const FILE_FIELD: &str = "file";

fn header_or(headers: &HeaderMap, name: &str, default: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
        .to_string()
}

impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Actor::new(
            header_or(&parts.headers, USER_ID_HEADER, DEFAULT_USER_ID),
            header_or(&parts.headers, USER_ROLE_HEADER, DEFAULT_USER_ROLE),
        ))
    }
}

/// Resolve a `{table}` path segment
pub fn parse_table(name: &str) -> Result<TableKind, AppError> {
    name.parse().map_err(AppError::BadRequest)
}

/// Read the `file` field of a multipart upload, skipping any other fields
pub async fn read_upload(mut multipart: Multipart) -> Result<(Option<String>, Bytes), AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read upload: {}", e)))?;
        return Ok((file_name, bytes));
    }
    Err(AppError::BadRequest(format!(
        "Multipart field '{}' is required",
        FILE_FIELD
    )))
}
