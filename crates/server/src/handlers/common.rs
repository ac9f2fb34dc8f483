//! Shared handler helpers.

use crate::error::{ApiError, ApiResult};
use axum::http::HeaderMap;
use stowage_core::OwnerId;

/// Header carrying the caller's user id. Authentication happens upstream;
/// this service trusts the value it is given.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Header carrying the client-generated idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "x-idempotency-key";

/// Optional header linking an upload to an external workflow.
pub const SAGA_ID_HEADER: &str = "x-saga-id";

/// Read a header as UTF-8 text, if present.
pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> ApiResult<Option<&'a str>> {
    headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map(str::trim)
                .map_err(|_| ApiError::BadRequest(format!("{name} header is not valid text")))
        })
        .transpose()
}

/// Read a header that must be present.
pub fn required_header<'a>(headers: &'a HeaderMap, name: &str) -> ApiResult<&'a str> {
    header_str(headers, name)?
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("missing {name} header")))
}

/// Resolve the calling owner from the request headers.
pub fn owner_from_headers(headers: &HeaderMap) -> ApiResult<OwnerId> {
    Ok(OwnerId::parse(required_header(headers, USER_ID_HEADER)?)?)
}
