//! Request extractors.
//!
//! The gateway authenticates the session and sets `x-user-id` and
//! `x-user-role`. Protected routes take `Caller`; public routes take
//! `MaybeCaller` and work without the headers.
//!
//! `ApiJson`, `ApiPath`, `ApiQuery` and `OptionalJson` wrap axum's extractors
//! so malformed input is answered with the usual error body.

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Request},
    http::request::Parts,
    http::HeaderMap,
};
use challenge_market_core::UserId;
use serde::de::DeserializeOwned;

use crate::api::errors::ApiError;
use crate::auth::{Principal, Role};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, ApiError> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(Some)
            .map_err(|_| ApiError::Unauthorized(format!("invalid {} header", name))),
    }
}

/// `None` when neither header is present
pub fn principal_from_headers(headers: &HeaderMap) -> Result<Option<Principal>, ApiError> {
    let user_id = header(headers, USER_ID_HEADER)?;
    let role = header(headers, USER_ROLE_HEADER)?;

    match (user_id, role) {
        (None, None) => Ok(None),
        (Some(user_id), Some(role)) => {
            let user_id: UserId = user_id
                .trim()
                .parse()
                .map_err(|_| ApiError::Unauthorized(format!("invalid {} header", USER_ID_HEADER)))?;
            let role: Role = role.parse().map_err(|_| {
                ApiError::Unauthorized(format!("invalid {} header", USER_ROLE_HEADER))
            })?;
            Ok(Some(Principal { user_id, role }))
        }
        _ => Err(ApiError::Unauthorized(format!(
            "both {} and {} headers are required",
            USER_ID_HEADER, USER_ROLE_HEADER
        ))),
    }
}

/// Authenticated caller; rejects the request with 401 otherwise
pub struct Caller(pub Principal);

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        principal_from_headers(&parts.headers)?
            .map(Caller)
            .ok_or_else(|| ApiError::Unauthorized("authentication required".to_string()))
    }
}

/// Optional caller for public routes
pub struct MaybeCaller(pub Option<Principal>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeCaller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeCaller(principal_from_headers(&parts.headers)?))
    }
}

// ============================================================================
// BODY, PATH AND QUERY
// ============================================================================

#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

/// JSON body that may be left out entirely; a body that is present must parse
pub struct OptionalJson<T>(pub Option<T>);

#[async_trait]
impl<T, S> FromRequest<S> for OptionalJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state).await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(OptionalJson(None));
        }
        serde_json::from_slice(&bytes)
            .map(|value| OptionalJson(Some(value)))
            .map_err(|e| ApiError::bad_request(format!("invalid JSON body: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_headers_parse_into_principal() {
        let user_id = UserId::new();
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_ID_HEADER,
            HeaderValue::from_str(&user_id.to_string()).unwrap(),
        );
        headers.insert(USER_ROLE_HEADER, HeaderValue::from_static("entrepreneur"));

        let principal = principal_from_headers(&headers).unwrap().unwrap();
        assert_eq!(principal, Principal::entrepreneur(user_id));
    }

    #[test]
    fn test_missing_headers_is_anonymous() {
        assert!(principal_from_headers(&HeaderMap::new()).unwrap().is_none());
    }

    #[test]
    fn test_half_identity_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ROLE_HEADER, HeaderValue::from_static("client"));
        assert!(principal_from_headers(&headers).is_err());
    }

    #[test]
    fn test_bad_user_id_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("not-a-uuid"));
        headers.insert(USER_ROLE_HEADER, HeaderValue::from_static("client"));
        assert!(matches!(
            principal_from_headers(&headers),
            Err(ApiError::Unauthorized(_))
        ));
    }
}
