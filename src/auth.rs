use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::{Authorization, HeaderMapExt};
use serde::Deserialize;

use crate::AppState;
use crate::error::{ApiError, BookingError};
use crate::handlers::blocking;
use crate::models::Actor;
use crate::settings::Settings;

pub const USER_HEADER: &str = "x-user-id";

pub fn verify_token(
    settings: &Settings,
    auth: Option<Authorization<Bearer>>,
    query_token: Option<&str>,
) -> Result<(), ApiError> {
    let provided_token = auth
        .map(|a| a.token().to_string())
        .or_else(|| query_token.map(|s| s.to_string()));
    match provided_token {
        Some(token) if token == settings.auth_token => Ok(()),
        _ => Err(ApiError::Unauthorized(
            "Invalid authentication token".into(),
        )),
    }
}

#[derive(Debug, Default, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// The studio user behind a request: a valid API token plus an
/// `X-User-Id` header naming an active user.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Actor);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let bearer = parts.headers.typed_get::<Authorization<Bearer>>();
        let query = Query::<TokenQuery>::try_from_uri(&parts.uri)
            .map(|Query(q)| q)
            .unwrap_or_default();
        verify_token(&state.settings, bearer, query.token.as_deref())?;

        let user_id = parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("Missing X-User-Id header".into()))?;

        let user_id = user_id.to_string();
        let lookup = user_id.clone();
        let actor = blocking(&state.studio, move |studio| match studio.actor(&lookup) {
            Ok(actor) => Ok(Some(actor)),
            Err(BookingError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        })
        .await?;
        actor
            .map(CurrentUser)
            .ok_or_else(|| ApiError::Unauthorized(format!("Unknown user {user_id}")))
    }
}
