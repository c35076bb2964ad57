use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;

use crate::error::AppError;

pub const SESSION_COOKIE: &str = "session";

/// Token from the `session` cookie. Rejects with a redirect to the login page.
pub struct SessionCookie(pub String);

impl<S> FromRequestParts<S> for SessionCookie
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(header::COOKIE)
            .ok_or(AppError::LoginRequired)?
            .to_str()
            .map_err(|_| AppError::LoginRequired)?;

        let token = value
            .split(';')
            .find_map(|c| c.trim().strip_prefix("session="))
            .filter(|t| !t.is_empty())
            .ok_or(AppError::LoginRequired)?;

        Ok(SessionCookie(token.to_string()))
    }
}

pub fn set_session_cookie(token: &str) -> String {
    format!("{}={}; HttpOnly; SameSite=Strict; Path=/", SESSION_COOKIE, token)
}

pub fn clear_session_cookie() -> String {
    format!("{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0", SESSION_COOKIE)
}
