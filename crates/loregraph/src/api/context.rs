//! Review attribution carried in request headers

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::LoreError;
use crate::review::WriteContext;

/// Names the session a write is attributed to
pub const SESSION_HEADER: &str = "x-review-session";

/// `untracked` disables snapshotting, `auto` is the default
pub const MODE_HEADER: &str = "x-review-mode";

/// [`WriteContext`] extracted from the review headers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewContext(pub WriteContext);

fn header_str<'a>(parts: &'a Parts, name: &str) -> std::result::Result<Option<&'a str>, LoreError> {
    match parts.headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|s| Some(s.trim()))
            .map_err(|_| LoreError::validation(format!("header {name} is not valid text"))),
    }
}

impl ReviewContext {
    pub fn from_parts(parts: &Parts) -> std::result::Result<Self, LoreError> {
        let mode = header_str(parts, MODE_HEADER)?.map(str::to_ascii_lowercase);
        match mode.as_deref() {
            None | Some("") | Some("auto") => {}
            Some("untracked") => return Ok(Self(WriteContext::Untracked)),
            Some(other) => {
                return Err(LoreError::validation(format!(
                    "invalid {MODE_HEADER} '{other}', expected auto or untracked"
                )));
            }
        }

        match header_str(parts, SESSION_HEADER)? {
            Some(session) if !session.is_empty() => {
                Ok(Self(WriteContext::Session(session.to_string())))
            }
            _ => Ok(Self(WriteContext::Auto)),
        }
    }
}

impl<S> FromRequestParts<S> for ReviewContext
where
    S: Send + Sync,
{
    type Rejection = LoreError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> std::result::Result<Self, Self::Rejection> {
        Self::from_parts(parts)
    }
}
