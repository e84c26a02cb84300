//! One-shot notifications carried across a redirect-after-POST.
//!
//! A POST handler answers `302 Found` with the notification stored in the
//! `flash` cookie (base64url-encoded JSON). The next page render reads it
//! through [`PendingFlashes`], shows it once and expires the cookie.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;

pub const FLASH_COOKIE: &str = "flash";
/// Keeps the cookie well under the 4 KiB browser limit.
const MAX_MESSAGE_CHARS: usize = 1_500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashLevel {
    Success,
    Warning,
    Danger,
}

impl FlashLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlashLevel::Success => "success",
            FlashLevel::Warning => "warning",
            FlashLevel::Danger => "danger",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    pub level: FlashLevel,
    pub message: String,
}

impl Flash {
    pub fn new(level: FlashLevel, message: impl Into<String>) -> Self {
        let mut message: String = message.into();
        if message.chars().count() > MAX_MESSAGE_CHARS {
            message = message.chars().take(MAX_MESSAGE_CHARS).collect::<String>() + "…";
        }
        Self { level, message }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(FlashLevel::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(FlashLevel::Warning, message)
    }

    pub fn danger(message: impl Into<String>) -> Self {
        Self::new(FlashLevel::Danger, message)
    }
}

pub fn encode(flashes: &[Flash]) -> String {
    // Serializing plain structs of strings cannot fail.
    let json = serde_json::to_vec(flashes).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

/// Tampered or stale cookies decode to nothing rather than an error.
pub fn decode(value: &str) -> Vec<Flash> {
    URL_SAFE_NO_PAD
        .decode(value.trim())
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .unwrap_or_default()
}

/// `302 Found` to `location`, carrying `flash` for the next page.
pub fn redirect_with(location: &'static str, flash: Flash) -> Response {
    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax",
        FLASH_COOKIE,
        encode(std::slice::from_ref(&flash))
    );
    let mut resp = found(location);
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        resp.headers_mut().insert(header::SET_COOKIE, value);
    }
    resp
}

/// Plain `302 Found` redirect.
pub fn found(location: &'static str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

/// Notifications waiting for this request, read from the `flash` cookie.
#[derive(Debug, Default)]
pub struct PendingFlashes {
    pub flashes: Vec<Flash>,
    cookie_present: bool,
}

impl PendingFlashes {
    /// Add a notification raised while rendering the current page.
    pub fn push(&mut self, flash: Flash) {
        self.flashes.push(flash);
    }

    /// Render `html`, expiring the flash cookie if one was consumed.
    pub fn render(&self, html: String) -> Response {
        let mut resp = Html(html).into_response();
        if self.cookie_present {
            resp.headers_mut().insert(
                header::SET_COOKIE,
                HeaderValue::from_static("flash=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax"),
            );
        }
        resp
    }
}

fn cookie_value<'a>(header_value: &'a str, name: &str) -> Option<&'a str> {
    header_value.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then_some(value)
    })
}

impl<S: Send + Sync> FromRequestParts<S> for PendingFlashes {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|v| cookie_value(v, FLASH_COOKIE));

        Ok(match raw {
            Some(value) => PendingFlashes {
                flashes: decode(value),
                cookie_present: true,
            },
            None => PendingFlashes::default(),
        })
    }
}
