use crate::protocol::mac::InvalidMac;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CloudApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("API returned code {code}: {msg}")]
    Api { code: i64, msg: String },
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("not logged in")]
    NotLoggedIn,
    #[error("Unable to deserialize response: {source}. Body was: \"{body}\"")]
    Deserialize {
        source: serde_json::Error,
        body: String,
    },
    #[error("response is missing {0}")]
    Missing(&'static str),
    #[error(transparent)]
    InvalidMac(#[from] InvalidMac),
}
