use anyhow::{anyhow, Context};
use serde_json::json;

use crate::ChangesetId;

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Bad user input: {0}")]
    BadUserInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("The changeset {0} is not yet closed")]
    ChangesetNotYetClosed(ChangesetId),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Edits must be public to upload new data")]
    DataNotPublic,

    #[error("The API is in read-only mode")]
    ApiReadOnly,

    #[error("Id already used {0}")]
    IdAlreadyUsed(i64),

    #[error("Name already used {0}")]
    NameAlreadyUsed(String),

    #[error("Null byte in string is not allowed {0:?}")]
    NullByteInString(String),

    #[error("Invalid character in name {0:?}")]
    InvalidName(String),
}

impl Error {
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::PermissionDenied => StatusCode::FORBIDDEN,
            Error::BadUserInput(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::ChangesetNotYetClosed(_) => StatusCode::CONFLICT,
            Error::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Error::DataNotPublic => StatusCode::FORBIDDEN,
            Error::ApiReadOnly => StatusCode::SERVICE_UNAVAILABLE,
            Error::IdAlreadyUsed(_) => StatusCode::CONFLICT,
            Error::NameAlreadyUsed(_) => StatusCode::CONFLICT,
            Error::NullByteInString(_) => StatusCode::BAD_REQUEST,
            Error::InvalidName(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        serde_json::to_vec(&match self {
            Error::Unknown(msg) => json!({
                "message": msg,
                "type": "unknown",
            }),
            Error::PermissionDenied => json!({
                "message": "permission denied",
                "type": "permission-denied",
            }),
            Error::BadUserInput(msg) => json!({
                "message": msg,
                "type": "bad-user-input",
            }),
            Error::NotFound(what) => json!({
                "message": "not found",
                "type": "not-found",
                "what": what,
            }),
            Error::ChangesetNotYetClosed(id) => json!({
                "message": "changeset is not yet closed",
                "type": "changeset-not-yet-closed",
                "changeset": id.0,
            }),
            Error::RateLimitExceeded => json!({
                "message": "too many changeset comments in the last hour",
                "type": "rate-limit-exceeded",
            }),
            Error::DataNotPublic => json!({
                "message": "you must make your edits public to upload new data",
                "type": "data-not-public",
            }),
            Error::ApiReadOnly => json!({
                "message": "the api is in read-only mode",
                "type": "api-read-only",
            }),
            Error::IdAlreadyUsed(id) => json!({
                "message": "id conflict",
                "type": "conflict-id",
                "id": id,
            }),
            Error::NameAlreadyUsed(n) => json!({
                "message": "name already used",
                "type": "conflict-name",
                "name": n,
            }),
            Error::NullByteInString(s) => json!({
                "message": "there was a null byte in argument string",
                "type": "null-byte",
                "string": s,
            }),
            Error::InvalidName(n) => json!({
                "message": "there was an invalid character in a user name",
                "type": "invalid-name",
                "name": n,
            }),
        })
        .expect("serializing error contents")
    }

    pub fn parse(body: &[u8]) -> anyhow::Result<Error> {
        let data: serde_json::Value =
            serde_json::from_slice(body).context("parsing error contents")?;
        macro_rules! string_field {
            ($field:literal, $what:literal) => {
                String::from(
                    data.get($field)
                        .and_then(|s| s.as_str())
                        .ok_or_else(|| anyhow!(concat!("error is ", $what, " without a ", $field)))?,
                )
            };
        }
        macro_rules! int_field {
            ($field:literal, $what:literal) => {
                data.get($field)
                    .and_then(|i| i.as_i64())
                    .ok_or_else(|| anyhow!(concat!("error is ", $what, " without a proper ", $field)))?
            };
        }
        Ok(
            match data
                .get("type")
                .and_then(|t| t.as_str())
                .ok_or_else(|| anyhow!("error type is not a string"))?
            {
                "unknown" => Error::Unknown(String::from(
                    data.get("message")
                        .and_then(|msg| msg.as_str())
                        .unwrap_or(""),
                )),
                "permission-denied" => Error::PermissionDenied,
                "bad-user-input" => Error::BadUserInput(string_field!("message", "a bad input")),
                "not-found" => Error::NotFound(string_field!("what", "a not-found")),
                "changeset-not-yet-closed" => Error::ChangesetNotYetClosed(ChangesetId(
                    int_field!("changeset", "a not-yet-closed changeset"),
                )),
                "rate-limit-exceeded" => Error::RateLimitExceeded,
                "data-not-public" => Error::DataNotPublic,
                "api-read-only" => Error::ApiReadOnly,
                "conflict-id" => Error::IdAlreadyUsed(int_field!("id", "an id conflict")),
                "conflict-name" => Error::NameAlreadyUsed(string_field!("name", "a name conflict")),
                "null-byte" => {
                    Error::NullByteInString(string_field!("string", "a null-byte-in-string"))
                }
                "invalid-name" => Error::InvalidName(string_field!("name", "an invalid name")),
                _ => return Err(anyhow!("error contents has unknown type")),
            },
        )
    }
}
