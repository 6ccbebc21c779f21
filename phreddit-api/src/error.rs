use std::str::FromStr;

use anyhow::{anyhow, Context};
use serde_json::json;
use uuid::Uuid;

use crate::Time;

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Reputation {reputation} is below the required {required}")]
    ReputationTooLow { reputation: i64, required: i64 },

    #[error("Not found {0}")]
    NotFound(Uuid),

    #[error("Uuid already used {0}")]
    UuidAlreadyUsed(Uuid),

    #[error("Name already used {0}")]
    NameAlreadyUsed(String),

    #[error("Email already used {0}")]
    EmailAlreadyUsed(String),

    #[error("Null byte in string is not allowed {0:?}")]
    NullByteInString(String),

    #[error("Field {0} must not be empty")]
    EmptyString(String),

    #[error("Field {field} is longer than {max} characters")]
    StringTooLong { field: String, max: usize },

    #[error("Invalid character in name {0:?}")]
    InvalidName(String),

    #[error("Invalid email address {0:?}")]
    InvalidEmail(String),

    #[error("Password and verification do not match")]
    PasswordMismatch,

    #[error("Time is out of the supported range {0}")]
    TimeOutOfRange(Time),

    #[error("Parent comment {0} is not part of this post")]
    ParentNotInPost(Uuid),
}

impl Error {
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::PermissionDenied => StatusCode::FORBIDDEN,
            Error::ReputationTooLow { .. } => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::UuidAlreadyUsed(_) => StatusCode::CONFLICT,
            Error::NameAlreadyUsed(_) => StatusCode::CONFLICT,
            Error::EmailAlreadyUsed(_) => StatusCode::CONFLICT,
            Error::NullByteInString(_) => StatusCode::BAD_REQUEST,
            Error::EmptyString(_) => StatusCode::BAD_REQUEST,
            Error::StringTooLong { .. } => StatusCode::BAD_REQUEST,
            Error::InvalidName(_) => StatusCode::BAD_REQUEST,
            Error::InvalidEmail(_) => StatusCode::BAD_REQUEST,
            Error::PasswordMismatch => StatusCode::BAD_REQUEST,
            Error::TimeOutOfRange(_) => StatusCode::BAD_REQUEST,
            Error::ParentNotInPost(_) => StatusCode::BAD_REQUEST,
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
            Error::ReputationTooLow {
                reputation,
                required,
            } => json!({
                "message": "reputation too low",
                "type": "reputation-too-low",
                "reputation": reputation,
                "required": required,
            }),
            Error::NotFound(u) => json!({
                "message": "not found",
                "type": "not-found",
                "uuid": u,
            }),
            Error::UuidAlreadyUsed(u) => json!({
                "message": "uuid conflict",
                "type": "conflict-uuid",
                "uuid": u,
            }),
            Error::NameAlreadyUsed(n) => json!({
                "message": "name already used",
                "type": "conflict-name",
                "name": n,
            }),
            Error::EmailAlreadyUsed(e) => json!({
                "message": "email already used",
                "type": "conflict-email",
                "email": e,
            }),
            Error::NullByteInString(s) => json!({
                "message": "there was a null byte in argument string",
                "type": "null-byte",
                "string": s,
            }),
            Error::EmptyString(f) => json!({
                "message": "a required field was empty",
                "type": "empty-string",
                "field": f,
            }),
            Error::StringTooLong { field, max } => json!({
                "message": "a field was too long",
                "type": "string-too-long",
                "field": field,
                "max": max,
            }),
            Error::InvalidName(n) => json!({
                "message": "there was an invalid character in a user name",
                "type": "invalid-name",
                "name": n,
            }),
            Error::InvalidEmail(e) => json!({
                "message": "invalid email address",
                "type": "invalid-email",
                "email": e,
            }),
            Error::PasswordMismatch => json!({
                "message": "password and verification do not match",
                "type": "password-mismatch",
            }),
            Error::TimeOutOfRange(t) => json!({
                "message": "time is out of the supported range",
                "type": "time-out-of-range",
                "time": t,
            }),
            Error::ParentNotInPost(u) => json!({
                "message": "parent comment is not part of this post",
                "type": "parent-not-in-post",
                "uuid": u,
            }),
        })
        .expect("serializing error")
    }

    pub fn parse(body: &[u8]) -> anyhow::Result<Error> {
        let data: serde_json::Value =
            serde_json::from_slice(body).context("parsing error contents")?;
        let str_field = |name: &str| -> anyhow::Result<String> {
            data.get(name)
                .and_then(|s| s.as_str())
                .map(String::from)
                .ok_or_else(|| anyhow!("error is missing its {name:?} string field"))
        };
        let int_field = |name: &str| -> anyhow::Result<i64> {
            data.get(name)
                .and_then(|i| i.as_i64())
                .ok_or_else(|| anyhow!("error is missing its {name:?} integer field"))
        };
        let uuid_field = || -> anyhow::Result<Uuid> {
            Uuid::from_str(&str_field("uuid")?).context("parsing uuid field of error")
        };
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
                "reputation-too-low" => Error::ReputationTooLow {
                    reputation: int_field("reputation")?,
                    required: int_field("required")?,
                },
                "not-found" => Error::NotFound(uuid_field()?),
                "conflict-uuid" => Error::UuidAlreadyUsed(uuid_field()?),
                "conflict-name" => Error::NameAlreadyUsed(str_field("name")?),
                "conflict-email" => Error::EmailAlreadyUsed(str_field("email")?),
                "null-byte" => Error::NullByteInString(str_field("string")?),
                "empty-string" => Error::EmptyString(str_field("field")?),
                "string-too-long" => Error::StringTooLong {
                    field: str_field("field")?,
                    max: usize::try_from(int_field("max")?)
                        .context("error max length is negative")?,
                },
                "invalid-name" => Error::InvalidName(str_field("name")?),
                "invalid-email" => Error::InvalidEmail(str_field("email")?),
                "password-mismatch" => Error::PasswordMismatch,
                "time-out-of-range" => Error::TimeOutOfRange(
                    chrono::DateTime::parse_from_rfc3339(&str_field("time")?)
                        .context("parsing time field of error")?
                        .with_timezone(&chrono::Utc),
                ),
                "parent-not-in-post" => Error::ParentNotInPost(uuid_field()?),
                _ => return Err(anyhow!("error contents has unknown type")),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contents_parse_back() {
        let errors = [
            Error::Unknown(String::from("oops")),
            Error::PermissionDenied,
            Error::ReputationTooLow {
                reputation: 20,
                required: 50,
            },
            Error::NotFound(Uuid::new_v4()),
            Error::StringTooLong {
                field: String::from("content"),
                max: 500,
            },
            Error::TimeOutOfRange(crate::now()),
            Error::PasswordMismatch,
        ];
        for e in errors {
            assert_eq!(Error::parse(&e.contents()).unwrap(), e);
        }
    }

    #[test]
    fn status_codes() {
        assert_eq!(
            Error::NotFound(Uuid::new_v4()).status_code(),
            http::StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::ReputationTooLow {
                reputation: 0,
                required: 50
            }
            .status_code(),
            http::StatusCode::FORBIDDEN
        );
        assert_eq!(
            Error::EmptyString(String::from("content")).status_code(),
            http::StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(Error::parse(br#"{"type": "whatever"}"#).is_err());
        assert!(Error::parse(b"not json").is_err());
    }
}
