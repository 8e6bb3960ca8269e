use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors thay may occur when serving requests or loading configuration.
///
/// Device level problems are not part of this type, see [`crate::serial::error`].
#[derive(Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum Error {
    /// Bad json.
    #[error("The request `{request}` could not be deserialized. Problem: {problem}")]
    BadJson {
        /// The problematic request.
        request: String,

        /// The deserialization issue.
        problem: String,
    },

    /// The command token was not something we can put on the wire.
    #[error("Bad command. Problem: `{0}`")]
    BadCommand(String),

    /// The configuration is not valid.
    #[error("Bad configuration. Problem: `{0}`")]
    BadConfig(String),

    /// Something went wrong on our side.
    #[error("Internal issue: `{0}`")]
    InternalIssue(String),
}

impl Error {
    /// Parse a json request body, keeping the offending body around if it fails.
    pub(crate) fn parse_json<'a, T: Deserialize<'a>>(request: &'a str) -> Result<T, Self> {
        serde_json::from_str(request).map_err(|e| Self::BadJson {
            request: request.to_owned(),
            problem: e.to_string(),
        })
    }

    /// Unwrap the error as a configuration problem.
    pub fn try_into_bad_config(self) -> Result<String, Self> {
        if let Self::BadConfig(v) = self {
            Ok(v)
        } else {
            Err(self)
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Error::BadJson { .. } | Error::BadCommand(_) => StatusCode::BAD_REQUEST,
            Error::BadConfig(_) | Error::InternalIssue(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        (self.status(), Json(self)).into_response()
    }
}
