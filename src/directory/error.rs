use thiserror::Error;

/// Errors returned by the access-directory client.
///
/// Transport failures (connect, timeout) are kept apart from responses the
/// server did send with a non-success status.
#[derive(Error, Debug)]
pub enum DirectoryError {
    /// Connection refused, DNS failure, timeout, ...
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Credential exchange rejected or bearer token refused
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("User not found: {username}")]
    NotFound { username: String },

    /// Non-success status with a decodable `{error, message}` body
    #[error("{error}: {message} (HTTP {status})")]
    Api {
        status: u16,
        error: String,
        message: String,
    },

    /// Non-success status with an opaque body
    #[error("API error: {body} (HTTP {status})")]
    Status { status: u16, body: String },

    #[error("Failed to decode {context}: {message}")]
    Decode {
        context: &'static str,
        message: String,
        body: String,
    },
}

impl DirectoryError {
    /// Returns `true` for connection and timeout failures.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns `true` if the identity (or resource) does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Api { status, .. } | Self::Status { status, .. } => *status == 404,
            _ => false,
        }
    }

    /// Returns `true` if the server refused our credentials.
    pub fn is_auth(&self) -> bool {
        match self {
            Self::Authentication { .. } => true,
            Self::Api { status, .. } | Self::Status { status, .. } => {
                *status == 401 || *status == 403
            }
            _ => false,
        }
    }

    /// HTTP status of a rejected request, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } | Self::Status { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
