//! Error taxonomy shared by the Plex, filmography and authorization clients.

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Which flavour of network failure a transport error was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Host unreachable, connection refused, or no network at all.
    CannotConnect,
    TimedOut,
    /// The connection dropped while the request or body was in flight.
    ConnectionLost,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportKind::CannotConnect => "cannot connect to host",
            TransportKind::TimedOut => "timed out",
            TransportKind::ConnectionLost => "connection lost",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A URL could not be built from configuration. Points at a programming
    /// or configuration mistake rather than anything the server did.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("network error ({kind}): {message}")]
    Transport { kind: TransportKind, message: String },

    /// HTTP 401. The token is invalid or expired.
    #[error("authorization failed")]
    Unauthorized,

    /// Server-side rejection (422) carrying a message meant for the user.
    #[error("{0}")]
    Validation(String),

    #[error("server returned HTTP {status}: {message}")]
    Server { status: u16, message: String },

    #[error("failed to decode {endpoint}: {detail}")]
    Decode { endpoint: String, detail: String },

    /// The XML envelope was missing, truncated or malformed.
    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("{provider} does not support {operation}")]
    Unsupported {
        provider: &'static str,
        operation: &'static str,
    },

    #[error("operation cancelled")]
    Cancelled,

    /// A newer request for the same resource replaced this one.
    #[error("request superseded by a newer one")]
    Superseded,

    #[error("login not authorized after {attempts} attempts")]
    PinTimedOut { attempts: u32 },
}

impl Error {
    pub fn transport(kind: TransportKind, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
        }
    }

    pub fn decode(endpoint: impl Into<String>, detail: impl fmt::Display) -> Self {
        Self::Decode {
            endpoint: endpoint.into(),
            detail: detail.to_string(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Only network-level failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transport { .. })
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Unauthorized)
    }

    /// Short message suitable for showing to the end user. Decode detail and
    /// raw payloads stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Error::InvalidUrl(_) => "The server address is not valid.".to_string(),
            Error::Transport { .. } => {
                "Could not reach the server. Check your connection and try again.".to_string()
            }
            Error::Unauthorized => "Your session has expired. Please sign in again.".to_string(),
            Error::Validation(message) => message.clone(),
            Error::Server { status, .. } => format!("The server returned an error ({status})."),
            Error::Decode { .. } | Error::Parse(_) => {
                "The server sent a response that could not be read.".to_string()
            }
            Error::Unsupported { .. } => {
                "This lookup is not available with the current provider.".to_string()
            }
            Error::Cancelled | Error::Superseded => "The request was cancelled.".to_string(),
            Error::PinTimedOut { .. } => "Sign-in timed out. Please try again.".to_string(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        // Plex URLs carry the token in the query string.
        let err = err.without_url();
        let kind = if err.is_timeout() {
            TransportKind::TimedOut
        } else if err.is_connect() {
            TransportKind::CannotConnect
        } else if err.is_builder() {
            return Error::InvalidUrl(err.to_string());
        } else {
            TransportKind::ConnectionLost
        };
        Error::transport(kind, err.to_string())
    }
}

/// Map a non-success HTTP status and its body onto the taxonomy.
pub(crate) fn status_error(status: reqwest::StatusCode, body: &str) -> Error {
    match status.as_u16() {
        401 => Error::Unauthorized,
        422 => Error::Validation(validation_message(body)),
        code => Error::Server {
            status: code,
            message: truncate(body, 200),
        },
    }
}

/// 422 bodies are usually JSON with a `message` or `error` field; fall back to
/// the raw text.
fn validation_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("error"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| truncate(body, 200))
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
