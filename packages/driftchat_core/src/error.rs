//! Error taxonomy for the realtime core.
//!
//! Nothing in this crate is fatal: transport and API failures fold into
//! recorded state (connection health, store error fields) and every
//! async operation resolves into a `Result` the caller can observe.

use reqwest::StatusCode;
use thiserror::Error;

/// Failure talking to the REST collaborator.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("server is unavailable")]
    Unavailable,

    /// The backend answered with an error status. `message` is the
    /// human-readable text from the `{"message": "..."}` error body,
    /// or a generic fallback when the body is not in that shape.
    #[error("{message}")]
    Server { status: StatusCode, message: String },

    #[error(transparent)]
    Http(reqwest::Error),
}

impl ApiError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Unavailable
        } else {
            Self::Http(err)
        }
    }
}

/// The realtime transport could not be constructed. Connection-level
/// failures after construction surface as channel events, not errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid socket URL: {0}")]
    InvalidUrl(String),
}

/// Synchronous and asynchronous rejections from `MessageStore::send`.
///
/// The precondition variants are raised before any network call and are
/// not recorded as sticky store state; `Api` is also written to the
/// store's message-area error field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("no conversation selected")]
    NoActiveConversation,

    #[error("message is empty")]
    EmptyPayload,

    /// A send is already in flight; the caller must wait and retry.
    /// Sends are rejected, never queued.
    #[error("a send is already in flight")]
    InFlight,

    #[error("{0}")]
    Api(String),
}

/// Top-level construction error for `ChatContext`.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
