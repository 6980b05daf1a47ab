//! Crate-level error type.
//!
//! Distinct from the asynchronous `Message::Error` reports the dispatcher delivers
//! through the receive queue (see [`crate::message`]): `EdgeError` covers calls the
//! façade rejects synchronously, before anything is ever dispatched.

use thiserror::Error;

/// Synchronous error returned directly from a façade or registry call.
#[derive(Error, Debug)]
pub enum EdgeError {
    #[error("endpoint uri `{0}` could not be parsed")]
    InvalidEndpointUri(String),

    #[error("a session for `{0}` is already connected")]
    AlreadyConnected(String),

    #[error("no session found for `{0}`")]
    NoSuchSession(String),

    #[error("underlying connect attempt failed: {0}")]
    ConnectFailed(String),

    #[error("browse request exceeded the maximum batch size ({0} > {1})")]
    BrowseRequestTooLarge(usize, usize),

    #[error("subscription alias `{0}` is a duplicate within the request batch")]
    DuplicateAlias(String),

    #[error("subscription alias `{0}` already exists on this session")]
    AliasAlreadyExists(String),

    #[error("no subscription found for alias `{0}`")]
    NoSuchSubscription(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type EdgeResult<T> = Result<T, EdgeError>;
