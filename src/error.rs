//! Error taxonomy for the bot.
//!
//! Transport and protocol failures are fatal and tear the session down.
//! Parse failures are recovered locally (the offending frame is logged and
//! dropped). Provider/command failures never leave the response pipeline:
//! a fixed apology is sent to the room instead.

use thiserror::Error;

/// Failures at the WebSocket layer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket connect failed: {0}")]
    Connect(String),
    #[error("websocket send failed: {0}")]
    Send(String),
    #[error("websocket receive failed: {0}")]
    Receive(String),
    /// The peer closed the connection (or we did). Unblocks any pending
    /// receive; the session's only cancellation primitive.
    #[error("connection closed")]
    Closed,
}

/// Fatal session failures: transport loss or an unexpected handshake reply.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("protocol error while {state}: {detail}")]
    Protocol { state: &'static str, detail: String },
}

/// A frame that could not be decoded as a stanza. Non-fatal.
#[derive(Debug, Error)]
#[error("failed to parse stanza: {0}")]
pub struct ParseError(pub String);

/// Generative-provider failures. Contained inside the responder.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("provider response carried no content")]
    EmptyResponse,
}

/// Top-level error for `main`.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Session(#[from] SessionError),
}
