//! Errors reported to callers of explicit requests.
//!
//! Server-reported conditions (missing config, missing library) never show up
//! here; they become status. Only a request that could not complete does.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("not connected to the lint server")]
    NotConnected,
    #[error("connection to the lint server closed")]
    ChannelClosed,
    #[error("request {method} timed out")]
    TimedOut { method: &'static str },
    #[error("server error {code}: {message}")]
    Server { code: i64, message: String },
    #[error("server returned no result for {method}")]
    EmptyResult { method: &'static str },
    #[error("could not decode {method} response: {reason}")]
    Decode {
        method: &'static str,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StartError {
    #[error("client is already {0}")]
    AlreadyStarted(&'static str),
    #[error("server stopped before it became ready: {0}")]
    Stopped(String),
    #[error("readiness was abandoned")]
    Abandoned,
}
