//! Error handling for the IAX engine
//!
//! Two kinds of failure exist in this crate. [`Error`] is returned from
//! fallible operations (parsing a datagram, allocating a call, loading
//! configuration). [`CallError`] is the sticky per-call condition that a
//! session records when the remote side goes away, and which the owning
//! channel observes through its hangup event.

use std::io;
use thiserror::Error;

/// Result type alias for IAX operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for IAX operations
#[derive(Error, Debug)]
pub enum Error {
    /// Datagram too short or otherwise unparseable
    #[error("Malformed frame: need {needed} bytes, got {actual}")]
    MalformedFrame { needed: usize, actual: usize },

    /// Every call number is in use
    #[error("Unable to accept more calls: no free call numbers")]
    NoFreeCallSlots,

    /// No live session under that call number
    #[error("No such call: {callno}")]
    SessionNotFound { callno: u16 },

    /// Dial string could not be understood
    #[error("Invalid dial string '{dial}': {reason}")]
    InvalidDialString { dial: String, reason: String },

    /// Host part of a dial string names neither a peer nor an address
    #[error("No such host: {host}")]
    UnknownHost { host: String },

    /// The call has already failed or been torn down
    #[error("Call {callno} is no longer usable: {reason}")]
    CallGone { callno: u16, reason: String },

    /// Invalid configuration
    #[error("Invalid configuration: {details}")]
    Config { details: String },

    /// The endpoint's network task has stopped
    #[error("Endpoint has shut down")]
    Shutdown,

    /// Socket error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Create a new configuration error
    pub fn config(details: impl Into<String>) -> Self {
        Self::Config {
            details: details.into(),
        }
    }

    /// Create a new dial string error
    pub fn invalid_dial(dial: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDialString {
            dial: dial.into(),
            reason: reason.into(),
        }
    }

    /// Create a new call gone error
    pub fn call_gone(callno: u16, reason: impl Into<String>) -> Self {
        Self::CallGone {
            callno,
            reason: reason.into(),
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

/// Sticky per-call error, set once a session becomes unusable
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallError {
    /// A reliable frame was never acknowledged
    #[error("connection timed out (ETIMEDOUT)")]
    TimedOut,
    /// The peer rejected the call
    #[error("call rejected by peer (EPERM)")]
    Rejected,
    /// The peer does not know this call
    #[error("peer does not know this call (ENOTCONN)")]
    NotConnected,
    /// The peer failed authentication
    #[error("authentication failed (EACCES)")]
    AuthFailed,
}

impl CallError {
    /// errno value reported to the PBX for this condition
    pub fn errno(self) -> i32 {
        match self {
            CallError::TimedOut => 110,    // ETIMEDOUT
            CallError::Rejected => 1,      // EPERM
            CallError::NotConnected => 107, // ENOTCONN
            CallError::AuthFailed => 13,   // EACCES
        }
    }

    /// Symbolic errno name
    pub fn errno_name(self) -> &'static str {
        match self {
            CallError::TimedOut => "ETIMEDOUT",
            CallError::Rejected => "EPERM",
            CallError::NotConnected => "ENOTCONN",
            CallError::AuthFailed => "EACCES",
        }
    }
}
