// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal status codes reported when a stream closes.
//!
//! The codes mirror the canonical RPC status space. [`Code::close_action`] is
//! the single table deciding what a close with a given code does to the
//! credentials and to the reconnect backoff.

use std::fmt;

/// Canonical status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

/// How a close with a given code adjusts the reconnect backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffAdjustment {
    /// Intentional close: the next connection attempt is not delayed.
    Reset,
    /// Backend asked us to slow down: jump straight to the ceiling.
    Max,
    /// Ordinary failure: keep growing from the current delay.
    Grow,
}

/// Side effects applied when a stream closes with a given code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseAction {
    /// Discard the cached credential so the next fetch is forced to refresh.
    pub invalidate_token: bool,
    pub backoff: BackoffAdjustment,
}

impl Code {
    /// Human-readable name, e.g. `"Unavailable"`.
    pub fn name(self) -> &'static str {
        match self {
            Code::Ok => "Ok",
            Code::Cancelled => "Cancelled",
            Code::Unknown => "Unknown",
            Code::InvalidArgument => "InvalidArgument",
            Code::DeadlineExceeded => "DeadlineExceeded",
            Code::NotFound => "NotFound",
            Code::AlreadyExists => "AlreadyExists",
            Code::PermissionDenied => "PermissionDenied",
            Code::ResourceExhausted => "ResourceExhausted",
            Code::FailedPrecondition => "FailedPrecondition",
            Code::Aborted => "Aborted",
            Code::OutOfRange => "OutOfRange",
            Code::Unimplemented => "Unimplemented",
            Code::Internal => "Internal",
            Code::Unavailable => "Unavailable",
            Code::DataLoss => "DataLoss",
            Code::Unauthenticated => "Unauthenticated",
        }
    }

    /// Close classification table.
    ///
    /// Codes not listed explicitly never invalidate the credential.
    pub fn close_action(self) -> CloseAction {
        let (invalidate_token, backoff) = match self {
            Code::Ok => (false, BackoffAdjustment::Reset),
            Code::ResourceExhausted => (false, BackoffAdjustment::Max),
            Code::Unauthenticated => (true, BackoffAdjustment::Grow),
            _ => (false, BackoffAdjustment::Grow),
        };
        CloseAction {
            invalidate_token,
            backoff,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A status code plus an optional diagnostic message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    code: Code,
    message: String,
}

impl Status {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Status {
            code,
            message: message.into(),
        }
    }

    /// The successful status.
    pub fn ok() -> Self {
        Status::new(Code::Ok, "")
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }
}

impl From<Code> for Status {
    fn from(code: Code) -> Self {
        Status::new(code, "")
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
