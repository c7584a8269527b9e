// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

/// Errors surfaced by the `tether` command.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] tether_core::Error),

    #[error(transparent)]
    Stream(#[from] tether_stream::StreamError),

    #[error("failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("stream queue shut down unexpectedly")]
    QueueShutDown,
}

/// Result type alias for the `tether` command.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
