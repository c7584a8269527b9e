// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! tether-core: shared building blocks for tether streams.
//!
//! This crate holds the pieces of the stream stack that need no runtime:
//! status codes and the close classification table, the reconnect backoff
//! calculator, the credentials gateway, and configuration loading.

pub mod backoff;
pub mod config;
pub mod credentials;
pub mod error;
pub mod status;

pub use backoff::ExponentialBackoff;
pub use config::{BackoffConfig, Config, RemoteConfig, StreamKind, StreamSettings};
pub use credentials::{
    AuthError, CredentialsProvider, EmptyCredentialsProvider, StaticCredentialsProvider, Token,
    TokenFuture,
};
pub use error::{Error, Result};
pub use status::{BackoffAdjustment, CloseAction, Code, Status};
