// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! tether: command line client for tether streams.
//!
//! Loads a [`tether_core::Config`], applies command line and environment
//! overrides, and runs a single stream over WebSocket, printing every
//! response to stdout.

mod cli;
pub mod client;
pub mod error;

pub use cli::Cli;
pub use client::{credentials_for, resolve_config, run, Overrides, PrintingObserver, TOKEN_ENV};
pub use error::{Error, Result};
