// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(about = "Keep an authenticated stream open against a WebSocket endpoint")]
#[command(
    long_about = "Keep an authenticated stream open against a WebSocket endpoint.\n\n\
    Every message received is printed to stdout, one per line. The stream is\n\
    restarted with exponential backoff after errors. Press Ctrl-C to stop."
)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Endpoint URL (overrides remote.url)
    #[arg(short, long)]
    pub url: Option<String>,

    /// Bearer token (overrides TETHER_TOKEN and remote.token)
    #[arg(short, long)]
    pub token: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
