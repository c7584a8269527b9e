// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Credentials gateway consumed by streams.
//!
//! A stream fetches a token at the start of every connection attempt and
//! invalidates it when a close is classified as an authentication failure.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

/// Error returned when a token cannot be obtained.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The identity provider rejected the request.
    #[error("token request rejected: {0}")]
    Rejected(String),

    /// The identity provider could not be reached.
    #[error("credentials unavailable: {0}")]
    Unavailable(String),
}

/// Short-lived authentication artifact required to open a connection.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    value: Option<String>,
}

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Token {
            value: Some(value.into()),
        }
    }

    /// A token for an unauthenticated connection.
    pub fn unauthenticated() -> Self {
        Token { value: None }
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Some(_) => f.write_str("Token(<redacted>)"),
            None => f.write_str("Token(unauthenticated)"),
        }
    }
}

/// Future resolving to a token fetch result.
pub type TokenFuture = Pin<Box<dyn Future<Output = Result<Token, AuthError>> + Send + 'static>>;

/// Source of connection credentials.
///
/// Implementations are shared between streams, so both operations take
/// `&self`.
pub trait CredentialsProvider: Send + Sync {
    /// Fetch the current token, refreshing it if it was invalidated.
    fn fetch_token(&self) -> TokenFuture;

    /// Discard any cached token so the next fetch is forced to refresh.
    fn invalidate_token(&self);
}

/// Provider for connections that need no credentials.
#[derive(Debug, Default)]
pub struct EmptyCredentialsProvider;

impl CredentialsProvider for EmptyCredentialsProvider {
    fn fetch_token(&self) -> TokenFuture {
        Box::pin(async { Ok(Token::unauthenticated()) })
    }

    fn invalidate_token(&self) {}
}

/// Provider handing out a fixed token.
///
/// A static token cannot actually be refreshed; an invalidation is remembered
/// and reported on the next fetch so that a rejected token shows up in logs.
pub struct StaticCredentialsProvider {
    token: Token,
    force_refresh: AtomicBool,
}

impl StaticCredentialsProvider {
    pub fn new(token: impl Into<String>) -> Self {
        StaticCredentialsProvider {
            token: Token::new(token),
            force_refresh: AtomicBool::new(false),
        }
    }

    /// Whether the next fetch was asked to refresh.
    pub fn refresh_pending(&self) -> bool {
        self.force_refresh.load(Ordering::Acquire)
    }
}

impl CredentialsProvider for StaticCredentialsProvider {
    fn fetch_token(&self) -> TokenFuture {
        if self.force_refresh.swap(false, Ordering::AcqRel) {
            tracing::warn!("static token was invalidated by the server; reusing it");
        }
        let token = self.token.clone();
        Box::pin(async move { Ok(token) })
    }

    fn invalidate_token(&self) {
        self.force_refresh.store(true, Ordering::Release);
    }
}

#[cfg(test)]
#[path = "credentials_tests.rs"]
mod tests;
