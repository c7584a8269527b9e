// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Transport abstraction for bidirectional streams.
//!
//! A [`Transport`] opens connections; each live connection is a
//! [`TransportStream`]. Results of asynchronous operations are not returned
//! from calls. They arrive later as [`Completion`]s posted through a
//! [`CompletionSink`] onto the stream's executor:
//! - Real WebSocket connections for production ([`crate::WebSocketTransport`])
//! - Scripted fakes for unit testing

use std::fmt;
use std::sync::Arc;

use tether_core::{Status, Token};

use crate::executor::AsyncQueue;

/// Error type for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connection could not be initiated.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The request could not be built (bad URL, bad header value).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// The operation a failed completion belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionKind {
    Open,
    Read,
    Write,
}

/// Asynchronous result delivered by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The connection is established.
    Open,
    /// A message was received.
    Read(Vec<u8>),
    /// A message passed to [`TransportStream::send`] was written.
    Write,
    /// An operation completed unsuccessfully. A `Finish` follows once the
    /// stream requests one.
    Failed(CompletionKind),
    /// The connection is finished; carries the terminal status.
    Finish(Status),
}

/// Posts completions for one connection onto an executor.
///
/// Cloneable and `Send`, so transports can deliver from any task or thread.
#[derive(Clone)]
pub struct CompletionSink {
    queue: AsyncQueue,
    handler: Arc<dyn Fn(Completion) + Send + Sync>,
}

impl CompletionSink {
    pub fn new<F>(queue: AsyncQueue, handler: F) -> Self
    where
        F: Fn(Completion) + Send + Sync + 'static,
    {
        CompletionSink {
            queue,
            handler: Arc::new(handler),
        }
    }

    /// Enqueue `completion` for handling on the executor.
    ///
    /// Completions delivered from one task are handled in delivery order.
    pub fn deliver(&self, completion: Completion) {
        let handler = Arc::clone(&self.handler);
        self.queue.enqueue(move || handler(completion));
    }
}

impl fmt::Debug for CompletionSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSink")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

/// Factory for live connections.
pub trait Transport: Send {
    /// Start opening a connection authenticated with `token`.
    ///
    /// Returns immediately. The transport later delivers `Open` (or
    /// `Failed(Open)`) through `sink`, followed by reads, write
    /// acknowledgements and eventually `Finish`.
    fn open(&mut self, token: &Token, sink: CompletionSink)
        -> TransportResult<Box<dyn TransportStream>>;
}

/// A live duplex connection.
///
/// Once `finish` has been requested, or a `Finish` completion has been
/// delivered, no further reads or writes are delivered.
pub trait TransportStream: Send {
    /// Queue a message for writing.
    fn send(&mut self, message: Vec<u8>);

    /// Request the connection to finish. Idempotent.
    fn finish(&mut self);
}
