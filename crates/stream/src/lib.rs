// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! tether-stream: a reconnecting, authenticated bidirectional stream.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Observer   │◄────│   Stream    │────►│  Transport  │
//! │   (trait)   │     │(state mach.)│◄────│   (trait)   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                        │       │
//!                        ▼       ▼
//!               ┌─────────────┐ ┌─────────────┐
//!               │ AsyncQueue  │ │ Credentials │
//!               │  (timers)   │ │  (trait)    │
//!               └─────────────┘ └─────────────┘
//! ```
//!
//! Every state transition runs on a serialized [`AsyncQueue`]. Network I/O
//! and token fetches run on the tokio runtime and post their results back
//! onto the queue.

mod executor;
mod observer;
mod stream;
mod transport;
mod websocket;

pub use executor::{AsyncQueue, DelayedOperation, ExecutorError, TimerId};
pub use observer::StreamObserver;
pub use stream::{Stream, StreamError, StreamResult, StreamState, StreamTimers};
pub use transport::{
    Completion, CompletionKind, CompletionSink, Transport, TransportError, TransportResult,
    TransportStream,
};
pub use websocket::{
    status_for_close_code, status_for_http, WebSocketTransport, CLOSE_RESOURCE_EXHAUSTED,
    CLOSE_UNAUTHENTICATED,
};

#[cfg(test)]
mod test_helpers;
