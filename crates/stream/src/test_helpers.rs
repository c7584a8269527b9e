// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted fakes shared by stream tests.

#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};

use tether_core::{AuthError, CredentialsProvider, Status, Token, TokenFuture};
use tokio::sync::oneshot;

use crate::observer::StreamObserver;
use crate::transport::{
    Completion, CompletionKind, CompletionSink, Transport, TransportError, TransportResult,
    TransportStream,
};

#[derive(Default)]
struct CredentialsState {
    observed: Vec<&'static str>,
    fail_get_token: bool,
    delay_get_token: bool,
    pending: Vec<oneshot::Sender<Result<Token, AuthError>>>,
}

/// Credentials provider that records calls and can fail or stall fetches.
#[derive(Default)]
pub struct FakeCredentials {
    state: Mutex<CredentialsState>,
}

impl FakeCredentials {
    /// Calls seen so far: "GetToken" and "InvalidateToken".
    pub fn observed(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().observed.clone()
    }

    /// Make every following fetch fail.
    pub fn fail_get_token(&self) {
        self.state.lock().unwrap().fail_get_token = true;
    }

    /// Hold following fetches until [`Self::invoke_get_token`].
    pub fn delay_get_token(&self) {
        self.state.lock().unwrap().delay_get_token = true;
    }

    /// Complete all held fetches with a token.
    pub fn invoke_get_token(&self) {
        let pending: Vec<_> = self.state.lock().unwrap().pending.drain(..).collect();
        for sender in pending {
            let _ = sender.send(Ok(Token::new("fake-token")));
        }
    }
}

impl CredentialsProvider for FakeCredentials {
    fn fetch_token(&self) -> TokenFuture {
        let mut state = self.state.lock().unwrap();
        state.observed.push("GetToken");

        if state.fail_get_token {
            return Box::pin(async { Err(AuthError::Rejected("token refused".into())) });
        }
        if state.delay_get_token {
            let (tx, rx) = oneshot::channel();
            state.pending.push(tx);
            return Box::pin(async move {
                rx.await
                    .unwrap_or_else(|_| Err(AuthError::Unavailable("fetch abandoned".into())))
            });
        }
        Box::pin(async { Ok(Token::new("fake-token")) })
    }

    fn invalidate_token(&self) {
        self.state.lock().unwrap().observed.push("InvalidateToken");
    }
}

struct Wire {
    sink: Option<CompletionSink>,
    auto_open: bool,
    fail_open: bool,
    opens: usize,
    tokens: Vec<Option<String>>,
    writes: Vec<String>,
    finish_requests: usize,
    /// Status the next finish completes with.
    finish_status: Option<Status>,
}

/// In-memory transport driven by the test.
///
/// Clones share state, so a test keeps one clone while the stream owns
/// another.
#[derive(Clone)]
pub struct FakeTransport {
    wire: Arc<Mutex<Wire>>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        FakeTransport {
            wire: Arc::new(Mutex::new(Wire {
                sink: None,
                auto_open: true,
                fail_open: false,
                opens: 0,
                tokens: Vec::new(),
                writes: Vec::new(),
                finish_requests: 0,
                finish_status: None,
            })),
        }
    }
}

impl FakeTransport {
    /// Stop delivering `Open` automatically; use [`Self::deliver`] instead.
    pub fn manual_open(&self) {
        self.wire.lock().unwrap().auto_open = false;
    }

    /// Make following opens fail synchronously.
    pub fn fail_open(&self) {
        self.wire.lock().unwrap().fail_open = true;
    }

    /// Deliver a completion through the most recently opened connection.
    pub fn deliver(&self, completion: Completion) {
        let sink = self.wire.lock().unwrap().sink.clone();
        if let Some(sink) = sink {
            sink.deliver(completion);
        }
    }

    pub fn deliver_read(&self, message: &str) {
        self.deliver(Completion::Read(message.as_bytes().to_vec()));
    }

    /// Fail the pending read; the connection then finishes with `status`.
    pub fn fail_read(&self, status: Status) {
        self.wire.lock().unwrap().finish_status = Some(status);
        self.deliver(Completion::Failed(CompletionKind::Read));
    }

    /// Fail the last write; the connection then finishes with `status`.
    pub fn fail_write(&self, status: Status) {
        self.wire.lock().unwrap().finish_status = Some(status);
        self.deliver(Completion::Failed(CompletionKind::Write));
    }

    pub fn opens(&self) -> usize {
        self.wire.lock().unwrap().opens
    }

    pub fn tokens(&self) -> Vec<Option<String>> {
        self.wire.lock().unwrap().tokens.clone()
    }

    pub fn writes(&self) -> Vec<String> {
        self.wire.lock().unwrap().writes.clone()
    }

    pub fn finish_requests(&self) -> usize {
        self.wire.lock().unwrap().finish_requests
    }
}

impl Transport for FakeTransport {
    fn open(
        &mut self,
        token: &Token,
        sink: CompletionSink,
    ) -> TransportResult<Box<dyn TransportStream>> {
        let mut wire = self.wire.lock().unwrap();
        if wire.fail_open {
            return Err(TransportError::ConnectionFailed("fake refused".into()));
        }
        wire.opens += 1;
        wire.tokens.push(token.value().map(str::to_owned));
        wire.sink = Some(sink.clone());
        wire.finish_status = None;
        if wire.auto_open {
            sink.deliver(Completion::Open);
        }
        Ok(Box::new(FakeConnection {
            wire: Arc::clone(&self.wire),
            sink,
            finished: false,
        }))
    }
}

struct FakeConnection {
    wire: Arc<Mutex<Wire>>,
    sink: CompletionSink,
    finished: bool,
}

impl TransportStream for FakeConnection {
    fn send(&mut self, message: Vec<u8>) {
        if self.finished {
            return;
        }
        let text = String::from_utf8_lossy(&message).into_owned();
        self.wire.lock().unwrap().writes.push(text);
        self.sink.deliver(Completion::Write);
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let status = {
            let mut wire = self.wire.lock().unwrap();
            wire.finish_requests += 1;
            wire.finish_status.take().unwrap_or_else(Status::ok)
        };
        self.sink.deliver(Completion::Finish(status));
    }
}

type Hook = Box<dyn Fn() + Send + Sync>;

/// Observer that records notifications as strings.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<String>>,
    reject_next: Mutex<Option<Status>>,
    on_open_hook: Mutex<Option<Hook>>,
}

impl RecordingObserver {
    /// Notifications so far, e.g. `on_open`, `on_response(foo)`,
    /// `on_close(Unavailable)`.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Reject the next response with `status`.
    pub fn reject_next_response(&self, status: Status) {
        *self.reject_next.lock().unwrap() = Some(status);
    }

    /// Run `hook` from inside `on_open`.
    pub fn set_on_open<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_open_hook.lock().unwrap() = Some(Box::new(hook));
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl StreamObserver for RecordingObserver {
    fn on_open(&self) {
        self.record("on_open".into());
        if let Some(hook) = self.on_open_hook.lock().unwrap().as_ref() {
            hook();
        }
    }

    fn on_response(&self, message: &[u8]) -> Result<(), Status> {
        self.record(format!("on_response({})", String::from_utf8_lossy(message)));
        match self.reject_next.lock().unwrap().take() {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }

    fn on_close(&self, status: &Status) {
        self.record(format!("on_close({})", status.code()));
    }
}
