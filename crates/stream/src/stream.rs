// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Reconnecting, authenticated bidirectional stream.
//!
//! # Lifecycle
//!
//! ```text
//!            start                token ok          Open completion
//! Initial ───────────► Starting ───────────► (open transport) ─────────► Open
//!    ▲                    ▲  │ token error                                │ │
//!    │ stop / idle        │  ▼                          Failed / rejected  │ │
//!    │                    │ Error ◄──── Finish(!ok) ◄──── Closing ◄───────┘ │
//!    │                    │  │ start                                         │
//!    │      backoff timer │  ▼                                               │
//!    │                    └ Backoff                                          │
//!    └──────────────────────────────────────────────────── stop / idle ──────┘
//! ```
//!
//! All operations and all completion handling run on the stream's
//! [`AsyncQueue`]. Every close bumps the stream's epoch; token fetches,
//! timers and transport completions carry the epoch they were issued under
//! and are discarded when it no longer matches. They also reach the stream
//! only through a weak reference, so results arriving after the stream is
//! dropped are no-ops.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tether_core::{
    BackoffAdjustment, Code, CredentialsProvider, ExponentialBackoff, Status, StreamKind,
    StreamSettings, Token,
};
use tracing::{debug, trace, warn};

use crate::executor::{AsyncQueue, DelayedOperation, TimerId};
use crate::observer::StreamObserver;
use crate::transport::{Completion, CompletionSink, Transport, TransportStream};

/// Lifecycle state of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Not started, or stopped cleanly.
    Initial,
    /// Restart after an error is waiting for the backoff timer.
    Backoff,
    /// Credentials requested, transport not yet open.
    Starting,
    /// Messages may be sent and received.
    Open,
    /// A finish was requested after a failure; waiting for the transport.
    Closing,
    /// Closed by an error; the next start backs off first.
    Error,
}

impl StreamState {
    fn is_started(self) -> bool {
        matches!(
            self,
            StreamState::Backoff | StreamState::Starting | StreamState::Open | StreamState::Closing
        )
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamState::Initial => "initial",
            StreamState::Backoff => "backoff",
            StreamState::Starting => "starting",
            StreamState::Open => "open",
            StreamState::Closing => "closing",
            StreamState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Contract violations by the stream's caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("{name} stream already started (state: {state})\n  hint: call stop() first, or wait for the close notification")]
    AlreadyStarted { name: String, state: StreamState },

    #[error("{name} stream is not open (state: {state})\n  hint: writes are only accepted after on_open")]
    NotOpen { name: String, state: StreamState },

    #[error("cannot inhibit backoff of {name} stream while it is {state}")]
    InhibitWhileConnected { name: String, state: StreamState },

    #[error("{name} stream used off its queue\n  hint: call stream operations from jobs on the stream's AsyncQueue")]
    OffQueue { name: String },
}

impl StreamError {
    /// Whether this error is a programming error by the caller. Every
    /// current variant is; operational failures are reported through
    /// [`StreamObserver::on_close`] instead.
    pub fn is_usage_violation(&self) -> bool {
        matches!(
            self,
            StreamError::AlreadyStarted { .. }
                | StreamError::NotOpen { .. }
                | StreamError::InhibitWhileConnected { .. }
                | StreamError::OffQueue { .. }
        )
    }
}

/// Result type for stream operations.
pub type StreamResult<T> = Result<T, StreamError>;

/// Timer identities a stream schedules under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamTimers {
    pub idle: TimerId,
    pub backoff: TimerId,
}

impl StreamTimers {
    pub fn for_kind(kind: StreamKind) -> Self {
        match kind {
            StreamKind::Listen => StreamTimers {
                idle: TimerId::ListenStreamIdle,
                backoff: TimerId::ListenStreamConnectionBackoff,
            },
            StreamKind::Write => StreamTimers {
                idle: TimerId::WriteStreamIdle,
                backoff: TimerId::WriteStreamConnectionBackoff,
            },
        }
    }
}

/// Notification to deliver once the state lock is released.
enum Notification {
    Open,
    Close(Status),
}

/// How a close disposes of the live connection.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Teardown {
    /// Ask the transport to finish, then release it.
    Finish,
    /// The transport already finished; just release it.
    Release,
}

struct Inner {
    state: StreamState,
    /// Incremented on every close; stale callbacks compare against it.
    epoch: u64,
    transport: Box<dyn Transport>,
    connection: Option<Box<dyn TransportStream>>,
    backoff: ExponentialBackoff,
    backoff_timer: Option<DelayedOperation>,
    idle_timer: Option<DelayedOperation>,
    /// Status to close with once the transport finishes, set when the
    /// observer rejected a message.
    pending_close: Option<Status>,
}

impl Inner {
    fn cancel_idle_timer(&mut self) {
        if let Some(timer) = self.idle_timer.take() {
            timer.cancel();
        }
    }

    fn cancel_backoff_timer(&mut self) {
        if let Some(timer) = self.backoff_timer.take() {
            timer.cancel();
        }
    }
}

struct Shared {
    name: String,
    queue: AsyncQueue,
    credentials: Arc<dyn CredentialsProvider>,
    observer: Weak<dyn StreamObserver>,
    timers: StreamTimers,
    idle_timeout: Duration,
    inner: Mutex<Inner>,
}

/// A managed bidirectional stream.
///
/// The stream exclusively owns its transport and timers. Dropping it tears
/// the connection down without notifying the observer.
pub struct Stream {
    shared: Arc<Shared>,
}

impl Stream {
    pub fn new(
        queue: AsyncQueue,
        credentials: Arc<dyn CredentialsProvider>,
        transport: Box<dyn Transport>,
        observer: Weak<dyn StreamObserver>,
        settings: &StreamSettings,
        backoff: ExponentialBackoff,
    ) -> Self {
        Stream {
            shared: Arc::new(Shared {
                name: settings.name.clone(),
                queue,
                credentials,
                observer,
                timers: StreamTimers::for_kind(settings.kind),
                idle_timeout: settings.idle_timeout(),
                inner: Mutex::new(Inner {
                    state: StreamState::Initial,
                    epoch: 0,
                    transport,
                    connection: None,
                    backoff,
                    backoff_timer: None,
                    idle_timer: None,
                    pending_close: None,
                }),
            }),
        }
    }

    pub fn debug_name(&self) -> &str {
        &self.shared.name
    }

    pub fn timers(&self) -> StreamTimers {
        self.shared.timers
    }

    pub fn state(&self) -> StreamState {
        self.shared.lock().state
    }

    /// True from `start` until the close notification.
    pub fn is_started(&self) -> bool {
        self.state().is_started()
    }

    pub fn is_open(&self) -> bool {
        self.state() == StreamState::Open
    }

    /// Start connecting. After an error close, the attempt is delayed by the
    /// reconnect backoff.
    pub fn start(&self) -> StreamResult<()> {
        self.ensure_on_queue()?;
        self.shared.start()
    }

    /// Close the stream gracefully. Legal in every state; a no-op when not
    /// started.
    pub fn stop(&self) -> StreamResult<()> {
        self.ensure_on_queue()?;
        self.shared.stop();
        Ok(())
    }

    /// Send a message. Only legal while open.
    pub fn write(&self, message: Vec<u8>) -> StreamResult<()> {
        self.ensure_on_queue()?;
        self.shared.write(message)
    }

    /// Arm the idle timer if the stream is open and no timer is pending.
    pub fn mark_idle(&self) -> StreamResult<()> {
        self.ensure_on_queue()?;
        self.shared.mark_idle();
        Ok(())
    }

    pub fn cancel_idle_check(&self) -> StreamResult<()> {
        self.ensure_on_queue()?;
        self.shared.lock().cancel_idle_timer();
        Ok(())
    }

    /// Skip the reconnect delay for the next start.
    ///
    /// Cancels a pending backoff timer and returns the stream to `Initial`.
    pub fn inhibit_backoff(&self) -> StreamResult<()> {
        self.ensure_on_queue()?;
        self.shared.inhibit_backoff()
    }

    fn ensure_on_queue(&self) -> StreamResult<()> {
        if self.shared.queue.is_current() {
            Ok(())
        } else {
            Err(StreamError::OffQueue {
                name: self.shared.name.clone(),
            })
        }
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.shared.tear_down();
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start(self: &Arc<Self>) -> StreamResult<()> {
        let mut inner = self.lock();
        match inner.state {
            StreamState::Initial => {
                debug!("{} stream: starting", self.name);
                self.request_credentials(&mut inner);
                Ok(())
            }
            StreamState::Error => {
                self.backoff_and_restart(&mut inner);
                Ok(())
            }
            state => Err(StreamError::AlreadyStarted {
                name: self.name.clone(),
                state,
            }),
        }
    }

    fn stop(self: &Arc<Self>) {
        let notification = {
            let mut inner = self.lock();
            if !inner.state.is_started() {
                return;
            }
            debug!("{} stream: stopping", self.name);
            self.close(&mut inner, Status::ok(), Teardown::Finish)
        };
        self.notify(notification);
    }

    fn write(&self, message: Vec<u8>) -> StreamResult<()> {
        let mut inner = self.lock();
        if inner.state != StreamState::Open {
            return Err(StreamError::NotOpen {
                name: self.name.clone(),
                state: inner.state,
            });
        }
        inner.cancel_idle_timer();
        trace!("{} stream: write {} bytes", self.name, message.len());
        if let Some(connection) = inner.connection.as_mut() {
            connection.send(message);
        }
        Ok(())
    }

    fn mark_idle(self: &Arc<Self>) {
        let mut inner = self.lock();
        if inner.state != StreamState::Open || inner.idle_timer.is_some() {
            return;
        }
        let weak = Arc::downgrade(self);
        let epoch = inner.epoch;
        inner.idle_timer = Some(self.queue.enqueue_after_delay(
            self.idle_timeout,
            self.timers.idle,
            move || {
                if let Some(shared) = weak.upgrade() {
                    shared.handle_idle_timeout(epoch);
                }
            },
        ));
    }

    fn inhibit_backoff(&self) -> StreamResult<()> {
        let mut inner = self.lock();
        match inner.state {
            StreamState::Initial | StreamState::Error | StreamState::Backoff => {
                debug!("{} stream: backoff inhibited", self.name);
                inner.cancel_backoff_timer();
                inner.state = StreamState::Initial;
                inner.backoff.reset();
                Ok(())
            }
            state => Err(StreamError::InhibitWhileConnected {
                name: self.name.clone(),
                state,
            }),
        }
    }

    fn backoff_and_restart(self: &Arc<Self>, inner: &mut Inner) {
        inner.state = StreamState::Backoff;
        let delay = inner.backoff.next_delay();
        debug!(
            "{} stream: restarting in {:?} (attempt {})",
            self.name,
            delay,
            inner.backoff.attempt_count()
        );

        let weak = Arc::downgrade(self);
        let epoch = inner.epoch;
        inner.backoff_timer = Some(self.queue.enqueue_after_delay(
            delay,
            self.timers.backoff,
            move || {
                if let Some(shared) = weak.upgrade() {
                    shared.resume_from_backoff(epoch);
                }
            },
        ));
    }

    fn resume_from_backoff(self: &Arc<Self>, epoch: u64) {
        let mut inner = self.lock();
        inner.backoff_timer = None;
        if inner.epoch != epoch || inner.state != StreamState::Backoff {
            trace!("{} stream: stale backoff timer", self.name);
            return;
        }
        self.request_credentials(&mut inner);
    }

    fn request_credentials(self: &Arc<Self>, inner: &mut Inner) {
        inner.state = StreamState::Starting;
        let epoch = inner.epoch;
        let fetch = self.credentials.fetch_token();
        let weak = Arc::downgrade(self);
        let queue = self.queue.clone();

        self.queue.runtime().spawn(async move {
            let result = fetch.await;
            queue.enqueue(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.resume_after_auth(epoch, result);
                }
            });
        });
    }

    fn resume_after_auth(
        self: &Arc<Self>,
        epoch: u64,
        result: Result<Token, tether_core::AuthError>,
    ) {
        let notification = {
            let mut inner = self.lock();
            if inner.epoch != epoch || inner.state != StreamState::Starting {
                trace!("{} stream: dropping stale token", self.name);
                return;
            }

            match result {
                Ok(token) => self.open_transport(&mut inner, &token, epoch),
                Err(e) => {
                    warn!("{} stream: failed to get token: {}", self.name, e);
                    let status = Status::new(Code::Unknown, e.to_string());
                    self.close(&mut inner, status, Teardown::Finish)
                }
            }
        };
        self.notify(notification);
    }

    fn open_transport(
        self: &Arc<Self>,
        inner: &mut Inner,
        token: &Token,
        epoch: u64,
    ) -> Option<Notification> {
        let weak = Arc::downgrade(self);
        let sink = CompletionSink::new(self.queue.clone(), move |completion| {
            if let Some(shared) = weak.upgrade() {
                shared.handle_completion(epoch, completion);
            }
        });

        match inner.transport.open(token, sink) {
            Ok(connection) => {
                inner.connection = Some(connection);
                None
            }
            Err(e) => {
                warn!("{} stream: {}", self.name, e);
                let status = Status::new(Code::Unavailable, e.to_string());
                self.close(inner, status, Teardown::Release)
            }
        }
    }

    fn handle_completion(self: &Arc<Self>, epoch: u64, completion: Completion) {
        if let Completion::Read(message) = completion {
            self.handle_read(epoch, message);
            return;
        }

        let notification = {
            let mut inner = self.lock();
            if inner.epoch != epoch {
                trace!("{} stream: dropping stale completion", self.name);
                return;
            }

            match completion {
                Completion::Open => {
                    if inner.state != StreamState::Starting {
                        return;
                    }
                    debug!("{} stream: open", self.name);
                    inner.state = StreamState::Open;
                    Some(Notification::Open)
                }
                Completion::Write => {
                    trace!("{} stream: write acknowledged", self.name);
                    None
                }
                Completion::Failed(kind) => {
                    if matches!(inner.state, StreamState::Starting | StreamState::Open) {
                        debug!("{} stream: {:?} failed, finishing", self.name, kind);
                        self.begin_closing(&mut inner, None);
                    }
                    None
                }
                Completion::Finish(status) => {
                    if !matches!(
                        inner.state,
                        StreamState::Starting | StreamState::Open | StreamState::Closing
                    ) {
                        return;
                    }
                    let status = inner.pending_close.take().unwrap_or(status);
                    self.close(&mut inner, status, Teardown::Release)
                }
                Completion::Read(_) => None,
            }
        };
        self.notify(notification);
    }

    fn handle_read(self: &Arc<Self>, epoch: u64, message: Vec<u8>) {
        {
            let inner = self.lock();
            if inner.epoch != epoch || inner.state != StreamState::Open {
                trace!("{} stream: dropping read in state {}", self.name, inner.state);
                return;
            }
        }

        let Some(observer) = self.observer.upgrade() else {
            return;
        };
        let Err(status) = observer.on_response(&message) else {
            return;
        };

        let status = if status.is_ok() {
            Status::new(Code::Internal, status.message())
        } else {
            status
        };
        warn!("{} stream: response rejected: {}", self.name, status);

        // The observer may have stopped or restarted the stream itself.
        let mut inner = self.lock();
        if inner.epoch == epoch && inner.state == StreamState::Open {
            self.begin_closing(&mut inner, Some(status));
        }
    }

    fn handle_idle_timeout(self: &Arc<Self>, epoch: u64) {
        let notification = {
            let mut inner = self.lock();
            inner.idle_timer = None;
            if inner.epoch != epoch || inner.state != StreamState::Open {
                return;
            }
            debug!("{} stream: idle timeout", self.name);
            self.close(&mut inner, Status::ok(), Teardown::Finish)
        };
        self.notify(notification);
    }

    /// Ask the transport to finish; the `Finish` completion closes the stream.
    fn begin_closing(&self, inner: &mut Inner, pending: Option<Status>) {
        inner.state = StreamState::Closing;
        inner.pending_close = pending;
        inner.cancel_idle_timer();
        if let Some(connection) = inner.connection.as_mut() {
            connection.finish();
        }
    }

    /// Terminal transition. Returns the close notification to deliver.
    fn close(&self, inner: &mut Inner, status: Status, teardown: Teardown) -> Option<Notification> {
        inner.cancel_idle_timer();
        inner.cancel_backoff_timer();
        inner.epoch += 1;
        inner.pending_close = None;

        let action = status.code().close_action();
        match action.backoff {
            BackoffAdjustment::Reset => inner.backoff.reset(),
            BackoffAdjustment::Max => inner.backoff.reset_to_max(),
            BackoffAdjustment::Grow => {}
        }
        if action.invalidate_token {
            debug!("{} stream: invalidating token", self.name);
            self.credentials.invalidate_token();
        }

        if let Some(mut connection) = inner.connection.take() {
            if teardown == Teardown::Finish {
                connection.finish();
            }
        }

        if status.is_ok() {
            inner.state = StreamState::Initial;
            debug!("{} stream: closed", self.name);
        } else {
            inner.state = StreamState::Error;
            warn!("{} stream: closed with error: {}", self.name, status);
        }
        Some(Notification::Close(status))
    }

    fn notify(&self, notification: Option<Notification>) {
        let Some(notification) = notification else {
            return;
        };
        let Some(observer) = self.observer.upgrade() else {
            return;
        };
        match notification {
            Notification::Open => observer.on_open(),
            Notification::Close(status) => observer.on_close(&status),
        }
    }

    fn tear_down(&self) {
        let mut inner = self.lock();
        inner.cancel_idle_timer();
        inner.cancel_backoff_timer();
        inner.epoch += 1;
        if let Some(mut connection) = inner.connection.take() {
            connection.finish();
        }
        inner.state = StreamState::Initial;
    }
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;
