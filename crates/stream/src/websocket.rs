// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket transport using tokio-tungstenite.
//!
//! Each connection runs as one task on the transport's runtime. The stream
//! talks to it through a command channel; the task reports back through the
//! connection's [`CompletionSink`]:
//!
//! ```text
//! Stream ──Send/Finish──► connection task ──frames──► server
//!   ▲                          │
//!   └──── Open/Read/Write/Failed/Finish (via the executor)
//! ```
//!
//! After a failure the task stops reading and writing and waits for the
//! stream to request a finish before delivering the terminal status.

use futures_util::{SinkExt, StreamExt};
use tether_core::{Code, Status, Token};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, trace};

use crate::transport::{
    Completion, CompletionKind, CompletionSink, Transport, TransportError, TransportResult,
    TransportStream,
};

/// Close code a server sends when the presented token is not accepted.
pub const CLOSE_UNAUTHENTICATED: u16 = 4001;
/// Close code a server sends to ask clients to slow down.
pub const CLOSE_RESOURCE_EXHAUSTED: u16 = 4029;

/// Map a WebSocket close code to a terminal status.
pub fn status_for_close_code(code: u16, reason: &str) -> Status {
    let code = match code {
        1000 => Code::Ok,
        1008 => Code::PermissionDenied,
        CLOSE_UNAUTHENTICATED => Code::Unauthenticated,
        CLOSE_RESOURCE_EXHAUSTED => Code::ResourceExhausted,
        _ => Code::Unavailable,
    };
    Status::new(code, reason)
}

/// Map a rejected handshake's HTTP status to a terminal status.
pub fn status_for_http(status: u16) -> Status {
    let code = match status {
        401 => Code::Unauthenticated,
        403 => Code::PermissionDenied,
        429 => Code::ResourceExhausted,
        _ => Code::Unavailable,
    };
    Status::new(code, format!("handshake rejected with HTTP {}", status))
}

fn status_for_error(error: &WsError) -> Status {
    match error {
        WsError::Http(response) => status_for_http(response.status().as_u16()),
        other => Status::new(Code::Unavailable, other.to_string()),
    }
}

fn status_for_close_frame(frame: Option<CloseFrame>) -> Status {
    match frame {
        Some(frame) => status_for_close_code(u16::from(frame.code), frame.reason.as_str()),
        None => Status::ok(),
    }
}

enum Command {
    Send(Vec<u8>),
    Finish,
}

/// Opens WebSocket connections to a fixed URL.
pub struct WebSocketTransport {
    url: String,
    runtime: Handle,
}

impl WebSocketTransport {
    /// Create a transport whose connection tasks run on `runtime`.
    pub fn new(url: impl Into<String>, runtime: Handle) -> Self {
        WebSocketTransport {
            url: url.into(),
            runtime,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn request(&self, token: &Token) -> TransportResult<Request> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        if let Some(value) = token.value() {
            let header = HeaderValue::from_str(&format!("Bearer {}", value))
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, header);
        }
        Ok(request)
    }
}

impl Transport for WebSocketTransport {
    fn open(
        &mut self,
        token: &Token,
        sink: CompletionSink,
    ) -> TransportResult<Box<dyn TransportStream>> {
        let request = self.request(token)?;
        let (commands, receiver) = mpsc::unbounded_channel();

        debug!("connecting to {}", self.url);
        self.runtime.spawn(run_connection(request, sink, receiver));

        Ok(Box::new(WebSocketConnection {
            commands,
            finished: false,
        }))
    }
}

struct WebSocketConnection {
    commands: mpsc::UnboundedSender<Command>,
    finished: bool,
}

impl TransportStream for WebSocketConnection {
    fn send(&mut self, message: Vec<u8>) {
        if self.finished {
            return;
        }
        // A closed channel means the task already failed; the failure is
        // reported through the sink.
        let _ = self.commands.send(Command::Send(message));
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let _ = self.commands.send(Command::Finish);
    }
}

async fn run_connection(
    request: Request,
    sink: CompletionSink,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let ws = match tokio_tungstenite::connect_async(request).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            debug!("connect failed: {}", e);
            sink.deliver(Completion::Failed(CompletionKind::Open));
            wait_for_finish(&mut commands).await;
            sink.deliver(Completion::Finish(status_for_error(&e)));
            return;
        }
    };
    sink.deliver(Completion::Open);

    let (mut writer, mut reader) = ws.split();
    let failure = loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send(message)) => {
                    match writer.send(Message::Binary(message.into())).await {
                        Ok(()) => sink.deliver(Completion::Write),
                        Err(e) => break (CompletionKind::Write, status_for_error(&e)),
                    }
                }
                Some(Command::Finish) | None => {
                    let _ = writer.close().await;
                    sink.deliver(Completion::Finish(Status::ok()));
                    return;
                }
            },
            frame = reader.next() => match frame {
                Some(Ok(Message::Binary(data))) => sink.deliver(Completion::Read(data.to_vec())),
                Some(Ok(Message::Text(text))) => {
                    sink.deliver(Completion::Read(text.as_str().as_bytes().to_vec()))
                }
                Some(Ok(Message::Close(frame))) => {
                    break (CompletionKind::Read, status_for_close_frame(frame));
                }
                Some(Ok(_)) => trace!("ignoring control frame"),
                Some(Err(e)) => break (CompletionKind::Read, status_for_error(&e)),
                None => {
                    break (
                        CompletionKind::Read,
                        Status::new(Code::Unavailable, "connection closed"),
                    );
                }
            },
        }
    };

    let (kind, status) = failure;
    debug!("connection ended during {:?}: {}", kind, status);
    sink.deliver(Completion::Failed(kind));
    wait_for_finish(&mut commands).await;
    sink.deliver(Completion::Finish(status));
}

async fn wait_for_finish(commands: &mut mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = commands.recv().await {
        if let Command::Finish = command {
            return;
        }
    }
}

#[cfg(test)]
#[path = "websocket_tests.rs"]
mod tests;
