// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Runs one stream against the configured endpoint until interrupted.

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use tether_core::{
    Code, Config, CredentialsProvider, EmptyCredentialsProvider, ExponentialBackoff, RemoteConfig,
    StaticCredentialsProvider, Status,
};
use tether_stream::{AsyncQueue, Stream, StreamObserver, StreamResult, WebSocketTransport};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Environment variable overriding `remote.token`.
pub const TOKEN_ENV: &str = "TETHER_TOKEN";

/// Command line overrides applied on top of the configuration file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub url: Option<String>,
    pub token: Option<String>,
    /// Value of [`TOKEN_ENV`], if set.
    pub env_token: Option<String>,
}

/// Load the configuration (or defaults) and apply overrides.
///
/// Token precedence: `--token`, then `TETHER_TOKEN`, then the file.
pub fn resolve_config(path: Option<&Path>, overrides: Overrides) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if let Some(url) = overrides.url {
        config.remote.url = url;
    }
    if let Some(token) = overrides.token.or(overrides.env_token) {
        config.remote.token = Some(token);
    }

    config.validate()?;
    Ok(config)
}

/// Credentials provider for the configured token, if any.
pub fn credentials_for(remote: &RemoteConfig) -> Arc<dyn CredentialsProvider> {
    match remote.token.as_deref() {
        Some(token) if !token.is_empty() => Arc::new(StaticCredentialsProvider::new(token)),
        _ => Arc::new(EmptyCredentialsProvider),
    }
}

/// Observer printing each response as one line and forwarding closes.
pub struct PrintingObserver {
    out: Mutex<Box<dyn Write + Send>>,
    closes: mpsc::UnboundedSender<Status>,
}

impl PrintingObserver {
    pub fn new(out: Box<dyn Write + Send>, closes: mpsc::UnboundedSender<Status>) -> Self {
        PrintingObserver {
            out: Mutex::new(out),
            closes,
        }
    }
}

impl StreamObserver for PrintingObserver {
    fn on_open(&self) {
        info!("stream open");
    }

    fn on_response(&self, message: &[u8]) -> std::result::Result<(), Status> {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(out, "{}", String::from_utf8_lossy(message))
            .and_then(|()| out.flush())
            .map_err(|e| Status::new(Code::Internal, e.to_string()))
    }

    fn on_close(&self, status: &Status) {
        // The receiver is gone only once `run` has returned.
        let _ = self.closes.send(status.clone());
    }
}

async fn on_queue<F>(queue: &AsyncQueue, stream: &Arc<Stream>, op: F) -> Result<()>
where
    F: FnOnce(&Stream) -> StreamResult<()> + Send + 'static,
{
    let stream = Arc::clone(stream);
    queue
        .enqueue_and_wait(move || op(&stream))
        .await
        .ok_or(Error::QueueShutDown)??;
    Ok(())
}

/// Run the stream until Ctrl-C or a graceful close by the server.
pub async fn run(config: Config) -> Result<()> {
    let runtime = Handle::current();
    let queue = AsyncQueue::new(runtime.clone());
    let credentials = credentials_for(&config.remote);
    let transport = WebSocketTransport::new(config.remote.url.clone(), runtime);
    info!("connecting {} stream to {}", config.stream.name, transport.url());

    let (closes_tx, mut closes) = mpsc::unbounded_channel();
    let observer: Arc<dyn StreamObserver> =
        Arc::new(PrintingObserver::new(Box::new(std::io::stdout()), closes_tx));
    let stream = Arc::new(Stream::new(
        queue.clone(),
        credentials,
        Box::new(transport),
        Arc::downgrade(&observer),
        &config.stream,
        ExponentialBackoff::new(config.backoff),
    ));

    on_queue(&queue, &stream, |s| s.start()).await?;

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            result = &mut interrupt => {
                if let Err(e) = result {
                    warn!("failed to listen for Ctrl-C: {}", e);
                }
                info!("interrupted, stopping");
                on_queue(&queue, &stream, |s| s.stop()).await?;
                break;
            }
            status = closes.recv() => match status {
                Some(status) if status.is_ok() => {
                    info!("stream closed by server");
                    break;
                }
                Some(status) => {
                    debug!("restarting after {}", status);
                    on_queue(&queue, &stream, |s| s.start()).await?;
                }
                None => break,
            },
        }
    }

    drop(stream);
    queue.shutdown();
    Ok(())
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
