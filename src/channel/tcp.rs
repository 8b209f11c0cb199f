//! TCP channel adapter
//!
//! Listens on one address for one request source. Clients are served one
//! at a time: requests are read as length-prefixed frames and handed to the
//! dispatcher, and responses for the source are written back to whichever
//! client is currently connected.

use super::{Collaborator, ResponseSender};
use crate::dispatch::DispatcherHandle;
use crate::message::MessageEnvelope;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bert_shared::{
    codec::{self, FrameDecoder},
    Request, Response,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type SharedWriter = Arc<Mutex<Option<OwnedWriteHalf>>>;

/// First pause after a failed accept; doubles per consecutive failure
const ACCEPT_BACKOFF_MS: u64 = 100;
const ACCEPT_BACKOFF_MAX_MS: u64 = 5_000;

/// Pause before retrying after `failures` consecutive accept errors
fn accept_backoff(failures: u32) -> Duration {
    let ms = ACCEPT_BACKOFF_MS << failures.saturating_sub(1).min(8);
    Duration::from_millis(ms.min(ACCEPT_BACKOFF_MAX_MS))
}

/// A listening channel bound to one request source
pub struct TcpChannel {
    source: String,
    local_addr: SocketAddr,
    writer: SharedWriter,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TcpChannel {
    /// Bind `addr` and start accepting clients for `source`
    pub async fn bind(
        source: impl Into<String>,
        addr: &str,
        dispatcher: DispatcherHandle,
    ) -> Result<Arc<Self>> {
        let source = source.into();
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("{} channel listening on {}", source, local_addr);

        let writer: SharedWriter = Arc::new(Mutex::new(None));
        let task = tokio::spawn(accept_loop(
            listener,
            source.clone(),
            dispatcher,
            writer.clone(),
        ));

        Ok(Arc::new(Self {
            source,
            local_addr,
            writer,
            task: Mutex::new(Some(task)),
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn has_client(&self) -> bool {
        self.writer.lock().await.is_some()
    }
}

#[async_trait]
impl ResponseSender for TcpChannel {
    async fn send(&self, response: Response) -> Result<()> {
        let encoded = codec::encode(&response)?;
        let mut writer = self.writer.lock().await;
        let stream = writer
            .as_mut()
            .ok_or_else(|| anyhow!("No client connected to {}", self.source))?;
        stream.write_all(&encoded).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.source
    }
}

#[async_trait]
impl Collaborator for TcpChannel {
    fn name(&self) -> &str {
        &self.source
    }

    async fn stop(&self) -> Result<()> {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
        if let Some(mut stream) = self.writer.lock().await.take() {
            stream.shutdown().await?;
        }
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    source: String,
    dispatcher: DispatcherHandle,
    writer: SharedWriter,
) {
    let mut failures = 0u32;
    loop {
        let (socket, addr) = match listener.accept().await {
            Ok(accepted) => {
                failures = 0;
                accepted
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                let backoff = accept_backoff(failures);
                warn!(
                    "{} channel accept failed: {} (retrying in {}ms)",
                    source,
                    e,
                    backoff.as_millis()
                );
                tokio::time::sleep(backoff).await;
                continue;
            }
        };
        info!("{} client connected: {}", source, addr);

        serve_client(socket, addr, &source, &dispatcher, &writer).await;

        writer.lock().await.take();
        info!("{} client disconnected: {}", source, addr);
    }
}

/// Read requests from one client until it disconnects
async fn serve_client(
    socket: TcpStream,
    addr: SocketAddr,
    source: &str,
    dispatcher: &DispatcherHandle,
    writer: &SharedWriter,
) {
    let (mut reader, write_half) = socket.into_split();
    *writer.lock().await = Some(write_half);

    let mut decoder = FrameDecoder::<Request>::new();
    let mut buf = vec![0u8; 4096];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => return,
            Ok(n) => decoder.extend(&buf[..n]),
            Err(e) => {
                warn!("Read error from {}: {}", addr, e);
                return;
            }
        }

        loop {
            match decoder.decode_next() {
                Ok(Some(request)) => submit(request, source, dispatcher, writer).await,
                Ok(None) => break,
                Err(e) => {
                    warn!("Decode error from {}: {}", addr, e);
                    return;
                }
            }
        }
    }
}

/// Hand a request to the dispatcher, answering directly if it is refused
async fn submit(request: Request, source: &str, dispatcher: &DispatcherHandle, writer: &SharedWriter) {
    let envelope = MessageEnvelope::from_request(request, source);
    let id = envelope.id();
    let request_type = envelope.request_type();
    debug!("{} request {} ({:?})", source, id, request_type);

    let Err(e) = dispatcher.handle_request(envelope) else {
        return;
    };
    warn!("{} request {} refused: {}", source, id, e);

    let response = Response::error(id, request_type, e.to_string());
    let result = match codec::encode(&response) {
        Ok(encoded) => match writer.lock().await.as_mut() {
            Some(stream) => stream.write_all(&encoded).await.map_err(anyhow::Error::from),
            None => Ok(()),
        },
        Err(e) => Err(e.into()),
    };
    if let Err(e) = result {
        warn!("Failed to answer refused request {}: {}", id, e);
    }
}
