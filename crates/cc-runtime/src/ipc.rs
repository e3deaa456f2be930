//! Capability transport between the sandbox and the trusted process.
//!
//! Frames are length-delimited JSON: a 4-byte big-endian length prefix
//! followed by the JSON payload. Every request carries a `request_id`; the
//! reply echoes it, so any number of requests may be in flight at once and
//! replies may arrive in any order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::value::lock;
use crate::{CapabilityBridge, HostError};

pub use crate::limits::DEFAULT_MAX_IPC_MESSAGE_SIZE;

/// Messages sent from the sandbox to the trusted process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RuntimeMessage {
    /// Ask the trusted process to perform one capability.
    CapabilityRequest {
        /// Unique ID for correlating request and reply.
        request_id: u64,
        /// Capability name.
        method: String,
        /// Capability arguments.
        payload: Value,
    },
}

/// Messages sent from the trusted process to the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HostMessage {
    /// The outcome of a capability request.
    CapabilityReply {
        /// Matches the request_id of the request.
        request_id: u64,
        /// The reply, or an error message.
        result: Result<Value, String>,
    },
}

/// Write a length-delimited JSON message to an async writer.
pub async fn write_message<T: Serialize, W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg: &T,
) -> Result<(), std::io::Error> {
    let payload = serde_json::to_vec(msg)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len()).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("IPC payload too large: {} bytes (max {} bytes)", payload.len(), u32::MAX),
        )
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a length-delimited JSON message, rejecting frames over `max_size` bytes.
///
/// Returns `None` if the reader has reached EOF.
pub async fn read_message_with_limit<T: for<'de> Deserialize<'de>, R: AsyncRead + Unpin>(
    reader: &mut R,
    max_size: usize,
) -> Result<Option<T>, std::io::Error> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_size {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("IPC message too large: {} bytes (limit: {} bytes)", len, max_size),
        ));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    let msg: T = serde_json::from_slice(&payload)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(Some(msg))
}

type Waiter = oneshot::Sender<Result<Value, String>>;
type PendingMap = Arc<Mutex<HashMap<u64, Waiter>>>;
type Failure = Arc<Mutex<Option<String>>>;

/// Removes a waiter when its request future is dropped, whether it was
/// answered, timed out or cancelled.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.id);
    }
}

/// Sandbox-side [`CapabilityBridge`] speaking the frame protocol.
///
/// The background task spawned by [`IpcBridge::spawn`] owns both stream
/// halves. When the peer closes the stream every waiting request fails with
/// [`HostError::ChannelClosed`]. When a frame cannot be written they fail
/// with [`HostError::Transport`] carrying the write error.
pub struct IpcBridge {
    outbound: mpsc::UnboundedSender<RuntimeMessage>,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
    failure: Failure,
    next_id: AtomicU64,
}

impl IpcBridge {
    /// Start the transport over a reader/writer pair.
    pub fn spawn<R, W>(reader: R, writer: W, max_message_size: usize) -> (Self, JoinHandle<()>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, rx) = mpsc::unbounded_channel();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let failure: Failure = Arc::new(Mutex::new(None));

        let task = tokio::spawn(run_transport(
            reader,
            writer,
            rx,
            pending.clone(),
            closed.clone(),
            failure.clone(),
            max_message_size,
        ));

        let bridge = Self {
            outbound,
            pending,
            closed,
            failure,
            next_id: AtomicU64::new(1),
        };
        (bridge, task)
    }

    /// Requests still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        lock(&self.pending).len()
    }

    fn shutdown_error(&self) -> HostError {
        match lock(&self.failure).clone() {
            Some(reason) => HostError::Transport(reason),
            None => HostError::ChannelClosed,
        }
    }
}

async fn run_transport<R, W>(
    mut reader: R,
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<RuntimeMessage>,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
    failure: Failure,
    max_message_size: usize,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let write_loop = async {
        while let Some(msg) = outbound.recv().await {
            if let Err(e) = write_message(&mut writer, &msg).await {
                tracing::warn!(error = %e, "failed to send capability request");
                *lock(&failure) = Some(e.to_string());
                break;
            }
        }
    };

    let read_loop = async {
        loop {
            match read_message_with_limit::<HostMessage, _>(&mut reader, max_message_size).await {
                Ok(Some(HostMessage::CapabilityReply { request_id, result })) => {
                    let waiter = lock(&pending).remove(&request_id);
                    match waiter {
                        // The waiter may have timed out in between.
                        Some(waiter) => {
                            let _ = waiter.send(result);
                        }
                        None => tracing::debug!(request_id, "reply for unknown or expired request"),
                    }
                }
                Ok(None) => {
                    tracing::debug!("capability channel closed by peer");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "capability channel failed");
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = write_loop => {}
        _ = read_loop => {}
    }

    closed.store(true, Ordering::SeqCst);
    lock(&pending).clear();
}

#[async_trait::async_trait]
impl CapabilityBridge for IpcBridge {
    async fn request(&self, method: &str, payload: Value) -> Result<Value, HostError> {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(request_id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id: request_id,
        };

        if self.closed.load(Ordering::SeqCst) {
            return Err(self.shutdown_error());
        }
        self.outbound
            .send(RuntimeMessage::CapabilityRequest {
                request_id,
                method: method.to_string(),
                payload,
            })
            .map_err(|_| self.shutdown_error())?;

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(HostError::Remote {
                method: method.to_string(),
                message,
            }),
            Err(_) => Err(self.shutdown_error()),
        }
    }
}

/// Answer capability frames with `handler` until the sandbox closes the stream.
///
/// Each request is handled on its own task, so a slow capability does not
/// hold up the ones behind it. A handler that panics is answered with an
/// error instead of leaving the sandbox waiting.
pub async fn serve_capabilities<R, W>(
    mut reader: R,
    mut writer: W,
    handler: Arc<dyn CapabilityBridge>,
    max_message_size: usize,
) -> Result<(), std::io::Error>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<HostMessage>();

    let writer_task = tokio::spawn(async move {
        while let Some(reply) = reply_rx.recv().await {
            write_message(&mut writer, &reply).await?;
        }
        Ok::<(), std::io::Error>(())
    });

    let read_result = loop {
        match read_message_with_limit::<RuntimeMessage, _>(&mut reader, max_message_size).await {
            Ok(Some(RuntimeMessage::CapabilityRequest {
                request_id,
                method,
                payload,
            })) => {
                let handler = handler.clone();
                let reply_tx = reply_tx.clone();
                tokio::spawn(async move {
                    let call = {
                        let method = method.clone();
                        tokio::spawn(async move { handler.request(&method, payload).await })
                    };
                    let result = match call.await {
                        Ok(result) => result,
                        Err(join_err) => Err(HostError::Internal(
                            anyhow::Error::new(join_err).context("capability handler failed"),
                        )),
                    };
                    let result = result.map_err(|e| {
                        tracing::debug!(
                            request_id,
                            method = %method,
                            code = e.code(),
                            error = %e,
                            "capability failed"
                        );
                        e.to_string()
                    });
                    let _ = reply_tx.send(HostMessage::CapabilityReply { request_id, result });
                });
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };

    drop(reply_tx);
    match writer_task.await {
        Ok(write_result) => read_result.and(write_result),
        Err(join_err) => Err(std::io::Error::other(join_err)),
    }
}
