// src/browser/connection.rs

//! One browser tab's WebSocket session.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Span};

/// How long a graceful close may take before the socket is dropped anyway.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,
    #[error("{0}")]
    Protocol(String),
}

/// One frame read off the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketFrame {
    Data { bytes: Vec<u8>, end_of_message: bool },
    Close,
}

pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Text-frame duplex channel under a [`BrowserConnection`].
pub trait SocketTransport: Send {
    fn send_text<'a>(&'a mut self, payload: &'a [u8]) -> TransportFuture<'a, ()>;

    fn receive(&mut self) -> TransportFuture<'_, SocketFrame>;

    /// Send our close frame; no more sends after this.
    fn close_output(&mut self) -> TransportFuture<'_, ()>;
}

/// Source of connection ids, shared by every server of one watch session.
#[derive(Debug, Clone, Default)]
pub struct ConnectionIds(Arc<AtomicU64>);

impl ConnectionIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id; ids start at 1 and are never reused.
    pub fn next_id(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

pub struct BrowserConnection {
    id: u64,
    shared_secret: Option<String>,
    socket: Mutex<Option<Box<dyn SocketTransport>>>,
    disconnected: CancellationToken,
    span: Span,
}

impl fmt::Debug for BrowserConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrowserConnection")
            .field("id", &self.id)
            .field("has_shared_secret", &self.shared_secret.is_some())
            .field("disconnected", &self.disconnected.is_cancelled())
            .finish()
    }
}

impl BrowserConnection {
    pub fn new(
        ids: &ConnectionIds,
        socket: Box<dyn SocketTransport>,
        shared_secret: Option<String>,
    ) -> Self {
        let id = ids.next_id();
        Self {
            id,
            shared_secret,
            socket: Mutex::new(Some(socket)),
            disconnected: CancellationToken::new(),
            span: tracing::debug_span!("browser", connection = id),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Sub-protocol token the browser offered during the handshake.
    pub fn shared_secret(&self) -> Option<&str> {
        self.shared_secret.as_deref()
    }

    /// Cancelled once the connection is closed for any reason.
    pub fn disconnected(&self) -> &CancellationToken {
        &self.disconnected
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.is_cancelled()
    }

    /// Send one text message. Failures other than cancellation are logged
    /// and tear the connection down.
    pub async fn try_send_message(&self, payload: &[u8], cancel: &CancellationToken) -> bool {
        let result = {
            let mut guard = tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                guard = self.socket.lock() => guard,
            };
            let Some(socket) = guard.as_mut() else {
                return false;
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                result = socket.send_text(payload) => result,
            }
        };

        match result {
            Ok(()) => true,
            Err(err) => {
                debug!(parent: &self.span, error = %err, "failed to send message");
                self.close().await;
                false
            }
        }
    }

    /// Read one complete message, reassembling fragments, and hand it to
    /// `handler`. Returns false on a close frame, a transport failure or
    /// cancellation; the handler only runs on success.
    pub async fn try_receive_message<F>(&self, handler: F, cancel: &CancellationToken) -> bool
    where
        F: FnOnce(&[u8], &Span),
    {
        let mut buffer = Vec::new();
        let outcome = {
            let mut guard = tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                guard = self.socket.lock() => guard,
            };
            let Some(socket) = guard.as_mut() else {
                return false;
            };

            loop {
                let frame = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return false,
                    frame = socket.receive() => frame,
                };
                match frame {
                    Ok(SocketFrame::Data { bytes, end_of_message }) => {
                        buffer.extend_from_slice(&bytes);
                        if end_of_message {
                            break Ok(true);
                        }
                    }
                    Ok(SocketFrame::Close) => break Ok(false),
                    Err(err) => break Err(err),
                }
            }
        };

        match outcome {
            Ok(true) => {
                handler(&buffer, &self.span);
                true
            }
            Ok(false) => {
                debug!(parent: &self.span, "browser closed the connection");
                self.close().await;
                false
            }
            Err(err) => {
                debug!(parent: &self.span, error = %err, "failed to receive message");
                self.close().await;
                false
            }
        }
    }

    /// Close gracefully and release the socket. Safe to call more than once
    /// and from several tasks; only the first call touches the socket.
    pub async fn close(&self) {
        let socket = self.socket.lock().await.take();
        if let Some(mut socket) = socket {
            match tokio::time::timeout(CLOSE_TIMEOUT, socket.close_output()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => debug!(parent: &self.span, error = %err, "close failed"),
                Err(_) => debug!(parent: &self.span, "close timed out"),
            }
            drop(socket);
            debug!(parent: &self.span, "connection closed");
        }
        self.disconnected.cancel();
    }
}
