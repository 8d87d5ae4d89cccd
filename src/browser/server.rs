// src/browser/server.rs

//! Local WebSocket server that pushes refresh notifications to browser tabs.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::browser::connection::{BrowserConnection, ConnectionIds};
use crate::browser::messages;
use crate::browser::tls::{self, DevCertProbe};
use crate::browser::transport::WebSocketTransport;
use crate::errors::{DevWatchError, Result};
use crate::report::{Reporter, messages as msg};

/// Environment variable carrying the WebSocket endpoints to the app.
pub const ENDPOINT_ENV_VAR: &str = "ASPNETCORE_AUTO_RELOAD_WS_ENDPOINT";
/// Environment variable carrying the virtual directory the app is served from.
pub const VIRTUAL_DIRECTORY_ENV_VAR: &str = "ASPNETCORE_AUTO_RELOAD_VDIR";

const MAX_REQUEST_HEAD: usize = 16 * 1024;

const BAD_REQUEST: &[u8] =
    b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    NotStarted,
    Starting,
    Listening,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    fn http(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    fn websocket(self) -> &'static str {
        match self {
            Scheme::Http => "ws",
            Scheme::Https => "wss",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RefreshServerOptions {
    /// Replaces the host of every advertised WebSocket URL.
    pub host_override: Option<String>,
    /// Port for the preferred endpoint; others stay ephemeral.
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Copy)]
struct Endpoint {
    scheme: Scheme,
    address: SocketAddr,
}

#[derive(Debug, Default)]
struct Shared {
    ids: ConnectionIds,
    connections: Mutex<Vec<Arc<BrowserConnection>>>,
    connected: Notify,
    shutdown: CancellationToken,
}

impl Shared {
    fn register(&self, connection: Arc<BrowserConnection>) {
        lock(&self.connections).push(connection);
        self.connected.notify_waiters();
    }

    fn unregister(&self, id: u64) {
        lock(&self.connections).retain(|c| c.id() != id);
    }

    fn snapshot(&self) -> Vec<Arc<BrowserConnection>> {
        lock(&self.connections).clone()
    }

    fn prune(&self) {
        lock(&self.connections).retain(|c| !c.is_disconnected());
    }
}

pub struct BrowserRefreshServer {
    options: RefreshServerOptions,
    probe: Arc<dyn DevCertProbe>,
    reporter: Arc<dyn Reporter>,
    state: Mutex<ServerState>,
    endpoints: Mutex<Vec<Endpoint>>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for BrowserRefreshServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserRefreshServer")
            .field("state", &self.state())
            .field("endpoints", &*lock(&self.endpoints))
            .finish()
    }
}

impl BrowserRefreshServer {
    pub fn new(
        options: RefreshServerOptions,
        probe: Arc<dyn DevCertProbe>,
        ids: ConnectionIds,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            options,
            probe,
            reporter,
            state: Mutex::new(ServerState::NotStarted),
            endpoints: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            shared: Arc::new(Shared {
                ids,
                ..Shared::default()
            }),
        }
    }

    pub fn state(&self) -> ServerState {
        *lock(&self.state)
    }

    /// Bind the listeners and start accepting. HTTPS is added in front of
    /// HTTP when a trusted dev certificate is available.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = lock(&self.state);
            if *state != ServerState::NotStarted {
                return Err(DevWatchError::RefreshServer(format!(
                    "cannot start a server that is {:?}",
                    *state
                )));
            }
            *state = ServerState::Starting;
        }

        match self.bind_all().await {
            Ok(()) => {
                *lock(&self.state) = ServerState::Listening;
                info!(urls = ?self.websocket_urls(), "refresh server listening");
                Ok(())
            }
            Err(err) => {
                self.stop_listeners();
                *lock(&self.state) = ServerState::Stopped;
                Err(err)
            }
        }
    }

    async fn bind_all(&self) -> Result<()> {
        let acceptor = match self.probe.probe().await {
            Some(identity) => match tls::load_server_config(&identity) {
                Ok(config) => Some(TlsAcceptor::from(config)),
                Err(err) => {
                    warn!(error = %err, "dev certificate unusable, serving ws:// only");
                    None
                }
            },
            None => None,
        };

        let mut plan = Vec::new();
        if let Some(acceptor) = acceptor {
            plan.push((Scheme::Https, Some(acceptor)));
        }
        plan.push((Scheme::Http, None));

        for (index, (scheme, acceptor)) in plan.into_iter().enumerate() {
            let port = if index == 0 { self.options.port.unwrap_or(0) } else { 0 };
            let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
                .await
                .map_err(|e| {
                    DevWatchError::RefreshServer(format!(
                        "failed to bind {}://127.0.0.1:{port}: {e}",
                        scheme.http()
                    ))
                })?;
            let address = listener.local_addr()?;
            debug!(scheme = scheme.http(), %address, "refresh endpoint bound");

            lock(&self.endpoints).push(Endpoint { scheme, address });
            let shared = Arc::clone(&self.shared);
            lock(&self.listeners).push(tokio::spawn(accept_loop(listener, acceptor, shared)));
        }
        Ok(())
    }

    /// `http(s)://127.0.0.1:<port>` for every bound endpoint.
    pub fn server_urls(&self) -> Vec<String> {
        lock(&self.endpoints)
            .iter()
            .map(|e| format!("{}://{}", e.scheme.http(), e.address))
            .collect()
    }

    /// The URLs browsers connect to, preferred endpoint first.
    pub fn websocket_urls(&self) -> Vec<String> {
        lock(&self.endpoints)
            .iter()
            .map(|e| {
                let host = match &self.options.host_override {
                    Some(host) => host.clone(),
                    None if e.address.ip().is_loopback() => "localhost".to_string(),
                    None => e.address.ip().to_string(),
                };
                format!("{}://{}:{}", e.scheme.websocket(), host, e.address.port())
            })
            .collect()
    }

    /// Variables the launched application needs to inject the refresh script.
    pub fn environment(&self) -> Vec<(String, String)> {
        vec![
            (ENDPOINT_ENV_VAR.to_string(), self.websocket_urls().join(",")),
            (VIRTUAL_DIRECTORY_ENV_VAR.to_string(), "/".to_string()),
        ]
    }

    pub fn connection_count(&self) -> usize {
        lock(&self.shared.connections)
            .iter()
            .filter(|c| !c.is_disconnected())
            .count()
    }

    /// Wait until at least one browser is connected. False when cancelled.
    pub async fn wait_for_clients_to_connect(&self, cancel: &CancellationToken) -> bool {
        loop {
            let notified = self.shared.connected.notified();
            if self.connection_count() > 0 {
                return true;
            }
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = self.shared.shutdown.cancelled() => return false,
                _ = notified => {}
            }
        }
    }

    pub async fn send_reload_message(&self, cancel: &CancellationToken) -> usize {
        self.reporter.report(&msg::REFRESHING_BROWSER, &[]);
        self.send_to_all(messages::RELOAD_MESSAGE, cancel).await
    }

    pub async fn send_wait_message(&self, cancel: &CancellationToken) -> usize {
        self.send_to_all(messages::WAIT_MESSAGE, cancel).await
    }

    /// Push one update per static asset, by web-relative path.
    pub async fn update_static_assets<S: AsRef<str>>(
        &self,
        paths: &[S],
        cancel: &CancellationToken,
    ) -> usize {
        let mut delivered = 0;
        for path in paths {
            let path = path.as_ref();
            self.reporter
                .report(&msg::SENDING_STATIC_ASSET_UPDATE_REQUEST, &[&path]);
            delivered += self
                .send_to_all(&messages::update_static_file(path), cancel)
                .await;
        }
        delivered
    }

    /// Send `payload` to every live connection; returns how many accepted it.
    pub async fn send_to_all(&self, payload: &[u8], cancel: &CancellationToken) -> usize {
        let mut delivered = 0;
        for connection in self.shared.snapshot() {
            if connection.try_send_message(payload, cancel).await {
                delivered += 1;
            }
        }
        self.shared.prune();
        delivered
    }

    /// Send `request` to every connection and hand each reply to
    /// `on_response` with the connection id. Returns the number of replies.
    pub async fn send_and_receive<F>(
        &self,
        request: &[u8],
        mut on_response: F,
        cancel: &CancellationToken,
    ) -> usize
    where
        F: FnMut(u64, &[u8]),
    {
        let mut responses = 0;
        for connection in self.shared.snapshot() {
            if !connection.try_send_message(request, cancel).await {
                continue;
            }
            let id = connection.id();
            let received = connection
                .try_receive_message(|bytes, _span| on_response(id, bytes), cancel)
                .await;
            if received {
                responses += 1;
            } else if !cancel.is_cancelled() {
                self.reporter
                    .report(&msg::FAILED_TO_RECEIVE_RESPONSE_FROM_CONNECTED_BROWSER, &[]);
            }
        }
        self.shared.prune();
        responses
    }

    /// Stop accepting and close every connection.
    pub async fn shutdown(&self) {
        {
            let mut state = lock(&self.state);
            if *state == ServerState::Stopped {
                return;
            }
            *state = ServerState::Stopped;
        }
        self.shared.shutdown.cancel();
        self.stop_listeners();
        for connection in self.shared.snapshot() {
            connection.close().await;
        }
        lock(&self.shared.connections).clear();
        debug!("refresh server stopped");
    }

    fn stop_listeners(&self) {
        for handle in lock(&self.listeners).drain(..) {
            handle.abort();
        }
    }
}

impl Drop for BrowserRefreshServer {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
        self.stop_listeners();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn accept_loop(listener: TcpListener, acceptor: Option<TlsAcceptor>, shared: Arc<Shared>) {
    loop {
        let accepted = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                debug!(%peer, "refresh server accepted a connection");
                tokio::spawn(handle_stream(stream, acceptor.clone(), Arc::clone(&shared)));
            }
            Err(err) => warn!(error = %err, "refresh server accept failed"),
        }
    }
}

async fn handle_stream(stream: TcpStream, acceptor: Option<TlsAcceptor>, shared: Arc<Shared>) {
    match acceptor {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls) => serve(tls, shared).await,
            Err(err) => debug!(error = %err, "TLS handshake failed"),
        },
        None => serve(stream, shared).await,
    }
}

async fn serve<S>(mut stream: S, shared: Arc<Shared>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let head = match read_request_head(&mut stream).await {
        Ok(head) if !head.is_empty() => head,
        Ok(_) => return,
        Err(err) => {
            debug!(error = %err, "failed to read request");
            return;
        }
    };

    if !is_websocket_upgrade(&head) {
        debug!("rejecting non-WebSocket request");
        let _ = stream.write_all(BAD_REQUEST).await;
        let _ = stream.shutdown().await;
        return;
    }

    let mut sub_protocol = None;
    let negotiate = |request: &Request, mut response: Response| -> std::result::Result<Response, ErrorResponse> {
        let offered = offered_sub_protocols(request);
        if let [only] = offered.as_slice() {
            if let Ok(value) = HeaderValue::from_str(only) {
                response.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
                sub_protocol = Some(only.clone());
            }
        }
        Ok(response)
    };

    let socket = match tokio_tungstenite::accept_hdr_async(Rewind::new(head, stream), negotiate).await {
        Ok(socket) => socket,
        Err(err) => {
            debug!(error = %err, "WebSocket handshake failed");
            return;
        }
    };

    let connection = Arc::new(BrowserConnection::new(
        &shared.ids,
        Box::new(WebSocketTransport::new(socket)),
        sub_protocol,
    ));
    let id = connection.id();
    debug!(connection = id, "browser connected");
    shared.register(Arc::clone(&connection));

    tokio::select! {
        _ = connection.disconnected().cancelled() => {}
        _ = shared.shutdown.cancelled() => connection.close().await,
    }

    shared.unregister(id);
    debug!(connection = id, "browser disconnected");
}

fn offered_sub_protocols(request: &Request) -> Vec<String> {
    request
        .headers()
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}

async fn read_request_head<S: AsyncRead + Unpin>(stream: &mut S) -> io::Result<Vec<u8>> {
    let mut head = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Ok(head);
        }
        head.extend_from_slice(&chunk[..read]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") || head.len() >= MAX_REQUEST_HEAD {
            return Ok(head);
        }
    }
}

fn is_websocket_upgrade(head: &[u8]) -> bool {
    String::from_utf8_lossy(head)
        .lines()
        .skip(1)
        .take_while(|line| !line.is_empty())
        .filter_map(|line| line.split_once(':'))
        .any(|(name, value)| {
            name.trim().eq_ignore_ascii_case("upgrade")
                && value
                    .split(',')
                    .any(|token| token.trim().eq_ignore_ascii_case("websocket"))
        })
}

/// Replays bytes already read off `inner` before reading from it again.
struct Rewind<S> {
    prefix: Vec<u8>,
    position: usize,
    inner: S,
}

impl<S> Rewind<S> {
    fn new(prefix: Vec<u8>, inner: S) -> Self {
        Self {
            prefix,
            position: 0,
            inner,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Rewind<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        if this.position < this.prefix.len() {
            let remaining = &this.prefix[this.position..];
            let count = remaining.len().min(buf.remaining());
            buf.put_slice(&remaining[..count]);
            this.position += count;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Rewind<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
