// src/browser/mod.rs

//! Browser integration: the refresh WebSocket server, its connections, and
//! launching a browser once the app is up.

pub mod connection;
pub mod connector;
pub mod launcher;
pub mod messages;
pub mod server;
pub mod tls;
pub mod transport;

pub use connection::{BrowserConnection, ConnectionIds, SocketFrame, SocketTransport, TransportError};
pub use connector::{BrowserConnector, BrowserLaunchSettings, BrowserRefresher, LaunchedProjects};
pub use launcher::{BrowserLauncher, BrowserOpener, SystemBrowserOpener};
pub use server::{BrowserRefreshServer, RefreshServerOptions, ServerState};
pub use tls::{DevCertProbe, DotnetDevCertProbe, NoDevCert, TlsIdentity};
