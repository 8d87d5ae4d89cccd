// src/browser/tls.rs

//! Development-certificate discovery for the `wss://` endpoint.

use std::fs::File;
use std::future::Future;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::errors::{DevWatchError, Result};

/// Upper bound on the certificate probe outside of test runs.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

const EXPORT_FILE_NAME: &str = "devwatch-dev-cert.pem";

/// PEM files of a trusted development certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsIdentity {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = Option<TlsIdentity>> + Send + 'a>>;

/// Answers "is a trusted dev certificate available?".
pub trait DevCertProbe: Send + Sync {
    fn probe(&self) -> ProbeFuture<'_>;
}

/// Never offers TLS.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDevCert;

impl DevCertProbe for NoDevCert {
    fn probe(&self) -> ProbeFuture<'_> {
        Box::pin(async { None })
    }
}

/// Exports the dev certificate with `dotnet dev-certs https`. The outcome
/// of the first probe is cached for the life of the probe.
#[derive(Debug)]
pub struct DotnetDevCertProbe {
    dotnet_path: PathBuf,
    export_directory: PathBuf,
    timeout: Option<Duration>,
    outcome: OnceCell<Option<TlsIdentity>>,
}

impl DotnetDevCertProbe {
    pub fn new(dotnet_path: impl Into<PathBuf>) -> Self {
        Self {
            dotnet_path: dotnet_path.into(),
            export_directory: std::env::temp_dir(),
            timeout: Some(PROBE_TIMEOUT),
            outcome: OnceCell::new(),
        }
    }

    pub fn with_export_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_directory = dir.into();
        self
    }

    /// `None` waits for the probe however long it takes.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self) -> Option<TlsIdentity> {
        let cert_path = self.export_directory.join(EXPORT_FILE_NAME);
        let key_path = cert_path.with_extension("key");

        let mut command = Command::new(&self.dotnet_path);
        command
            .args(["dev-certs", "https", "--export-path"])
            .arg(&cert_path)
            .args(["--format", "Pem", "--no-password"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let status = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, command.status()).await {
                Ok(status) => status,
                Err(_) => {
                    debug!(?limit, "dev certificate probe timed out");
                    return None;
                }
            },
            None => command.status().await,
        };

        match status {
            Ok(status) if status.success() && cert_path.is_file() && key_path.is_file() => {
                debug!(cert = %cert_path.display(), "dev certificate available");
                Some(TlsIdentity { cert_path, key_path })
            }
            Ok(status) => {
                debug!(%status, "no trusted dev certificate");
                None
            }
            Err(err) => {
                debug!(error = %err, "dev certificate probe failed to start");
                None
            }
        }
    }
}

impl DevCertProbe for DotnetDevCertProbe {
    fn probe(&self) -> ProbeFuture<'_> {
        Box::pin(async move { self.outcome.get_or_init(|| self.run()).await.clone() })
    }
}

/// Build a rustls server configuration from exported PEM files.
pub fn load_server_config(identity: &TlsIdentity) -> Result<Arc<rustls::ServerConfig>> {
    let certs = rustls_pemfile::certs(&mut open(&identity.cert_path)?)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(DevWatchError::RefreshServer(format!(
            "no certificate in {}",
            identity.cert_path.display()
        ))
        .into());
    }

    let key = rustls_pemfile::private_key(&mut open(&identity.key_path)?)?.ok_or_else(|| {
        DevWatchError::RefreshServer(format!(
            "no private key in {}",
            identity.key_path.display()
        ))
    })?;

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| DevWatchError::RefreshServer(e.to_string()))?
    .with_no_client_auth()
    .with_single_cert(certs, key)
    .map_err(|e| DevWatchError::RefreshServer(e.to_string()))?;

    Ok(Arc::new(config))
}

fn open(path: &Path) -> Result<BufReader<File>> {
    Ok(BufReader::new(File::open(path)?))
}
