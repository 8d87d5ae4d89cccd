// tests/refresh_server.rs

mod common;
use crate::common::{eventually, init_tracing, with_timeout, TestResult};

use std::path::PathBuf;
use std::sync::Arc;

use devwatch::browser::connection::ConnectionIds;
use devwatch::browser::server::{
    BrowserRefreshServer, RefreshServerOptions, ServerState, ENDPOINT_ENV_VAR,
    VIRTUAL_DIRECTORY_ENV_VAR,
};
use devwatch::browser::tls::{DevCertProbe, NoDevCert, ProbeFuture, TlsIdentity};
use devwatch::report::{messages, Reporter};
use devwatch_test_utils::recording_reporter::RecordingReporter;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Probe that claims a certificate exists but points at nothing usable.
#[derive(Debug)]
struct BrokenDevCert;

impl DevCertProbe for BrokenDevCert {
    fn probe(&self) -> ProbeFuture<'_> {
        Box::pin(async {
            Some(TlsIdentity {
                cert_path: PathBuf::from("/nonexistent/devwatch.pem"),
                key_path: PathBuf::from("/nonexistent/devwatch.key"),
            })
        })
    }
}

fn server_with(
    options: RefreshServerOptions,
    probe: Arc<dyn DevCertProbe>,
) -> (BrowserRefreshServer, Arc<RecordingReporter>) {
    let reporter = Arc::new(RecordingReporter::new());
    let server = BrowserRefreshServer::new(
        options,
        probe,
        ConnectionIds::new(),
        Arc::clone(&reporter) as Arc<dyn Reporter>,
    );
    (server, reporter)
}

async fn started() -> (BrowserRefreshServer, Arc<RecordingReporter>) {
    let (server, reporter) = server_with(RefreshServerOptions::default(), Arc::new(NoDevCert));
    server.start().await.expect("server starts");
    (server, reporter)
}

fn ws_address(server: &BrowserRefreshServer) -> String {
    server.server_urls()[0].replacen("http://", "ws://", 1)
}

async fn connect(server: &BrowserRefreshServer) -> Client {
    let (client, _response) = connect_async(ws_address(server)).await.expect("client connects");
    client
}

async fn next_text(client: &mut Client) -> String {
    loop {
        match client.next().await {
            Some(Ok(Message::Text(text))) => return text.to_string(),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            other => panic!("expected a text message, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn without_a_dev_certificate_only_plain_http_is_bound() {
    init_tracing();
    let (server, _reporter) = started().await;

    assert_eq!(server.state(), ServerState::Listening);
    let urls = server.server_urls();
    assert_eq!(urls.len(), 1);
    assert!(urls[0].starts_with("http://127.0.0.1:"), "{urls:?}");
    let port = urls[0].rsplit(':').next().unwrap().to_string();
    assert_ne!(port, "0");

    assert_eq!(server.websocket_urls(), vec![format!("ws://localhost:{port}")]);
    assert_eq!(
        server.environment(),
        vec![
            (ENDPOINT_ENV_VAR.to_string(), format!("ws://localhost:{port}")),
            (VIRTUAL_DIRECTORY_ENV_VAR.to_string(), "/".to_string()),
        ]
    );
    server.shutdown().await;
}

#[tokio::test]
async fn unusable_certificate_falls_back_to_plain_http() {
    let (server, _reporter) = server_with(RefreshServerOptions::default(), Arc::new(BrokenDevCert));
    server.start().await.expect("server starts");

    let urls = server.websocket_urls();
    assert_eq!(urls.len(), 1);
    assert!(urls[0].starts_with("ws://localhost:"), "{urls:?}");
    server.shutdown().await;
}

#[tokio::test]
async fn host_override_replaces_the_advertised_host() {
    let options = RefreshServerOptions {
        host_override: Some("devbox.internal".to_string()),
        port: None,
    };
    let (server, _reporter) = server_with(options, Arc::new(NoDevCert));
    server.start().await.expect("server starts");

    let url = &server.websocket_urls()[0];
    assert!(url.starts_with("ws://devbox.internal:"), "{url}");
    server.shutdown().await;
}

#[tokio::test]
async fn occupied_port_fails_to_start() -> TestResult {
    let taken = TcpListener::bind("127.0.0.1:0").await?;
    let port = taken.local_addr()?.port();
    let options = RefreshServerOptions {
        host_override: None,
        port: Some(port),
    };
    let (server, _reporter) = server_with(options, Arc::new(NoDevCert));

    assert!(server.start().await.is_err());
    assert_eq!(server.state(), ServerState::Stopped);
    assert!(server.start().await.is_err());
    Ok(())
}

#[tokio::test]
async fn starting_twice_is_an_error() {
    let (server, _reporter) = started().await;
    assert!(server.start().await.is_err());
    assert_eq!(server.state(), ServerState::Listening);
    server.shutdown().await;
}

#[tokio::test]
async fn connected_browser_receives_reload_and_wait() {
    init_tracing();
    let (server, reporter) = started().await;
    let mut client = connect(&server).await;
    let cancel = CancellationToken::new();

    assert!(with_timeout(server.wait_for_clients_to_connect(&cancel)).await);
    assert_eq!(server.connection_count(), 1);

    assert_eq!(server.send_reload_message(&cancel).await, 1);
    assert_eq!(with_timeout(next_text(&mut client)).await, "Reload");
    assert!(reporter.contains(&messages::REFRESHING_BROWSER));

    assert_eq!(server.send_wait_message(&cancel).await, 1);
    assert_eq!(with_timeout(next_text(&mut client)).await, "Wait");
    server.shutdown().await;
}

#[tokio::test]
async fn static_asset_updates_are_sent_as_json() {
    let (server, reporter) = started().await;
    let mut first = connect(&server).await;
    let mut second = connect(&server).await;
    let cancel = CancellationToken::new();
    assert!(eventually(|| server.connection_count() == 2).await);

    let delivered = server
        .update_static_assets(&["wwwroot/css/site.css"], &cancel)
        .await;
    assert_eq!(delivered, 2);

    for client in [&mut first, &mut second] {
        let text = with_timeout(next_text(client)).await;
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "UpdateStaticFile");
        assert_eq!(value["path"], "wwwroot/css/site.css");
    }
    assert_eq!(
        reporter.texts(&messages::SENDING_STATIC_ASSET_UPDATE_REQUEST),
        vec!["Sending static asset update request to connected browsers: 'wwwroot/css/site.css'.".to_string()]
    );
    server.shutdown().await;
}

#[tokio::test]
async fn responses_are_collected_per_connection() {
    let (server, _reporter) = started().await;
    let mut client = connect(&server).await;
    let cancel = CancellationToken::new();
    assert!(with_timeout(server.wait_for_clients_to_connect(&cancel)).await);

    let browser = tokio::spawn(async move {
        let request = next_text(&mut client).await;
        client
            .send(Message::Text(format!("ack:{request}").into()))
            .await
            .unwrap();
        client
    });

    let mut responses = Vec::new();
    let count = with_timeout(server.send_and_receive(
        b"ping",
        |id, bytes| responses.push((id, bytes.to_vec())),
        &cancel,
    ))
    .await;

    assert_eq!(count, 1);
    assert_eq!(responses, vec![(1, b"ack:ping".to_vec())]);
    let _client = browser.await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn single_offered_sub_protocol_is_echoed() {
    let (server, _reporter) = started().await;
    let mut request = ws_address(&server).into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", "c2VjcmV0".parse().unwrap());

    let (_client, response) = with_timeout(connect_async(request)).await.expect("connects");

    assert_eq!(
        response
            .headers()
            .get("Sec-WebSocket-Protocol")
            .and_then(|v| v.to_str().ok()),
        Some("c2VjcmV0")
    );
    server.shutdown().await;
}

#[tokio::test]
async fn plain_http_request_gets_400() -> TestResult {
    let (server, _reporter) = started().await;
    let address = server.server_urls()[0].replacen("http://", "", 1);

    let mut stream = TcpStream::connect(address).await?;
    stream
        .write_all(b"GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await?;
    let mut response = Vec::new();
    with_timeout(stream.read_to_end(&mut response)).await?;

    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 400"), "{text}");
    assert_eq!(server.connection_count(), 0);
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn shutdown_closes_browsers_and_stops_accepting() {
    let (server, _reporter) = started().await;
    let mut client = connect(&server).await;
    let cancel = CancellationToken::new();
    assert!(with_timeout(server.wait_for_clients_to_connect(&cancel)).await);
    let address = server.server_urls()[0].replacen("http://", "", 1);

    server.shutdown().await;

    assert_eq!(server.state(), ServerState::Stopped);
    assert_eq!(server.connection_count(), 0);
    let closed = with_timeout(async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break true,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed);
    assert_eq!(server.send_reload_message(&cancel).await, 0);
    assert!(!with_timeout(server.wait_for_clients_to_connect(&cancel)).await);

    let reconnect = connect_async(format!("ws://{address}")).await;
    assert!(reconnect.is_err());
}
