use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use audio_bridge_service::app::App;
use audio_bridge_service::common::app_config::{AppConfig, Environment};
use audio_bridge_service::common::security::endpoint_config::BRIDGE_ALPN;
use bytes::Bytes;
use lib_common_bridge::types::{ControlRequest, ControlResponse, HANDSHAKE_ACK, HelloRequest};
use quinn::crypto::rustls::QuicClientConfig;
use rustls::pki_types::CertificateDer;

struct Rig {
    app: &'static App,
    addr: SocketAddr,
    client: quinn::Endpoint,
    _dir: tempfile::TempDir,
}

async fn start_rig() -> Rig {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let dir = tempfile::tempdir().unwrap();
    let key_pair = rcgen::KeyPair::generate().unwrap();
    let cert = rcgen::CertificateParams::new(vec!["localhost".to_string()])
        .unwrap()
        .self_signed(&key_pair)
        .unwrap();
    let cert_path = dir.path().join("server.pem");
    let key_path = dir.path().join("server.key");
    std::fs::write(&cert_path, cert.pem()).unwrap();
    std::fs::write(&key_path, key_pair.serialize_pem()).unwrap();

    let config = AppConfig {
        environment: Environment::Development,
        key: key_path,
        cert: cert_path,
        listen: "127.0.0.1:0".parse().unwrap(),
        connection_limit: 10,
        log_level: "debug".into(),
        log_file: PathBuf::new(),
        tokio_console: false,
        subscriber_queue_capacity: 64,
        publish_queue_capacity: 256,
        max_update_retries: 64,
        empty_session_ttl_secs: 0,
    };
    let app: &'static App = App::new(config);
    let endpoint = app.create_endpoint().unwrap();
    let addr = endpoint.local_addr().unwrap();
    tokio::spawn(app.serve(endpoint));

    let mut roots = rustls::RootCertStore::empty();
    roots.add(CertificateDer::from(cert.der().to_vec())).unwrap();
    let mut client_crypto = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    client_crypto.alpn_protocols = vec![BRIDGE_ALPN.to_vec()];
    let mut client = quinn::Endpoint::client("127.0.0.1:0".parse().unwrap()).unwrap();
    client.set_default_client_config(quinn::ClientConfig::new(Arc::new(
        QuicClientConfig::try_from(client_crypto).unwrap(),
    )));

    Rig {
        app,
        addr,
        client,
        _dir: dir,
    }
}

async fn exchange(connection: &quinn::Connection, body: &[u8]) -> anyhow::Result<Vec<u8>> {
    let (mut send, mut recv) = connection.open_bi().await?;
    send.write_all(body).await?;
    send.finish()?;
    Ok(recv.read_to_end(4096).await?)
}

async fn join_channel(rig: &Rig, channel: &str) -> quinn::Connection {
    let connection = rig
        .client
        .connect(rig.addr, "localhost")
        .unwrap()
        .await
        .unwrap();
    let hello = serde_json::to_vec(&HelloRequest::new(channel)).unwrap();
    assert_eq!(exchange(&connection, &hello).await.unwrap(), HANDSHAKE_ACK);
    connection
}

async fn control(connection: &quinn::Connection, request: ControlRequest) -> ControlResponse {
    let body = serde_json::to_vec(&request).unwrap();
    let raw = exchange(connection, &body).await.unwrap();
    serde_json::from_slice(&raw).unwrap()
}

#[tokio::test]
async fn datagrams_cross_a_bridged_session() {
    let rig = start_rig().await;
    let alpha = join_channel(&rig, "alpha").await;
    let beta = join_channel(&rig, "beta").await;

    let started = control(&alpha, ControlRequest::Start).await;
    assert!(started.ok, "{}", started.message);
    let session_id = started.session_id.unwrap();

    for connection in [&alpha, &beta] {
        let joined = control(
            connection,
            ControlRequest::Connect {
                session_id: session_id.clone(),
            },
        )
        .await;
        assert!(joined.ok, "{}", joined.message);
    }

    let heard = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            alpha
                .send_datagram(Bytes::from_static(b"frame"))
                .unwrap();
            tokio::select! {
                datagram = beta.read_datagram() => return datagram.unwrap(),
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
            }
        }
    })
    .await
    .expect("beta should hear alpha");
    assert_eq!(heard, Bytes::from_static(b"frame"));

    let left = control(
        &alpha,
        ControlRequest::Disconnect {
            session_id: session_id.clone(),
        },
    )
    .await;
    assert!(left.ok, "{}", left.message);
    assert!(!rig.app.directory.is_attached("alpha"));

    let closed = control(&beta, ControlRequest::Disconnect { session_id }).await;
    assert!(closed.message.starts_with("This was the last client"));
    assert_eq!(rig.app.registry.session_count().await, 0);

    tokio::time::timeout(Duration::from_secs(5), rig.app.shutdown())
        .await
        .expect("shutdown should finish");
}

#[tokio::test]
async fn duplicate_channel_and_garbage_are_refused() {
    let rig = start_rig().await;
    let first = join_channel(&rig, "alpha").await;

    let second = rig
        .client
        .connect(rig.addr, "localhost")
        .unwrap()
        .await
        .unwrap();
    let hello = serde_json::to_vec(&HelloRequest::new("alpha")).unwrap();
    assert!(exchange(&second, &hello).await.is_err());

    let raw = exchange(&first, b"not json").await.unwrap();
    let response: ControlResponse = serde_json::from_slice(&raw).unwrap();
    assert!(!response.ok);

    let help = control(&first, ControlRequest::Help).await;
    assert!(help.ok);

    first.close(0u32.into(), b"bye");
    tokio::time::timeout(Duration::from_secs(5), rig.app.shutdown())
        .await
        .expect("shutdown should finish");
    assert!(!rig.app.directory.contains("alpha"));
}

#[tokio::test]
async fn sessions_nobody_joins_are_reaped() {
    let rig = start_rig().await;
    let alpha = join_channel(&rig, "alpha").await;

    let started = control(&alpha, ControlRequest::Start).await;
    assert!(started.ok, "{}", started.message);
    assert_eq!(rig.app.registry.session_count().await, 1);

    tokio::spawn(rig.app.reap_empty_sessions(Duration::ZERO));
    tokio::time::timeout(Duration::from_secs(5), async {
        while rig.app.registry.session_count().await > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("empty session should be reaped");

    let late = control(
        &alpha,
        ControlRequest::Connect {
            session_id: started.session_id.unwrap(),
        },
    )
    .await;
    assert_eq!(late.message, "SessionID not found");

    tokio::time::timeout(Duration::from_secs(5), rig.app.shutdown())
        .await
        .expect("shutdown should finish");
}
