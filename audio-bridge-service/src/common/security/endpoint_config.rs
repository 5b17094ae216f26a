use std::sync::Arc;

use quinn::{ServerConfig, TransportConfig, crypto::rustls::QuicServerConfig};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::common::app_config::AppConfig;

/// ALPN both sides of the bridge must agree on.
pub const BRIDGE_ALPN: &[u8] = b"voice-bridge/1";

pub fn create_server_config(
    app_config: &AppConfig,
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> anyhow::Result<ServerConfig> {
    let mut server_crypto = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    server_crypto.alpn_protocols = vec![BRIDGE_ALPN.to_vec()];

    let mut server_config =
        quinn::ServerConfig::with_crypto(Arc::new(QuicServerConfig::try_from(server_crypto)?));
    server_config.transport_config(Arc::new(transport_config(app_config)));
    tracing::debug!("Created server config: {:?}", server_config);
    Ok(server_config)
}

fn transport_config(app_config: &AppConfig) -> TransportConfig {
    let mut transport = TransportConfig::default();
    // No unidirectional streams are needed.
    transport.max_concurrent_uni_streams(0_u8.into());
    // Room for one subscriber queue worth of 1200 byte audio datagrams
    let datagram_buffer = app_config.subscriber_queue_capacity.max(1) * 1200;
    transport.datagram_receive_buffer_size(Some(datagram_buffer));
    transport.datagram_send_buffer_size(datagram_buffer);

    // one stream per control request; the window must fit the largest request
    transport.max_concurrent_bidi_streams(5_u8.into());
    transport.stream_receive_window(2048_u32.into());
    transport
}
