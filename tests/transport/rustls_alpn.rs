//! Real TLS handshakes against a local rustls server with a self-signed
//! certificate for `localhost`.

use std::sync::Arc;

use h2_roundtrip::h2_codec::{H2Codec, H2Event, CONNECTION_PREFACE};
use h2_roundtrip::hpack::{H2Header, HpackDecoder, HpackEncoder};
use h2_roundtrip::{ClientConfig, Error, RustlsConnector, Transport};
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

use super::helpers::{get, init_tracing};

struct TestServer {
    acceptor: TlsAcceptor,
    listener: TcpListener,
    root: CertificateDer<'static>,
}

impl TestServer {
    async fn start(alpn: &[&str]) -> Self {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert = certified.cert.der().clone();
        let key = PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der());

        let mut server_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert.clone()], key.into())
            .unwrap();
        server_config.alpn_protocols = alpn.iter().map(|p| p.as_bytes().to_vec()).collect();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self {
            acceptor: TlsAcceptor::from(Arc::new(server_config)),
            listener,
            root: cert,
        }
    }

    fn port(&self) -> u16 {
        self.listener.local_addr().unwrap().port()
    }

    fn transport(&self) -> Transport<RustlsConnector> {
        let mut roots = rustls::RootCertStore::empty();
        roots.add(self.root.clone()).unwrap();
        let client_config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Transport::with_connector(ClientConfig::default(), RustlsConnector::new(Arc::new(client_config)))
    }

    async fn accept(&self) -> TlsStream<tokio::net::TcpStream> {
        let (tcp, _) = self.listener.accept().await.unwrap();
        self.acceptor.accept(tcp).await.unwrap()
    }
}

/// Answer one GET with `body`, then wait for the client to go away.
async fn serve_one(mut tls: TlsStream<tokio::net::TcpStream>, body: &[u8]) -> Vec<H2Header> {
    let mut preface = [0u8; 24];
    tls.read_exact(&mut preface).await.unwrap();
    assert_eq!(&preface[..], CONNECTION_PREFACE);

    tls.write_all(&H2Codec::create_settings(&[])).await.unwrap();
    tls.flush().await.unwrap();

    let mut codec = H2Codec::new();
    let mut decoder = HpackDecoder::new();
    let mut encoder = HpackEncoder::new();
    let mut buf = vec![0u8; 16 * 1024];
    let mut request = Vec::new();
    loop {
        // The client drops the socket without close_notify once it is done.
        let n = match tls.read(&mut buf).await {
            Ok(0) | Err(_) => return request,
            Ok(n) => n,
        };
        for event in codec.process(&buf[..n]).unwrap() {
            match event {
                H2Event::Settings { ack: false, .. } => {
                    tls.write_all(&H2Codec::create_settings_ack()).await.unwrap();
                }
                H2Event::Headers {
                    stream_id,
                    header_block,
                    ..
                } => {
                    request = decoder.decode(&header_block).unwrap();
                    let block = encoder.encode(&[H2Header::new(":status", "200")]);
                    tls.write_all(&H2Codec::create_headers_frame(stream_id, &block, false, true))
                        .await
                        .unwrap();
                    tls.write_all(&H2Codec::create_data_frame(stream_id, body, true))
                        .await
                        .unwrap();
                }
                _ => {}
            }
        }
        tls.flush().await.unwrap();
    }
}

#[tokio::test]
async fn test_server_without_alpn_is_bad_protocol() {
    init_tracing();
    let server = TestServer::start(&[]).await;
    let transport = server.transport();
    let uri = format!("https://localhost:{}/", server.port());

    let (result, _tls) = tokio::join!(transport.round_trip(get(&uri)), server.accept());

    let err = result.unwrap_err();
    assert!(
        matches!(err, Error::BadProtocol { ref expected, ref negotiated } if expected == "h2" && negotiated.is_empty()),
        "{err:?}"
    );
}

#[tokio::test]
async fn test_h2_round_trip_over_tls() {
    init_tracing();
    let server = TestServer::start(&["h2"]).await;
    let transport = server.transport();
    let uri = format!("https://localhost:{}/secure", server.port());

    let server_side = async {
        let tls = server.accept().await;
        assert_eq!(tls.get_ref().1.alpn_protocol(), Some(&b"h2"[..]));
        serve_one(tls, b"encrypted hello").await
    };
    let client_side = async {
        let response = transport.round_trip(get(&uri)).await.unwrap();
        assert_eq!(response.status(), 200);
        response.into_body().to_bytes().await.unwrap()
    };
    let (body, request) = tokio::join!(client_side, server_side);

    assert_eq!(&body[..], b"encrypted hello");
    let path = request.iter().find(|h| h.name == ":path").map(|h| h.value.as_str());
    assert_eq!(path, Some("/secure"));
    let scheme = request.iter().find(|h| h.name == ":scheme").map(|h| h.value.as_str());
    assert_eq!(scheme, Some("https"));
}
