//! Preface and SETTINGS exchange

use h2_roundtrip::h2_codec::{flags, frame_type, settings_id, H2Codec};
use h2_roundtrip::{ClientConfig, ClientConnection, Error};

use super::helpers::{init_tracing, pair};

#[tokio::test]
async fn test_handshake_exchanges_settings() {
    init_tracing();
    let (io, mut peer) = pair();
    let config = ClientConfig::default();

    let server = async {
        let client_settings = peer.accept(&[(settings_id::MAX_FRAME_SIZE, 32_768)]).await;
        let (ack, payload) = peer.expect_frame(frame_type::SETTINGS).await;
        (client_settings, ack, payload)
    };
    let (conn, (client_settings, ack, ack_payload)) = tokio::join!(ClientConnection::handshake(io, &config), server);

    let conn = conn.unwrap();
    assert_eq!(client_settings, vec![(settings_id::ENABLE_PUSH, 0)]);
    assert_eq!(ack.flags, flags::ACK);
    assert!(ack_payload.is_empty());
    assert_eq!(conn.peer_settings().max_frame_size, 32_768);
    assert_eq!(conn.open_streams(), 0);
}

#[tokio::test]
async fn test_non_settings_first_frame_fails_without_request() {
    init_tracing();
    let (io, mut peer) = pair();
    let config = ClientConfig::default();

    let server = async {
        peer.read_preface().await;
        let (settings, _) = peer.read_frame().await.unwrap();
        assert_eq!(settings.frame_type, frame_type::SETTINGS);
        peer.send(&H2Codec::create_ping_ack([0; 8])).await;
    };
    let (result, _) = tokio::join!(ClientConnection::handshake(io, &config), server);

    let err = result.unwrap_err();
    assert!(
        matches!(err, Error::UnexpectedFrame { expected: "SETTINGS", got: "PING" }),
        "{err:?}"
    );
    // The client side is gone and nothing followed the SETTINGS frame.
    assert!(peer.read_frame().await.is_none());
}

#[tokio::test]
async fn test_settings_ack_as_first_frame_rejected() {
    init_tracing();
    let (io, mut peer) = pair();
    let config = ClientConfig::default();

    let server = async {
        peer.read_preface().await;
        peer.read_frame().await.unwrap();
        peer.send(&H2Codec::create_settings_ack()).await;
    };
    let (result, _) = tokio::join!(ClientConnection::handshake(io, &config), server);
    assert!(matches!(result.unwrap_err(), Error::Protocol(_)));
}

#[tokio::test]
async fn test_unknown_settings_are_ignored() {
    let (io, mut peer) = pair();
    let config = ClientConfig::default();

    let settings = [(0x99, 5), (settings_id::MAX_CONCURRENT_STREAMS, 100), (settings_id::INITIAL_WINDOW_SIZE, 1 << 20)];
    let (conn, _) = tokio::join!(ClientConnection::handshake(io, &config), peer.accept(&settings));

    let peer_settings = conn.unwrap().peer_settings();
    assert_eq!(peer_settings.max_concurrent_streams, Some(100));
    assert_eq!(peer_settings.max_frame_size, 16_384);
}

#[tokio::test]
async fn test_out_of_range_max_frame_size_rejected() {
    let (io, mut peer) = pair();
    let config = ClientConfig::default();

    let (result, _) = tokio::join!(
        ClientConnection::handshake(io, &config),
        peer.accept(&[(settings_id::MAX_FRAME_SIZE, 100)])
    );
    let err = result.unwrap_err();
    assert!(err.to_string().contains("SETTINGS_MAX_FRAME_SIZE 100"), "{err}");
}

#[tokio::test]
async fn test_peer_closing_during_handshake() {
    let (io, mut peer) = pair();
    let config = ClientConfig::default();

    let server = async move {
        peer.read_preface().await;
        peer.read_frame().await.unwrap();
        peer.close();
    };
    let (result, _) = tokio::join!(ClientConnection::handshake(io, &config), server);
    assert!(matches!(result.unwrap_err(), Error::ConnectionLost(_)));
}

#[tokio::test]
async fn test_server_settings_split_across_reads() {
    let (io, mut peer) = pair();
    let config = ClientConfig::default();

    let server = async {
        peer.read_preface().await;
        peer.read_frame().await.unwrap();
        let settings = H2Codec::create_settings(&[(settings_id::MAX_FRAME_SIZE, 20_000)]);
        peer.send(&settings[..5]).await;
        tokio::task::yield_now().await;
        peer.send(&settings[5..]).await;
    };
    let (conn, _) = tokio::join!(ClientConnection::handshake(io, &config), server);
    assert_eq!(conn.unwrap().peer_settings().max_frame_size, 20_000);
}
