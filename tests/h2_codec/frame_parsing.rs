//! Tests for HTTP/2 frame header parsing and incremental buffering

use h2_roundtrip::h2_codec::{flags, frame_type, H2Codec, H2Event, H2FrameHeader};
use h2_roundtrip::Error;

use super::frame;

#[test]
fn test_frame_header_headers() {
    // HEADERS frame, length 10, stream 3, END_HEADERS
    let header_bytes = [0, 0, 10, 1, 4, 0, 0, 0, 3];
    let header = H2FrameHeader::parse(&header_bytes).unwrap();

    assert_eq!(header.length, 10);
    assert_eq!(header.frame_type, frame_type::HEADERS);
    assert_eq!(header.stream_id, 3);
    assert!(!header.is_end_stream());
    assert!(header.is_end_headers());
    assert_eq!(header.type_name(), "HEADERS");
}

#[test]
fn test_total_size() {
    let header = H2FrameHeader {
        length: 100,
        frame_type: frame_type::DATA,
        flags: 0,
        stream_id: 1,
    };
    assert_eq!(header.total_size(), 109); // 9 + 100
}

#[test]
fn test_fragmented_frame_waits_for_payload() {
    let mut codec = H2Codec::new();
    let bytes = frame(frame_type::DATA, flags::END_STREAM, 1, b"hello");

    assert!(codec.process(&bytes[..4]).unwrap().is_empty());
    assert!(codec.peek_frame_header().is_none());
    assert!(codec.process(&bytes[4..11]).unwrap().is_empty());
    assert_eq!(codec.peek_frame_header().unwrap().length, 5);

    let events = codec.process(&bytes[11..]).unwrap();
    assert_eq!(events.len(), 1);
    match &events[0] {
        H2Event::Data { stream_id, data, end_stream, .. } => {
            assert_eq!(*stream_id, 1);
            assert_eq!(data, b"hello");
            assert!(*end_stream);
        }
        other => panic!("Expected Data event, got {other:?}"),
    }
    assert_eq!(codec.buffered_len(), 0);
}

#[test]
fn test_multiple_frames_in_single_process() {
    let mut codec = H2Codec::new();
    let mut data = frame(frame_type::SETTINGS, 0, 0, &[]);
    data.extend(frame(frame_type::PING, 0, 0, &[1; 8]));
    data.extend(frame(frame_type::DATA, 0, 1, b"a"));

    let events = codec.process(&data).unwrap();
    assert_eq!(events.len(), 3);
    assert!(matches!(events[0], H2Event::Settings { ack: false, .. }));
    assert!(matches!(events[1], H2Event::Ping { ack: false, .. }));
    assert!(matches!(events[2], H2Event::Data { stream_id: 1, .. }));
}

#[test]
fn test_empty_data_frame() {
    let mut codec = H2Codec::new();
    let events = codec
        .process(&frame(frame_type::DATA, flags::END_STREAM, 3, &[]))
        .unwrap();
    match &events[0] {
        H2Event::Data {
            stream_id,
            data,
            end_stream,
            flow_controlled_len,
        } => {
            assert_eq!(*stream_id, 3);
            assert!(data.is_empty());
            assert!(*end_stream);
            assert_eq!(*flow_controlled_len, 0);
        }
        other => panic!("Expected Data event, got {other:?}"),
    }
}

#[test]
fn test_padded_data_frame_invalid_padding() {
    let mut codec = H2Codec::new();
    // Pad length 10 but only 2 payload bytes follow it.
    let data = frame(frame_type::DATA, flags::PADDED, 1, &[10, b'a', b'b']);
    let err = codec.process(&data).unwrap_err();
    assert!(matches!(err, Error::Protocol(ref m) if m.contains("padding")), "{err}");
}

#[test]
fn test_data_on_stream_zero_rejected() {
    let mut codec = H2Codec::new();
    let err = codec.process(&frame(frame_type::DATA, 0, 0, b"x")).unwrap_err();
    assert!(err.to_string().contains("stream 0"), "{err}");
}

#[test]
fn test_frame_larger_than_local_limit_rejected() {
    let mut codec = H2Codec::with_limits(32, 1024);
    // Only the header is needed to reject it.
    let data = frame(frame_type::DATA, 0, 1, &[0; 33]);
    let err = codec.process(&data[..9]).unwrap_err();
    assert!(err.to_string().contains("exceeds max frame size 32"), "{err}");
}
