//! Tests for HTTP/2 frame building

use h2_roundtrip::h2_codec::{error_code, flags, frame_type, settings_id, H2Codec, H2FrameHeader, CONNECTION_PREFACE};

#[test]
fn test_connection_preface_bytes() {
    assert_eq!(CONNECTION_PREFACE, b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n");
    assert_eq!(CONNECTION_PREFACE.len(), 24);
}

#[test]
fn test_create_rst_stream() {
    let frame = H2Codec::create_rst_stream(1, error_code::CANCEL);
    assert_eq!(frame.len(), 13);
    assert_eq!(&frame[0..3], &[0, 0, 4]);
    assert_eq!(frame[3], frame_type::RST_STREAM);
    assert_eq!(&frame[9..], &[0, 0, 0, 8]);
}

#[test]
fn test_create_settings_ack() {
    let frame = H2Codec::create_settings_ack();
    assert_eq!(frame.len(), 9);
    assert_eq!(&frame[0..3], &[0, 0, 0]);
    assert_eq!(frame[3], frame_type::SETTINGS);
    assert_eq!(frame[4], flags::ACK);
}

#[test]
fn test_create_settings_empty() {
    let frame = H2Codec::create_settings(&[]);
    assert_eq!(frame.len(), 9);
    assert_eq!(frame[3], frame_type::SETTINGS);
    assert_eq!(frame[4], 0);
}

#[test]
fn test_create_settings_with_values() {
    let frame = H2Codec::create_settings(&[(settings_id::ENABLE_PUSH, 0), (settings_id::INITIAL_WINDOW_SIZE, 1_048_576)]);
    assert_eq!(frame.len(), 9 + 12);
    assert_eq!(&frame[9..15], &[0, 2, 0, 0, 0, 0]);
    assert_eq!(&frame[15..21], &[0, 4, 0, 0x10, 0, 0]);
}

#[test]
fn test_create_ping_ack() {
    let data = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];
    let frame = H2Codec::create_ping_ack(data);
    assert_eq!(frame.len(), 17);
    assert_eq!(frame[3], frame_type::PING);
    assert_eq!(frame[4], flags::ACK);
    assert_eq!(&frame[9..], &data);
}

#[test]
fn test_create_window_update() {
    let frame = H2Codec::create_window_update(7, 32768);
    assert_eq!(frame.len(), 13);
    assert_eq!(frame[3], frame_type::WINDOW_UPDATE);
    assert_eq!(H2FrameHeader::parse(&frame).unwrap().stream_id, 7);
    assert_eq!(&frame[9..], &[0, 0, 0x80, 0]);
}

#[test]
fn test_continuation_end_headers_flag() {
    let payload = b"header-data";
    let with_flag = H2Codec::create_continuation_frame(1, payload, true);
    let without_flag = H2Codec::create_continuation_frame(1, payload, false);
    assert_eq!(with_flag[3], frame_type::CONTINUATION);
    assert_eq!(with_flag[4], flags::END_HEADERS);
    assert_eq!(without_flag[4], 0);
}

#[test]
fn test_header_block_fits_one_frame() {
    let frames = H2Codec::create_header_block_frames(1, &[0x82, 0x87], 16_384, false);
    assert_eq!(frames.len(), 1);
    let header = H2FrameHeader::parse(&frames[0]).unwrap();
    assert_eq!(header.frame_type, frame_type::HEADERS);
    assert!(header.is_end_headers());
    assert!(!header.is_end_stream());
}

#[test]
fn test_header_block_split_flags() {
    let block = vec![0xAA; 25];
    let frames = H2Codec::create_header_block_frames(3, &block, 10, true);
    let headers: Vec<H2FrameHeader> = frames.iter().map(|f| H2FrameHeader::parse(f).unwrap()).collect();

    assert_eq!(headers.len(), 3);
    assert_eq!(headers.iter().map(|h| h.length).collect::<Vec<_>>(), vec![10, 10, 5]);

    assert_eq!(headers[0].frame_type, frame_type::HEADERS);
    assert!(headers[0].is_end_stream());
    assert!(!headers[0].is_end_headers());

    for h in &headers[1..] {
        assert_eq!(h.frame_type, frame_type::CONTINUATION);
        assert_eq!(h.stream_id, 3);
        // CONTINUATION has no END_STREAM flag; bit 0x1 must stay clear.
        assert_eq!(h.flags & flags::END_STREAM, 0);
    }
    assert!(!headers[1].is_end_headers());
    assert!(headers[2].is_end_headers());
}

#[test]
fn test_data_frames_split_and_end_stream_on_last() {
    let frames = H2Codec::create_data_frames(1, &[7; 21], 10);
    let headers: Vec<H2FrameHeader> = frames.iter().map(|f| H2FrameHeader::parse(f).unwrap()).collect();
    assert_eq!(headers.iter().map(|h| h.length).collect::<Vec<_>>(), vec![10, 10, 1]);
    assert_eq!(
        headers.iter().map(|h| h.is_end_stream()).collect::<Vec<_>>(),
        vec![false, false, true]
    );
}

#[test]
fn test_empty_body_is_single_end_stream_frame() {
    let frames = H2Codec::create_data_frames(5, &[], 16_384);
    assert_eq!(frames.len(), 1);
    let header = H2FrameHeader::parse(&frames[0]).unwrap();
    assert_eq!(header.length, 0);
    assert!(header.is_end_stream());
}
