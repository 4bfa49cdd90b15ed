//! Unit tests for the worker line codec.
//!
//! Covers:
//! - whole lines decode without their terminator
//! - `\r\n` terminators are accepted
//! - partial input is buffered until the newline arrives
//! - over-long lines are dropped without an error
//! - a trailing unterminated line is flushed at EOF
//! - a line that is not UTF-8 is dropped without an error

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use taqeem_bridge::worker::codec::{WorkerCodec, MAX_LINE_BYTES};

#[test]
fn whole_line_decodes_without_newline() {
    let mut codec = WorkerCodec::new();
    let mut buf = BytesMut::from("{\"commandId\":0,\"status\":\"SUCCESS\"}\n");

    let line = codec.decode(&mut buf).expect("decode");

    assert_eq!(line.as_deref(), Some("{\"commandId\":0,\"status\":\"SUCCESS\"}"));
    assert!(buf.is_empty());
}

#[test]
fn crlf_terminator_is_stripped() {
    let mut codec = WorkerCodec::new();
    let mut buf = BytesMut::from("{\"a\":1}\r\n{\"b\":2}\r\n");

    assert_eq!(codec.decode(&mut buf).expect("first").as_deref(), Some("{\"a\":1}"));
    assert_eq!(codec.decode(&mut buf).expect("second").as_deref(), Some("{\"b\":2}"));
    assert_eq!(codec.decode(&mut buf).expect("drained"), None);
}

#[test]
fn partial_line_is_buffered_until_newline() {
    let mut codec = WorkerCodec::new();
    let mut buf = BytesMut::from("{\"commandId\":");

    assert_eq!(codec.decode(&mut buf).expect("partial"), None);

    buf.extend_from_slice(b"7,\"status\":\"SUCCESS\"}\n{\"nex");
    assert_eq!(
        codec.decode(&mut buf).expect("complete").as_deref(),
        Some("{\"commandId\":7,\"status\":\"SUCCESS\"}")
    );
    // The start of the next line stays buffered.
    assert_eq!(codec.decode(&mut buf).expect("next partial"), None);
}

#[test]
fn over_long_line_is_dropped_and_the_next_line_decodes() {
    let mut codec = WorkerCodec::new();
    let mut buf = BytesMut::from(vec![b'x'; MAX_LINE_BYTES + 1].as_slice());

    assert_eq!(codec.decode(&mut buf).expect("still discarding"), None);

    buf.extend_from_slice(b"xxxx\n{\"commandId\":3,\"status\":\"SUCCESS\"}\n");
    assert_eq!(
        codec.decode(&mut buf).expect("line after the overlong one").as_deref(),
        Some("{\"commandId\":3,\"status\":\"SUCCESS\"}")
    );
}

#[test]
fn unterminated_tail_is_flushed_at_eof() {
    let mut codec = WorkerCodec::new();
    let mut buf = BytesMut::from("{\"status\":\"FATAL\"}");

    assert_eq!(codec.decode(&mut buf).expect("no newline yet"), None);
    assert_eq!(
        codec.decode_eof(&mut buf).expect("eof").as_deref(),
        Some("{\"status\":\"FATAL\"}")
    );
}

#[test]
fn invalid_utf8_line_is_dropped_and_decoding_continues() {
    let mut codec = WorkerCodec::new();
    let mut buf = BytesMut::from(
        &b"stray \xff\xfe debug\n{\"commandId\":2,\"status\":\"SUCCESS\"}\n"[..],
    );

    assert_eq!(
        codec.decode(&mut buf).expect("bad line is not an error").as_deref(),
        Some("{\"commandId\":2,\"status\":\"SUCCESS\"}")
    );
    assert!(buf.is_empty());
}

#[test]
fn invalid_utf8_tail_at_eof_is_dropped() {
    let mut codec = WorkerCodec::new();
    let mut buf = BytesMut::from(&b"\xc3\x28"[..]);

    assert_eq!(codec.decode_eof(&mut buf).expect("eof"), None);
}
