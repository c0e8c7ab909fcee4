//! Unit tests for the control-channel line codec and answer parsing.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use spark_gateway::gateway::channel::{parse_answer, PROBE_COMMAND, SHUTDOWN_COMMAND};
use spark_gateway::gateway::codec::{GatewayCodec, MAX_LINE_BYTES};
use spark_gateway::GatewayError;

#[test]
fn decodes_one_answer_line() {
    let mut codec = GatewayCodec::new();
    let mut buf = BytesMut::from("!yv\n");

    let line = codec.decode(&mut buf).expect("decode");

    assert_eq!(line.as_deref(), Some("!yv"));
    assert!(buf.is_empty());
}

#[test]
fn partial_answer_is_buffered() {
    let mut codec = GatewayCodec::new();
    let mut buf = BytesMut::from("!yro");

    assert_eq!(codec.decode(&mut buf).expect("decode"), None);

    buf.extend_from_slice(b"0\n");
    assert_eq!(
        codec.decode(&mut buf).expect("decode").as_deref(),
        Some("!yro0")
    );
}

#[test]
fn encodes_multi_line_command_with_terminator() {
    let mut codec = GatewayCodec::new();
    let mut buf = BytesMut::new();

    codec
        .encode(SHUTDOWN_COMMAND.to_owned(), &mut buf)
        .expect("encode");

    assert_eq!(&buf[..], b"s\ne\n");
}

#[test]
fn probe_command_ends_with_end_marker() {
    assert!(PROBE_COMMAND.ends_with("\ne"));
}

#[test]
fn oversized_line_is_a_channel_error() {
    let mut codec = GatewayCodec::new();
    let mut buf = BytesMut::from(vec![b'y'; MAX_LINE_BYTES + 1].as_slice());

    let err = codec.decode(&mut buf).expect_err("line too long");

    assert!(matches!(err, GatewayError::Channel(msg) if msg.contains("line too long")));
}

#[test]
fn success_answers_return_payload() {
    assert_eq!(parse_answer("!yv").expect("success"), "v");
    assert_eq!(parse_answer("yro0").expect("success"), "ro0");
}

#[test]
fn error_answers_are_channel_errors() {
    let err = parse_answer("!xsome failure").expect_err("error answer");

    assert!(matches!(err, GatewayError::Channel(msg) if msg.contains("some failure")));
}

#[test]
fn unknown_answers_are_rejected() {
    assert!(parse_answer("").is_err());
    assert!(parse_answer("!").is_err());
    assert!(parse_answer("hello").is_err());
}
