//! Unit tests for the connection-info file format.

use spark_gateway::gateway::conn_info::{self, GatewayEndpoint};
use spark_gateway::GatewayError;

fn endpoint() -> GatewayEndpoint {
    GatewayEndpoint {
        port: 25333,
        secret: "s3cr3t".into(),
    }
}

#[test]
fn encodes_big_endian_layout() {
    let bytes = endpoint().encode();

    assert_eq!(&bytes[..4], &[0, 0, 0x62, 0xF5]);
    assert_eq!(&bytes[4..8], &[0, 0, 0, 6]);
    assert_eq!(&bytes[8..], b"s3cr3t");
}

#[test]
fn parses_complete_file() {
    let parsed = conn_info::parse(&endpoint().encode()).expect("valid file");

    assert_eq!(parsed, Some(endpoint()));
}

#[test]
fn incomplete_file_is_not_ready() {
    let bytes = endpoint().encode();

    for cut in [0, 3, 4, 7, 8, bytes.len() - 1] {
        let parsed = conn_info::parse(&bytes[..cut]).expect("partial file is not an error");
        assert!(parsed.is_none(), "cut at {cut} should not be ready");
    }
}

#[test]
fn empty_secret_is_accepted() {
    let bytes = GatewayEndpoint {
        port: 4000,
        secret: String::new(),
    }
    .encode();

    let parsed = conn_info::parse(&bytes).expect("valid file").expect("complete");
    assert_eq!(parsed.port, 4000);
    assert!(parsed.secret.is_empty());
}

#[test]
fn rejects_zero_and_out_of_range_ports() {
    let mut zero = endpoint().encode();
    zero[..4].copy_from_slice(&0_i32.to_be_bytes());
    assert!(matches!(conn_info::parse(&zero), Err(GatewayError::Launch(_))));

    let mut huge = endpoint().encode();
    huge[..4].copy_from_slice(&70_000_i32.to_be_bytes());
    assert!(matches!(conn_info::parse(&huge), Err(GatewayError::Launch(_))));
}

#[test]
fn rejects_negative_secret_length() {
    let mut bytes = endpoint().encode();
    bytes[4..8].copy_from_slice(&(-1_i32).to_be_bytes());

    let err = conn_info::parse(&bytes).expect_err("negative length");
    assert!(err.to_string().contains("secret length"));
}

#[test]
fn rejects_non_utf8_secret() {
    let mut bytes = 1234_i32.to_be_bytes().to_vec();
    bytes.extend_from_slice(&2_i32.to_be_bytes());
    bytes.extend_from_slice(&[0xFF, 0xFE]);

    assert!(matches!(conn_info::parse(&bytes), Err(GatewayError::Launch(_))));
}

#[test]
fn debug_output_redacts_secret() {
    let rendered = format!("{:?}", endpoint());

    assert!(rendered.contains("25333"));
    assert!(!rendered.contains("s3cr3t"));
}

#[tokio::test]
async fn missing_file_is_not_ready() {
    let dir = tempfile::tempdir().expect("tempdir");

    let parsed = conn_info::read(&dir.path().join("connection.info"))
        .await
        .expect("missing file is not an error");

    assert!(parsed.is_none());
}

#[tokio::test]
async fn reads_file_from_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("connection.info");
    std::fs::write(&path, endpoint().encode()).expect("write conn info");

    let parsed = conn_info::read(&path).await.expect("readable");

    assert_eq!(parsed, Some(endpoint()));
}
