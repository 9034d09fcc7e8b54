//! Webhook signature unit tests

use dockhand::errors::EngineError;
use dockhand::webhooks::signature::{sign, verify_signature, verify_token};
use tokio_test::{assert_err, assert_ok};

#[test]
fn test_signature_round_trip() {
    let body = br#"{"ref":"refs/heads/main"}"#;
    let header = sign(b"whsec", body).unwrap();

    assert!(header.starts_with("sha256="));
    assert_ok!(verify_signature(b"whsec", body, Some(&header)));
}

#[test]
fn test_signature_rejects_tampering() {
    let header = sign(b"whsec", b"original").unwrap();

    let err = verify_signature(b"whsec", b"tampered", Some(&header)).unwrap_err();
    assert!(matches!(err, EngineError::AuthError(_)));
    assert_err!(verify_signature(b"other", b"original", Some(&header)));
    assert_err!(verify_signature(b"whsec", b"original", None));
    assert_err!(verify_signature(b"whsec", b"original", Some("sha1=abc")));
}

#[test]
fn test_gitlab_token() {
    assert_ok!(verify_token(b"gl-token", Some("gl-token")));
    assert_err!(verify_token(b"gl-token", Some("gl-tokem")));
    assert_err!(verify_token(b"gl-token", None));
}
