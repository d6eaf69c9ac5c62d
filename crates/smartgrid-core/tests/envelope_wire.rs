//! Integration tests for the command path through the public API.
//!
//! These follow one command from the JSON body a control-plane caller posts,
//! through validation, onto the wire, and back out on the device side.

use smartgrid_core::{
    decode_envelope, encode_envelope, parse_identity_frame, Command, CommandError,
    CommandRequest, EnvelopeError,
};

/// A legacy app body (`toggleBreaker` + numeric `breakerId`) must reach the
/// device as the canonical kebab-case envelope.
#[test]
fn test_legacy_request_body_becomes_canonical_envelope() {
    // Arrange
    let body = r#"{"command":"toggleBreaker","breakerId":5}"#;
    let request: CommandRequest = serde_json::from_str(body).expect("body must parse");

    // Act
    let command = Command::from_request(&request).expect("request must validate");
    let wire = encode_envelope(&command).expect("encode");

    // Assert
    assert_eq!(wire, r#"{"command":"toggle-breaker","breaker_reference":"5"}"#);
}

/// The device decodes exactly the command the service validated.
#[test]
fn test_device_side_decode_matches_service_side_command() {
    let request = CommandRequest::new("flash-indicator");
    let command = Command::from_request(&request).unwrap();

    let wire = encode_envelope(&command).unwrap();
    let received = decode_envelope(&wire).unwrap();

    assert_eq!(received, Command::FlashIndicator);
}

/// Validation happens before encoding: an incomplete toggle never produces a
/// wire frame at all.
#[test]
fn test_incomplete_toggle_fails_before_encoding() {
    let request = CommandRequest::new("toggle-breaker");
    let result = Command::from_request(&request);
    assert_eq!(
        result,
        Err(CommandError::MissingBreakerReference("toggle-breaker"))
    );
}

/// A device that sends its identifier with a trailing newline still binds
/// under the trimmed identifier.
#[test]
fn test_identity_frame_with_newline_yields_trimmed_identifier() {
    let id = parse_identity_frame(b"AA:BB\n").unwrap();
    assert_eq!(id.to_string(), "AA:BB");
}

#[test]
fn test_envelope_with_unknown_command_is_rejected_by_device() {
    let result = decode_envelope(r#"{"command":"reboot"}"#);
    assert!(matches!(
        result,
        Err(EnvelopeError::Command(CommandError::Unknown(ref name))) if name == "reboot"
    ));
}
