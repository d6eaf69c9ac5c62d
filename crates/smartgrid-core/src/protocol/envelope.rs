//! Wire format between the service and a device.
//!
//! Two kinds of frames exist:
//!
//! 1. **Identity frame** (device → service, exactly once, first message):
//!    the raw identifier string, no envelope.
//!
//!    ```text
//!    AA:BB:CC:DD:EE:FF
//!    ```
//!
//! 2. **Command envelope** (service → device, any number of times): a JSON
//!    object with the canonical command name and an optional breaker
//!    reference.
//!
//!    ```json
//!    {"command":"toggle-breaker","breaker_reference":"3"}
//!    ```
//!
//! There is no response envelope.  Delivery status is known to the service
//! only through the result of the transport write.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::catalog::{Identifier, IdentifierError};
use crate::protocol::command::{Command, CommandError};

/// Errors from encoding or decoding wire frames.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("envelope JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("envelope carries an invalid command: {0}")]
    Command(#[from] CommandError),

    #[error("identity frame is not valid UTF-8")]
    NotUtf8,

    #[error("identity frame carries an invalid identifier: {0}")]
    Identifier(#[from] IdentifierError),
}

/// JSON shape of a command on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breaker_reference: Option<String>,
}

impl From<&Command> for CommandEnvelope {
    fn from(cmd: &Command) -> Self {
        Self {
            command: cmd.name().to_string(),
            breaker_reference: cmd.breaker_reference().map(str::to_string),
        }
    }
}

impl TryFrom<CommandEnvelope> for Command {
    type Error = CommandError;

    fn try_from(envelope: CommandEnvelope) -> Result<Self, Self::Error> {
        Command::from_parts(&envelope.command, envelope.breaker_reference.as_deref())
    }
}

/// Encodes a validated command into the JSON text sent to the device.
///
/// # Errors
///
/// Returns [`EnvelopeError::Json`] if serialization fails.
///
/// # Examples
///
/// ```rust
/// use smartgrid_core::{encode_envelope, Command};
///
/// let text = encode_envelope(&Command::Ping).unwrap();
/// assert_eq!(text, r#"{"command":"ping"}"#);
/// ```
pub fn encode_envelope(cmd: &Command) -> Result<String, EnvelopeError> {
    Ok(serde_json::to_string(&CommandEnvelope::from(cmd))?)
}

/// Decodes an envelope received by a device back into a [`Command`].
///
/// # Errors
///
/// Returns [`EnvelopeError::Json`] for malformed JSON and
/// [`EnvelopeError::Command`] for an unknown or incomplete command.
pub fn decode_envelope(text: &str) -> Result<Command, EnvelopeError> {
    let envelope: CommandEnvelope = serde_json::from_str(text)?;
    Ok(Command::try_from(envelope)?)
}

/// Parses the first frame a device sends into its [`Identifier`].
///
/// # Errors
///
/// Returns [`EnvelopeError::NotUtf8`] when the payload is not UTF-8 and
/// [`EnvelopeError::Identifier`] when the text fails identifier validation.
pub fn parse_identity_frame(payload: &[u8]) -> Result<Identifier, EnvelopeError> {
    let text = std::str::from_utf8(payload).map_err(|_| EnvelopeError::NotUtf8)?;
    Ok(Identifier::parse(text)?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
