//! The fixed set of commands a device understands.
//!
//! Callers hand the dispatcher a loosely typed [`CommandRequest`] (whatever
//! arrived in an HTTP body); [`Command::from_request`] validates it into the
//! strongly typed [`Command`] before anything touches a transport.
//!
//! # Command names
//!
//! | Canonical (wire)   | Legacy alias     | Needs breaker reference |
//! |--------------------|------------------|-------------------------|
//! | `ping`             | `pingDevice`     | no                      |
//! | `flash-indicator`  | `flashLED`       | no                      |
//! | `toggle-breaker`   | `toggleBreaker`  | yes                     |
//!
//! Legacy aliases are what the first firmware/app generation used; they are
//! accepted on input only.  The envelope always carries the canonical name.

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Caller input errors, detected before any I/O.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command {0:?}")]
    Unknown(String),
    #[error("command {0:?} requires a breaker reference")]
    MissingBreakerReference(&'static str),
}

/// A command request as received from the control plane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    /// Breaker targeted by `toggle-breaker`.  Accepts the legacy numeric
    /// `breakerId` field as well.
    #[serde(
        default,
        alias = "breakerId",
        deserialize_with = "deserialize_reference",
        skip_serializing_if = "Option::is_none"
    )]
    pub breaker_reference: Option<String>,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            breaker_reference: None,
        }
    }

    pub fn with_breaker(mut self, breaker_reference: impl Into<String>) -> Self {
        self.breaker_reference = Some(breaker_reference.into());
        self
    }
}

/// A validated device command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Liveness probe; the device typically blinks once or replies on its console.
    Ping,
    /// Flash the panel's status indicator so an installer can find it.
    FlashIndicator,
    /// Flip the state of one breaker.
    ToggleBreaker { breaker_reference: String },
}

impl Command {
    pub const PING: &'static str = "ping";
    pub const FLASH_INDICATOR: &'static str = "flash-indicator";
    pub const TOGGLE_BREAKER: &'static str = "toggle-breaker";

    /// Canonical wire name of this command.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping => Self::PING,
            Command::FlashIndicator => Self::FLASH_INDICATOR,
            Command::ToggleBreaker { .. } => Self::TOGGLE_BREAKER,
        }
    }

    /// Breaker reference carried by the command, if any.
    pub fn breaker_reference(&self) -> Option<&str> {
        match self {
            Command::ToggleBreaker { breaker_reference } => Some(breaker_reference),
            _ => None,
        }
    }

    /// Validates a request into a command.
    ///
    /// A blank breaker reference counts as missing.  A breaker reference
    /// supplied with a command that does not use one is ignored.
    ///
    /// # Errors
    ///
    /// - [`CommandError::Unknown`] for a name outside the fixed set.
    /// - [`CommandError::MissingBreakerReference`] for `toggle-breaker`
    ///   without a breaker reference.
    pub fn from_request(request: &CommandRequest) -> Result<Self, CommandError> {
        Self::from_parts(&request.command, request.breaker_reference.as_deref())
    }

    pub(crate) fn from_parts(name: &str, breaker_reference: Option<&str>) -> Result<Self, CommandError> {
        match name.trim() {
            "ping" | "pingDevice" => Ok(Command::Ping),
            "flash-indicator" | "flashLED" => Ok(Command::FlashIndicator),
            "toggle-breaker" | "toggleBreaker" => {
                let reference = breaker_reference
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .ok_or(CommandError::MissingBreakerReference(Self::TOGGLE_BREAKER))?;
                Ok(Command::ToggleBreaker {
                    breaker_reference: reference.to_string(),
                })
            }
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

/// Accepts either a JSON string or a JSON integer for the breaker reference.
fn deserialize_reference<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Reference {
        Text(String),
        Number(i64),
    }

    Ok(Option::<Reference>::deserialize(deserializer)?.map(|r| match r {
        Reference::Text(s) => s,
        Reference::Number(n) => n.to_string(),
    }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_request_ping() {
        let cmd = Command::from_request(&CommandRequest::new("ping")).unwrap();
        assert_eq!(cmd, Command::Ping);
        assert_eq!(cmd.name(), "ping");
    }

    #[test]
    fn test_from_request_accepts_legacy_aliases() {
        assert_eq!(
            Command::from_request(&CommandRequest::new("pingDevice")),
            Ok(Command::Ping)
        );
        assert_eq!(
            Command::from_request(&CommandRequest::new("flashLED")),
            Ok(Command::FlashIndicator)
        );
        assert_eq!(
            Command::from_request(&CommandRequest::new("toggleBreaker").with_breaker("3")),
            Ok(Command::ToggleBreaker {
                breaker_reference: "3".to_string()
            })
        );
    }

    #[test]
    fn test_toggle_breaker_without_reference_is_rejected() {
        let result = Command::from_request(&CommandRequest::new("toggle-breaker"));
        assert_eq!(
            result,
            Err(CommandError::MissingBreakerReference("toggle-breaker"))
        );
    }

    #[test]
    fn test_toggle_breaker_with_blank_reference_is_rejected() {
        let result = Command::from_request(&CommandRequest::new("toggle-breaker").with_breaker("  "));
        assert!(matches!(result, Err(CommandError::MissingBreakerReference(_))));
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        let result = Command::from_request(&CommandRequest::new("self-destruct"));
        assert_eq!(result, Err(CommandError::Unknown("self-destruct".to_string())));
    }

    #[test]
    fn test_breaker_reference_ignored_for_ping() {
        let cmd = Command::from_request(&CommandRequest::new("ping").with_breaker("4")).unwrap();
        assert_eq!(cmd.breaker_reference(), None);
    }

    #[test]
    fn test_request_deserializes_legacy_numeric_breaker_id() {
        let req: CommandRequest =
            serde_json::from_str(r#"{"command":"toggleBreaker","breakerId":12}"#).unwrap();
        assert_eq!(req.breaker_reference.as_deref(), Some("12"));
    }

    #[test]
    fn test_request_deserializes_without_breaker_reference() {
        let req: CommandRequest = serde_json::from_str(r#"{"command":"ping"}"#).unwrap();
        assert_eq!(req, CommandRequest::new("ping"));
    }
}
