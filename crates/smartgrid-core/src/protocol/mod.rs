//! Protocol module containing the command vocabulary and the wire envelope.

pub mod command;
pub mod envelope;

pub use command::{Command, CommandError, CommandRequest};
pub use envelope::{decode_envelope, encode_envelope, parse_identity_frame, CommandEnvelope, EnvelopeError};
