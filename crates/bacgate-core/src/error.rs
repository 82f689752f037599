use thiserror::Error;

/// Errors produced while decoding an event envelope.
///
/// Required-field problems fail the decode; optional fields never do.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid event encoding")]
    InvalidEncoding,
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{0}` has the wrong type")]
    InvalidType(&'static str),
    #[error("field `{0}` has an invalid value")]
    InvalidValue(&'static str),
    #[error("unknown message type `{0}`")]
    UnknownMessageType(String),
}
