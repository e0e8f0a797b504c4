use thiserror::Error;

// Unified error type for fixlink

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("no ack from any controller within {0} ms")]
    RegistrationTimeout(f64),
    #[error("no packet from controller within {0} ms")]
    Timeout(f64),
    #[error("malformed packet: {0}")]
    MalformedPacket(String),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("response carried {got} fixes for {expected} atoms")]
    LengthMismatch { expected: usize, got: usize },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("bad fix argument: {0}")]
    BadArgument(String),
}
