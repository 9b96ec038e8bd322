/// Errors produced while decoding inbound frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty frame received")]
    EmptyFrame,
}
