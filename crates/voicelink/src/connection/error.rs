#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("not connected")]
    NotConnected,
    #[error("failed to connect after {0} attempts; reset required")]
    Failed(u32),
    #[error("connection manager has shut down")]
    Closed,
}
