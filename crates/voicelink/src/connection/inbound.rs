use voicelink_protocol::Message;

/// A decoded inbound message, routed to the one consumer that handles its kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Transcript tokens.
    Text(String),
    /// Audio for an optional playback sink.
    Audio(Vec<u8>),
    /// Server-reported error. Surfaced to the user; the socket stays open.
    ServerError(String),
    /// Handshake, control, metadata and ping frames. Informational only.
    Observed(Message),
}

impl From<Message> for Inbound {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => Inbound::Text(text),
            Message::Audio(bytes) => Inbound::Audio(bytes),
            Message::Error(error) => Inbound::ServerError(error),
            other => Inbound::Observed(other),
        }
    }
}
