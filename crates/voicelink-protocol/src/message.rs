use std::fmt;

/// Protocol version keys understood by the server and their wire bytes.
pub const VERSIONS: &[(&str, u8)] = &[("0", 0b0000_0000)];

/// Model keys understood by the server and their wire bytes.
pub const MODELS: &[(&str, u8)] = &[("0", 0b0000_0000)];

pub const DEFAULT_VERSION: &str = "0";
pub const DEFAULT_MODEL: &str = "0";

/// Tag byte leading every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Handshake = 0x00,
    Audio = 0x01,
    Text = 0x02,
    Control = 0x03,
    Metadata = 0x04,
    Error = 0x05,
    Ping = 0x06,
}

impl MessageKind {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x00 => Some(Self::Handshake),
            0x01 => Some(Self::Audio),
            0x02 => Some(Self::Text),
            0x03 => Some(Self::Control),
            0x04 => Some(Self::Metadata),
            0x05 => Some(Self::Error),
            0x06 => Some(Self::Ping),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Handshake => "handshake",
            MessageKind::Audio => "audio",
            MessageKind::Text => "text",
            MessageKind::Control => "control",
            MessageKind::Metadata => "metadata",
            MessageKind::Error => "error",
            MessageKind::Ping => "ping",
        };
        f.write_str(name)
    }
}

/// Turn-taking actions carried by control frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ControlAction {
    #[default]
    Start,
    EndTurn,
    Pause,
    Restart,
}

impl ControlAction {
    pub fn to_byte(self) -> u8 {
        match self {
            ControlAction::Start => 0b0000_0000,
            ControlAction::EndTurn => 0b0000_0001,
            ControlAction::Pause => 0b0000_0010,
            ControlAction::Restart => 0b0000_0011,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0b0000_0000 => Some(ControlAction::Start),
            0b0000_0001 => Some(ControlAction::EndTurn),
            0b0000_0010 => Some(ControlAction::Pause),
            0b0000_0011 => Some(ControlAction::Restart),
            _ => None,
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControlAction::Start => "start",
            ControlAction::EndTurn => "endTurn",
            ControlAction::Pause => "pause",
            ControlAction::Restart => "restart",
        };
        f.write_str(name)
    }
}

/// A single protocol message. Exactly one kind is active per value.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Handshake { version: String, model: String },
    Audio(Vec<u8>),
    Text(String),
    Control(ControlAction),
    /// Arbitrary JSON. A payload that fails to parse decodes as `Value::Null`.
    Metadata(serde_json::Value),
    Error(String),
    Ping,
}

impl Message {
    pub fn handshake(version: &str, model: &str) -> Self {
        Message::Handshake {
            version: version.to_string(),
            model: model.to_string(),
        }
    }

    pub fn audio(bytes: impl Into<Vec<u8>>) -> Self {
        Message::Audio(bytes.into())
    }

    pub fn text(text: &str) -> Self {
        Message::Text(text.to_string())
    }

    pub fn control(action: ControlAction) -> Self {
        Message::Control(action)
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Handshake { .. } => MessageKind::Handshake,
            Message::Audio(_) => MessageKind::Audio,
            Message::Text(_) => MessageKind::Text,
            Message::Control(_) => MessageKind::Control,
            Message::Metadata(_) => MessageKind::Metadata,
            Message::Error(_) => MessageKind::Error,
            Message::Ping => MessageKind::Ping,
        }
    }
}

pub(crate) fn lookup(table: &[(&str, u8)], key: &str) -> u8 {
    table
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, byte)| *byte)
        .unwrap_or(0)
}
