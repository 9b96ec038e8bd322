use crate::error::ProtocolError;
use crate::message::{lookup, ControlAction, Message, MessageKind, MODELS, VERSIONS};

/// Encode a message into a single frame.
pub fn encode(message: &Message) -> Vec<u8> {
    let tag = message.kind().tag();
    match message {
        Message::Handshake { version, model } => {
            vec![tag, lookup(VERSIONS, version), lookup(MODELS, model)]
        }
        Message::Audio(bytes) => with_tag(tag, bytes),
        Message::Text(text) | Message::Error(text) => with_tag(tag, text.as_bytes()),
        Message::Control(action) => vec![tag, action.to_byte()],
        Message::Metadata(value) => with_tag(tag, value.to_string().as_bytes()),
        Message::Ping => vec![tag],
    }
}

/// Decode a frame.
///
/// Total over any non-empty input: an unknown control byte falls back to
/// `Control(Start)` and an unknown tag byte yields `Text` over the whole
/// frame, tag included.
pub fn decode(frame: &[u8]) -> Result<Message, ProtocolError> {
    let (&tag, payload) = frame.split_first().ok_or(ProtocolError::EmptyFrame)?;

    let kind = match MessageKind::from_tag(tag) {
        Some(kind) => kind,
        None => {
            tracing::warn!("unknown message tag byte: 0x{:02x}", tag);
            return Ok(Message::Text(String::from_utf8_lossy(frame).into_owned()));
        }
    };

    let message = match kind {
        MessageKind::Handshake => {
            let version = payload.first().copied().unwrap_or(0);
            let model = payload.get(1).copied().unwrap_or(0);
            Message::Handshake {
                version: version.to_string(),
                model: model.to_string(),
            }
        }
        MessageKind::Audio => Message::Audio(payload.to_vec()),
        MessageKind::Text => Message::Text(String::from_utf8_lossy(payload).into_owned()),
        MessageKind::Control => {
            let byte = payload.first().copied().unwrap_or(0);
            match ControlAction::from_byte(byte) {
                Some(action) => Message::Control(action),
                None => {
                    tracing::warn!("unknown control action byte: {}", byte);
                    Message::Control(ControlAction::Start)
                }
            }
        }
        MessageKind::Metadata => match serde_json::from_slice(payload) {
            Ok(value) => Message::Metadata(value),
            Err(e) => {
                tracing::warn!(
                    "failed to parse metadata JSON: {}, text=> {:?}",
                    e,
                    String::from_utf8_lossy(payload)
                );
                Message::Metadata(serde_json::Value::Null)
            }
        },
        MessageKind::Error => Message::Error(String::from_utf8_lossy(payload).into_owned()),
        MessageKind::Ping => Message::Ping,
    };
    Ok(message)
}

fn with_tag(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(1 + payload.len());
    frame.push(tag);
    frame.extend_from_slice(payload);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip_every_kind() {
        let messages = vec![
            Message::handshake("0", "0"),
            Message::audio(vec![0x4f, 0x67, 0x67, 0x53, 0x00, 0xff]),
            Message::text("hello world."),
            Message::control(ControlAction::Pause),
            Message::Metadata(json!({ "text_temperature": 0.7, "tags": ["a", "b"] })),
            Message::Error("model overloaded".to_string()),
            Message::Ping,
        ];
        for message in messages {
            let frame = encode(&message);
            assert_eq!(frame[0], message.kind().tag());
            assert_eq!(decode(&frame).unwrap(), message);
        }
    }

    #[test]
    fn test_handshake_layout() {
        assert_eq!(encode(&Message::handshake("0", "0")), vec![0x00, 0x00, 0x00]);
        // unknown keys fall back to byte 0
        assert_eq!(encode(&Message::handshake("7", "big")), vec![0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_short_handshake_defaults_missing_bytes() {
        assert_eq!(decode(&[0x00]).unwrap(), Message::handshake("0", "0"));
    }

    #[test]
    fn test_ping_is_a_single_byte() {
        assert_eq!(encode(&Message::Ping), vec![0x06]);
    }

    #[test]
    fn test_empty_frame_is_an_error() {
        assert_eq!(decode(&[]), Err(ProtocolError::EmptyFrame));
    }

    #[test]
    fn test_unknown_tag_decodes_whole_frame_as_text() {
        let frame = b"Hello";
        assert_eq!(frame[0], b'H');
        assert_eq!(decode(frame).unwrap(), Message::text("Hello"));
    }

    #[test]
    fn test_unknown_control_byte_defaults_to_start() {
        assert_eq!(
            decode(&[0x03, 0x2a]).unwrap(),
            Message::Control(ControlAction::Start)
        );
        assert_eq!(decode(&[0x03]).unwrap(), Message::Control(ControlAction::Start));
    }

    #[test]
    fn test_bad_metadata_decodes_to_null() {
        let mut frame = vec![0x04];
        frame.extend_from_slice(b"{not json");
        assert_eq!(
            decode(&frame).unwrap(),
            Message::Metadata(serde_json::Value::Null)
        );
    }

    #[test]
    fn test_invalid_utf8_text_is_replaced() {
        let decoded = decode(&[0x02, b'o', 0xff, b'k']).unwrap();
        assert_eq!(decoded, Message::Text("o\u{fffd}k".to_string()));
    }
}
