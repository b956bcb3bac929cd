//! WebSocket frame encoding/decoding
//!
//! Wire format: one JSON object per text frame.
//! Binary frames holding UTF-8 JSON are accepted as well.
//! Control frames never reach the protocol layer.

use serde::{de::DeserializeOwned, Serialize};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::error::{Error, Result};

/// A decoded inbound frame
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound<T> {
    /// A protocol message
    Message(T),
    /// The remote side is closing
    Close,
    /// Ping, pong and raw frames
    Ignore,
}

/// Transport limits matching the codec's `max_bytes`
pub fn ws_config(max_bytes: usize) -> WebSocketConfig {
    let mut ws = WebSocketConfig::default();
    ws.max_message_size = Some(max_bytes);
    ws.max_frame_size = Some(max_bytes);
    ws
}

/// Decode a WebSocket frame into a protocol message
pub fn decode<T: DeserializeOwned>(frame: WsMessage, max_bytes: usize) -> Result<Inbound<T>> {
    let text = match frame {
        WsMessage::Text(text) => text.to_string(),
        WsMessage::Binary(bytes) => String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::Protocol("Binary frame is not UTF-8".into()))?,
        WsMessage::Close(_) => return Ok(Inbound::Close),
        _ => return Ok(Inbound::Ignore),
    };

    // Sanity checks
    if text.len() > max_bytes {
        return Err(Error::Protocol(format!(
            "Frame too large: {} bytes (max {})",
            text.len(),
            max_bytes
        )));
    }
    if text.trim().is_empty() {
        return Err(Error::Protocol("Empty frame".into()));
    }

    serde_json::from_str(&text)
        .map(Inbound::Message)
        .map_err(|e| Error::Protocol(format!("Invalid JSON: {}", e)))
}

/// Encode a protocol message as a text frame
pub fn encode<T: Serialize>(msg: &T, max_bytes: usize) -> Result<WsMessage> {
    let text = serde_json::to_string(msg)
        .map_err(|e| Error::Protocol(format!("Serialization failed: {}", e)))?;

    if text.len() > max_bytes {
        return Err(Error::Protocol(format!(
            "Message too large: {} bytes (max {})",
            text.len(),
            max_bytes
        )));
    }

    Ok(WsMessage::Text(text.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ClientMessage, ServerMessage};

    const MAX: usize = 1024;

    #[test]
    fn test_text_frame_decodes() {
        let frame = WsMessage::Text(r#"{"type":"update","content":"hi"}"#.to_string().into());
        let decoded: Inbound<ClientMessage> = decode(frame, MAX).unwrap();
        assert_eq!(
            decoded,
            Inbound::Message(ClientMessage::Update { content: "hi".into() })
        );
    }

    #[test]
    fn test_binary_utf8_accepted() {
        let frame = WsMessage::Binary(br#"{"type":"leave"}"#.to_vec().into());
        let decoded: Inbound<ClientMessage> = decode(frame, MAX).unwrap();
        assert_eq!(decoded, Inbound::Message(ClientMessage::Leave));

        let garbage = WsMessage::Binary(vec![0xff, 0xfe].into());
        assert!(decode::<ClientMessage>(garbage, MAX).is_err());
    }

    #[test]
    fn test_control_frames() {
        let close: Inbound<ClientMessage> = decode(WsMessage::Close(None), MAX).unwrap();
        assert_eq!(close, Inbound::Close);

        let ping: Inbound<ClientMessage> = decode(WsMessage::Ping(vec![1].into()), MAX).unwrap();
        assert_eq!(ping, Inbound::Ignore);
    }

    #[test]
    fn test_empty_frame_rejected() {
        let frame = WsMessage::Text("  ".to_string().into());
        assert!(matches!(
            decode::<ClientMessage>(frame, MAX),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let content = "x".repeat(MAX);
        let body = format!(r#"{{"type":"update","content":"{}"}}"#, content);
        let frame = WsMessage::Text(body.into());
        assert!(decode::<ClientMessage>(frame, MAX).is_err());

        let msg = ServerMessage::Snapshot { content };
        assert!(encode(&msg, MAX).is_err());
    }

    #[test]
    fn test_encode_is_text_json() {
        let msg = ServerMessage::Peers { peers: vec!["A".into()] };
        match encode(&msg, MAX).unwrap() {
            WsMessage::Text(text) => {
                assert_eq!(text.to_string(), r#"{"type":"peers","peers":["A"]}"#)
            }
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}
