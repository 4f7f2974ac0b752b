// Live channel frame parsing and building
// Frames are JSON objects discriminated by a "type" field

use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;

use crate::models::LiveMessage;

pub const MESSAGE_TAG: &str = "message";
pub const PING_TAG: &str = "ping";
pub const PONG_TAG: &str = "pong";
pub const TYPING_TAG: &str = "typing";

/// An inbound frame after parsing
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// A pushed chat message, the only frame that affects the timeline
    Message(LiveMessage),
    Pong,
    /// Any other well-formed frame, kept by tag for logging
    Other(String),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(flatten)]
    body: serde_json::Map<String, Value>,
}

/// Parse a text frame. Returns `None` for frames that are not JSON objects
/// with a string `type`, or `message` frames missing required fields.
pub fn parse_frame(text: &str) -> Option<InboundFrame> {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Dropping unparseable live frame: {}", e);
            return None;
        }
    };

    match envelope.kind.as_str() {
        MESSAGE_TAG => match serde_json::from_value::<LiveMessage>(Value::Object(envelope.body)) {
            Ok(message) => Some(InboundFrame::Message(message)),
            Err(e) => {
                warn!("Dropping malformed message frame: {}", e);
                None
            }
        },
        PONG_TAG => Some(InboundFrame::Pong),
        other => {
            debug!("Ignoring live frame of type '{}'", other);
            Some(InboundFrame::Other(other.to_string()))
        }
    }
}

/// Heartbeat frame understood by the backend
pub fn ping_frame() -> String {
    serde_json::json!({ "type": PING_TAG }).to_string()
}
