//! Wire types for the control channel.
//!
//! A [`Message`] is one frame of the duplex control channel (one JSON object
//! per message, one message per line/WebSocket text frame). A `forward`
//! message wraps a [`Forward`] envelope, which carries the session-level
//! protocol (`connect`/`connected`/`data`/`disconnect`/`error`).
//!
//! Unknown `type` values are not representable here — decoding an unknown
//! type fails at the `serde_json` layer, and callers are expected to log
//! and drop the frame rather than treat it as a protocol violation. See
//! [`crate::codec`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single control-channel frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// First frame sent by the agent after the transport upgrade succeeds.
    ///
    /// `forwarders` maps a forwarder name to the target the agent will dial
    /// for it — this is how the control channel "carries a target at
    /// registration" per spec §4.3 step 3, without the relay ever reading
    /// a target out of its own static configuration. A name the agent
    /// omits here falls back to the agent resolving it from its own
    /// forwarder table when `connect` arrives with just the name.
    Register {
        agent_id: String,
        #[serde(default)]
        forwarders: BTreeMap<String, String>,
    },

    /// First frame sent by the relay once auth and registration succeed.
    Registered { agent_id: String },

    /// Application-layer keepalive, sent every 30s by the agent.
    Ping,

    /// Reply to [`Message::Ping`].
    Pong,

    /// Envelope carrying one session-level frame in either direction.
    Forward { data: Forward },
}

/// A session-level frame, carried inside a [`Message::Forward`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Forward {
    /// relay → agent: open `target` for `session_id`.
    Connect { session_id: String, target: String },

    /// agent → relay: `target` has been dialed and is readable/writable.
    Connected { session_id: String },

    /// either direction: `data` is the base64 encoding of raw TCP bytes.
    Data { session_id: String, data: String },

    /// either direction: half-close by the sender; the session is torn down.
    Disconnect { session_id: String },

    /// either direction: the session failed and is torn down.
    Error { session_id: String, error: String },
}

impl Forward {
    /// The `session_id` carried by every variant.
    pub fn session_id(&self) -> &str {
        match self {
            Forward::Connect { session_id, .. }
            | Forward::Connected { session_id }
            | Forward::Data { session_id, .. }
            | Forward::Disconnect { session_id }
            | Forward::Error { session_id, .. } => session_id,
        }
    }
}

impl Message {
    /// Wraps a [`Forward`] in a [`Message::Forward`] envelope.
    pub fn forward(data: Forward) -> Self {
        Message::Forward { data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_round_trips() {
        let mut forwarders = BTreeMap::new();
        forwarders.insert("web".to_string(), "webapp:80".to_string());
        let msg = Message::Register {
            agent_id: "a-web".into(),
            forwarders,
        };
        let text = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&text).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn register_without_forwarders_field_defaults_to_empty() {
        let text = r#"{"type":"register","agent_id":"a-web"}"#;
        let msg: Message = serde_json::from_str(text).unwrap();
        assert_eq!(
            msg,
            Message::Register {
                agent_id: "a-web".into(),
                forwarders: BTreeMap::new(),
            }
        );
    }

    #[test]
    fn forward_connect_round_trips() {
        let msg = Message::forward(Forward::Connect {
            session_id: "a-web-8080-1".into(),
            target: "webapp:80".into(),
        });
        let text = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&text).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let text = r#"{"type":"frobnicate"}"#;
        assert!(serde_json::from_str::<Message>(text).is_err());
    }

    #[test]
    fn forward_session_id_accessor_covers_every_variant() {
        let connect = Forward::Connect {
            session_id: "s1".into(),
            target: "x:1".into(),
        };
        let connected = Forward::Connected {
            session_id: "s2".into(),
        };
        let data = Forward::Data {
            session_id: "s3".into(),
            data: String::new(),
        };
        let disconnect = Forward::Disconnect {
            session_id: "s4".into(),
        };
        let error = Forward::Error {
            session_id: "s5".into(),
            error: "boom".into(),
        };
        assert_eq!(connect.session_id(), "s1");
        assert_eq!(connected.session_id(), "s2");
        assert_eq!(data.session_id(), "s3");
        assert_eq!(disconnect.session_id(), "s4");
        assert_eq!(error.session_id(), "s5");
    }
}
