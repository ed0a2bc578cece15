//! WebSocket Message Types
//!
//! Every frame is a compact JSON pair `[tag, payload]`.
//!
//! | Tag | Direction | Payload |
//! |-----|-----------|---------|
//! | `y` | server → client | `{hostname, version}` |
//! | `t` | server → client | topic name → type |
//! | `m` | server → client | `{_topic_name, _topic_type, _time, ...}` or `{..., _error}` |
//! | `p` | server → client | `{s: seq}` |
//! | `q` | client → server | `{s: seq}` |
//! | `s` | client → server | `{topicName, maxUpdateRate?}` |
//! | `u` | client → server | `{topicName}` |
//! | `b` | client → server | `{topicName, topicType, message}` |

use serde_json::{Map, Value};
use thiserror::Error;

use crate::source::TopicCatalog;

pub const MSG_SYSTEM: &str = "y";
pub const MSG_TOPICS: &str = "t";
pub const MSG_MSG: &str = "m";
pub const MSG_PING: &str = "p";
pub const MSG_PONG: &str = "q";
pub const MSG_SUB: &str = "s";
pub const MSG_UNSUB: &str = "u";
pub const MSG_PUB: &str = "b";

/// Key carrying the sequence number in ping and pong payloads
pub const SEQ_KEY: &str = "s";

/// Frames sent from client to server
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    /// Reply to a ping
    Pong { seq: u64 },
    /// Declare interest in a topic
    Subscribe {
        topic_name: String,
        max_update_rate: Option<f64>,
    },
    /// Withdraw interest in a topic
    Unsubscribe { topic_name: String },
    /// Inject a message into the source system
    Publish {
        topic_name: String,
        topic_type: String,
        message: Value,
    },
}

impl ClientFrame {
    /// Parse a text frame
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Array(mut argv) = value else {
            return Err(FrameError::NotAFrame);
        };
        let tag = match argv.first() {
            Some(Value::String(tag)) => tag.clone(),
            _ => return Err(FrameError::NotAFrame),
        };
        if argv.len() != 2 {
            return Err(FrameError::BadPayload(tag));
        }
        let Value::Object(payload) = argv.remove(1) else {
            return Err(FrameError::BadPayload(tag));
        };

        match tag.as_str() {
            MSG_PONG => {
                let seq = payload.get(SEQ_KEY).and_then(Value::as_u64).unwrap_or(0);
                Ok(ClientFrame::Pong { seq })
            }
            MSG_SUB => {
                let topic_name = required_str(&payload, &tag, "topicName")?;
                let max_update_rate = payload.get("maxUpdateRate").and_then(|v| match v {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse().ok(),
                    _ => None,
                });
                Ok(ClientFrame::Subscribe {
                    topic_name,
                    max_update_rate,
                })
            }
            MSG_UNSUB => {
                let topic_name = required_str(&payload, &tag, "topicName")?;
                Ok(ClientFrame::Unsubscribe { topic_name })
            }
            MSG_PUB => {
                let topic_name = required_str(&payload, &tag, "topicName")?;
                let topic_type = required_str(&payload, &tag, "topicType")?;
                let message = match payload.get("message") {
                    Some(m @ Value::Object(_)) => m.clone(),
                    _ => return Err(FrameError::MissingField { tag, field: "message" }),
                };
                Ok(ClientFrame::Publish {
                    topic_name,
                    topic_type,
                    message,
                })
            }
            _ => Err(FrameError::UnknownTag(tag)),
        }
    }
}

fn required_str(
    payload: &Map<String, Value>,
    tag: &str,
    field: &'static str,
) -> Result<String, FrameError> {
    match payload.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        _ => Err(FrameError::MissingField {
            tag: tag.to_string(),
            field,
        }),
    }
}

/// Frames sent from server to client
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    /// Greeting sent once on connect
    SystemInfo { hostname: String, version: String },
    /// Full topic catalog
    TopicCatalog(TopicCatalog),
    /// A topic message or a topic error report
    TopicData(Map<String, Value>),
    /// Latency probe
    Ping { seq: u64 },
}

impl ServerFrame {
    pub fn tag(&self) -> &'static str {
        match self {
            ServerFrame::SystemInfo { .. } => MSG_SYSTEM,
            ServerFrame::TopicCatalog(_) => MSG_TOPICS,
            ServerFrame::TopicData(_) => MSG_MSG,
            ServerFrame::Ping { .. } => MSG_PING,
        }
    }

    /// Encode as compact JSON text
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let tag = self.tag();
        match self {
            ServerFrame::SystemInfo { hostname, version } => serde_json::to_string(&(
                tag,
                serde_json::json!({ "hostname": hostname, "version": version }),
            )),
            ServerFrame::TopicCatalog(catalog) => serde_json::to_string(&(tag, catalog)),
            ServerFrame::TopicData(payload) => serde_json::to_string(&(tag, payload)),
            ServerFrame::Ping { seq } => {
                serde_json::to_string(&(tag, serde_json::json!({ SEQ_KEY: seq })))
            }
        }
    }
}

/// Errors raised while decoding client frames
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Frame is not a [tag, payload] array")]
    NotAFrame,

    #[error("Frame '{0}' needs an object payload")]
    BadPayload(String),

    #[error("Frame '{tag}' is missing field '{field}'")]
    MissingField { tag: String, field: &'static str },

    #[error("Unknown frame tag '{0}'")]
    UnknownTag(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_subscribe() {
        let frame = ClientFrame::parse(r#"["s",{"topicName":"/imu","maxUpdateRate":10}]"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Subscribe {
                topic_name: "/imu".to_string(),
                max_update_rate: Some(10.0),
            }
        );

        let frame = ClientFrame::parse(r#"["s",{"topicName":"/imu"}]"#).unwrap();
        assert!(matches!(
            frame,
            ClientFrame::Subscribe { max_update_rate: None, .. }
        ));
    }

    #[test]
    fn test_parse_pong() {
        let frame = ClientFrame::parse(r#"["q",{"s":5}]"#).unwrap();
        assert_eq!(frame, ClientFrame::Pong { seq: 5 });
        let frame = ClientFrame::parse(r#"["q",{}]"#).unwrap();
        assert_eq!(frame, ClientFrame::Pong { seq: 0 });
    }

    #[test]
    fn test_parse_publish() {
        let frame = ClientFrame::parse(
            r#"["b",{"topicName":"/cmd_vel","topicType":"geometry_msgs/Twist","message":{"linear":{"x":1}}}]"#,
        )
        .unwrap();
        match frame {
            ClientFrame::Publish {
                topic_name,
                topic_type,
                message,
            } => {
                assert_eq!(topic_name, "/cmd_vel");
                assert_eq!(topic_type, "geometry_msgs/Twist");
                assert_eq!(message, json!({"linear": {"x": 1}}));
            }
            _ => panic!("Expected Publish"),
        }
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(ClientFrame::parse("not json"), Err(FrameError::InvalidJson(_))));
        assert!(matches!(ClientFrame::parse(r#"{"a":1}"#), Err(FrameError::NotAFrame)));
        assert!(matches!(ClientFrame::parse("[]"), Err(FrameError::NotAFrame)));
        assert!(matches!(ClientFrame::parse(r#"[1,{}]"#), Err(FrameError::NotAFrame)));
        assert!(matches!(ClientFrame::parse(r#"["s",[]]"#), Err(FrameError::BadPayload(_))));
        assert!(matches!(
            ClientFrame::parse(r#"["s",{}]"#),
            Err(FrameError::MissingField { field: "topicName", .. })
        ));
        assert!(matches!(
            ClientFrame::parse(r#"["b",{"topicName":"/x","topicType":"a/B","message":3}]"#),
            Err(FrameError::MissingField { field: "message", .. })
        ));
        assert!(matches!(ClientFrame::parse(r#"["z",{}]"#), Err(FrameError::UnknownTag(_))));
    }

    #[test]
    fn test_server_frames_are_compact() {
        let ping = ServerFrame::Ping { seq: 7 }.to_json().unwrap();
        assert_eq!(ping, r#"["p",{"s":7}]"#);

        let mut catalog = TopicCatalog::new();
        catalog.insert("/imu".to_string(), "sensor_msgs/msg/Imu".to_string());
        let topics = ServerFrame::TopicCatalog(catalog).to_json().unwrap();
        assert_eq!(topics, r#"["t",{"/imu":"sensor_msgs/msg/Imu"}]"#);

        let info = ServerFrame::SystemInfo {
            hostname: "robot".to_string(),
            version: "0.1.0".to_string(),
        }
        .to_json()
        .unwrap();
        assert_eq!(info, r#"["y",{"hostname":"robot","version":"0.1.0"}]"#);
    }
}
