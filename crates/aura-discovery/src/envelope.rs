//! Discovery message envelope
//!
//! The unit exchanged between peers. On the wire it is a single JSON object
//! `{event, pid, iid, hostName, data?}`.

use crate::identity::{InstanceId, ProcessId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::net::SocketAddr;

/// Reserved event kind used for peer self-introduction
pub const ANNOUNCEMENT_EVENT: &str = "hello";

/// Message exchanged between discovery endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message kind
    #[serde(default)]
    pub event: String,
    /// Sending process
    pub pid: ProcessId,
    /// Sending endpoint instance
    pub iid: InstanceId,
    /// Display hostname of the sender
    #[serde(rename = "hostName", default)]
    pub host_name: String,
    /// Application payload, present only when the sender supplied one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Envelope {
    /// Create an envelope without payload
    pub fn new(
        event: impl Into<String>,
        pid: ProcessId,
        iid: InstanceId,
        host_name: impl Into<String>,
    ) -> Self {
        Self {
            event: event.into(),
            pid,
            iid,
            host_name: host_name.into(),
            data: None,
        }
    }

    /// Attach an application payload
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Whether this is the reserved announcement kind
    pub fn is_announcement(&self) -> bool {
        self.event == ANNOUNCEMENT_EVENT
    }

    /// Event name and payload, when both are truthy.
    ///
    /// The event must be non-empty. The payload must not be `null`, `false`,
    /// zero or the empty string; empty arrays and objects count as present.
    /// Envelopes that fail either test go to the generic `message`
    /// listeners.
    pub fn named_payload(&self) -> Option<(&str, &Value)> {
        match &self.data {
            Some(data) if !self.event.is_empty() && is_truthy(data) => {
                Some((self.event.as_str(), data))
            }
            _ => None,
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(n) => n.as_f64().map_or(true, |n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Origin of an inbound datagram
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SenderInfo {
    /// Source address (IP text, or a backend-specific label for shared channels)
    pub address: String,
    /// Source port
    pub port: u16,
    /// Datagram size in bytes
    pub size: usize,
}

impl SenderInfo {
    /// Describe a datagram received from a socket address
    pub fn from_socket(addr: SocketAddr, size: usize) -> Self {
        Self {
            address: addr.ip().to_string(),
            port: addr.port(),
            size,
        }
    }

    /// Key identifying the sender in per-sender caches (`address:port`)
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl fmt::Display for SenderInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids() -> (ProcessId, InstanceId) {
        (ProcessId::generate(), InstanceId::generate())
    }

    #[test]
    fn test_wire_field_names() {
        let (pid, iid) = ids();
        let envelope = Envelope::new("hello", pid, iid, "node-a");
        let value: Value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["event"], "hello");
        assert_eq!(value["pid"], pid.to_string());
        assert_eq!(value["iid"], iid.to_string());
        assert_eq!(value["hostName"], "node-a");
        assert!(value.get("data").is_none());
    }

    #[test]
    fn test_payload_only_when_supplied() {
        let (pid, iid) = ids();
        let envelope = Envelope::new("job", pid, iid, "node-a").with_data(json!({"n": 1}));
        let value: Value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["data"]["n"], 1);
    }

    #[test]
    fn test_missing_identity_is_rejected() {
        let result: Result<Envelope, _> =
            serde_json::from_str(r#"{"event":"hello","hostName":"x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_sender_cache_key() {
        let sender = SenderInfo::from_socket("10.1.2.3:4000".parse().unwrap(), 12);
        assert_eq!(sender.cache_key(), "10.1.2.3:4000");
        assert_eq!(sender.size, 12);
    }

    #[test]
    fn test_named_payload_routing() {
        let (pid, iid) = ids();
        let bare = Envelope::new("hello", pid, iid, "h");
        assert!(bare.named_payload().is_none());

        let null_data = bare.clone().with_data(Value::Null);
        assert!(null_data.named_payload().is_none());

        let unnamed = Envelope::new("", pid, iid, "h").with_data(json!(1));
        assert!(unnamed.named_payload().is_none());

        let named = Envelope::new("job", pid, iid, "h").with_data(json!("x"));
        assert_eq!(named.named_payload(), Some(("job", &json!("x"))));
    }

    #[test]
    fn test_falsy_payloads_go_to_message() {
        let (pid, iid) = ids();
        let job = |data: Value| Envelope::new("job", pid, iid, "h").with_data(data);

        for falsy in [json!(0), json!(0.0), json!(false), json!("")] {
            assert!(job(falsy.clone()).named_payload().is_none(), "{falsy}");
        }
        for truthy in [json!(-1), json!(true), json!(" "), json!([]), json!({})] {
            assert!(job(truthy.clone()).named_payload().is_some(), "{truthy}");
        }
    }
}
