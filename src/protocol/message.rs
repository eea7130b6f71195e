//! Protocol messages for the command channel.
//!
//! Outbound messages are `{method, params}` objects. Inbound messages are
//! event envelopes `{event, data}` whose `data` is either an object or, for
//! the application sub-channel, a JSON document encoded as a string.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::keys::{Key, KeyAction};
use crate::error::{RemoteError, Result};

/// Remote key method
pub const METHOD_REMOTE_CONTROL: &str = "ms.remote.control";
/// Application sub-channel emit method
pub const METHOD_CHANNEL_EMIT: &str = "ms.channel.emit";

/// Handshake: channel opened on the device
pub const EVENT_CHANNEL_CONNECT: &str = "ms.channel.connect";
/// Handshake: channel ready for traffic
pub const EVENT_CHANNEL_READY: &str = "ms.channel.ready";
/// Pairing denied by the user
pub const EVENT_CHANNEL_UNAUTHORIZED: &str = "ms.channel.unauthorized";
/// Pairing prompt expired on the device
pub const EVENT_CHANNEL_TIMEOUT: &str = "ms.channel.timeOut";
/// Generic device error event
pub const EVENT_ERROR: &str = "ms.error";
/// D2D service message carrying application replies
pub const EVENT_D2D_SERVICE_MESSAGE: &str = "d2d_service_message";
/// Outbound application request event
pub const EVENT_ART_APP_REQUEST: &str = "art_app_request";

/// Events that belong to the application sub-channel.
pub const APPLICATION_EVENTS: &[&str] = &[
    "art_app_response",
    "art_list",
    "art_mode_status",
    "art_select",
    "art_filter_list",
    EVENT_D2D_SERVICE_MESSAGE,
    EVENT_ERROR,
];

/// Parameters of a key press.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoteControlParams {
    /// Key action
    pub cmd: KeyAction,
    /// Key code
    pub data_of_cmd: String,
    /// Always `"false"`
    pub option: String,
    /// Always `"SendRemoteKey"`
    pub type_of_remote: String,
}

/// Parameters of an application sub-channel emit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmitParams {
    /// Emitted event name
    pub event: String,
    /// Recipient, `"host"` for the device application
    pub to: String,
    /// JSON-encoded request payload
    pub data: String,
}

/// Outbound message envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Method name
    pub method: String,
    /// Method parameters
    pub params: Value,
}

impl OutboundMessage {
    /// Key press message
    pub fn remote_key(action: KeyAction, key: &Key) -> Self {
        let params = RemoteControlParams {
            cmd: action,
            data_of_cmd: key.code().to_string(),
            option: "false".to_string(),
            type_of_remote: "SendRemoteKey".to_string(),
        };
        Self {
            method: METHOD_REMOTE_CONTROL.to_string(),
            params: serde_json::to_value(params).unwrap_or(Value::Null),
        }
    }

    /// Application request addressed to the device host
    pub fn art_request(data: &Value) -> Result<Self> {
        let params = EmitParams {
            event: EVENT_ART_APP_REQUEST.to_string(),
            to: "host".to_string(),
            data: serde_json::to_string(data)?,
        };
        Ok(Self {
            method: METHOD_CHANNEL_EMIT.to_string(),
            params: serde_json::to_value(params)?,
        })
    }

    /// Serialize to wire text
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    raw: Value,
}

impl InboundMessage {
    /// Parse wire text; anything but a JSON object is rejected
    pub fn parse(text: &str) -> Result<Self> {
        let raw: Value = serde_json::from_str(text)?;
        Self::from_value(raw)
    }

    /// Wrap an already-decoded value
    pub fn from_value(raw: Value) -> Result<Self> {
        if !raw.is_object() {
            return Err(RemoteError::InvalidMessage(
                "Inbound message is not a JSON object".to_string(),
            ));
        }
        Ok(Self { raw })
    }

    /// Event name, if any
    pub fn event(&self) -> Option<&str> {
        self.raw.get("event").and_then(Value::as_str)
    }

    /// Raw `data` member
    pub fn data(&self) -> Option<&Value> {
        self.raw.get("data")
    }

    /// Whole message
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Freshly issued token carried by a connect event
    pub fn token(&self) -> Option<&str> {
        self.data()
            .and_then(|d| d.get("token"))
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
    }

    /// Whether this message belongs to the application sub-channel
    pub fn is_application(&self) -> bool {
        self.event()
            .is_some_and(|event| APPLICATION_EVENTS.contains(&event))
    }

    /// Application payload: `data` decoded if it is a JSON string, `data`
    /// itself if it is an object, or the whole message when there is no `data`.
    pub fn payload(&self) -> Value {
        match self.data() {
            Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
                Ok(value @ Value::Object(_)) => value,
                _ => Value::String(text.clone()),
            },
            Some(value @ Value::Object(_)) => value.clone(),
            _ => self.raw.clone(),
        }
    }
}
