//! Bayeux wire types, channel names, and JSON frame encode/decode.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::Error;

// ---------------------------------------------------------------------------
// Protocol constants
// ---------------------------------------------------------------------------

pub const BAYEUX_VERSION: &str = "1.0";
pub const CONNECTION_TYPE: &str = "websocket";
pub const JSONP_CALLBACK: &str = "callback";

pub mod channel {
    pub const HANDSHAKE: &str = "/meta/handshake";
    pub const CONNECT: &str = "/meta/connect";
    pub const SUBSCRIBE: &str = "/meta/subscribe";

    /// Personal channel of a user.
    pub fn user(user_id: &str) -> String {
        format!("/user/{user_id}")
    }

    pub fn group(group_id: &str) -> String {
        format!("/group/{group_id}")
    }
}

pub mod data_type {
    pub const PING: &str = "ping";
    pub const SUBSCRIBE: &str = "subscribe";
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// One Bayeux message. Absent optional fields are omitted on the wire.
///
/// Only `channel` is required on decode. Optional fields of an unexpected
/// type decode as `None`; `id` and `error` are kept raw so a malformed id can
/// be reported instead of failing the whole frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub supported_connection_types: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub ext: Option<Ext>,
    /// Free-form event payload (`type`, `subject`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub successful: Option<bool>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub advice: Option<Advice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
}

impl Envelope {
    /// `data.type`, if `data` carries a string type.
    pub fn data_type(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|d| d.get("type"))
            .and_then(|t| t.as_str())
    }

    pub fn is_successful(&self) -> bool {
        self.successful == Some(true)
    }

    /// Server error text, whatever JSON type it arrived as.
    pub fn error_text(&self) -> Option<String> {
        self.error.as_ref().map(|e| match e {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// Authentication extension sent with subscribe and ping-response requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ext {
    #[serde(deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Unix time in seconds.
    #[serde(deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// Server advice attached to `/meta/connect` acknowledgments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Advice {
    /// Delay before the next connect request, in whole seconds.
    #[serde(deserialize_with = "lenient_secs", skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    #[serde(deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<String>,
    #[serde(deserialize_with = "lenient_secs", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// Decode an optional field, mapping a value of the wrong type to `None`.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Non-negative number of seconds; fractions are rounded, anything else is `None`.
fn lenient_secs<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    if let Some(n) = value.as_u64() {
        return Ok(Some(n));
    }
    Ok(value
        .as_f64()
        .filter(|f| f.is_finite() && *f >= 0.0 && *f <= u64::MAX as f64)
        .map(|f| f.round() as u64))
}

// ---------------------------------------------------------------------------
// Encode / decode helpers
// ---------------------------------------------------------------------------

/// Serialize one envelope as a single-element JSON array.
pub fn encode_frame(envelope: &Envelope) -> Result<String, Error> {
    Ok(serde_json::to_string(std::slice::from_ref(envelope))?)
}

/// Parse a frame holding a JSON array of envelopes.
///
/// The frame is rejected if it is not an array of objects. An object without
/// a string `channel` is skipped with a warning; the rest of the frame is kept.
pub fn decode_frame(text: &str) -> Result<Vec<Envelope>, Error> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| Error::MalformedFrame(format!("invalid JSON: {e}")))?;
    let serde_json::Value::Array(items) = value else {
        return Err(Error::MalformedFrame(
            "top-level value is not an array".to_string(),
        ));
    };
    if let Some(i) = items.iter().position(|item| !item.is_object()) {
        return Err(Error::MalformedFrame(format!(
            "element {i} is not an object"
        )));
    }
    let envelopes = items
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| match serde_json::from_value(item) {
            Ok(env) => Some(env),
            Err(e) => {
                tracing::warn!("Skipping envelope {i}: {e}");
                None
            }
        })
        .collect();
    Ok(envelopes)
}

// ---------------------------------------------------------------------------
// Request builders
// ---------------------------------------------------------------------------

pub fn build_handshake_msg(id: &str) -> Envelope {
    Envelope {
        channel: channel::HANDSHAKE.to_string(),
        id: Some(id.into()),
        version: Some(BAYEUX_VERSION.to_string()),
        supported_connection_types: Some(vec![CONNECTION_TYPE.to_string()]),
        ..Default::default()
    }
}

pub fn build_subscribe_msg(client_id: &str, subscription: &str, id: String, ext: Ext) -> Envelope {
    Envelope {
        channel: channel::SUBSCRIBE.to_string(),
        client_id: Some(client_id.to_string()),
        subscription: Some(subscription.to_string()),
        id: Some(id.into()),
        ext: Some(ext),
        ..Default::default()
    }
}

pub fn build_connect_msg(client_id: &str, id: String) -> Envelope {
    Envelope {
        channel: channel::CONNECT.to_string(),
        client_id: Some(client_id.to_string()),
        connection_type: Some(CONNECTION_TYPE.to_string()),
        id: Some(id.into()),
        ..Default::default()
    }
}

/// Reply to a server ping on the channel it arrived on.
pub fn build_ping_response(channel: &str, client_id: &str, id: String, ext: Ext) -> Envelope {
    Envelope {
        channel: channel.to_string(),
        client_id: Some(client_id.to_string()),
        id: Some(id.into()),
        successful: Some(true),
        ext: Some(ext),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
