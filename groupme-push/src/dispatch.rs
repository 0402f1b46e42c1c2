//! Classification of inbound envelopes.
//!
//! Every envelope maps to exactly one [`Inbound`] shape, checked in priority
//! order: ping, connect ack, data message, idle ack on the user channel,
//! subscribe ack, then anything else.

use std::time::Duration;

use crate::protocol::{Envelope, channel, data_type};
use crate::types::Category;

const SYSTEM_SENDER: &str = "system";

#[derive(Debug, PartialEq)]
pub(crate) enum Inbound {
    /// Server ping; answer on `channel`.
    Ping { channel: String },
    /// Successful `/meta/connect`; re-arm after `interval`.
    ConnectAck { interval: Duration },
    /// Echo of our own subscription.
    SubscribeEcho,
    /// Event sent by the connected user while self-filtering is on.
    SelfMessage,
    /// Event of a known type; `payload` is `data.subject`.
    Event {
        category: Category,
        payload: serde_json::Value,
    },
    /// Event of an unrecognized type; `data` is the full data object.
    Unknown {
        kind: Option<String>,
        data: serde_json::Value,
    },
    /// Bare acknowledgment on the personal channel.
    IdleAck,
    SubscribeAck { subscription: Option<String> },
    Unhandled(Box<Envelope>),
}

pub(crate) fn classify(env: Envelope, user_id: &str, disregard_self: bool) -> Inbound {
    if env.data_type() == Some(data_type::PING) {
        return Inbound::Ping {
            channel: env.channel,
        };
    }

    if env.channel == channel::CONNECT && env.is_successful() {
        let secs = env.advice.as_ref().and_then(|a| a.interval).unwrap_or(0);
        return Inbound::ConnectAck {
            interval: Duration::from_secs(secs),
        };
    }

    if let Some(data) = env.data {
        return classify_data(data, user_id, disregard_self);
    }

    if env.is_successful() && env.channel == channel::user(user_id) {
        return Inbound::IdleAck;
    }
    if env.is_successful() && env.channel == channel::SUBSCRIBE {
        return Inbound::SubscribeAck {
            subscription: env.subscription,
        };
    }
    Inbound::Unhandled(Box::new(env))
}

fn classify_data(data: serde_json::Value, user_id: &str, disregard_self: bool) -> Inbound {
    let kind = data.get("type").and_then(|t| t.as_str()).map(str::to_string);
    if kind.as_deref() == Some(data_type::SUBSCRIBE) {
        return Inbound::SubscribeEcho;
    }

    let subject = data.get("subject").cloned().unwrap_or(serde_json::Value::Null);
    if disregard_self && is_self_message(&subject, user_id) {
        return Inbound::SelfMessage;
    }

    match kind.as_deref().and_then(Category::from_type) {
        Some(category) => Inbound::Event {
            category,
            payload: subject,
        },
        None => Inbound::Unknown { kind, data },
    }
}

/// Whether `subject.sender_id` is numerically the connected user.
fn is_self_message(subject: &serde_json::Value, user_id: &str) -> bool {
    let Some(sender) = subject.get("sender_id") else {
        return false;
    };
    let sender = match sender {
        serde_json::Value::String(s) if s == SYSTEM_SENDER => return false,
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        serde_json::Value::Number(n) => n.as_i64(),
        _ => None,
    };
    match (sender, user_id.trim().parse::<i64>().ok()) {
        (Some(sender), Some(own)) => sender == own,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::protocol::Advice;

    fn envelope(value: serde_json::Value) -> Envelope {
        serde_json::from_value(value).unwrap()
    }

    fn line(sender: serde_json::Value) -> Envelope {
        envelope(json!({
            "channel": "/group/7",
            "data": {
                "type": "line.create",
                "subject": {"sender_id": sender, "text": "hi"},
            },
        }))
    }

    #[test]
    fn ping_wins_over_everything() {
        let env = envelope(json!({
            "channel": "/meta/connect",
            "successful": true,
            "data": {"type": "ping"},
        }));
        assert_eq!(
            classify(env, "42", true),
            Inbound::Ping {
                channel: "/meta/connect".to_string()
            }
        );
    }

    #[test]
    fn ping_on_arbitrary_channel() {
        let env = envelope(json!({"channel": "/foo", "data": {"type": "ping"}}));
        assert_eq!(
            classify(env, "42", false),
            Inbound::Ping {
                channel: "/foo".to_string()
            }
        );
    }

    #[test]
    fn connect_ack_uses_advice_interval() {
        let env = Envelope {
            channel: channel::CONNECT.to_string(),
            successful: Some(true),
            advice: Some(Advice {
                interval: Some(3),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            classify(env, "42", false),
            Inbound::ConnectAck {
                interval: Duration::from_secs(3)
            }
        );
    }

    #[test]
    fn connect_ack_without_advice_has_no_delay() {
        let env = envelope(json!({"channel": "/meta/connect", "successful": true}));
        assert_eq!(
            classify(env, "42", false),
            Inbound::ConnectAck {
                interval: Duration::ZERO
            }
        );
    }

    #[test]
    fn failed_connect_is_unhandled() {
        let env = envelope(json!({"channel": "/meta/connect", "successful": false}));
        assert!(matches!(classify(env, "42", false), Inbound::Unhandled(_)));
    }

    #[test]
    fn subscribe_echo_is_dropped() {
        let env = envelope(json!({"channel": "/user/42", "data": {"type": "subscribe"}}));
        assert_eq!(classify(env, "42", false), Inbound::SubscribeEcho);
    }

    #[test]
    fn known_type_routes_subject() {
        let env = line(json!("7"));
        assert_eq!(
            classify(env, "42", true),
            Inbound::Event {
                category: Category::Message,
                payload: json!({"sender_id": "7", "text": "hi"}),
            }
        );
    }

    #[test]
    fn self_message_filtered_when_enabled() {
        assert_eq!(classify(line(json!("42")), "42", true), Inbound::SelfMessage);
        assert_eq!(classify(line(json!(42)), "42", true), Inbound::SelfMessage);
        assert!(matches!(
            classify(line(json!("42")), "42", false),
            Inbound::Event { .. }
        ));
    }

    #[test]
    fn system_sender_is_never_self() {
        assert!(matches!(
            classify(line(json!("system")), "42", true),
            Inbound::Event { .. }
        ));
    }

    #[test]
    fn non_numeric_sender_is_not_self() {
        assert!(matches!(
            classify(line(json!("abc")), "42", true),
            Inbound::Event { .. }
        ));
    }

    #[test]
    fn unknown_type_carries_full_data() {
        let env = envelope(json!({
            "channel": "/user/42",
            "data": {"type": "unknown.event", "subject": {"x": 1}, "alert": "hey"},
        }));
        assert_eq!(
            classify(env, "42", false),
            Inbound::Unknown {
                kind: Some("unknown.event".to_string()),
                data: json!({"type": "unknown.event", "subject": {"x": 1}, "alert": "hey"}),
            }
        );
    }

    #[test]
    fn data_without_type_is_unknown() {
        let env = envelope(json!({"channel": "/user/42", "data": {"subject": {}}}));
        assert!(matches!(
            classify(env, "42", false),
            Inbound::Unknown { kind: None, .. }
        ));
    }

    #[test]
    fn idle_ack_on_user_channel() {
        let env = envelope(json!({"channel": "/user/42", "successful": true}));
        assert_eq!(classify(env, "42", false), Inbound::IdleAck);

        let other_user = envelope(json!({"channel": "/user/43", "successful": true}));
        assert!(matches!(
            classify(other_user, "42", false),
            Inbound::Unhandled(_)
        ));
    }

    #[test]
    fn subscribe_ack() {
        let env = envelope(json!({
            "channel": "/meta/subscribe",
            "successful": true,
            "subscription": "/group/7",
        }));
        assert_eq!(
            classify(env, "42", false),
            Inbound::SubscribeAck {
                subscription: Some("/group/7".to_string())
            }
        );
    }

    #[test]
    fn rejected_subscribe_is_unhandled() {
        let env = envelope(json!({
            "channel": "/meta/subscribe",
            "successful": false,
            "error": "403::Forbidden",
        }));
        assert!(matches!(classify(env, "42", false), Inbound::Unhandled(_)));
    }
}
