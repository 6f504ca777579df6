//! Broadcast notifications delivered to every attached tab.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::face::{FaceName, Mood};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastNotification {
    /// Strictly increasing per broker process.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: TabEvent,
}

impl BroadcastNotification {
    pub fn kind(&self) -> &'static str {
        self.event.kind()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TabEvent {
    #[serde(rename = "eyes.set_mood")]
    MoodSet { mood: Mood },
    #[serde(rename = "face.set")]
    FaceSet { name: FaceName },
    #[serde(rename = "ui.panels.set")]
    PanelsSet { visible: bool },
    #[serde(rename = "ui.panels.toggle")]
    PanelsToggle,
    #[serde(rename = "voice.disconnect")]
    VoiceDisconnect,
    #[serde(rename = "webhook.post")]
    WebhookAttempt {
        url: String,
        #[serde(rename = "payloadKeys")]
        payload_keys: usize,
    },
    #[serde(rename = "webhook.post.result")]
    WebhookResult {
        url: String,
        #[serde(flatten)]
        outcome: WebhookOutcome,
    },
    #[serde(rename = "ui.alert")]
    Alert { text: String },
}

impl TabEvent {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MoodSet { .. } => "eyes.set_mood",
            Self::FaceSet { .. } => "face.set",
            Self::PanelsSet { .. } => "ui.panels.set",
            Self::PanelsToggle => "ui.panels.toggle",
            Self::VoiceDisconnect => "voice.disconnect",
            Self::WebhookAttempt { .. } => "webhook.post",
            Self::WebhookResult { .. } => "webhook.post.result",
            Self::Alert { .. } => "ui.alert",
        }
    }

    /// True for notifications that carry state a tab keeps; the rest only
    /// trigger a one-time side effect.
    pub const fn is_persistent(&self) -> bool {
        matches!(
            self,
            Self::MoodSet { .. } | Self::FaceSet { .. } | Self::PanelsSet { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WebhookOutcome {
    Completed { status: u16, ok: bool },
    Failed { error: String },
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::{Value, json};

    use super::*;

    fn at_epoch(event: TabEvent) -> BroadcastNotification {
        BroadcastNotification {
            seq: 3,
            timestamp: Utc.timestamp_opt(0, 0).single().expect("epoch"),
            event,
        }
    }

    #[test]
    fn notifications_carry_type_tag_and_flat_payload() {
        let value = serde_json::to_value(at_epoch(TabEvent::FaceSet {
            name: FaceName::Eve,
        }))
        .expect("serialize");
        assert_eq!(value.get("type"), Some(&json!("face.set")));
        assert_eq!(value.get("name"), Some(&json!("eve")));
        assert_eq!(value.get("seq"), Some(&json!(3)));
        assert!(value.get("timestamp").and_then(Value::as_str).is_some());
    }

    #[test]
    fn webhook_result_round_trips_both_outcomes() {
        let completed = at_epoch(TabEvent::WebhookResult {
            url: "https://example.test/hook".to_string(),
            outcome: WebhookOutcome::Completed {
                status: 200,
                ok: true,
            },
        });
        let value = serde_json::to_value(&completed).expect("serialize");
        assert_eq!(value.get("ok"), Some(&json!(true)));
        assert!(value.get("error").is_none());

        let failed: BroadcastNotification = serde_json::from_value(json!({
            "type": "webhook.post.result",
            "seq": 9,
            "timestamp": "2026-01-01T00:00:00Z",
            "url": "https://example.test/hook",
            "error": "connection refused"
        }))
        .expect("decode failed outcome");
        assert_eq!(
            failed.event,
            TabEvent::WebhookResult {
                url: "https://example.test/hook".to_string(),
                outcome: WebhookOutcome::Failed {
                    error: "connection refused".to_string()
                },
            }
        );
    }

    #[test]
    fn unit_events_decode_without_payload() {
        let toggle: BroadcastNotification = serde_json::from_value(json!({
            "type": "ui.panels.toggle",
            "seq": 1,
            "timestamp": "2026-01-01T00:00:00Z"
        }))
        .expect("decode toggle");
        assert_eq!(toggle.event, TabEvent::PanelsToggle);
        assert!(!toggle.event.is_persistent());
        assert_eq!(toggle.kind(), "ui.panels.toggle");
    }
}
