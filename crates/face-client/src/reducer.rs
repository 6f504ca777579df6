//! Tab-local face state and the reducer that applies broadcast notifications.

use face_protocol::{BroadcastNotification, FaceName, Mood, TabEvent, WebhookOutcome};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FaceState {
    pub active_face_name: FaceName,
    pub mood: Mood,
    pub panels_visible: bool,
    pub voice_session_active: bool,
}

/// One-shot work the host tab performs after a notification is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabEffect {
    TeardownVoiceSession,
    Log(String),
    ShowAlert(String),
}

#[derive(Debug, Clone, Default)]
pub struct TabReducer {
    state: FaceState,
    last_applied_seq: Option<u64>,
}

impl TabReducer {
    #[must_use]
    pub fn new(state: FaceState) -> Self {
        Self {
            state,
            last_applied_seq: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> &FaceState {
        &self.state
    }

    #[must_use]
    pub fn last_applied_seq(&self) -> Option<u64> {
        self.last_applied_seq
    }

    /// Applies a broadcast notification. A notification whose `seq` is at or
    /// below the last applied one is a redelivery and changes nothing.
    pub fn apply(&mut self, notification: &BroadcastNotification) -> Vec<TabEffect> {
        if self
            .last_applied_seq
            .is_some_and(|last| notification.seq <= last)
        {
            trace!(
                seq = notification.seq,
                kind = notification.kind(),
                "skipping redelivered notification"
            );
            return Vec::new();
        }
        self.last_applied_seq = Some(notification.seq);
        debug!(
            seq = notification.seq,
            kind = notification.kind(),
            persistent = notification.event.is_persistent(),
            "applying notification"
        );

        match &notification.event {
            TabEvent::MoodSet { mood } => {
                self.set_mood(*mood);
                vec![broadcast_log(format!("eyes.set_mood -> {mood}"))]
            }
            TabEvent::FaceSet { name } => {
                self.switch_face(*name);
                vec![broadcast_log(format!("face.set -> {name}"))]
            }
            TabEvent::PanelsSet { visible } => {
                self.set_panels_visible(*visible);
                vec![broadcast_log(format!("ui.panels.set -> visible={visible}"))]
            }
            TabEvent::PanelsToggle => {
                let visible = self.toggle_panels();
                vec![broadcast_log(format!(
                    "ui.panels.toggle -> visible={visible}"
                ))]
            }
            TabEvent::VoiceDisconnect => {
                self.end_voice_session();
                vec![
                    TabEffect::TeardownVoiceSession,
                    broadcast_log("voice.disconnect".to_string()),
                ]
            }
            TabEvent::WebhookAttempt { url, payload_keys } => vec![broadcast_log(format!(
                "webhook.post -> {url} (keys={payload_keys})"
            ))],
            TabEvent::WebhookResult { url, outcome } => match outcome {
                WebhookOutcome::Completed { status, ok } => vec![broadcast_log(format!(
                    "webhook.result -> {url} status={status} ok={ok}"
                ))],
                WebhookOutcome::Failed { error } => vec![broadcast_log(format!(
                    "webhook.error -> {url} error={error}"
                ))],
            },
            TabEvent::Alert { text } => vec![
                TabEffect::ShowAlert(text.clone()),
                TabEffect::Log(format!("ALERT: {text}")),
            ],
        }
    }

    pub fn switch_face(&mut self, name: FaceName) {
        self.state.active_face_name = name;
    }

    /// Moves to the next face in cycle order and returns it.
    pub fn cycle_face(&mut self) -> FaceName {
        let next = self.state.active_face_name.next();
        self.switch_face(next);
        next
    }

    pub fn set_mood(&mut self, mood: Mood) {
        self.state.mood = mood;
    }

    pub fn set_panels_visible(&mut self, visible: bool) {
        self.state.panels_visible = visible;
    }

    pub fn toggle_panels(&mut self) -> bool {
        self.state.panels_visible = !self.state.panels_visible;
        self.state.panels_visible
    }

    pub fn start_voice_session(&mut self) {
        self.state.voice_session_active = true;
    }

    pub fn end_voice_session(&mut self) {
        self.state.voice_session_active = false;
    }
}

fn broadcast_log(detail: String) -> TabEffect {
    TabEffect::Log(format!("MCP Broadcast: {detail}"))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn notification(seq: u64, event: TabEvent) -> BroadcastNotification {
        BroadcastNotification {
            seq,
            timestamp: Utc::now(),
            event,
        }
    }

    fn every_event() -> Vec<TabEvent> {
        vec![
            TabEvent::MoodSet { mood: Mood::Sad },
            TabEvent::FaceSet {
                name: FaceName::Hal,
            },
            TabEvent::PanelsSet { visible: true },
            TabEvent::PanelsToggle,
            TabEvent::VoiceDisconnect,
            TabEvent::WebhookAttempt {
                url: "https://example.test/hook".to_string(),
                payload_keys: 2,
            },
            TabEvent::WebhookResult {
                url: "https://example.test/hook".to_string(),
                outcome: WebhookOutcome::Completed {
                    status: 500,
                    ok: false,
                },
            },
            TabEvent::Alert {
                text: "Webhook URL is not configured.".to_string(),
            },
        ]
    }

    #[test]
    fn applying_any_notification_twice_matches_applying_it_once() {
        for (index, event) in every_event().into_iter().enumerate() {
            let mut base = TabReducer::default();
            base.start_voice_session();
            let mut once = base.clone();
            let mut twice = base.clone();
            let item = notification(index as u64 + 1, event.clone());

            let first_effects = once.apply(&item);
            twice.apply(&item);
            let repeat_effects = twice.apply(&item);

            assert_eq!(once.state(), twice.state(), "{}", event.kind());
            assert!(!first_effects.is_empty(), "{}", event.kind());
            assert!(repeat_effects.is_empty(), "{}", event.kind());
        }
    }

    #[test]
    fn distinct_toggles_each_flip_the_panels() {
        let mut reducer = TabReducer::default();
        reducer.apply(&notification(1, TabEvent::PanelsToggle));
        assert!(reducer.state().panels_visible);
        reducer.apply(&notification(2, TabEvent::PanelsToggle));
        assert!(!reducer.state().panels_visible);
        reducer.apply(&notification(2, TabEvent::PanelsToggle));
        assert!(!reducer.state().panels_visible);
    }

    #[test]
    fn later_notifications_win() {
        let mut reducer = TabReducer::default();
        reducer.apply(&notification(
            4,
            TabEvent::FaceSet {
                name: FaceName::Eve,
            },
        ));
        reducer.apply(&notification(
            5,
            TabEvent::FaceSet {
                name: FaceName::Hal,
            },
        ));
        assert_eq!(reducer.state().active_face_name, FaceName::Hal);
        assert_eq!(reducer.last_applied_seq(), Some(5));
    }

    #[test]
    fn voice_disconnect_tears_down_the_session() {
        let mut reducer = TabReducer::default();
        reducer.start_voice_session();
        let effects = reducer.apply(&notification(1, TabEvent::VoiceDisconnect));
        assert!(!reducer.state().voice_session_active);
        assert_eq!(effects.first(), Some(&TabEffect::TeardownVoiceSession));
    }

    #[test]
    fn alert_surfaces_text_to_the_host() {
        let mut reducer = TabReducer::default();
        let effects = reducer.apply(&notification(
            1,
            TabEvent::Alert {
                text: "check config".to_string(),
            },
        ));
        assert!(effects.contains(&TabEffect::ShowAlert("check config".to_string())));
        assert_eq!(reducer.state(), &FaceState::default());
    }

    #[test]
    fn cycle_face_wraps_around() {
        let mut reducer = TabReducer::default();
        assert_eq!(reducer.cycle_face(), FaceName::Hal);
        assert_eq!(reducer.cycle_face(), FaceName::Eve);
        assert_eq!(reducer.cycle_face(), FaceName::Baxter);
    }
}
