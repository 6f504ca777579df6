//! Bridges realtime voice-assistant function calls to broker calls.
//!
//! The assistant emits `response.function_call_arguments.done` events naming a
//! tool alias. The bridge applies the local half of the call to the tab's
//! reducer, forwards the call to the broker, and builds the events that must
//! be sent back over the assistant's data channel.

use chrono::{SecondsFormat, Utc};
use face_protocol::{FaceName, Mood, ResponseEnvelope, methods};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::client::BrokerClient;
use crate::reducer::{TabEffect, TabReducer};

pub const FUNCTION_CALL_DONE_EVENT: &str = "response.function_call_arguments.done";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FunctionCall {
    pub call_id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

impl FunctionCall {
    /// Extracts a function call from a realtime server event, if it is one.
    pub fn from_realtime_event(event: &Value) -> Option<Self> {
        if event.get("type").and_then(Value::as_str) != Some(FUNCTION_CALL_DONE_EVENT) {
            return None;
        }
        serde_json::from_value(event.clone()).ok()
    }
}

#[derive(Debug, Default)]
pub struct ToolCallOutcome {
    pub method: Option<&'static str>,
    /// Broker reply, or the transport error text when the call failed.
    pub broker: Option<Result<ResponseEnvelope, String>>,
    pub local_effects: Vec<TabEffect>,
    /// Events to send back to the assistant, in order.
    pub replies: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct ToolBridge {
    client: BrokerClient,
}

impl ToolBridge {
    #[must_use]
    pub fn new(client: BrokerClient) -> Self {
        Self { client }
    }

    pub async fn handle(&self, call: &FunctionCall, reducer: &mut TabReducer) -> ToolCallOutcome {
        let args = match serde_json::from_str::<Value>(&call.arguments) {
            Ok(Value::Object(args)) => args,
            Ok(_) => Map::new(),
            Err(error) => {
                warn!(tool = %call.name, error = %error, "malformed tool arguments");
                return ToolCallOutcome {
                    replies: vec![function_output(
                        &call.call_id,
                        &json!({ "success": false, "error": error.to_string() }),
                    )],
                    ..ToolCallOutcome::default()
                };
            }
        };

        let Some(method) = methods::method_for_tool(&call.name) else {
            warn!(tool = %call.name, "ignoring unknown tool call");
            return ToolCallOutcome::default();
        };

        let mut outcome = ToolCallOutcome {
            method: Some(method),
            ..ToolCallOutcome::default()
        };
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let (params, output) = match method {
            methods::EYES_SET_MOOD => {
                let mood = string_arg(&args, "mood").unwrap_or("neutral");
                if let Ok(parsed) = mood.parse::<Mood>() {
                    reducer.set_mood(parsed);
                }
                (
                    json!({ "mood": mood }),
                    json!({ "success": true, "mood": mood, "timestamp": timestamp }),
                )
            }
            methods::FACE_SET => {
                let name = string_arg(&args, "name").unwrap_or("baxter");
                if let Ok(parsed) = name.parse::<FaceName>() {
                    reducer.switch_face(parsed);
                }
                (
                    json!({ "name": name }),
                    json!({ "success": true, "name": name, "timestamp": timestamp }),
                )
            }
            methods::UI_PANELS_SET => {
                let visible = args.get("visible").is_some_and(is_truthy);
                reducer.set_panels_visible(visible);
                (
                    json!({ "visible": visible }),
                    json!({ "success": true, "visible": visible, "timestamp": timestamp }),
                )
            }
            // The toggle is not applied locally; the broadcast flips every tab,
            // this one included.
            methods::UI_PANELS_TOGGLE => (
                json!({}),
                json!({ "success": true, "timestamp": timestamp }),
            ),
            methods::VOICE_DISCONNECT => {
                reducer.end_voice_session();
                outcome.local_effects.push(TabEffect::TeardownVoiceSession);
                (json!({}), json!({ "success": true, "timestamp": timestamp }))
            }
            methods::WEBHOOK_POST => {
                let payload = match args.get("payload") {
                    Some(Value::Object(payload)) => payload.clone(),
                    _ => Map::new(),
                };
                let mut params = Map::new();
                params.insert("payload".to_string(), Value::Object(payload));
                if let Some(url) = string_arg(&args, "url").map(str::trim)
                    && !url.is_empty()
                {
                    params.insert("url".to_string(), Value::String(url.to_string()));
                }
                (
                    Value::Object(params),
                    json!({ "success": true, "timestamp": timestamp }),
                )
            }
            _ => (
                Value::Object(args),
                json!({ "success": true, "timestamp": timestamp }),
            ),
        };

        let broker = match self.client.call(method, params).await {
            Ok(response) => {
                info!(tool = %call.name, method, error = response.is_error(), "tool call forwarded");
                Ok(response)
            }
            Err(error) => {
                warn!(tool = %call.name, method, error = %error, "tool call forward failed");
                Err(error.to_string())
            }
        };
        outcome.broker = Some(broker);
        outcome.replies = vec![
            function_output(&call.call_id, &output),
            json!({ "type": "response.create" }),
        ];
        outcome
    }
}

fn function_output(call_id: &str, output: &Value) -> Value {
    json!({
        "type": "conversation.item.create",
        "item": {
            "type": "function_call_output",
            "call_id": call_id,
            "output": output.to_string(),
        }
    })
}

fn string_arg<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_function_call_done_events_are_extracted() {
        let event = json!({
            "type": FUNCTION_CALL_DONE_EVENT,
            "call_id": "call_1",
            "name": "face_set",
            "arguments": "{\"name\":\"eve\"}"
        });
        let call = FunctionCall::from_realtime_event(&event).expect("function call");
        assert_eq!(call.name, "face_set");
        assert_eq!(call.call_id, "call_1");

        let other = json!({ "type": "response.text.delta", "delta": "hi" });
        assert!(FunctionCall::from_realtime_event(&other).is_none());
    }

    #[test]
    fn truthiness_follows_script_rules() {
        assert!(is_truthy(&json!(true)));
        assert!(is_truthy(&json!(1)));
        assert!(is_truthy(&json!("yes")));
        assert!(is_truthy(&json!({})));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&Value::Null));
    }

    #[test]
    fn function_output_wraps_serialized_payload() {
        let reply = function_output("call_9", &json!({ "success": true }));
        assert_eq!(
            reply.pointer("/item/type").and_then(Value::as_str),
            Some("function_call_output")
        );
        assert_eq!(
            reply.pointer("/item/output").and_then(Value::as_str),
            Some("{\"success\":true}")
        );
    }

    #[tokio::test]
    async fn malformed_arguments_reply_with_failure_and_skip_the_broker() {
        let client = BrokerClient::from_base_url("http://127.0.0.1:9").expect("client");
        let bridge = ToolBridge::new(client);
        let mut reducer = TabReducer::default();
        let call = FunctionCall {
            call_id: "call_2".to_string(),
            name: "eyes_set_mood".to_string(),
            arguments: "{not json".to_string(),
        };

        let outcome = bridge.handle(&call, &mut reducer).await;
        assert!(outcome.broker.is_none());
        assert_eq!(outcome.replies.len(), 1);
        let output = outcome.replies[0]
            .pointer("/item/output")
            .and_then(Value::as_str)
            .expect("output");
        assert!(output.contains("\"success\":false"));
    }
}
