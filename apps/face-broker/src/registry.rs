//! Fixed table of remote operations and the validation that turns a raw
//! `(method, params)` pair into a typed [`Command`].

use face_protocol::{FaceName, Mood, RpcError, methods};
use serde_json::{Map, Value, json};
use thiserror::Error;

const MOOD_VALUES: &[&str] = &["neutral", "happy", "sad", "angry"];
const FACE_VALUES: &[&str] = &["baxter", "hal", "eve"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    OneOf(&'static [&'static str]),
    String,
    Boolean,
    Object,
}

#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub method: &'static str,
    /// Name the voice assistant knows the command by.
    pub tool: &'static str,
    pub description: &'static str,
    pub params: &'static [ParamSpec],
}

pub static COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        method: methods::WEBHOOK_POST,
        tool: "webhook_post",
        description: "POST a JSON payload to the external webhook",
        params: &[
            ParamSpec {
                name: "payload",
                kind: ParamKind::Object,
                required: true,
                description: "Arbitrary JSON payload to send",
            },
            ParamSpec {
                name: "url",
                kind: ParamKind::String,
                required: false,
                description: "Optional override URL; if omitted, uses the configured WEBHOOK_URL",
            },
        ],
    },
    CommandSpec {
        method: methods::EYES_SET_MOOD,
        tool: "eyes_set_mood",
        description: "Set the eyes expression/mood",
        params: &[ParamSpec {
            name: "mood",
            kind: ParamKind::OneOf(MOOD_VALUES),
            required: true,
            description: "Desired mood",
        }],
    },
    CommandSpec {
        method: methods::FACE_SET,
        tool: "face_set",
        description: "Switch visual face theme (baxter|hal|eve)",
        params: &[ParamSpec {
            name: "name",
            kind: ParamKind::OneOf(FACE_VALUES),
            required: true,
            description: "Face to show",
        }],
    },
    CommandSpec {
        method: methods::UI_PANELS_SET,
        tool: "ui_panels_set",
        description: "Show or hide debug panels",
        params: &[ParamSpec {
            name: "visible",
            kind: ParamKind::Boolean,
            required: true,
            description: "true to show panels; false to hide",
        }],
    },
    CommandSpec {
        method: methods::UI_PANELS_TOGGLE,
        tool: "ui_panels_toggle",
        description: "Toggle debug panels",
        params: &[],
    },
    CommandSpec {
        method: methods::VOICE_DISCONNECT,
        tool: "voice_disconnect",
        description: "Disconnect the active voice session across all tabs",
        params: &[],
    },
    CommandSpec {
        method: methods::ENV_GET,
        tool: "env_get",
        description: "Read the allow-listed configuration keys",
        params: &[],
    },
    CommandSpec {
        method: methods::TOOLS_LIST,
        tool: "tools_list",
        description: "List every command with its input schema",
        params: &[],
    },
];

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetMood(Mood),
    SetFace(FaceName),
    SetPanels { visible: bool },
    TogglePanels,
    DisconnectVoice,
    PostWebhook {
        payload: Map<String, Value>,
        /// Trimmed; `None` when absent or blank.
        url: Option<String>,
    },
    GetEnv,
    ListTools,
}

impl Command {
    pub const fn method(&self) -> &'static str {
        match self {
            Self::SetMood(_) => methods::EYES_SET_MOOD,
            Self::SetFace(_) => methods::FACE_SET,
            Self::SetPanels { .. } => methods::UI_PANELS_SET,
            Self::TogglePanels => methods::UI_PANELS_TOGGLE,
            Self::DisconnectVoice => methods::VOICE_DISCONNECT,
            Self::PostWebhook { .. } => methods::WEBHOOK_POST,
            Self::GetEnv => methods::ENV_GET,
            Self::ListTools => methods::TOOLS_LIST,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Method not found: {0}")]
    UnknownMethod(String),
    #[error("{0}")]
    InvalidParams(String),
}

impl From<CommandError> for RpcError {
    fn from(error: CommandError) -> Self {
        match error {
            CommandError::UnknownMethod(method) => RpcError::method_not_found(&method),
            CommandError::InvalidParams(message) => RpcError::invalid_params(message),
        }
    }
}

pub fn find(method: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| spec.method == method)
}

impl CommandSpec {
    /// JSON-Schema object describing the command's params.
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in self.params {
            let mut property = Map::new();
            match param.kind {
                ParamKind::OneOf(values) => {
                    property.insert("type".to_string(), json!("string"));
                    property.insert("enum".to_string(), json!(values));
                }
                ParamKind::String => {
                    property.insert("type".to_string(), json!("string"));
                }
                ParamKind::Boolean => {
                    property.insert("type".to_string(), json!("boolean"));
                }
                ParamKind::Object => {
                    property.insert("type".to_string(), json!("object"));
                }
            }
            property.insert("description".to_string(), json!(param.description));
            properties.insert(param.name.to_string(), Value::Object(property));
        }
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|param| param.required)
            .map(|param| param.name)
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    pub fn descriptor(&self) -> Value {
        json!({
            "name": self.tool,
            "method": self.method,
            "description": self.description,
            "inputSchema": self.input_schema(),
        })
    }

    fn validate(&self, params: &Map<String, Value>) -> Result<(), CommandError> {
        for param in self.params {
            let Some(value) = params.get(param.name).filter(|value| !value.is_null()) else {
                if param.required {
                    return Err(CommandError::InvalidParams(format!(
                        "Missing required param: {}",
                        param.name
                    )));
                }
                continue;
            };
            let valid = match param.kind {
                ParamKind::OneOf(values) => value
                    .as_str()
                    .is_some_and(|text| values.contains(&text)),
                ParamKind::String => value.is_string(),
                ParamKind::Boolean => value.is_boolean(),
                ParamKind::Object => value.is_object(),
            };
            if !valid {
                return Err(CommandError::InvalidParams(kind_message(param)));
            }
        }
        Ok(())
    }
}

fn kind_message(param: &ParamSpec) -> String {
    match param.kind {
        ParamKind::OneOf(values) => format!("{} must be one of {}", param.name, values.join("|")),
        ParamKind::String => format!("{} must be a string", param.name),
        ParamKind::Boolean => format!("{} must be a boolean", param.name),
        ParamKind::Object => format!("{} must be an object", param.name),
    }
}

pub fn tool_descriptors() -> Vec<Value> {
    COMMANDS.iter().map(CommandSpec::descriptor).collect()
}

/// Validates `params` against the command's schema and builds the typed
/// command. Nothing is dispatched here.
pub fn resolve(method: &str, params: &Value) -> Result<Command, CommandError> {
    let spec = find(method).ok_or_else(|| CommandError::UnknownMethod(method.to_string()))?;
    let empty = Map::new();
    let params = match params {
        Value::Null => &empty,
        Value::Object(params) => params,
        _ => {
            return Err(CommandError::InvalidParams(
                "params must be an object".to_string(),
            ));
        }
    };
    spec.validate(params)?;

    let text = |name: &str| params.get(name).and_then(Value::as_str).unwrap_or_default();
    let command = match spec.method {
        methods::EYES_SET_MOOD => Command::SetMood(
            text("mood")
                .parse()
                .map_err(|error: face_protocol::UnknownValue| {
                    CommandError::InvalidParams(error.to_string())
                })?,
        ),
        methods::FACE_SET => Command::SetFace(
            text("name")
                .parse()
                .map_err(|error: face_protocol::UnknownValue| {
                    CommandError::InvalidParams(error.to_string())
                })?,
        ),
        methods::UI_PANELS_SET => Command::SetPanels {
            visible: params
                .get("visible")
                .and_then(Value::as_bool)
                .unwrap_or_default(),
        },
        methods::UI_PANELS_TOGGLE => Command::TogglePanels,
        methods::VOICE_DISCONNECT => Command::DisconnectVoice,
        methods::WEBHOOK_POST => Command::PostWebhook {
            payload: params
                .get("payload")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            url: Some(text("url").trim())
                .filter(|url| !url.is_empty())
                .map(str::to_string),
        },
        methods::ENV_GET => Command::GetEnv,
        methods::TOOLS_LIST => Command::ListTools,
        other => return Err(CommandError::UnknownMethod(other.to_string())),
    };
    Ok(command)
}
