//! Method names accepted on `POST /mcp` and the voice-tool aliases the
//! realtime assistant uses for them.

pub const EYES_SET_MOOD: &str = "eyes.set_mood";
pub const FACE_SET: &str = "face.set";
pub const UI_PANELS_SET: &str = "ui.panels.set";
pub const UI_PANELS_TOGGLE: &str = "ui.panels.toggle";
pub const VOICE_DISCONNECT: &str = "voice.disconnect";
pub const WEBHOOK_POST: &str = "webhook.post";
pub const ENV_GET: &str = "env.get";
pub const TOOLS_LIST: &str = "tools/list";

pub const ALL: &[&str] = &[
    EYES_SET_MOOD,
    FACE_SET,
    UI_PANELS_SET,
    UI_PANELS_TOGGLE,
    VOICE_DISCONNECT,
    WEBHOOK_POST,
    ENV_GET,
    TOOLS_LIST,
];

/// `(tool alias, method)` pairs.
pub const TOOL_ALIASES: &[(&str, &str)] = &[
    ("eyes_set_mood", EYES_SET_MOOD),
    ("face_set", FACE_SET),
    ("ui_panels_set", UI_PANELS_SET),
    ("ui_panels_toggle", UI_PANELS_TOGGLE),
    ("voice_disconnect", VOICE_DISCONNECT),
    ("webhook_post", WEBHOOK_POST),
    ("env_get", ENV_GET),
    ("tools_list", TOOLS_LIST),
];

pub fn method_for_tool(tool: &str) -> Option<&'static str> {
    TOOL_ALIASES
        .iter()
        .find(|(alias, _)| *alias == tool)
        .map(|(_, method)| *method)
}

pub fn tool_for_method(method: &str) -> Option<&'static str> {
    TOOL_ALIASES
        .iter()
        .find(|(_, name)| *name == method)
        .map(|(alias, _)| *alias)
}
