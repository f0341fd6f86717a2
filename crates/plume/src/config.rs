//! Process-global configuration, installed by the host as a JSON object.
//!
//! Recognized keys: `file`, `source`, `show_tokens`, `show_ast`, `show_ir`,
//! `show_bc`, `verbose`. Unknown keys are kept and ignored.

use std::sync::{LazyLock, PoisonError, RwLock};

use serde_json::{Map, Value as JsonValue};

static CONFIG: LazyLock<RwLock<Map<String, JsonValue>>> = LazyLock::new(|| RwLock::new(Map::new()));

/// Replaces the configuration with the parsed JSON object.
pub fn init(config_json: &str) -> Result<(), serde_json::Error> {
    let parsed: JsonValue = serde_json::from_str(config_json)?;
    let map = parsed.as_object().cloned().unwrap_or_default();
    *CONFIG.write().unwrap_or_else(PoisonError::into_inner) = map;
    Ok(())
}

/// True when the key is present.
#[must_use]
pub fn has(key: &str) -> bool {
    CONFIG
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .contains_key(key)
}

/// Reads a key as a string. Non-string JSON values render via their JSON
/// form.
#[must_use]
pub fn get(key: &str) -> Option<String> {
    let config = CONFIG.read().unwrap_or_else(PoisonError::into_inner);
    config.get(key).map(|value| match value {
        JsonValue::String(text) => text.clone(),
        other => other.to_string(),
    })
}

/// Reads a diagnostic toggle: present and not explicitly false/0/"".
#[must_use]
pub fn flag(key: &str) -> bool {
    let config = CONFIG.read().unwrap_or_else(PoisonError::into_inner);
    match config.get(key) {
        None => false,
        Some(JsonValue::Bool(b)) => *b,
        Some(JsonValue::Null) => false,
        Some(JsonValue::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(JsonValue::String(s)) => !s.is_empty() && s != "0" && s != "false",
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_replaces_previous_configuration() {
        init(r#"{"file": "demo.code", "verbose": true}"#).unwrap();
        assert!(has("file"));
        assert_eq!(get("file").as_deref(), Some("demo.code"));
        assert!(flag("verbose"));

        init(r#"{"source": "print(1)"}"#).unwrap();
        assert!(!has("file"));
        assert_eq!(get("source").as_deref(), Some("print(1)"));
        assert!(!flag("verbose"));
    }
}
