use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A user-authored function: a display name and an opaque code body.
/// （使用者自訂函式：顯示名稱與不透明的程式碼內容。）
///
/// Keys other than `name` and `code` are kept in `extra` and written back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomFunction {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub code: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CustomFunction {
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
            extra: Map::new(),
        }
    }

    pub fn with_code(&self, code: impl Into<String>) -> Self {
        Self {
            name: self.name.clone(),
            code: code.into(),
            extra: self.extra.clone(),
        }
    }

    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: self.code.clone(),
            extra: self.extra.clone(),
        }
    }
}

/// The persisted plugin settings document.
///
/// Keys this crate does not own are kept in `extra` so a save never drops
/// settings written by other parts of the plugin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub custom_functions: Vec<CustomFunction>,
    #[serde(default)]
    pub highlight_text: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Settings {
    pub fn new(custom_functions: Vec<CustomFunction>, highlight_text: bool) -> Self {
        Self {
            custom_functions,
            highlight_text,
            extra: Map::new(),
        }
    }
}

/// Opaque row key handed to views in place of record identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(u64);

impl FunctionId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn#{}", self.0)
    }
}

/// One rendered row of the function table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FunctionRow<'a> {
    pub id: FunctionId,
    pub function: &'a CustomFunction,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_use_plugin_key_names() {
        let settings = Settings::new(vec![CustomFunction::new("sum", "return a + b;")], true);
        let value = serde_json::to_value(&settings).unwrap();
        assert_eq!(value["highlightText"], Value::Bool(true));
        assert_eq!(value["customFunctions"][0]["name"], "sum");
        assert_eq!(value["customFunctions"][0]["code"], "return a + b;");
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert!(settings.custom_functions.is_empty());
        assert!(!settings.highlight_text);
        assert!(settings.extra.is_empty());
    }

    #[test]
    fn unknown_keys_survive_a_round_trip() {
        let raw = r#"{"customFunctions":[],"highlightText":false,"variableDelimiter":"{{"}"#;
        let settings: Settings = serde_json::from_str(raw).unwrap();
        assert_eq!(settings.extra["variableDelimiter"], "{{");

        let value = serde_json::to_value(&settings).unwrap();
        assert_eq!(value["variableDelimiter"], "{{");
    }

    #[test]
    fn unknown_function_keys_survive_edits() {
        let raw = r#"{"customFunctions":[{"name":"a","code":"line1\nline2","extra":1}]}"#;
        let settings: Settings = serde_json::from_str(raw).unwrap();
        let function = &settings.custom_functions[0];
        assert_eq!(function.extra["extra"], 1);

        let renamed = function.with_name("b");
        let recoded = function.with_code("line3");
        assert_eq!(renamed.extra["extra"], 1);
        assert_eq!(recoded.extra["extra"], 1);

        let value = serde_json::to_value(&renamed).unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "name": "b", "code": "line1\nline2", "extra": 1 })
        );
    }

    #[test]
    fn with_code_keeps_the_name() {
        let original = CustomFunction::new("a", "1");
        assert_eq!(original.with_code("99"), CustomFunction::new("a", "99"));
        assert_eq!(original.with_name("b"), CustomFunction::new("b", "1"));
    }
}
