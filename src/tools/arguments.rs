//! Typed access to tool call arguments.

use std::borrow::Cow;

use crate::error::ValidationError;

/// Wrapper around tool call arguments providing typed extraction.
///
/// Accessors are lenient about representation (models regularly send
/// numbers as strings) and strict about presence: `require_*` returns a
/// [`ValidationError`] naming the missing key.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolArguments {
    value: serde_json::Value,
}

impl ToolArguments {
    pub fn new(value: serde_json::Value) -> Self {
        Self { value }
    }

    /// Get the raw JSON value.
    pub fn raw(&self) -> &serde_json::Value {
        &self.value
    }

    /// Get an optional, non-blank string argument (trimmed). A JSON number
    /// is read as its decimal text.
    pub fn get_str_opt(&self, key: &str) -> Option<Cow<'_, str>> {
        match self.value.get(key)? {
            serde_json::Value::String(s) => Some(Cow::Borrowed(s.trim())),
            serde_json::Value::Number(n) => Some(Cow::Owned(n.to_string())),
            _ => None,
        }
        .filter(|s| !s.is_empty())
    }

    /// Get a required string argument.
    pub fn require_str(&self, key: &str) -> Result<Cow<'_, str>, ValidationError> {
        self.get_str_opt(key)
            .ok_or_else(|| ValidationError::new(format!("missing required argument: {key}")))
    }

    /// Get an optional unsigned integer, accepting `7` or `"7"`.
    pub fn get_u64_opt(&self, key: &str) -> Result<Option<u64>, ValidationError> {
        match self.value.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::Number(n)) => n
                .as_u64()
                .map(Some)
                .ok_or_else(|| ValidationError::new(format!("argument {key} must be a non-negative integer"))),
            Some(serde_json::Value::String(s)) => s
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|_| ValidationError::new(format!("argument {key} must be a non-negative integer"))),
            Some(_) => Err(ValidationError::new(format!(
                "argument {key} must be a non-negative integer"
            ))),
        }
    }

    /// Get an optional boolean, defaulting to `false`.
    pub fn get_flag(&self, key: &str) -> bool {
        match self.value.get(key) {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    /// Get an optional object of string values, in key order.
    pub fn get_string_map(&self, key: &str) -> Result<Vec<(String, String)>, ValidationError> {
        match self.value.get(key) {
            None | Some(serde_json::Value::Null) => Ok(Vec::new()),
            Some(serde_json::Value::Object(map)) => Ok(map
                .iter()
                .map(|(k, v)| match v {
                    serde_json::Value::String(s) => (k.clone(), s.clone()),
                    other => (k.clone(), other.to_string()),
                })
                .collect()),
            Some(_) => Err(ValidationError::new(format!("argument {key} must be an object"))),
        }
    }
}

impl From<serde_json::Value> for ToolArguments {
    fn from(value: serde_json::Value) -> Self {
        Self::new(value)
    }
}
