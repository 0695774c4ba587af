use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{LauncherError, Result};

/// String-keyed JSON object exchanged over the pipe.
pub type ValueSet = Map<String, Value>;

pub const REQUEST_ID: &str = "RequestID";
pub const ARGUMENTS: &str = "Arguments";

/// Converts a `json!` object literal into a `ValueSet`. Non-object values yield an empty set.
pub fn value_set(value: Value) -> ValueSet {
    match value {
        Value::Object(map) => map,
        other => {
            tracing::warn!(target: "ipc", value = %other, "Expected a JSON object for a value set");
            ValueSet::new()
        }
    }
}

/// Top-level command selected by the `Arguments` key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Leave the message loop and shut down
    Terminate,
    /// Relaunch this process with administrator rights
    Elevate,
    /// Offered to every registered message handler
    Handler(String),
}

impl Command {
    pub fn parse(arguments: &str) -> Self {
        match arguments {
            "Terminate" => Command::Terminate,
            "Elevate" => Command::Elevate,
            other => Command::Handler(other.to_string()),
        }
    }
}

/// A request received from the application.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    values: ValueSet,
}

impl IncomingMessage {
    pub fn new(values: ValueSet) -> Self {
        Self { values }
    }

    /// Wraps a decoded JSON value. Only objects are messages.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(values) => Some(Self::new(values)),
            _ => None,
        }
    }

    pub fn values(&self) -> &ValueSet {
        &self.values
    }

    /// Correlation id to echo in replies.
    pub fn request_id(&self) -> Option<&str> {
        self.get_str(REQUEST_ID)
    }

    pub fn arguments(&self) -> Option<&str> {
        self.get_str(ARGUMENTS)
    }

    /// `None` when the message carries no `Arguments` key.
    pub fn command(&self) -> Option<Command> {
        self.arguments().map(Command::parse)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|v| !v.is_null())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Accepts JSON booleans and their string spellings.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
            _ => None,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn require_str(&self, key: &'static str) -> Result<&str> {
        self.get_str(key).ok_or(LauncherError::MissingField(key))
    }

    /// Deserializes the whole message into a typed request.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.values.clone()))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(value: Value) -> IncomingMessage {
        IncomingMessage::from_value(value).unwrap()
    }

    #[test]
    fn test_command_parsing() {
        assert_eq!(Command::parse("Terminate"), Command::Terminate);
        assert_eq!(Command::parse("Elevate"), Command::Elevate);
        assert_eq!(
            Command::parse("FileOperation"),
            Command::Handler("FileOperation".to_string())
        );
    }

    #[test]
    fn test_message_without_arguments_has_no_command() {
        let msg = message(json!({ "RequestID": "1" }));
        assert_eq!(msg.command(), None);
        assert_eq!(msg.request_id(), Some("1"));
    }

    #[test]
    fn test_non_object_is_not_a_message() {
        assert!(IncomingMessage::from_value(json!(null)).is_none());
        assert!(IncomingMessage::from_value(json!([1, 2])).is_none());
    }

    #[test]
    fn test_typed_getters() {
        let msg = message(json!({
            "Arguments": "FileOperation",
            "overwrite": "True",
            "permanently": false,
            "pid": "42",
            "count": 7,
            "RequestID": null
        }));
        assert_eq!(msg.get_bool("overwrite"), Some(true));
        assert_eq!(msg.get_bool("permanently"), Some(false));
        assert_eq!(msg.get_i64("pid"), Some(42));
        assert_eq!(msg.get_i64("count"), Some(7));
        assert_eq!(msg.request_id(), None);
        assert!(matches!(
            msg.require_str("filepath"),
            Err(LauncherError::MissingField("filepath"))
        ));
    }

    #[test]
    fn test_value_set_from_literal() {
        let set = value_set(json!({ "Success": 0 }));
        assert_eq!(set.get("Success"), Some(&json!(0)));
        assert!(value_set(json!(3)).is_empty());
    }
}
