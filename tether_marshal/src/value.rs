use crate::*;
use serde::*;
use std::collections::*;
use std::fmt::{Display, Formatter};
use thiserror::*;

/// The key under which an error descriptor carries its message.
pub const MESSAGE_FIELD: &str = "message";

/// A dynamically typed value that can cross the bridge.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>)
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// A short name for the kind of value, used in conversion errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map"
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(x) => Some(*x),
            _ => None
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(x) => Some(*x),
            _ => None
        }
    }

    /// Gets the value as a float, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(x) => Some(*x as f64),
            Self::Float(x) => Some(*x),
            _ => None
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(x) => Some(x),
            _ => None
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(x) => Some(x),
            _ => None
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(x) => Some(x),
            _ => None
        }
    }

    /// Gets a field of a map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|x| x.get(key))
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(x) => write!(f, "{x}"),
            Self::Int(x) => write!(f, "{x}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(x) => f.write_str(x),
            Self::List(x) => {
                f.write_str("[")?;
                for (index, item) in x.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            },
            Self::Map(x) => {
                f.write_str("{")?;
                for (index, (key, item)) in x.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {item}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Self::Null
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(value as i64)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Self::List(value.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<BTreeMap<String, T>> for Value {
    fn from(value: BTreeMap<String, T>) -> Self {
        Self::Map(value.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}

impl From<ErrorData> for Value {
    fn from(value: ErrorData) -> Self {
        value.to_value()
    }
}

/// Converts a bridge value back into a Rust type.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, BridgeError>;
}

fn mismatch<T>(expected: &'static str, value: &Value) -> Result<T, BridgeError> {
    Err(BridgeError::Conversion { expected, found: value.type_name() })
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, BridgeError> {
        Ok(value)
    }
}

impl FromValue for () {
    fn from_value(value: Value) -> Result<Self, BridgeError> {
        match value {
            Value::Null => Ok(()),
            other => mismatch("null", &other)
        }
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, BridgeError> {
        value.as_bool().map_or_else(|| mismatch("bool", &value), Ok)
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self, BridgeError> {
        value.as_i64().map_or_else(|| mismatch("int", &value), Ok)
    }
}

impl FromValue for i32 {
    fn from_value(value: Value) -> Result<Self, BridgeError> {
        value.as_i64().and_then(|x| i32::try_from(x).ok()).map_or_else(|| mismatch("i32", &value), Ok)
    }
}

impl FromValue for u32 {
    fn from_value(value: Value) -> Result<Self, BridgeError> {
        value.as_i64().and_then(|x| u32::try_from(x).ok()).map_or_else(|| mismatch("u32", &value), Ok)
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, BridgeError> {
        value.as_f64().map_or_else(|| mismatch("float", &value), Ok)
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, BridgeError> {
        match value {
            Value::String(x) => Ok(x),
            other => mismatch("string", &other)
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self, BridgeError> {
        match value {
            Value::List(x) => x.into_iter().map(T::from_value).collect(),
            other => mismatch("list", &other)
        }
    }
}

impl<T: FromValue> FromValue for BTreeMap<String, T> {
    fn from_value(value: Value) -> Result<Self, BridgeError> {
        match value {
            Value::Map(x) => x.into_iter().map(|(k, v)| T::from_value(v).map(|v| (k, v))).collect(),
            other => mismatch("map", &other)
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, BridgeError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some)
        }
    }
}

/// Reads positional arguments of a native method call.
pub struct ArgReader {
    args: std::vec::IntoIter<Value>,
    expected: usize
}

impl ArgReader {
    pub fn new(args: Vec<Value>) -> Self {
        Self {
            args: args.into_iter(),
            expected: 0
        }
    }

    /// Converts the next argument. A missing argument reads as null, so
    /// trailing `Option` parameters may be omitted by the caller.
    pub fn next<T: FromValue>(&mut self) -> Result<T, BridgeError> {
        let position = self.expected;
        self.expected += 1;
        T::from_value(self.args.next().unwrap_or_default())
            .map_err(|error| BridgeError::from_validation(format!("argument {position}: {error}")))
    }

    /// Ensures that no arguments remain unread.
    pub fn finish(self) -> Result<(), BridgeError> {
        let extra = self.args.len();
        if extra == 0 {
            Ok(())
        }
        else {
            Err(BridgeError::from_validation(format!("expected {} arguments, got {}", self.expected, self.expected + extra)))
        }
    }
}

/// Describes why a call failed: a message plus arbitrary extra fields.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct ErrorData {
    /// The human-readable failure message.
    pub message: String,
    /// Any additional fields carried by the failure descriptor.
    pub extra: BTreeMap<String, Value>
}

impl ErrorData {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            extra: BTreeMap::new()
        }
    }

    /// Attaches an extra field. Setting the message field replaces the message.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let value = value.into();
        if key == MESSAGE_FIELD {
            self.message = value.to_string();
        }
        else {
            self.extra.insert(key, value);
        }
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// Reconstructs an error from a failure descriptor. Map descriptors supply
    /// the message field and any extra fields; any other value becomes the message.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Map(mut fields) => {
                let message = match fields.remove(MESSAGE_FIELD) {
                    Some(Value::String(x)) => x,
                    Some(other) => other.to_string(),
                    None => String::new()
                };
                Self {
                    message,
                    extra: fields
                }
            },
            Value::String(message) => Self::new(message),
            other => Self::new(other.to_string())
        }
    }

    /// Produces the failure descriptor for this error.
    pub fn to_value(&self) -> Value {
        let mut fields = self.extra.clone();
        fields.insert(MESSAGE_FIELD.to_string(), Value::String(self.message.clone()));
        Value::Map(fields)
    }
}

impl From<String> for ErrorData {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for ErrorData {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<BridgeError> for ErrorData {
    fn from(value: BridgeError) -> Self {
        match value {
            BridgeError::Remote(data) => data,
            other => Self::new(other.to_string())
        }
    }
}
