use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A value produced by the expression language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Set(BTreeSet<String>),
}

/// Tag of a value, used in type-mismatch diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Bool,
    Int,
    Float,
    Str,
    Set,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Bool => write!(f, "bool"),
            ValueType::Int => write!(f, "int"),
            ValueType::Float => write!(f, "float"),
            ValueType::Str => write!(f, "string"),
            ValueType::Set => write!(f, "set"),
        }
    }
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::Str(_) => ValueType::Str,
            Value::Set(_) => ValueType::Set,
        }
    }

    /// Build a set value from anything yielding strings
    pub fn set<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Value::Set(items.into_iter().map(Into::into).collect())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view with Int widened to Float
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// Canonical text form, used for string concatenation and inline substitution
    pub fn to_text(&self) -> String {
        self.to_string()
    }

    /// Interpret an externally supplied string (CLI definition, build property).
    ///
    /// `true`/`false` become booleans, decimal or `0x` hex digits become integers,
    /// float syntax becomes a float, and everything else stays a string.
    pub fn parse_literal(text: &str) -> Value {
        let trimmed = text.trim();
        match trimmed {
            "true" => return Value::Bool(true),
            "false" => return Value::Bool(false),
            _ => {}
        }
        if let Some(hex) = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            if let Ok(i) = i64::from_str_radix(hex, 16) {
                return Value::Int(i);
            }
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Value::Int(i);
        }
        let looks_numeric = trimmed
            .chars()
            .next()
            .map(|c| c.is_ascii_digit() || c == '-' || c == '+' || c == '.')
            .unwrap_or(false);
        if looks_numeric {
            if let Ok(f) = trimmed.parse::<f64>() {
                return Value::Float(f);
            }
        }
        Value::Str(text.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => {
                let text = x.to_string();
                if x.is_finite() && !text.contains('.') {
                    write!(f, "{}.0", text)
                } else {
                    write!(f, "{}", text)
                }
            }
            Value::Str(s) => write!(f, "{}", s),
            Value::Set(items) => {
                let joined = items.iter().map(String::as_str).collect::<Vec<_>>().join(",");
                write!(f, "{}", joined)
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

/// Convert a TOML value from the configuration file into a preprocessor value.
///
/// Arrays become sets of their elements' text forms; tables are not supported.
pub fn from_toml(value: &toml::Value) -> Option<Value> {
    match value {
        toml::Value::Boolean(b) => Some(Value::Bool(*b)),
        toml::Value::Integer(i) => Some(Value::Int(*i)),
        toml::Value::Float(f) => Some(Value::Float(*f)),
        toml::Value::String(s) => Some(Value::Str(s.clone())),
        toml::Value::Datetime(d) => Some(Value::Str(d.to_string())),
        toml::Value::Array(items) => {
            let mut set = BTreeSet::new();
            for item in items {
                set.insert(from_toml(item)?.to_text());
            }
            Some(Value::Set(set))
        }
        toml::Value::Table(_) => None,
    }
}
