use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Declared type of a parameter or return value. Descriptive only; arguments
/// are not coerced or checked against it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeTag {
    Any,
    Boolean,
    Null,
    Number,
    String,
    Object,
    Array,
}

impl TypeTag {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Any => "Any",
            Self::Boolean => "Boolean",
            Self::Null => "Null",
            Self::Number => "Number",
            Self::String => "String",
            Self::Object => "Object",
            Self::Array => "Array",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TypeTag {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "any" | "*" => Ok(Self::Any),
            "boolean" | "bool" => Ok(Self::Boolean),
            "null" | "undefined" => Ok(Self::Null),
            "number" => Ok(Self::Number),
            "string" => Ok(Self::String),
            "object" => Ok(Self::Object),
            "array" => Ok(Self::Array),
            other => Err(format!("unknown type tag '{other}'")),
        }
    }
}

/// One entry of a method's ordered parameter list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeTag,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: TypeTag) -> Self {
        Self { name: name.into(), ty }
    }
}

impl<S: Into<String>> From<(S, TypeTag)> for Param {
    fn from((name, ty): (S, TypeTag)) -> Self {
        Self::new(name, ty)
    }
}

/// Reconciles caller-supplied arguments against a declared parameter list.
///
/// Positional arguments are taken by index up to the declared arity; named
/// arguments are looked up by parameter name. Extra arguments are ignored and
/// missing ones are left out, so a short result signals an arity mismatch.
pub fn map_args(given: Option<&JsonValue>, required: &[Param]) -> Vec<JsonValue> {
    match given {
        Some(JsonValue::Array(values)) => values.iter().take(required.len()).cloned().collect(),
        Some(JsonValue::Object(named)) => {
            required.iter().filter_map(|param| named.get(&param.name).cloned()).collect()
        }
        _ => Vec::new(),
    }
}
