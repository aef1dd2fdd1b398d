//! # Dynamic values
//!
//! The bus moves loosely typed arguments: method arguments, replies, signal
//! payloads and property values are all `Value`s. Typed code on the consumer
//! side converts them with [`FromValue`], and builds them with `From<T>`.
//!
//! ## Philosophy
//!
//! - **Closed set**: The variants mirror the basic bus types plus arrays and
//!   string-keyed dictionaries. Anything richer is the code generator's job.
//! - **Lossless conversion only**: `FromValue` never widens or narrows numbers.
//!   An `i32` property read as `i64` is an error, not a cast.

use std::collections::BTreeMap;
use std::fmt;

/// A single dynamically typed bus value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Byte(u8),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(String),
    Array(Vec<Value>),
    Dict(BTreeMap<String, Value>),
}

/// Cached or announced property values of one interface, keyed by property name.
pub type PropertySet = BTreeMap<String, Value>;

/// Builds a property set from `(name, value)` pairs.
pub fn property_set<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> PropertySet
where
    K: Into<String>,
    V: Into<Value>,
{
    entries
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

impl Value {
    /// The bus type signature of this value.
    ///
    /// Arrays and dictionaries are reported as variant containers (`av`,
    /// `a{sv}`) since their element type is not tracked.
    pub fn signature(&self) -> &'static str {
        match self {
            Self::Bool(_) => "b",
            Self::Byte(_) => "y",
            Self::I32(_) => "i",
            Self::U32(_) => "u",
            Self::I64(_) => "x",
            Self::U64(_) => "t",
            Self::F64(_) => "d",
            Self::Str(_) => "s",
            Self::Array(_) => "av",
            Self::Dict(_) => "a{sv}",
        }
    }

    /// Human readable type name used in conversion errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Byte(_) => "byte",
            Self::I32(_) => "i32",
            Self::U32(_) => "u32",
            Self::I64(_) => "i64",
            Self::U64(_) => "u64",
            Self::F64(_) => "f64",
            Self::Str(_) => "string",
            Self::Array(_) => "array",
            Self::Dict(_) => "dict",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Byte(v) => write!(f, "{}", v),
            Self::I32(v) => write!(f, "{}", v),
            Self::U32(v) => write!(f, "{}", v),
            Self::I64(v) => write!(f, "{}", v),
            Self::U64(v) => write!(f, "{}", v),
            Self::F64(v) => write!(f, "{}", v),
            Self::Str(v) => write!(f, "{:?}", v),
            Self::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Self::Dict(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Failure to turn bus values into the Rust shape a caller expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnmarshalError {
    /// A value had a different type than expected.
    TypeMismatch { expected: String, found: String },
    /// The number of arguments did not match.
    ArgumentCount { expected: usize, found: usize },
    /// A required property was absent from a property set.
    MissingProperty(String),
}

impl fmt::Display for UnmarshalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeMismatch { expected, found } => {
                write!(f, "Type mismatch: expected {}, found {}", expected, found)
            }
            Self::ArgumentCount { expected, found } => {
                write!(f, "Argument count mismatch: expected {}, found {}", expected, found)
            }
            Self::MissingProperty(name) => write!(f, "Missing property '{}'", name),
        }
    }
}

impl std::error::Error for UnmarshalError {}

/// Conversion from a borrowed bus value.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self, UnmarshalError>;
}

fn mismatch(expected: &str, found: &Value) -> UnmarshalError {
    UnmarshalError::TypeMismatch {
        expected: expected.to_string(),
        found: found.type_name().to_string(),
    }
}

macro_rules! scalar_value {
    ($ty:ty, $variant:ident, $name:literal) => {
        impl FromValue for $ty {
            fn from_value(value: &Value) -> Result<Self, UnmarshalError> {
                match value {
                    Value::$variant(v) => Ok(v.clone()),
                    other => Err(mismatch($name, other)),
                }
            }
        }

        impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v)
            }
        }
    };
}

scalar_value!(bool, Bool, "bool");
scalar_value!(u8, Byte, "byte");
scalar_value!(i32, I32, "i32");
scalar_value!(u32, U32, "u32");
scalar_value!(i64, I64, "i64");
scalar_value!(u64, U64, "u64");
scalar_value!(f64, F64, "f64");
scalar_value!(String, Str, "string");

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Value::Dict(entries)
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, UnmarshalError> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Result<Self, UnmarshalError> {
        match value {
            Value::Array(items) => items.iter().map(T::from_value).collect(),
            other => Err(mismatch("array", other)),
        }
    }
}

impl FromValue for BTreeMap<String, Value> {
    fn from_value(value: &Value) -> Result<Self, UnmarshalError> {
        match value {
            Value::Dict(entries) => Ok(entries.clone()),
            other => Err(mismatch("dict", other)),
        }
    }
}

/// Reads a required, typed property out of a property set.
pub fn take_property<T: FromValue>(props: &PropertySet, name: &str) -> Result<T, UnmarshalError> {
    let value = props
        .get(name)
        .ok_or_else(|| UnmarshalError::MissingProperty(name.to_string()))?;
    T::from_value(value)
}
