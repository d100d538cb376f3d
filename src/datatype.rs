
// used for DecimalType values
use bigdecimal::BigDecimal;
// used for bytes that travel inside JSON
use base64::{Engine as _, engine::general_purpose::STANDARD};

// used when parsing a string to a data type or decimal
use std::str::FromStr;
// used to print out readable forms of a value or data type
use std::fmt;
// used when comparing values inside expressions
use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{IntraError, Result};

// ------------- Value -------------
/// A dynamically typed value, as found in operation parameters and in the
/// name/value components of decoded rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Decimal(BigDecimal),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    // the one-key object that carries base64 bytes on the wire
    pub const BYTES_MARK: &'static str = "$bytes";

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Decimal(_) => "decimal",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }
    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Decimal(d) => d.to_string().parse().ok(),
            _ => None,
        }
    }
    /// Orders two values when they are comparable. Numbers compare across
    /// int/float/decimal, and bytes compare against text through their UTF-8 reading.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Text(b)) => Some(String::from_utf8_lossy(a).as_ref().cmp(b.as_str())),
            (Value::Text(a), Value::Bytes(b)) => Some(a.as_str().cmp(String::from_utf8_lossy(b).as_ref())),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::List(_) | Value::Map(_) => write!(f, "{}", serde_json::Value::from(self.clone())),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(a) => Value::List(a.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(o) => {
                if o.len() == 1 {
                    if let Some(serde_json::Value::String(encoded)) = o.get(Value::BYTES_MARK) {
                        if let Ok(bytes) = STANDARD.decode(encoded) {
                            return Value::Bytes(bytes);
                        }
                    }
                }
                Value::Map(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::from(i),
            Value::Float(x) => serde_json::Number::from_f64(x)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s),
            Value::Bytes(b) => serde_json::Value::String(STANDARD.encode(b)),
            Value::Decimal(d) => serde_json::Value::String(d.to_string()),
            Value::List(l) => serde_json::Value::Array(l.into_iter().map(serde_json::Value::from).collect()),
            Value::Map(m) => serde_json::Value::Object(
                m.into_iter().map(|(k, v)| (k, serde_json::Value::from(v))).collect(),
            ),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}
impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}
impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}
impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}
impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i as i64)
    }
}
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}
impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}
impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}
impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Value::List(l)
    }
}
impl From<BTreeMap<String, Value>> for Value {
    fn from(m: BTreeMap<String, Value>) -> Self {
        Value::Map(m)
    }
}

// ------------- Data Types --------------
/// The decode types that `assume` can attach to the name or value role of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Bytes,
    Utf8,
    Ascii,
    Int32,
    Long,
    Boolean,
    Double,
    Decimal,
}

impl DataType {
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Bytes => "BytesType",
            DataType::Utf8 => "UTF8Type",
            DataType::Ascii => "AsciiType",
            DataType::Int32 => "Int32Type",
            DataType::Long => "LongType",
            DataType::Boolean => "BooleanType",
            DataType::Double => "DoubleType",
            DataType::Decimal => "DecimalType",
        }
    }

    fn mismatch(&self, value: &Value) -> IntraError {
        IntraError::Validation(format!("{} cannot hold a {} value", self.name(), value.type_name()))
    }

    pub fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        match (self, value) {
            (DataType::Bytes, v) => encode_natural(v),
            (DataType::Utf8, Value::Text(s)) => Ok(s.as_bytes().to_vec()),
            (DataType::Utf8, Value::Bytes(b)) if std::str::from_utf8(b).is_ok() => Ok(b.clone()),
            (DataType::Ascii, Value::Text(s)) if s.is_ascii() => Ok(s.as_bytes().to_vec()),
            (DataType::Int32, Value::Int(i)) => i32::try_from(*i)
                .map(|i| i.to_be_bytes().to_vec())
                .map_err(|_| IntraError::Validation(format!("{i} is out of range for Int32Type"))),
            (DataType::Int32, Value::Bytes(b)) if b.len() == 4 => Ok(b.clone()),
            (DataType::Long, Value::Int(i)) => Ok(i.to_be_bytes().to_vec()),
            (DataType::Long, Value::Bytes(b)) if b.len() == 8 => Ok(b.clone()),
            (DataType::Boolean, Value::Bool(b)) => Ok(vec![u8::from(*b)]),
            (DataType::Double, Value::Float(x)) => Ok(x.to_be_bytes().to_vec()),
            (DataType::Double, Value::Int(i)) => Ok((*i as f64).to_be_bytes().to_vec()),
            (DataType::Decimal, Value::Decimal(d)) => Ok(d.to_string().into_bytes()),
            (DataType::Decimal, Value::Int(i)) => Ok(BigDecimal::from(*i).to_string().into_bytes()),
            (DataType::Decimal, Value::Text(s)) => BigDecimal::from_str(s)
                .map(|d| d.to_string().into_bytes())
                .map_err(|e| IntraError::Validation(format!("'{s}' is not a decimal: {e}"))),
            (_, Value::Null) => Ok(Vec::new()),
            (t, v) => Err(t.mismatch(v)),
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Value> {
        let wrong_width = |expected: usize| {
            IntraError::Validation(format!(
                "{} expects {expected} bytes, found {}",
                self.name(),
                bytes.len()
            ))
        };
        if bytes.is_empty() && !matches!(self, DataType::Bytes | DataType::Utf8 | DataType::Ascii) {
            return Ok(Value::Null);
        }
        match self {
            DataType::Bytes => Ok(Value::Bytes(bytes.to_vec())),
            DataType::Utf8 | DataType::Ascii => {
                let text = std::str::from_utf8(bytes).map_err(|_| {
                    IntraError::Validation(format!("bytes are not valid {}", self.name()))
                })?;
                if *self == DataType::Ascii && !text.is_ascii() {
                    return Err(IntraError::Validation("bytes are not valid AsciiType".into()));
                }
                Ok(Value::Text(text.to_string()))
            }
            DataType::Int32 => {
                let raw: [u8; 4] = bytes.try_into().map_err(|_| wrong_width(4))?;
                Ok(Value::Int(i64::from(i32::from_be_bytes(raw))))
            }
            DataType::Long => {
                let raw: [u8; 8] = bytes.try_into().map_err(|_| wrong_width(8))?;
                Ok(Value::Int(i64::from_be_bytes(raw)))
            }
            DataType::Boolean => match bytes {
                [b] => Ok(Value::Bool(*b != 0)),
                _ => Err(wrong_width(1)),
            },
            DataType::Double => {
                let raw: [u8; 8] = bytes.try_into().map_err(|_| wrong_width(8))?;
                Ok(Value::Float(f64::from_be_bytes(raw)))
            }
            DataType::Decimal => {
                let text = String::from_utf8_lossy(bytes);
                BigDecimal::from_str(&text)
                    .map(Value::Decimal)
                    .map_err(|e| IntraError::Validation(format!("'{text}' is not a decimal: {e}")))
            }
        }
    }
}

impl FromStr for DataType {
    type Err = IntraError;
    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "BytesType" => Ok(DataType::Bytes),
            "UTF8Type" => Ok(DataType::Utf8),
            "AsciiType" => Ok(DataType::Ascii),
            "Int32Type" => Ok(DataType::Int32),
            "LongType" | "CounterColumnType" => Ok(DataType::Long),
            "BooleanType" => Ok(DataType::Boolean),
            "DoubleType" => Ok(DataType::Double),
            "DecimalType" => Ok(DataType::Decimal),
            other => Err(IntraError::Validation(format!("unknown data type '{other}'"))),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Encoding used when no type has been assumed for a role.
pub fn encode_natural(value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Bool(b) => Ok(vec![u8::from(*b)]),
        Value::Int(i) => Ok(i.to_be_bytes().to_vec()),
        Value::Float(x) => Ok(x.to_be_bytes().to_vec()),
        Value::Text(s) => Ok(s.as_bytes().to_vec()),
        Value::Bytes(b) => Ok(b.clone()),
        Value::Decimal(d) => Ok(d.to_string().into_bytes()),
        Value::List(_) | Value::Map(_) => Err(IntraError::Validation(format!(
            "a {} cannot be stored as a column component",
            value.type_name()
        ))),
    }
}

pub fn encode(value: &Value, assumed: Option<DataType>) -> Result<Vec<u8>> {
    match assumed {
        Some(data_type) => data_type.encode(value),
        None => encode_natural(value),
    }
}

pub fn decode(bytes: &[u8], assumed: Option<DataType>) -> Result<Value> {
    match assumed {
        Some(data_type) => data_type.decode(bytes),
        None => Ok(Value::Bytes(bytes.to_vec())),
    }
}
