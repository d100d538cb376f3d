
use std::collections::BTreeMap;

// our own stuff that we need
use crate::construct::{Component, Operation, Param, Reference, ResultRecord};
use crate::datatype::Value;
use crate::error::{IntraError, Result};
use crate::session::ResultStore;

/// Values supplied to `execute_prepared`, by bind position.
pub type Binds = BTreeMap<u32, Value>;

/// Resolves every parameter of `op` against the results captured so far.
/// Nothing is cached, a reference read twice is resolved twice.
pub fn resolve(op: &Operation, results: &ResultStore, binds: Option<&Binds>) -> Result<Arguments> {
    let mut values = BTreeMap::new();
    for (key, param) in op.params() {
        let value = resolve_param(param, results, binds)
            .map_err(|e| match e {
                IntraError::Reference(message) => IntraError::Reference(format!("parameter '{key}': {message}")),
                IntraError::Validation(message) => IntraError::Validation(format!("parameter '{key}': {message}")),
                other => other,
            })?;
        values.insert(key.clone(), value);
    }
    Ok(Arguments {
        kind: op.kind().name().to_string(),
        values,
    })
}

pub fn resolve_param(param: &Param, results: &ResultStore, binds: Option<&Binds>) -> Result<Value> {
    match param {
        // objects keyed by $ref or $bind that did not parse as one are typos, not data
        Param::Literal(Value::Map(map)) if map.contains_key("$ref") || map.contains_key("$bind") => {
            Err(IntraError::Validation(format!(
                "malformed reference or bind marker with keys [{}]",
                map.keys().map(String::as_str).collect::<Vec<_>>().join(", ")
            )))
        }
        Param::Literal(value) => Ok(value.clone()),
        Param::Reference(reference) => resolve_reference(reference, results),
        Param::Bind(marker) => match binds {
            None => Err(IntraError::Reference(format!(
                "bind marker {} can only be resolved by execute_prepared",
                marker.position
            ))),
            Some(binds) => binds.get(&marker.position).cloned().ok_or_else(|| {
                IntraError::Reference(format!("no value was bound to position {}", marker.position))
            }),
        },
    }
}

fn resolve_reference(reference: &Reference, results: &ResultStore) -> Result<Value> {
    let record = results.get(reference.index)?;
    let field = reference.field.as_deref();
    match record {
        ResultRecord::Rows(rows) => match field {
            None | Some("rows") => Ok(Value::List(rows.iter().map(|r| r.to_value()).collect())),
            Some(name) => {
                let component: Component = name.parse().map_err(|_| {
                    IntraError::Reference(format!(
                        "operation {} returned rows, which have no field '{name}'",
                        reference.index
                    ))
                })?;
                let first = rows.first().ok_or_else(|| {
                    IntraError::Reference(format!(
                        "operation {} returned no rows to take '{name}' from",
                        reference.index
                    ))
                })?;
                first.component(component).ok_or_else(|| {
                    IntraError::Reference(format!(
                        "the first row of operation {} carries no '{name}'",
                        reference.index
                    ))
                })
            }
        },
        ResultRecord::Ok | ResultRecord::Scalar(_) => match field {
            None | Some("value") => Ok(match record {
                ResultRecord::Scalar(v) => v.clone(),
                _ => Value::from("OK"),
            }),
            Some(name) => Err(IntraError::Reference(format!(
                "operation {} returned a scalar, which has no field '{name}'",
                reference.index
            ))),
        },
    }
}

// ------------- Arguments -------------
/// The resolved parameters of one operation, with typed accessors.
#[derive(Debug, Clone)]
pub struct Arguments {
    kind: String,
    values: BTreeMap<String, Value>,
}

impl Arguments {
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self.values.get(key) {
            Some(Value::Null) | None => None,
            Some(v) => Some(v),
        }
    }
    fn invalid(&self, key: &str, expected: &str, found: &Value) -> IntraError {
        IntraError::Validation(format!(
            "{}: parameter '{key}' must be {expected}, got {}",
            self.kind,
            found.type_name()
        ))
    }
    pub fn required(&self, key: &str) -> Result<&Value> {
        self.get(key).ok_or_else(|| {
            IntraError::Validation(format!("{}: missing required parameter '{key}'", self.kind))
        })
    }
    pub fn opt_text(&self, key: &str) -> Result<Option<String>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Text(s)) => Ok(Some(s.clone())),
            Some(Value::Bytes(b)) => String::from_utf8(b.clone())
                .map(Some)
                .map_err(|_| IntraError::Validation(format!("{}: parameter '{key}' is not valid UTF-8", self.kind))),
            Some(other) => Err(self.invalid(key, "text", other)),
        }
    }
    pub fn text(&self, key: &str) -> Result<String> {
        self.required(key)?;
        self.opt_text(key)?
            .ok_or_else(|| IntraError::Validation(format!("{}: missing required parameter '{key}'", self.kind)))
    }
    pub fn opt_integer(&self, key: &str) -> Result<Option<i64>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Text(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| IntraError::Validation(format!("{}: parameter '{key}' is not an integer", self.kind))),
            Some(Value::Bytes(b)) if b.len() == 8 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(b);
                Ok(Some(i64::from_be_bytes(raw)))
            }
            Some(v) => v.as_i64().map(Some).ok_or_else(|| self.invalid(key, "an integer", v)),
        }
    }
    pub fn integer(&self, key: &str) -> Result<i64> {
        self.required(key)?;
        self.opt_integer(key)?
            .ok_or_else(|| IntraError::Validation(format!("{}: missing required parameter '{key}'", self.kind)))
    }
    pub fn opt_boolean(&self, key: &str) -> Result<Option<bool>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "on" => Ok(Some(true)),
                "false" | "off" => Ok(Some(false)),
                _ => Err(self.invalid(key, "a boolean", &Value::Text(s.clone()))),
            },
            Some(v) => v.as_bool().map(Some).ok_or_else(|| self.invalid(key, "a boolean", v)),
        }
    }
    pub fn boolean(&self, key: &str) -> Result<bool> {
        self.required(key)?;
        self.opt_boolean(key)?
            .ok_or_else(|| IntraError::Validation(format!("{}: missing required parameter '{key}'", self.kind)))
    }
    pub fn list(&self, key: &str) -> Result<&Vec<Value>> {
        let value = self.required(key)?;
        value.as_list().ok_or_else(|| self.invalid(key, "a list", value))
    }
    pub fn opt_map(&self, key: &str) -> Result<BTreeMap<String, Value>> {
        match self.get(key) {
            None => Ok(BTreeMap::new()),
            Some(Value::Map(m)) => Ok(m.clone()),
            Some(other) => Err(self.invalid(key, "a map", other)),
        }
    }
}
