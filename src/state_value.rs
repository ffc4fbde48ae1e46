//! Typed replacement for the opaque string-keyed maps the source uses for
//! `session_state` and `metadata`.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// A value inside a `session_state` or `metadata` map.
///
/// Round-trips through `serde_json::Value` at the storage edge (see
/// `store::sqlite`/`store::postgres`), so existing JSON blobs deserialize
/// without a migration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<StateValue>),
    Map(FxHashMap<String, StateValue>),
}

impl Default for StateValue {
    fn default() -> Self {
        StateValue::Null
    }
}

/// A map of `StateValue`s, the concrete shape behind `session_state` and
/// `metadata` throughout this crate.
pub type StateMap = FxHashMap<String, StateValue>;

impl StateValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            StateValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            StateValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StateValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StateValue::Float(f) => Some(*f),
            StateValue::Int(n) => Some(*n as f64),
            _ => None,
        }
    }
}

impl From<&serde_json::Value> for StateValue {
    fn from(v: &serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => StateValue::Null,
            serde_json::Value::Bool(b) => StateValue::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    StateValue::Int(i)
                } else {
                    StateValue::Float(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(s) => StateValue::String(s.clone()),
            serde_json::Value::Array(arr) => {
                StateValue::List(arr.iter().map(StateValue::from).collect())
            }
            serde_json::Value::Object(map) => StateValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), StateValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<StateValue> for serde_json::Value {
    fn from(v: StateValue) -> Self {
        match v {
            StateValue::Null => serde_json::Value::Null,
            StateValue::Bool(b) => serde_json::Value::Bool(b),
            StateValue::Int(i) => serde_json::Value::from(i),
            StateValue::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            StateValue::String(s) => serde_json::Value::String(s),
            StateValue::List(list) => {
                serde_json::Value::Array(list.into_iter().map(Into::into).collect())
            }
            StateValue::Map(map) => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

/// Merges `patch` into `base`, overwriting keys present in both, matching
/// `InternalSession.update_state`'s `dict.update()` semantics.
pub fn merge_state(base: &mut StateMap, patch: StateMap) {
    for (k, v) in patch {
        base.insert(k, v);
    }
}
