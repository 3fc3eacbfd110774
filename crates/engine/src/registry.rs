//! Field type inference from first-seen sample values.

use dsq_types::{FieldType, OtherKind};
use indexmap::IndexMap;
use serde_json::Value;

/// Returns true for samples that carry no type signal: `null`, `""`, `[]`,
/// `{}`, `false` and zero.
pub fn is_empty_sample(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n == 0.0),
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

/// Classifies a non-empty sample. Returns `None` for empty samples.
///
/// Single-character integers (`1` through `9`) are boolean flags in seeded
/// templates and classify as [`FieldType::Boolean`].
pub fn classify(value: &Value) -> Option<FieldType> {
    if is_empty_sample(value) {
        return None;
    }
    let field_type = match value {
        Value::Number(number) if number.is_i64() || number.is_u64() => {
            if number.to_string().chars().count() == 1 {
                FieldType::Boolean
            } else {
                FieldType::Integer
            }
        }
        Value::Number(_) => FieldType::Other(OtherKind::Float),
        Value::Bool(_) => FieldType::Boolean,
        Value::String(_) => FieldType::String,
        Value::Array(_) => FieldType::Other(OtherKind::Array),
        Value::Object(_) => FieldType::Other(OtherKind::Object),
        Value::Null => return None,
    };
    Some(field_type)
}

/// Field name to registered type. A registered type never changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeRegistry {
    types: IndexMap<String, FieldType>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` from `value` unless it is already registered or the
    /// sample is empty. Returns the type registered for `name` afterwards.
    pub fn observe(&mut self, name: &str, value: &Value) -> Option<FieldType> {
        if let Some(existing) = self.types.get(name) {
            return Some(*existing);
        }
        let field_type = classify(value)?;
        self.types.insert(name.to_string(), field_type);
        Some(field_type)
    }

    pub fn get(&self, name: &str) -> Option<FieldType> {
        self.types.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, FieldType)> {
        self.types.iter().map(|(name, field_type)| (name.as_str(), *field_type))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}
