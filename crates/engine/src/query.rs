//! Query inputs: ordered fields, their registered types and the composed body.

use dsq_types::{CallFormat, DataSourceError, FieldMap, FieldType, OtherKind};
use serde_json::{Map as JsonMap, Number, Value};
use tracing::debug;

use crate::registry::TypeRegistry;
use crate::templates::TemplateStore;

/// Engine metadata names. They are never stored as fields, never registered
/// and never transmitted.
pub const RESERVED_NAMES: &[&str] = &[
    "identifier",
    "call_format",
    "composed_body",
    "template_source",
    "transaction_no",
    "status_code",
    "request_body",
];

pub fn is_reserved(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
}

/// Builds the transmissible body for `fields` in `format`.
pub fn compose(format: CallFormat, fields: &FieldMap) -> Value {
    let map: JsonMap<String, Value> = fields
        .iter()
        .filter(|(name, _)| !is_reserved(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    match format {
        CallFormat::Tabular => {
            let mut wrapper = JsonMap::new();
            wrapper.insert("inputs".to_string(), Value::Object(map));
            Value::Object(wrapper)
        }
        CallFormat::RowList => Value::Object(map),
    }
}

/// Input of one data source call.
///
/// Every mutation recomputes the composed body before returning, so
/// [`QueryInput::composed_body`] always reflects the current fields.
/// Mutation takes `&mut self`; a query has a single writer for the duration
/// of a call.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryInput {
    identifier: String,
    call_format: CallFormat,
    fields: FieldMap,
    registry: TypeRegistry,
    template_source: Option<String>,
    composed_body: Value,
}

/// Builder for [`QueryInput`]. Template fields are merged first, then
/// caller fields, so caller values override template defaults.
pub struct QueryInputBuilder<'a> {
    identifier: String,
    call_format: Result<CallFormat, DataSourceError>,
    fields: FieldMap,
    templates: Option<&'a dyn TemplateStore>,
}

impl<'a> QueryInputBuilder<'a> {
    /// Raw numeric format; anything other than 1 or 2 fails at [`build`](Self::build).
    pub fn call_format(mut self, raw: i64) -> Self {
        self.call_format = CallFormat::try_from(raw);
        self
    }

    pub fn format(mut self, format: CallFormat) -> Self {
        self.call_format = Ok(format);
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn fields(mut self, fields: FieldMap) -> Self {
        self.fields.extend(fields);
        self
    }

    pub fn template_store(mut self, store: &'a dyn TemplateStore) -> Self {
        self.templates = Some(store);
        self
    }

    pub fn build(self) -> Result<QueryInput, DataSourceError> {
        let call_format = self.call_format?;
        let mut fields = FieldMap::new();
        let mut template_source = None;

        if let Some(store) = self.templates
            && let Some(template) = store.lookup(&self.identifier)?
        {
            template_source = Some(self.identifier.clone());
            fields.extend(template.into_iter().filter(|(name, _)| !is_reserved(name)));
        }
        for (name, value) in self.fields {
            if is_reserved(&name) {
                debug!(identifier = %self.identifier, field = %name, "ignoring reserved field name");
                continue;
            }
            fields.insert(name, value);
        }

        let mut query = QueryInput {
            identifier: self.identifier,
            call_format,
            fields,
            registry: TypeRegistry::new(),
            template_source,
            composed_body: Value::Null,
        };
        query.observe_fields();
        Ok(query)
    }
}

impl QueryInput {
    /// Starts a builder with the default call format and no fields.
    pub fn builder<'a>(identifier: impl ToString) -> QueryInputBuilder<'a> {
        QueryInputBuilder {
            identifier: identifier.to_string(),
            call_format: Ok(CallFormat::default()),
            fields: FieldMap::new(),
            templates: None,
        }
    }

    pub fn new(identifier: impl ToString, call_format: CallFormat, fields: FieldMap) -> Self {
        let mut query = QueryInput {
            identifier: identifier.to_string(),
            call_format,
            fields: fields.into_iter().filter(|(name, _)| !is_reserved(name)).collect(),
            registry: TypeRegistry::new(),
            template_source: None,
            composed_body: Value::Null,
        };
        query.observe_fields();
        query
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn call_format(&self) -> CallFormat {
        self.call_format
    }

    /// Identifier of the template that seeded this query, if any.
    pub fn template_source(&self) -> Option<&str> {
        self.template_source.as_deref()
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn type_of(&self, name: &str) -> Option<FieldType> {
        self.registry.get(name)
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn composed_body(&self) -> &Value {
        &self.composed_body
    }

    /// Copy of the transmissible fields.
    pub fn snapshot(&self) -> FieldMap {
        self.fields.clone()
    }

    /// Registers every current field that is not registered yet and carries a
    /// non-empty value.
    pub fn observe_fields(&mut self) {
        for (name, value) in &self.fields {
            self.registry.observe(name, value);
        }
        self.recompose();
    }

    /// Sets `name` to `value`. Reserved names are ignored and return `false`.
    ///
    /// Setting a field does not register its type; only construction and
    /// [`observe_fields`](Self::observe_fields) do.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> bool {
        let name = name.into();
        if is_reserved(&name) {
            debug!(identifier = %self.identifier, field = %name, "ignoring write to reserved field name");
            return false;
        }
        self.fields.insert(name, value.into());
        self.recompose();
        true
    }

    pub fn set_call_format(&mut self, call_format: CallFormat) {
        self.call_format = call_format;
        self.recompose();
    }

    pub fn set_call_format_number(&mut self, raw: i64) -> Result<(), DataSourceError> {
        self.set_call_format(CallFormat::try_from(raw)?);
        Ok(())
    }

    /// Removes the named fields and returns how many were present.
    pub fn remove<S: AsRef<str>>(&mut self, names: &[S]) -> usize {
        let removed = names
            .iter()
            .filter(|name| self.fields.shift_remove(name.as_ref()).is_some())
            .count();
        self.recompose();
        removed
    }

    /// Removes every field whose name is not in `keep`.
    pub fn remove_except<S: AsRef<str>>(&mut self, keep: &[S]) -> usize {
        let before = self.fields.len();
        self.fields
            .retain(|name, _| keep.iter().any(|kept| kept.as_ref() == name));
        self.recompose();
        before - self.fields.len()
    }

    /// Coerces every registered field to its registered type.
    ///
    /// Either every field is coerced or, on the first value that cannot be,
    /// nothing changes and [`DataSourceError::InvalidFieldValue`] is returned.
    pub fn reconcile(&mut self) -> Result<(), DataSourceError> {
        let mut updates = Vec::new();
        for (name, field_type) in self.registry.iter() {
            if let Some(current) = self.fields.get(name) {
                let coerced = coerce(name, field_type, current)?;
                if &coerced != current {
                    updates.push((name.to_string(), coerced));
                }
            }
        }
        for (name, value) in updates {
            self.fields.insert(name, value);
        }
        self.recompose();
        Ok(())
    }

    /// Drops fields that are unregistered or hold `null`, `""`, `[]` or `{}`.
    pub fn purge(&mut self) -> usize {
        let before = self.fields.len();
        let registry = &self.registry;
        self.fields
            .retain(|name, value| registry.contains(name) && !is_blank(value));
        self.recompose();
        before - self.fields.len()
    }

    /// Loads a caller row into the query: every row value is written,
    /// registered fields missing from the row are removed, then the query is
    /// reconciled.
    pub fn apply_row(&mut self, row: &FieldMap) -> Result<(), DataSourceError> {
        for (name, value) in row {
            if !is_reserved(name) {
                self.fields.insert(name.clone(), value.clone());
            }
        }
        let missing: Vec<String> = self
            .registry
            .names()
            .filter(|name| !row.contains_key(*name))
            .map(str::to_string)
            .collect();
        for name in &missing {
            self.fields.shift_remove(name);
        }
        self.reconcile()
    }

    fn recompose(&mut self) {
        self.composed_body = compose(self.call_format, &self.fields);
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn invalid(name: &str, expected: FieldType, value: &Value) -> DataSourceError {
    DataSourceError::InvalidFieldValue {
        field: name.to_string(),
        expected,
        value: value.clone(),
    }
}

// Bounds of the floats that truncate into an `i64` without clamping.
const I64_LOWER: f64 = -9_223_372_036_854_775_808.0;
const I64_UPPER: f64 = 9_223_372_036_854_775_808.0;

/// Coerces `value` to `field_type`. `null` stays `null` except for strings.
fn coerce(name: &str, field_type: FieldType, value: &Value) -> Result<Value, DataSourceError> {
    match field_type {
        FieldType::Integer => match value {
            Value::Null => Ok(Value::Null),
            Value::String(text) if text.trim().is_empty() => Ok(Value::Null),
            Value::String(text) => text
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| invalid(name, field_type, value)),
            Value::Number(number) => match number.as_i64() {
                Some(integer) => Ok(Value::from(integer)),
                None if number.is_u64() => Err(invalid(name, field_type, value)),
                None => number
                    .as_f64()
                    .map(f64::trunc)
                    .filter(|float| (I64_LOWER..I64_UPPER).contains(float))
                    .map(|float| Value::from(float as i64))
                    .ok_or_else(|| invalid(name, field_type, value)),
            },
            Value::Bool(flag) => Ok(Value::from(i64::from(*flag))),
            Value::Array(_) | Value::Object(_) => Err(invalid(name, field_type, value)),
        },
        FieldType::String => Ok(match value {
            Value::Null => Value::String(String::new()),
            Value::String(_) => value.clone(),
            other => Value::String(other.to_string()),
        }),
        // Only a trimmed, case-insensitive "false" is false; every other
        // string, blank or "0" included, is true.
        FieldType::Boolean => match value {
            Value::Null => Ok(Value::Null),
            Value::String(text) => Ok(Value::Bool(!text.trim().eq_ignore_ascii_case("false"))),
            Value::Bool(_) => Ok(value.clone()),
            Value::Number(number) => Ok(Value::Bool(number.as_f64().is_some_and(|n| n != 0.0))),
            Value::Array(_) | Value::Object(_) => Err(invalid(name, field_type, value)),
        },
        FieldType::Other(OtherKind::Float) => match value {
            Value::Null => Ok(Value::Null),
            Value::String(text) if text.trim().is_empty() => Ok(Value::Null),
            Value::String(text) => text
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| invalid(name, field_type, value)),
            Value::Number(number) => number
                .as_f64()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| invalid(name, field_type, value)),
            Value::Bool(flag) => Ok(Value::from(if *flag { 1.0 } else { 0.0 })),
            Value::Array(_) | Value::Object(_) => Err(invalid(name, field_type, value)),
        },
        FieldType::Other(kind @ (OtherKind::Array | OtherKind::Object)) => {
            let matches_kind = |candidate: &Value| match kind {
                OtherKind::Array => candidate.is_array(),
                _ => candidate.is_object(),
            };
            match value {
                Value::Null => Ok(Value::Null),
                candidate if matches_kind(candidate) => Ok(candidate.clone()),
                Value::String(text) => serde_json::from_str::<Value>(text)
                    .ok()
                    .filter(|parsed| matches_kind(parsed))
                    .ok_or_else(|| invalid(name, field_type, value)),
                _ => Err(invalid(name, field_type, value)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::MemoryTemplateStore;
    use serde_json::json;

    fn fields(value: Value) -> FieldMap {
        serde_json::from_value(value).unwrap()
    }

    fn seeded() -> QueryInput {
        QueryInput::builder(8566)
            .format(CallFormat::RowList)
            .fields(fields(json!({
                "Part_No": "A-1",
                "Quantity": 42,
                "Active": 1,
                "Ratio": 0.5,
                "Note": "",
            })))
            .build()
            .unwrap()
    }

    #[test]
    fn construction_registers_non_empty_samples() {
        let query = seeded();
        assert_eq!(query.type_of("Part_No"), Some(FieldType::String));
        assert_eq!(query.type_of("Quantity"), Some(FieldType::Integer));
        assert_eq!(query.type_of("Active"), Some(FieldType::Boolean));
        assert_eq!(query.type_of("Ratio"), Some(FieldType::Other(OtherKind::Float)));
        assert_eq!(query.type_of("Note"), None);
        assert_eq!(query.identifier(), "8566");
    }

    #[test]
    fn invalid_call_format_is_a_configuration_error() {
        let error = QueryInput::builder("1").call_format(3).build().unwrap_err();
        assert!(matches!(error, DataSourceError::Configuration { .. }));
        let mut query = QueryInput::builder("1").build().unwrap();
        assert!(query.set_call_format_number(0).is_err());
        assert_eq!(query.call_format(), CallFormat::Tabular);
    }

    #[test]
    fn template_seeds_and_caller_overrides() {
        let mut store = MemoryTemplateStore::new();
        store.insert("8566", fields(json!({"Part_No": "TEMPLATE", "Active": 1, "call_format": 9})));
        let query = QueryInput::builder("8566")
            .template_store(&store)
            .field("Part_No", "CALLER")
            .build()
            .unwrap();
        assert_eq!(query.get("Part_No"), Some(&json!("CALLER")));
        assert_eq!(query.get("Active"), Some(&json!(1)));
        assert_eq!(query.template_source(), Some("8566"));
        assert!(query.get("call_format").is_none());
    }

    #[test]
    fn body_shape_follows_call_format() {
        let mut query = QueryInput::builder("1").field("A", "x").build().unwrap();
        assert_eq!(query.composed_body(), &json!({"inputs": {"A": "x"}}));
        query.set_call_format(CallFormat::RowList);
        assert_eq!(query.composed_body(), &json!({"A": "x"}));
    }

    #[test]
    fn composed_body_tracks_every_mutation() {
        let mut query = seeded();
        query.set("Part_No", "B-2");
        query.set("Extra", json!(true));
        query.remove(&["Quantity"]);
        query.set("Quantity", 7);
        query.remove(&["Ratio", "Missing"]);
        assert_eq!(query.composed_body(), &compose(query.call_format(), query.fields()));
        query.remove_except(&["Part_No", "Extra"]);
        assert_eq!(query.composed_body(), &json!({"Part_No": "B-2", "Extra": true}));
        assert_eq!(query.composed_body(), &compose(query.call_format(), query.fields()));
    }

    #[test]
    fn reserved_names_never_reach_the_body() {
        let mut query = seeded();
        for name in RESERVED_NAMES {
            assert!(!query.set(*name, "sneaky"));
        }
        let body = query.composed_body().as_object().unwrap();
        for name in RESERVED_NAMES {
            assert!(!body.contains_key(*name));
            assert!(query.type_of(name).is_none());
        }
    }

    #[test]
    fn reconcile_coerces_to_registered_types() {
        let mut query = seeded();
        query.set("Part_No", json!(null));
        query.set("Quantity", " 15 ");
        query.set("Active", "False");
        query.set("Ratio", "2.25");
        query.reconcile().unwrap();
        assert_eq!(query.get("Part_No"), Some(&json!("")));
        assert_eq!(query.get("Quantity"), Some(&json!(15)));
        assert_eq!(query.get("Active"), Some(&json!(false)));
        assert_eq!(query.get("Ratio"), Some(&json!(2.25)));

        query.set("Quantity", "   ");
        query.reconcile().unwrap();
        assert_eq!(query.get("Quantity"), Some(&json!(null)));
    }

    #[test]
    fn boolean_rule_only_recognizes_false() {
        let mut query = seeded();
        for falsy in ["false", "FALSE", " False "] {
            query.set("Active", falsy);
            query.reconcile().unwrap();
            assert_eq!(query.get("Active"), Some(&json!(false)), "input {falsy:?}");
        }
        for truthy in ["", "no", "0", "true", "garbage"] {
            query.set("Active", truthy);
            query.reconcile().unwrap();
            assert_eq!(query.get("Active"), Some(&json!(true)), "input {truthy:?}");
        }
    }

    #[test]
    fn reconcile_is_idempotent() {
        let mut query = seeded();
        query.set("Quantity", "3");
        query.set("Active", "no");
        query.set("Part_No", 12);
        query.set("Ratio", 4);
        query.reconcile().unwrap();
        let once = query.fields().clone();
        query.reconcile().unwrap();
        assert_eq!(query.fields(), &once);
    }

    #[test]
    fn reconcile_rejects_unparseable_integers_without_partial_updates() {
        let mut query = seeded();
        query.set("Active", "false");
        query.set("Quantity", "lots");
        let error = query.reconcile().unwrap_err();
        assert!(matches!(error, DataSourceError::InvalidFieldValue { ref field, .. } if field == "Quantity"));
        assert_eq!(query.get("Active"), Some(&json!("false")));
    }

    #[test]
    fn out_of_range_integers_are_rejected() {
        for oversized in [json!(u64::MAX), json!(1e30), json!(-1e19)] {
            let mut query = seeded();
            query.set("Quantity", oversized.clone());
            let error = query.reconcile().unwrap_err();
            assert!(
                matches!(error, DataSourceError::InvalidFieldValue { ref field, .. } if field == "Quantity"),
                "input {oversized}"
            );
            assert_eq!(query.get("Quantity"), Some(&oversized));
        }

        let mut query = seeded();
        query.set("Quantity", json!(-12.9));
        query.reconcile().unwrap();
        assert_eq!(query.get("Quantity"), Some(&json!(-12)));
    }

    #[test]
    fn composed_body_stays_in_sync_across_generated_sequences() {
        const NAMES: [&str; 6] = ["Part_No", "Quantity", "Active", "Extra", "identifier", "Other"];
        for seed in 0u64..64 {
            let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let mut next = move || {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                (state >> 33) as usize
            };
            let mut query = seeded();
            if seed % 2 == 0 {
                query.set_call_format(CallFormat::Tabular);
            }
            for step in 0..12 {
                let name = NAMES[next() % NAMES.len()];
                match next() % 4 {
                    0 | 1 => {
                        query.set(name, json!(step));
                    }
                    2 => {
                        query.remove(&[name]);
                    }
                    _ => {
                        let other = NAMES[next() % NAMES.len()];
                        query.remove_except(&[name, other]);
                    }
                }
                assert_eq!(
                    query.composed_body(),
                    &compose(query.call_format(), query.fields()),
                    "seed {seed} step {step}"
                );
                assert!(query.get("identifier").is_none());
            }
        }
    }

    #[test]
    fn purge_strips_noise_and_blanks() {
        let mut query = seeded();
        query.set("Reference_Only", "ignored");
        query.set("Part_No", "");
        let removed = query.purge();
        assert_eq!(removed, 3);
        assert_eq!(query.fields().keys().collect::<Vec<_>>(), vec!["Quantity", "Active", "Ratio"]);
        assert_eq!(query.get("Quantity"), Some(&json!(42)));
    }

    #[test]
    fn apply_row_replaces_values_and_drops_missing_fields() {
        let mut query = seeded();
        query
            .apply_row(&fields(json!({"Part_No": "C-3", "Quantity": "9", "Lookup_Only": "x"})))
            .unwrap();
        assert_eq!(query.get("Quantity"), Some(&json!(9)));
        assert!(query.get("Active").is_none());
        assert!(query.get("Ratio").is_none());
        assert_eq!(query.get("Note"), Some(&json!("")));
        query.purge();
        assert_eq!(query.composed_body(), &json!({"Part_No": "C-3", "Quantity": 9}));
    }
}
