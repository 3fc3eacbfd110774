//! Template lookup for seeding new queries with default field sets.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use dsq_types::{DataSourceError, FieldMap};
use serde_json::Value;
use tracing::debug;

/// Source of default field sets keyed by data source identifier.
pub trait TemplateStore: Send + Sync {
    /// Returns the default fields for `identifier`, or `None` when no template exists.
    fn lookup(&self, identifier: &str) -> Result<Option<FieldMap>, DataSourceError>;
}

/// Templates stored as `<root>/<identifier>.json`.
///
/// # Purpose
/// A document is either the field map itself or an object that wraps the
/// field map under `inputs` (the shape captured from a recorded request).
///
/// # Fields
/// - `root`: Directory holding one document per identifier.
#[derive(Debug, Clone)]
pub struct DirectoryTemplateStore {
    root: PathBuf,
}

impl DirectoryTemplateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, identifier: &str) -> Result<PathBuf, DataSourceError> {
        let trimmed = identifier.trim();
        if trimmed.is_empty() || trimmed.contains(['/', '\\']) || trimmed == ".." || trimmed == "." {
            return Err(DataSourceError::configuration(format!(
                "'{identifier}' cannot be used as a template name"
            )));
        }
        Ok(self.root.join(format!("{trimmed}.json")))
    }
}

impl TemplateStore for DirectoryTemplateStore {
    fn lookup(&self, identifier: &str) -> Result<Option<FieldMap>, DataSourceError> {
        let path = self.document_path(identifier)?;
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                debug!(identifier, path = %path.display(), "no template");
                return Ok(None);
            }
            Err(error) => {
                return Err(DataSourceError::configuration(format!(
                    "failed to read template {}: {}",
                    path.display(),
                    error
                )));
            }
        };

        let document: Value = serde_json::from_str(&text).map_err(|error| {
            DataSourceError::configuration(format!("invalid template {}: {}", path.display(), error))
        })?;
        let fields = unwrap_template(document).ok_or_else(|| {
            DataSourceError::configuration(format!("template {} must be a JSON object", path.display()))
        })?;
        debug!(identifier, fields = fields.len(), "loaded template");
        Ok(Some(fields))
    }
}

/// Unwraps `{"inputs": {...}}` documents; plain objects are returned as is.
pub fn unwrap_template(document: Value) -> Option<FieldMap> {
    let Value::Object(mut map) = document else {
        return None;
    };
    if let Some(Value::Object(inputs)) = map.remove("inputs") {
        return Some(inputs.into_iter().collect());
    }
    Some(map.into_iter().collect())
}

/// In-memory store, mostly useful for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MemoryTemplateStore {
    templates: HashMap<String, FieldMap>,
}

impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, identifier: impl Into<String>, fields: FieldMap) -> &mut Self {
        self.templates.insert(identifier.into(), fields);
        self
    }
}

impl TemplateStore for MemoryTemplateStore {
    fn lookup(&self, identifier: &str) -> Result<Option<FieldMap>, DataSourceError> {
        Ok(self.templates.get(identifier).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unwraps_inputs_documents() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("8566.json"),
            r#"{"inputs": {"Part_No": "", "Active": 1}, "outputs": {}}"#,
        )
        .unwrap();
        fs::write(dir.path().join("9001.json"), r#"{"Workcenter_Key": 1234}"#).unwrap();

        let store = DirectoryTemplateStore::new(dir.path());
        let wrapped = store.lookup("8566").unwrap().unwrap();
        assert_eq!(wrapped.keys().collect::<Vec<_>>(), vec!["Part_No", "Active"]);
        let flat = store.lookup("9001").unwrap().unwrap();
        assert_eq!(flat.get("Workcenter_Key"), Some(&json!(1234)));
    }

    #[test]
    fn missing_template_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryTemplateStore::new(dir.path());
        assert!(store.lookup("404").unwrap().is_none());
    }

    #[test]
    fn rejects_non_object_documents_and_path_names() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("1.json"), "[1, 2]").unwrap();
        let store = DirectoryTemplateStore::new(dir.path());
        assert!(matches!(store.lookup("1"), Err(DataSourceError::Configuration { .. })));
        assert!(store.lookup("../secrets").is_err());
    }
}
