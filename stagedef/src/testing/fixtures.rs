//! Fixtures for definition and resolver tests.

use serde_json::{Map, Value};

use super::MemoryFileSystem;
use crate::definition::{EntryDefinition, ForeachDefinition, DOCUMENT_FILE, STAGES_KWD, VARS_KWD};
use crate::errors::ResolveError;
use crate::resolver::DataResolver;

fn as_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Creates an entry definition in `dvc.yaml`.
///
/// A `definition` that is not a dictionary yields an empty stage.
#[must_use]
pub fn make_entry_definition(name: &str, definition: Value) -> EntryDefinition {
    EntryDefinition::new(name, as_map(definition), DOCUMENT_FILE)
}

/// Creates a foreach definition in `dvc.yaml`.
#[must_use]
pub fn make_foreach_definition(name: &str, foreach_data: Value, do_definition: Value) -> ForeachDefinition {
    ForeachDefinition::new(name, foreach_data, as_map(do_definition), DOCUMENT_FILE)
}

/// A document builder paired with an in-memory file system.
#[derive(Debug, Default)]
pub struct TestDocument {
    vars: Vec<Value>,
    stages: Map<String, Value>,
    fs: MemoryFileSystem,
}

impl TestDocument {
    /// Creates an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an item to `vars`.
    #[must_use]
    pub fn with_vars(mut self, item: Value) -> Self {
        self.vars.push(item);
        self
    }

    /// Adds a stage.
    #[must_use]
    pub fn with_stage(mut self, name: impl Into<String>, body: Value) -> Self {
        self.stages.insert(name.into(), body);
        self
    }

    /// Adds a file to the file system.
    #[must_use]
    pub fn with_file(mut self, path: &str, contents: &str) -> Self {
        self.fs = self.fs.with_file(path, contents);
        self
    }

    /// Returns the document.
    #[must_use]
    pub fn document(&self) -> Value {
        let mut document = Map::new();
        if !self.vars.is_empty() {
            document.insert(VARS_KWD.to_string(), Value::Array(self.vars.clone()));
        }
        document.insert(STAGES_KWD.to_string(), Value::Object(self.stages.clone()));
        Value::Object(document)
    }

    /// Returns the file system.
    #[must_use]
    pub const fn fs(&self) -> &MemoryFileSystem {
        &self.fs
    }

    /// Builds a resolver for the document in the current directory.
    pub fn resolver(&self) -> Result<DataResolver, ResolveError> {
        DataResolver::new(&self.fs, "", &self.document())
    }
}
