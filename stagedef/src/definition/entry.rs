//! Plain stage definitions.

use super::{check_syntax_errors, ResolvedStage, STAGES_KWD};
use crate::context::Context;
use crate::errors::{ContextError, ResolveError};
use serde_json::{Map, Value};
use std::sync::Arc;

/// A stage defined directly under `stages`.
///
/// The raw body is shared and never modified; every resolution produces
/// fresh values.
#[derive(Debug, Clone)]
pub struct EntryDefinition {
    name: String,
    definition: Arc<Map<String, Value>>,
    relpath: String,
    where_: String,
}

/// A failure inside [`EntryDefinition::resolve_stage`].
///
/// Field errors are already located. Other context errors concern the
/// stage as a whole, and the caller decides how to name it.
#[derive(Debug)]
pub(crate) enum StageError {
    Resolve(ResolveError),
    Context(ContextError),
}

impl StageError {
    pub(crate) fn locate(self, location: impl Into<String>, relpath: &str) -> ResolveError {
        match self {
            Self::Resolve(err) => err,
            Self::Context(err) => ResolveError::new(location, relpath, err),
        }
    }
}

impl EntryDefinition {
    /// Creates a definition named `name` from its raw fields.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        definition: Map<String, Value>,
        relpath: impl Into<String>,
    ) -> Self {
        Self::from_shared(name, Arc::new(definition), relpath)
    }

    pub(crate) fn from_shared(
        name: impl Into<String>,
        definition: Arc<Map<String, Value>>,
        relpath: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            definition,
            relpath: relpath.into(),
            where_: STAGES_KWD.to_string(),
        }
    }

    /// Sets the section name used in error locations.
    #[must_use]
    pub fn with_where(mut self, where_: impl Into<String>) -> Self {
        self.where_ = where_.into();
        self
    }

    /// Returns the stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the raw fields.
    #[must_use]
    pub fn definition(&self) -> &Map<String, Value> {
        &self.definition
    }

    /// Returns the document path used in error messages.
    #[must_use]
    pub fn relpath(&self) -> &str {
        &self.relpath
    }

    /// Checks the syntax of every field, then resolves them against `context`.
    ///
    /// # Errors
    ///
    /// Unknown variables and token errors are reported against the failing
    /// field (`'stages.<name>.<field>'`), any other context error against
    /// `stage '<name>'`.
    pub fn resolve(&self, context: &mut Context) -> Result<ResolvedStage, ResolveError> {
        self.resolve_stage(context, false)
            .map_err(|err| err.locate(format!("stage '{}'", self.name), &self.relpath))
    }

    pub(crate) fn resolve_stage(
        &self,
        context: &mut Context,
        skip_checks: bool,
    ) -> Result<ResolvedStage, StageError> {
        if !skip_checks {
            check_syntax_errors(&self.definition, &self.name, &self.relpath, &self.where_)
                .map_err(StageError::Resolve)?;
        }

        let mut scope = context.track();
        let mut resolved = Map::new();
        for (key, value) in self.definition.iter() {
            let value = scope
                .resolve(value, Some(key.as_str()), skip_checks)
                .map_err(|err| self.field_error(key, err))?;
            resolved.insert(key.clone(), value);
        }

        Ok(ResolvedStage {
            name: self.name.clone(),
            definition: resolved,
            tracked: scope.finish(),
        })
    }

    fn field_error(&self, key: &str, err: ContextError) -> StageError {
        if err.is_field_error() {
            let location = format!("'{}.{}.{key}'", self.where_, self.name);
            StageError::Resolve(ResolveError::new(location, self.relpath.as_str(), err))
        } else {
            StageError::Context(err)
        }
    }
}
