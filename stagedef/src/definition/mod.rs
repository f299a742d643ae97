//! Stage definitions.
//!
//! Every entry under `stages` becomes a [`Definition`]: a plain
//! [`EntryDefinition`] that resolves to one stage, or a
//! [`ForeachDefinition`] that expands a `do` template once per element of
//! its `foreach` data. Definitions do not own the variable context; it is
//! lent to them for each resolution.

pub mod entry;
pub mod foreach;

pub use entry::EntryDefinition;
pub use foreach::{ForeachDefinition, IterationPair};

use crate::context::node::type_name;
use crate::context::TrackedVars;
use crate::errors::{ResolveError, ResolveErrorKind};
use crate::interpolate::check_recursive_parse_errors;
use serde_json::{Map, Value};

/// Top-level key holding the stage definitions.
pub const STAGES_KWD: &str = "stages";
/// Top-level key holding the variables sources.
pub const VARS_KWD: &str = "vars";
/// Stage key for the working directory.
pub const WDIR_KWD: &str = "wdir";
/// Stage key for tracked parameters.
pub const PARAMS_KWD: &str = "params";
/// Stage key holding the data a template iterates over.
pub const FOREACH_KWD: &str = "foreach";
/// Stage key holding the template body.
pub const DO_KWD: &str = "do";

/// Params file loaded before any `vars` entry, if present.
pub const DEFAULT_PARAMS_FILE: &str = "params.yaml";
/// File name of the document.
pub const DOCUMENT_FILE: &str = "dvc.yaml";
/// Separator between a template name and a member key.
pub const JOIN: &str = "@";

/// A stage definition from the `stages` section.
#[derive(Debug, Clone)]
pub enum Definition {
    /// A single stage.
    Entry(EntryDefinition),
    /// A template generating one stage per element.
    Foreach(ForeachDefinition),
}

impl Definition {
    /// Returns the name under `stages`.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Entry(entry) => entry.name(),
            Self::Foreach(foreach) => foreach.name(),
        }
    }

    /// Returns true for foreach templates.
    #[must_use]
    pub const fn is_foreach(&self) -> bool {
        matches!(self, Self::Foreach(_))
    }
}

/// A fully resolved stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedStage {
    /// The stage name, `<group>@<key>` for generated stages.
    pub name: String,
    /// The resolved fields.
    pub definition: Map<String, Value>,
    /// Variables read while resolving.
    pub tracked: TrackedVars,
}

impl ResolvedStage {
    /// Returns `{name: definition}`.
    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(self.name, Value::Object(self.definition));
        map
    }
}

/// Builds the definition for the stage `name`.
///
/// A body holding `foreach` is a template and must also hold a `do`
/// dictionary.
///
/// # Errors
///
/// Returns `InvalidDefinition` if the body or its `do` is not a dictionary.
pub fn make_definition(name: &str, body: &Value, relpath: &str) -> Result<Definition, ResolveError> {
    let location = format!("'{STAGES_KWD}.{name}'");
    let Value::Object(body) = body else {
        return Err(invalid(&location, relpath, body));
    };

    let Some(foreach_data) = body.get(FOREACH_KWD) else {
        return Ok(Definition::Entry(EntryDefinition::new(
            name,
            body.clone(),
            relpath,
        )));
    };

    match body.get(DO_KWD) {
        Some(Value::Object(do_body)) => Ok(Definition::Foreach(ForeachDefinition::new(
            name,
            foreach_data.clone(),
            do_body.clone(),
            relpath,
        ))),
        Some(other) => Err(invalid(&format!("'{STAGES_KWD}.{name}.{DO_KWD}'"), relpath, other)),
        None => Err(ResolveError::new(
            location,
            relpath,
            ResolveErrorKind::InvalidDefinition(format!(
                "'{FOREACH_KWD}' requires a '{DO_KWD}' dictionary"
            )),
        )),
    }
}

fn invalid(location: &str, relpath: &str, value: &Value) -> ResolveError {
    ResolveError::new(
        location,
        relpath,
        ResolveErrorKind::InvalidDefinition(format!(
            "expected a dictionary, got '{}'",
            type_name(value)
        )),
    )
}

/// Parses every token in every field of `definition`.
///
/// # Errors
///
/// Returns the first syntax error, located at `'<where>.<name>.<field>'`.
pub fn check_syntax_errors(
    definition: &Map<String, Value>,
    name: &str,
    relpath: &str,
    where_: &str,
) -> Result<(), ResolveError> {
    for (key, value) in definition {
        check_recursive_parse_errors(value).map_err(|err| {
            ResolveError::new(format!("'{where_}.{name}.{key}'"), relpath, err)
        })?;
    }
    Ok(())
}

/// Splits a stage name into its group and member key.
///
/// The split happens at the last `@`. An empty key counts as no key.
#[must_use]
pub fn split_foreach_name(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once(JOIN) {
        Some((group, key)) if !key.is_empty() => (group, Some(key)),
        Some((group, _)) => (group, None),
        None => (name, None),
    }
}
