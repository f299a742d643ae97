//! Resolving a whole document.
//!
//! [`DataResolver`] loads the `vars` section into the shared [`Context`],
//! turns every entry of `stages` into a [`Definition`] and resolves stages
//! by name on demand. Variables read by each resolved stage are recorded.


use crate::config::ParsingConfig;
use crate::context::node::type_name;
use crate::context::{Context, TrackedVars};
use crate::definition::{
    make_definition, split_foreach_name, Definition, DEFAULT_PARAMS_FILE, DOCUMENT_FILE,
    STAGES_KWD, VARS_KWD,
};
use crate::errors::{EntryNotFoundError, ParsingError, ResolveError, ResolveErrorKind};
use crate::fs::{join_path, normalize_path, relative_path, FileSystem};
use crate::interpolate::contains_interpolation;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, trace};

/// Resolves the stages of one document.
#[derive(Debug)]
pub struct DataResolver {
    wdir: String,
    relpath: String,
    context: Context,
    definitions: IndexMap<String, Definition>,
    tracked_vars: IndexMap<String, TrackedVars>,
}

impl DataResolver {
    /// Creates a resolver for `document` located in `wdir`.
    ///
    /// # Errors
    ///
    /// See [`DataResolver::with_config`].
    pub fn new(fs: &dyn FileSystem, wdir: &str, document: &Value) -> Result<Self, ResolveError> {
        Self::with_config(fs, wdir, document, ParsingConfig::default())
    }

    /// Creates a resolver rendering interpolated values with `config`.
    ///
    /// `params.yaml` in `wdir` is loaded first if it exists, then every
    /// `vars` item in order.
    ///
    /// # Errors
    ///
    /// Returns an error located at `'vars'` if `vars` contains an
    /// interpolation or fails to load, and `InvalidDefinition` if the
    /// document, `vars` or `stages` has the wrong shape.
    pub fn with_config(
        fs: &dyn FileSystem,
        wdir: &str,
        document: &Value,
        config: ParsingConfig,
    ) -> Result<Self, ResolveError> {
        let wdir = relative_wdir(wdir);
        let relpath = normalize_path(&join_path(&wdir, DOCUMENT_FILE));

        let empty = Map::new();
        let document = match document {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => return Err(invalid_shape(&relpath, &relpath, "a dictionary", other)),
        };

        let vars_location = format!("'{VARS_KWD}'");
        let vars = match document.get(VARS_KWD) {
            None | Some(Value::Null) => &[][..],
            Some(Value::Array(items)) => items.as_slice(),
            Some(other) => return Err(invalid_shape(&vars_location, &relpath, "a list", other)),
        };
        if vars.iter().any(contains_interpolation) {
            return Err(ResolveError::new(
                vars_location,
                relpath,
                ResolveErrorKind::InterpolationNotAllowed,
            ));
        }

        let mut context = Context::new().with_config(config);
        context
            .load_from_vars(fs, vars, &wdir, None, Some(DEFAULT_PARAMS_FILE))
            .map_err(|err| ResolveError::new(vars_location.as_str(), relpath.as_str(), err))?;

        let definitions = match document.get(STAGES_KWD) {
            None | Some(Value::Null) => IndexMap::new(),
            Some(Value::Object(stages)) => stages
                .iter()
                .map(|(name, body)| {
                    make_definition(name, body, &relpath).map(|def| (name.clone(), def))
                })
                .collect::<Result<IndexMap<_, _>, _>>()?,
            Some(other) => {
                let location = format!("'{STAGES_KWD}'");
                return Err(invalid_shape(&location, &relpath, "a dictionary", other));
            }
        };

        debug!(
            relpath = %relpath,
            vars = context.len(),
            stages = definitions.len(),
            "Created data resolver"
        );

        Ok(Self {
            wdir,
            relpath,
            context,
            definitions,
            tracked_vars: IndexMap::new(),
        })
    }

    /// Returns the working directory, relative to the current directory.
    #[must_use]
    pub fn wdir(&self) -> &str {
        &self.wdir
    }

    /// Returns the document path used in error messages.
    #[must_use]
    pub fn relpath(&self) -> &str {
        &self.relpath
    }

    /// Returns the shared variable context.
    #[must_use]
    pub const fn context(&self) -> &Context {
        &self.context
    }

    /// Returns the definitions keyed by stage name.
    #[must_use]
    pub const fn definitions(&self) -> &IndexMap<String, Definition> {
        &self.definitions
    }

    /// Resolves one stage and returns `{name: definition}`.
    ///
    /// `name` is a plain stage name or `<group>@<key>` for a foreach member.
    ///
    /// # Errors
    ///
    /// Returns `EntryNotFound` for unknown names and any resolution error
    /// of the stage.
    pub fn resolve_one(&mut self, name: &str) -> Result<Map<String, Value>, ParsingError> {
        let not_found = || EntryNotFoundError::new(format!("Could not find '{name}'"));
        let (group, key) = split_foreach_name(name);

        let mut stage = match (self.definitions.get_mut(group), key) {
            (Some(Definition::Entry(entry)), None) => entry.resolve(&mut self.context)?,
            (Some(Definition::Foreach(foreach)), Some(key)) => {
                if !foreach.has_member(&mut self.context, key)? {
                    return Err(not_found().into());
                }
                foreach.resolve_one(&mut self.context, key)?
            }
            _ => return Err(not_found().into()),
        };

        let tracked = std::mem::take(&mut stage.tracked);
        self.track_vars(&stage.name, tracked);
        Ok(stage.into_map())
    }

    /// Returns true if `name` resolves to a stage.
    ///
    /// # Errors
    ///
    /// Checking a foreach member resolves the template's data, which may
    /// fail.
    pub fn has_key(&mut self, name: &str) -> Result<bool, ResolveError> {
        let (group, key) = split_foreach_name(name);
        match (self.definitions.get_mut(group), key) {
            (Some(Definition::Entry(_)), None) => Ok(true),
            (Some(Definition::Foreach(foreach)), Some(key)) => {
                foreach.has_member(&mut self.context, key)
            }
            _ => Ok(false),
        }
    }

    /// Returns every stage name, generated names included, in document order.
    ///
    /// # Errors
    ///
    /// Returns the first foreach data that fails to resolve.
    pub fn get_keys(&mut self) -> Result<Vec<String>, ResolveError> {
        let mut keys = Vec::new();
        for (name, definition) in &mut self.definitions {
            match definition {
                Definition::Entry(_) => keys.push(name.clone()),
                Definition::Foreach(foreach) => {
                    keys.extend(foreach.get_generated_names(&mut self.context)?);
                }
            }
        }
        Ok(keys)
    }

    /// Records the variables read by stage `name`.
    pub fn track_vars(&mut self, name: &str, vars: TrackedVars) {
        self.tracked_vars.insert(name.to_string(), vars);
    }

    /// Returns the variables read by each resolved stage.
    #[must_use]
    pub const fn tracked_vars(&self) -> &IndexMap<String, TrackedVars> {
        &self.tracked_vars
    }

    /// Resolves every stage and returns `{"stages": {...}}`.
    ///
    /// # Errors
    ///
    /// Returns the first failure.
    pub fn resolve(&mut self) -> Result<Value, ParsingError> {
        let mut stages = Map::new();
        for name in self.get_keys()? {
            stages.extend(self.resolve_one(&name)?);
        }
        let stages = Value::Object(stages);
        trace!("Resolved {}:\n{}", self.relpath, stages);

        let mut resolved = Map::new();
        resolved.insert(STAGES_KWD.to_string(), stages);
        Ok(Value::Object(resolved))
    }
}

/// Makes an absolute `wdir` relative to the current directory.
///
/// The current directory itself becomes the empty string.
fn relative_wdir(wdir: &str) -> String {
    if !Path::new(wdir).is_absolute() {
        return wdir.to_string();
    }
    let Ok(cwd) = std::env::current_dir() else {
        return wdir.to_string();
    };
    match relative_path(wdir, &cwd.to_string_lossy()) {
        rel if rel == "." => String::new(),
        rel => rel,
    }
}

fn invalid_shape(location: &str, relpath: &str, expected: &str, value: &Value) -> ResolveError {
    ResolveError::new(
        location,
        relpath,
        ResolveErrorKind::InvalidDefinition(format!(
            "expected {expected}, got '{}'",
            type_name(value)
        )),
    )
}
