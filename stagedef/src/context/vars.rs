//! Loading variables from `vars` entries and params files.

use super::node::type_name;
use super::{Context, Meta};
use crate::errors::ContextError;
use crate::fs::{join_path, load_path, normalize_path, FileSystem};
use serde_json::{Map, Value};
use tracing::{debug, trace};

impl Context {
    /// Loads a variables file into a new context.
    ///
    /// With `select_keys` only those top-level keys are kept. Nodes are
    /// attributed to `path` and are not local, so reads from them are
    /// tracked.
    ///
    /// # Errors
    ///
    /// Returns `ParamsLoad` if the file is missing, is a directory, does not
    /// hold a dictionary or lacks one of the selected keys.
    pub fn load_from(
        fs: &dyn FileSystem,
        path: &str,
        select_keys: Option<&[String]>,
    ) -> Result<Self, ContextError> {
        if !fs.exists(path) {
            return Err(ContextError::params_load(format!("'{path}' does not exist")));
        }
        if fs.is_dir(path) {
            return Err(ContextError::params_load(format!("'{path}' is a directory")));
        }

        let data = match load_path(fs, path)? {
            Value::Object(map) => map,
            other => {
                return Err(ContextError::params_load(format!(
                    "expected a dictionary, got '{}' in file '{path}'",
                    type_name(&other)
                )));
            }
        };

        let data = match select_keys {
            Some(keys) => select(data, keys, path)?,
            None => data,
        };

        let mut ctx = Self::from_map(data, Meta::from_source(path, false));
        ctx.imports
            .insert(path.to_string(), select_keys.map(<[String]>::to_vec));
        Ok(ctx)
    }

    /// Merges the file referenced by a `vars` item into this context.
    ///
    /// `item` is `path` or `path:key1,key2`, relative to `wdir`. Importing a
    /// whole file that is already fully loaded does nothing.
    ///
    /// # Errors
    ///
    /// Returns `VarsAlreadyLoaded` when the item overlaps an earlier import,
    /// any error from [`Context::load_from`] and any merge error.
    pub fn merge_from(
        &mut self,
        fs: &dyn FileSystem,
        item: &str,
        wdir: &str,
        overwrite: bool,
    ) -> Result<(), ContextError> {
        let (path, keys) = match item.split_once(':') {
            Some((path, keys)) => (path, Some(keys)),
            None => (item, None),
        };
        let path = normalize_path(&join_path(wdir, path));
        let select_keys: Option<Vec<String>> = keys
            .map(|keys| {
                keys.split(',')
                    .filter(|key| !key.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|keys| !keys.is_empty());

        if let Some(imported) = self.imports.get(&path) {
            if select_keys.is_none() && imported.is_none() {
                return Ok(());
            }
            check_loaded(imported.as_deref(), item, select_keys.as_deref())?;
        }

        debug!(path = %path, keys = ?select_keys, "Loading vars");
        let ctx = Self::load_from(fs, &path, select_keys.as_deref())?;

        self.merge_update(ctx, overwrite).map_err(|err| match err {
            ContextError::ReservedKey { keys, .. } => {
                ContextError::reserved_key(keys, Some(item.to_string()))
            }
            other => other,
        })?;

        match self.imports.get_mut(&path) {
            Some(Some(loaded)) => loaded.extend(select_keys.unwrap_or_default()),
            Some(None) => {}
            None => {
                self.imports.insert(path, select_keys);
            }
        }
        Ok(())
    }

    /// Loads the default params file and every item of a `vars` section.
    ///
    /// `default` is merged first when it exists under `wdir`. String items
    /// reference files; mapping items are inline variables attributed to
    /// `vars[<index>]` (prefixed with `stage_name` when given).
    ///
    /// # Errors
    ///
    /// Returns any error from [`Context::merge_from`] or
    /// [`Context::merge_update`], and `ParamsLoad` for items that are neither
    /// strings nor mappings.
    pub fn load_from_vars(
        &mut self,
        fs: &dyn FileSystem,
        vars: &[Value],
        wdir: &str,
        stage_name: Option<&str>,
        default: Option<&str>,
    ) -> Result<(), ContextError> {
        if let Some(default) = default {
            let to_import = join_path(wdir, default);
            if fs.exists(&to_import) {
                self.merge_from(fs, default, wdir, false)?;
            } else {
                trace!(
                    "{} does not exist, it won't be used in parametrization",
                    to_import
                );
            }
        }

        let prefix = stage_name.map_or_else(String::new, |name| format!("{name}."));
        for (index, item) in vars.iter().enumerate() {
            match item {
                Value::String(item) => self.merge_from(fs, item, wdir, false)?,
                Value::Object(map) => {
                    let meta = Meta::from_source(format!("{prefix}vars[{index}]"), true);
                    self.merge_update(Self::from_map(map.clone(), meta), false)?;
                }
                other => {
                    return Err(ContextError::params_load(format!(
                        "expected a file path or a dictionary in 'vars', got '{}'",
                        type_name(other)
                    )));
                }
            }
        }

        debug!(keys = self.len(), imports = self.imports.len(), "Loaded vars");
        Ok(())
    }
}

fn select(
    mut data: Map<String, Value>,
    keys: &[String],
    path: &str,
) -> Result<Map<String, Value>, ContextError> {
    let mut selected = Map::new();
    for key in keys {
        let value = data.remove(key).ok_or_else(|| {
            ContextError::params_load(format!("could not find '{key}' in '{path}'"))
        })?;
        selected.insert(key.clone(), value);
    }
    Ok(selected)
}

fn check_loaded(
    imported: Option<&[String]>,
    item: &str,
    keys: Option<&[String]>,
) -> Result<(), ContextError> {
    match (imported, keys) {
        (Some(_), None) => Err(ContextError::vars_already_loaded(format!(
            "cannot load '{item}' as it's partially loaded already"
        ))),
        (None, Some(_)) => Err(ContextError::vars_already_loaded(format!(
            "cannot partially load '{item}' as it's already loaded."
        ))),
        (Some(imported), Some(keys)) if keys.iter().any(|key| imported.contains(key)) => {
            Err(ContextError::vars_already_loaded(format!(
                "cannot load '{item}' as it's partially loaded already"
            )))
        }
        _ => Ok(()),
    }
}
