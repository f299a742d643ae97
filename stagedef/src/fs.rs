//! File system access for variables files.
//!
//! The resolver only needs to probe and read params files, so the seam is a
//! small trait. [`LocalFileSystem`] reads from disk; tests use
//! [`crate::testing::MemoryFileSystem`].

use crate::errors::ContextError;
use serde_json::{Map, Value};
use std::io;
use std::path::Path;

/// Read-only file system used to load variables files.
#[cfg_attr(test, mockall::automock)]
pub trait FileSystem {
    /// Returns true if `path` exists.
    fn exists(&self, path: &str) -> bool;

    /// Returns true if `path` is a directory.
    fn is_dir(&self, path: &str) -> bool;

    /// Reads the whole file at `path`.
    fn read_to_string(&self, path: &str) -> io::Result<String>;
}

/// A [`FileSystem`] backed by the local disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    /// Creates a new local file system.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl FileSystem for LocalFileSystem {
    fn exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }

    fn is_dir(&self, path: &str) -> bool {
        Path::new(path).is_dir()
    }

    fn read_to_string(&self, path: &str) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// Joins `path` onto `base` using `/`.
#[must_use]
pub fn join_path(base: &str, path: &str) -> String {
    if base.is_empty() || path.starts_with('/') {
        return path.to_string();
    }
    format!("{}/{path}", base.trim_end_matches('/'))
}

/// Collapses `.` and `..` segments and duplicate separators.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            _ => parts.push(part),
        }
    }

    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Returns `path` relative to `start`.
///
/// Both paths are normalized first. When they share no prefix the result
/// climbs out of `start` with `..` segments.
#[must_use]
pub fn relative_path(path: &str, start: &str) -> String {
    let path = normalize_path(path);
    let start = normalize_path(start);
    let split = |p: &str| -> Vec<String> {
        p.split('/')
            .filter(|part| !part.is_empty() && *part != ".")
            .map(str::to_string)
            .collect()
    };
    let (path_parts, start_parts) = (split(&path), split(&start));

    let common = path_parts
        .iter()
        .zip(&start_parts)
        .take_while(|(a, b)| a == b)
        .count();
    let mut parts: Vec<&str> = vec![".."; start_parts.len() - common];
    parts.extend(path_parts[common..].iter().map(String::as_str));

    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// Loads a variables file and returns its contents.
///
/// `.json` files are read as JSON, everything else as YAML. Scalar mapping
/// keys are stringified (`2020: a` is addressed as `2020`); a sequence or
/// mapping used as a key is a `ParamsLoad` error.
pub fn load_path(fs: &dyn FileSystem, path: &str) -> Result<Value, ContextError> {
    let text = fs
        .read_to_string(path)
        .map_err(|err| ContextError::params_load(format!("unable to read '{path}': {err}")))?;

    let is_json = Path::new(path)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        return serde_json::from_str(&text)
            .map_err(|err| ContextError::params_load(format!("unable to parse '{path}': {err}")));
    }

    let yaml: serde_yaml::Value = serde_yaml::from_str(&text)
        .map_err(|err| ContextError::params_load(format!("unable to parse '{path}': {err}")))?;
    yaml_to_json(yaml, path)
}

fn yaml_to_json(value: serde_yaml::Value, path: &str) -> Result<Value, ContextError> {
    Ok(match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map_or(Value::Null, Value::Number)
            }
        }
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(|item| yaml_to_json(item, path))
                .collect::<Result<_, _>>()?,
        ),
        serde_yaml::Value::Mapping(mapping) => {
            let mut map = Map::new();
            for (key, value) in mapping {
                map.insert(yaml_key(key, path)?, yaml_to_json(value, path)?);
            }
            Value::Object(map)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value, path)?,
    })
}

fn yaml_key(key: serde_yaml::Value, path: &str) -> Result<String, ContextError> {
    match key {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        serde_yaml::Value::Null => Ok("null".to_string()),
        serde_yaml::Value::Tagged(tagged) => yaml_key(tagged.value, path),
        serde_yaml::Value::Sequence(_) | serde_yaml::Value::Mapping(_) => {
            Err(ContextError::params_load(format!(
                "unable to parse '{path}': mapping keys must be scalars"
            )))
        }
    }
}
