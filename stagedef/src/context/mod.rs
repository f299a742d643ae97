//! Variable context for interpolation.
//!
//! This module provides:
//! - [`Node`]s that remember which file and path a value came from
//! - [`Context`], the mergeable variable tree used to evaluate `${...}`
//! - Scoped guards for access tracking and temporary bindings

pub mod node;
mod scope;
mod vars;

pub use node::{Meta, Node, NodeValue};
pub use scope::{TemporaryBindings, TrackScope, TrackedVars};

use crate::config::ParsingConfig;
use crate::errors::ContextError;
use crate::interpolate::{
    get_expression, get_matches, is_exact_string, to_str, unescape, validate_value,
};
use indexmap::{IndexMap, IndexSet};
use serde_json::{Map, Value};

/// A tree of variables addressed by dotted paths.
///
/// One context is shared by every definition of a document. Foreach
/// expansion adds `item`/`key` through [`Context::set_temporarily`], which
/// removes them again when the returned guard drops.
#[derive(Debug, Clone, Default)]
pub struct Context {
    data: IndexMap<String, Node>,
    meta: Meta,
    imports: IndexMap<String, Option<Vec<String>>>,
    reserved_keys: IndexSet<String>,
    tracked: Option<TrackedVars>,
    config: ParsingConfig,
}

impl Context {
    /// Creates a new empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context holding the top-level keys of `value` as local data.
    ///
    /// # Errors
    ///
    /// Returns a `ParamsLoad` error if `value` is not a dictionary.
    pub fn from_value(value: Value) -> Result<Self, ContextError> {
        match value {
            Value::Object(map) => Ok(Self::from_map(map, Meta::default())),
            other => Err(ContextError::params_load(format!(
                "expected a dictionary, got '{}'",
                node::type_name(&other)
            ))),
        }
    }

    pub(crate) fn from_map(map: Map<String, Value>, meta: Meta) -> Self {
        let data = map
            .into_iter()
            .map(|(key, value)| {
                let child = meta.child(&key);
                (key, Node::from_value(value, child))
            })
            .collect();
        Self {
            data,
            meta,
            ..Self::default()
        }
    }

    /// Sets the configuration used to render interpolated values.
    #[must_use]
    pub fn with_config(mut self, config: ParsingConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the rendering configuration.
    #[must_use]
    pub const fn config(&self) -> &ParsingConfig {
        &self.config
    }

    /// Returns the provenance of the root.
    #[must_use]
    pub const fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Returns the loaded files and the keys selected from each.
    ///
    /// `None` means the whole file was loaded.
    #[must_use]
    pub const fn imports(&self) -> &IndexMap<String, Option<Vec<String>>> {
        &self.imports
    }

    /// Checks if a top-level key exists.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Gets a top-level node without tracking.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.data.get(key)
    }

    /// Returns all top-level keys.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }

    /// Returns the number of top-level keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the context holds no variables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the whole context as plain data.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.data
                .iter()
                .map(|(key, node)| (key.clone(), node.to_value()))
                .collect(),
        )
    }

    /// Merges `other` into this context.
    ///
    /// Dictionaries are merged recursively. Any other key present on both
    /// sides is a conflict unless `overwrite` is set.
    ///
    /// # Errors
    ///
    /// Returns `ReservedKey` if `other` touches a reserved key and `Merge`
    /// on a conflict.
    pub fn merge_update(&mut self, other: Self, overwrite: bool) -> Result<(), ContextError> {
        let reserved: Vec<String> = self
            .reserved_keys
            .iter()
            .filter(|key| other.data.contains_key(key.as_str()))
            .cloned()
            .collect();
        if !reserved.is_empty() {
            return Err(ContextError::reserved_key(reserved, None));
        }
        merge_nodes(&mut self.data, other.data, overwrite)
    }

    /// Looks up a dotted path.
    ///
    /// The read is recorded when tracking is active.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotInContext` if any segment is missing.
    pub fn select(&mut self, key: &str) -> Result<&Node, ContextError> {
        let (head, rest) = match key.split_once('.') {
            Some((head, rest)) => (head.trim(), Some(rest)),
            None => (key.trim(), None),
        };
        let node = self
            .data
            .get(head)
            .and_then(|node| rest.map_or(Some(node), |rest| node.select(rest)))
            .ok_or_else(|| ContextError::key_not_in_context(key))?;

        if let Some(tracked) = self.tracked.as_mut() {
            tracked.record(head, node);
        }
        Ok(node)
    }

    /// Resolves every interpolation in `value`, mapping keys included.
    ///
    /// `key` names the field being resolved; it decides which values may be
    /// embedded in strings. With `skip_checks` token bodies are not run
    /// through the grammar.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotInContext` for unknown variables and `Parse` for
    /// malformed tokens or values that cannot be embedded.
    pub fn resolve(
        &mut self,
        value: &Value,
        key: Option<&str>,
        skip_checks: bool,
    ) -> Result<Value, ContextError> {
        match value {
            Value::String(s) => self.resolve_str(s, key, skip_checks),
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve(item, key, skip_checks))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut resolved = Map::new();
                for (name, item) in map {
                    let name = match self.resolve_str(name, key, skip_checks)? {
                        Value::String(s) => s,
                        other => to_str(&other, &self.config)?,
                    };
                    resolved.insert(name, self.resolve(item, key, skip_checks)?);
                }
                Ok(Value::Object(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    /// Resolves `value` but keeps the selected node for whole-string tokens.
    ///
    /// The node keeps its provenance, so values bound from it are still
    /// attributed to their source file when tracked.
    ///
    /// # Errors
    ///
    /// Same as [`Context::resolve`].
    pub fn resolve_node(
        &mut self,
        value: &Value,
        key: Option<&str>,
        skip_checks: bool,
    ) -> Result<Node, ContextError> {
        if let Value::String(s) = value {
            let matches = get_matches(s);
            if is_exact_string(s, &matches) {
                let expr = get_expression(&matches[0], skip_checks)?;
                return Ok(self.select(&expr)?.clone());
            }
        }
        Ok(Node::local(self.resolve(value, key, skip_checks)?))
    }

    /// Resolves a single string.
    ///
    /// A string that is exactly one token evaluates to the selected value
    /// whatever its type. Otherwise every token is rendered into the string.
    ///
    /// # Errors
    ///
    /// Same as [`Context::resolve`].
    pub fn resolve_str(
        &mut self,
        src: &str,
        key: Option<&str>,
        skip_checks: bool,
    ) -> Result<Value, ContextError> {
        let matches = get_matches(src);
        if is_exact_string(src, &matches) {
            let expr = get_expression(&matches[0], skip_checks)?;
            return Ok(self.select(&expr)?.to_value());
        }

        let mut buf = String::with_capacity(src.len());
        let mut index = 0;
        for token in &matches {
            let expr = get_expression(token, skip_checks)?;
            let value = self.select(&expr)?.to_value();
            validate_value(&value, key)?;
            buf.push_str(&src[index..token.span.start]);
            buf.push_str(&to_str(&value, &self.config)?);
            index = token.span.end;
        }
        buf.push_str(&src[index..]);
        Ok(Value::String(unescape(&buf)))
    }

    /// Starts recording reads.
    ///
    /// Recording stops when the returned guard drops; call
    /// [`TrackScope::finish`] to collect what was read.
    pub fn track(&mut self) -> TrackScope<'_> {
        TrackScope::new(self)
    }

    /// Inserts top-level `bindings` until the returned guard drops.
    ///
    /// Shadowed values are restored and new keys are removed one by one on
    /// every exit path, so the cost does not depend on the context size.
    /// With `reserve` the keys cannot be merged over while bound.
    pub fn set_temporarily(
        &mut self,
        bindings: IndexMap<String, Node>,
        reserve: bool,
    ) -> TemporaryBindings<'_> {
        TemporaryBindings::new(self, bindings, reserve)
    }
}

impl PartialEq<Value> for Context {
    fn eq(&self, other: &Value) -> bool {
        self.to_value() == *other
    }
}

fn merge_nodes(
    into: &mut IndexMap<String, Node>,
    update: IndexMap<String, Node>,
    overwrite: bool,
) -> Result<(), ContextError> {
    for (key, node) in update {
        let Some(existing) = into.get_mut(&key) else {
            into.insert(key, node);
            continue;
        };

        if existing.is_dict() && node.is_dict() {
            if let (NodeValue::Dict(into_map), NodeValue::Dict(update_map)) =
                (&mut existing.value, node.value)
            {
                merge_nodes(into_map, update_map, overwrite)?;
            }
        } else if overwrite {
            *existing = node;
        } else {
            return Err(merge_error(&key, &node, existing));
        }
    }
    Ok(())
}

fn merge_error(key: &str, new: &Node, existing: &Node) -> ContextError {
    match (&existing.meta.source, &new.meta.source) {
        (Some(preexisting), Some(source)) => ContextError::merge(
            key,
            format!(
                "cannot redefine '{}' from '{source}' as it already exists in '{preexisting}'",
                new.meta.path()
            ),
        ),
        _ => ContextError::merge(key, format!("cannot merge '{key}' as it already exists")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ParseError;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn context(value: Value) -> Context {
        Context::from_value(value).unwrap()
    }

    #[test]
    fn test_from_value_requires_dictionary() {
        let err = Context::from_value(json!([1, 2])).unwrap_err();
        assert_eq!(err.to_string(), "expected a dictionary, got 'list'");
    }

    #[test]
    fn test_select_nested() {
        let mut ctx = context(json!({"models": {"foo": {"thresh": 10}}, "lst": ["a", "b"]}));

        assert_eq!(ctx.select("models.foo.thresh").unwrap().to_value(), json!(10));
        assert_eq!(ctx.select("lst.1").unwrap().to_value(), json!("b"));
        assert_eq!(
            ctx.select("models.bar").unwrap_err().to_string(),
            "Could not find 'models.bar'"
        );
    }

    #[test]
    fn test_resolve_identity_without_tokens() {
        let mut ctx = context(json!({"a": 1}));
        let value = json!({"cmd": "python train.py", "n": 3, "flag": true, "outs": ["a", null]});
        assert_eq!(ctx.resolve(&value, None, false).unwrap(), value);
    }

    #[test]
    fn test_resolve_whole_string_keeps_type() {
        let mut ctx = context(json!({"enabled": true, "models": {"a": [1, 2]}, "lst": [1, {"x": 1}]}));

        assert_eq!(ctx.resolve_str("${enabled}", None, false).unwrap(), json!(true));
        assert_eq!(
            ctx.resolve_str("${models}", Some("outs"), false).unwrap(),
            json!({"a": [1, 2]})
        );
        assert_eq!(
            ctx.resolve_str("${lst}", Some("deps"), false).unwrap(),
            json!([1, {"x": 1}])
        );
    }

    #[test]
    fn test_resolve_substring() {
        let mut ctx = context(json!({"enabled": true, "num": 3, "name": "x"}));

        assert_eq!(
            ctx.resolve_str("enabled? ${enabled}", None, false).unwrap(),
            json!("enabled? true")
        );
        assert_eq!(
            ctx.resolve_str("${num} days of ${name}", None, false).unwrap(),
            json!("3 days of x")
        );
        assert_eq!(
            ctx.resolve_str("literal \\${name} and ${name}", None, false).unwrap(),
            json!("literal ${name} and x")
        );
    }

    #[test]
    fn test_resolve_token_after_unclosed_escape() {
        let mut ctx = context(json!({"b": "x"}));
        assert_eq!(
            ctx.resolve_str("echo \\${a ${b}", Some("cmd"), false).unwrap(),
            json!("echo ${a x")
        );
    }

    #[test]
    fn test_resolve_substring_rejects_composites() {
        let mut ctx = context(json!({"models": {}, "lst": [1]}));

        let err = ctx.resolve_str("out/${models}", Some("outs"), false).unwrap_err();
        assert!(matches!(
            err,
            ContextError::Parse(ParseError::NonPrimitive { type_name: "dict" })
        ));

        let err = ctx.resolve_str("echo ${lst}", Some("cmd"), false).unwrap_err();
        assert_eq!(err.to_string(), "Cannot interpolate data of type 'list'");
    }

    #[test]
    fn test_resolve_cmd_dictionary_as_arguments() {
        let mut ctx = context(json!({"args": {"epochs": 10, "dry": true}}));
        assert_eq!(
            ctx.resolve_str("python train.py ${args}", Some("cmd"), false).unwrap(),
            json!("python train.py --epochs 10 --dry")
        );
    }

    #[test]
    fn test_resolve_recurses_into_keys() {
        let mut ctx = context(json!({"three": 3, "name": "metrics"}));
        assert_eq!(
            ctx.resolve(&json!({"lst": [1, 2, "${three}"], "${name}.json": {"cache": false}}), None, false)
                .unwrap(),
            json!({"lst": [1, 2, 3], "metrics.json": {"cache": false}})
        );
    }

    #[test]
    fn test_resolve_normalizes_brackets() {
        let mut ctx = context(json!({"models": {"foo": "bar"}}));
        assert_eq!(ctx.resolve_str("${models[foo]}", None, false).unwrap(), json!("bar"));
        assert_eq!(ctx.resolve_str("${models[foo]}", None, true).unwrap(), json!("bar"));
    }

    #[test]
    fn test_resolve_node_keeps_provenance() {
        let mut ctx = Context::from_map(
            json!({"models": ["a", "b"]}).as_object().cloned().unwrap(),
            Meta::from_source("params.yaml", false),
        );

        let node = ctx.resolve_node(&json!("${models}"), None, false).unwrap();
        assert_eq!(node.meta().source.as_deref(), Some("params.yaml"));
        assert_eq!(node.meta().path(), "models");

        let literal = ctx.resolve_node(&json!(["x", "${models.0}"]), None, false).unwrap();
        assert_eq!(literal.to_value(), json!(["x", "a"]));
        assert!(literal.meta().local);
    }

    #[test]
    fn test_merge_update_recursive() {
        let mut ctx = context(json!({"models": {"a": 1}}));
        ctx.merge_update(context(json!({"models": {"b": 2}, "lr": 0.1})), false)
            .unwrap();

        assert_eq!(ctx, json!({"models": {"a": 1, "b": 2}, "lr": 0.1}));
    }

    #[test]
    fn test_merge_update_conflict() {
        let mut ctx = Context::from_map(
            json!({"foo": 1}).as_object().cloned().unwrap(),
            Meta::from_source("params.yaml", false),
        );
        let other = Context::from_map(
            json!({"foo": 2}).as_object().cloned().unwrap(),
            Meta::from_source("vars[0]", true),
        );

        let err = ctx.merge_update(other, false).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot redefine 'foo' from 'vars[0]' as it already exists in 'params.yaml'"
        );
        assert_eq!(ctx, json!({"foo": 1}));
    }

    #[test]
    fn test_merge_update_conflict_without_sources() {
        let mut ctx = context(json!({"foo": {"a": 1}}));
        let err = ctx.merge_update(context(json!({"foo": [1]})), false).unwrap_err();
        assert_eq!(err.to_string(), "cannot merge 'foo' as it already exists");
    }

    #[test]
    fn test_merge_update_overwrite() {
        let mut ctx = context(json!({"foo": 1, "bar": {"x": 1}}));
        ctx.merge_update(context(json!({"foo": 2, "bar": {"x": 3}})), true)
            .unwrap();
        assert_eq!(ctx, json!({"foo": 2, "bar": {"x": 3}}));
    }
}
