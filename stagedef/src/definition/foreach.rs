//! `foreach` templates.
//!
//! A template resolves its `foreach` data once, derives one member key per
//! element and resolves the `do` body for a member with `item` (and `key`
//! for dictionaries) bound in the context. All derived state is memoized on
//! the definition.

use super::entry::EntryDefinition;
use super::{check_syntax_errors, ResolvedStage, JOIN, STAGES_KWD};
use crate::context::{Context, Node, NodeValue};
use crate::errors::{EntryNotFoundError, ParsingError, ResolveError, ResolveErrorKind};
use crate::interpolate::scalar_to_str;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Names under which a member is bound while its stage resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationPair {
    /// Name of the member key, bound for dictionaries only.
    pub key: &'static str,
    /// Name of the member value.
    pub value: &'static str,
}

impl Default for IterationPair {
    fn default() -> Self {
        Self {
            key: "key",
            value: "item",
        }
    }
}

/// A stage template generating `<name>@<key>` stages.
#[derive(Debug, Clone)]
pub struct ForeachDefinition {
    name: String,
    foreach_data: Value,
    do_definition: Arc<Map<String, Value>>,
    relpath: String,
    where_: String,
    pair: IterationPair,
    resolved_iterable: Option<Node>,
    normalized_iterable: Option<IndexMap<String, Node>>,
    do_checked: bool,
}

impl ForeachDefinition {
    /// Creates a template from its raw `foreach` data and `do` body.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        foreach_data: Value,
        do_definition: Map<String, Value>,
        relpath: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            foreach_data,
            do_definition: Arc::new(do_definition),
            relpath: relpath.into(),
            where_: STAGES_KWD.to_string(),
            pair: IterationPair::default(),
            resolved_iterable: None,
            normalized_iterable: None,
            do_checked: false,
        }
    }

    /// Returns the template name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the raw `foreach` data.
    #[must_use]
    pub const fn foreach_data(&self) -> &Value {
        &self.foreach_data
    }

    /// Returns the binding names.
    #[must_use]
    pub const fn pair(&self) -> IterationPair {
        self.pair
    }

    /// Returns the resolved `foreach` data.
    ///
    /// Resolved once. If `item` or `key` already exist in the context, a
    /// single warning says they will be shadowed while members resolve.
    ///
    /// # Errors
    ///
    /// Returns an error located at `'stages.<name>.foreach'` if the data
    /// cannot be resolved or is neither a list nor a dictionary.
    pub fn resolved_iterable(&mut self, context: &mut Context) -> Result<&Node, ResolveError> {
        let iterable = match self.resolved_iterable.take() {
            Some(iterable) => iterable,
            None => self.resolve_foreach_data(context)?,
        };
        Ok(self.resolved_iterable.insert(iterable))
    }

    fn resolve_foreach_data(&self, context: &mut Context) -> Result<Node, ResolveError> {
        let location = format!("'{}.{}.foreach'", self.where_, self.name);
        let iterable = context
            .resolve_node(&self.foreach_data, None, false)
            .map_err(|err| ResolveError::new(location.as_str(), self.relpath.as_str(), err))?;

        if !iterable.is_container() {
            return Err(ResolveError::new(
                location,
                self.relpath.as_str(),
                ResolveErrorKind::NotIterable {
                    type_name: iterable.type_name(),
                },
            ));
        }

        self.warn_if_overwriting(context, &self.inserted_keys(&iterable));
        Ok(iterable)
    }

    fn inserted_keys(&self, iterable: &Node) -> Vec<&'static str> {
        let mut keys = vec![self.pair.value];
        if iterable.is_dict() {
            keys.push(self.pair.key);
        }
        keys
    }

    fn warn_if_overwriting(&self, context: &Context, keys: &[&str]) {
        let warn_for: Vec<&str> = keys
            .iter()
            .copied()
            .filter(|key| context.contains_key(key))
            .collect();
        if warn_for.is_empty() {
            return;
        }
        let linking_verb = if warn_for.len() == 1 { "is" } else { "are" };
        warn!(
            "{} {} already specified, will be overwritten for stages generated from '{}'",
            warn_for.join(" and "),
            linking_verb,
            self.name
        );
    }

    /// Returns the members keyed by their string key.
    ///
    /// Dictionary keys are used as they are. Lists holding any list or
    /// dictionary are keyed by index, other lists by each element's string
    /// form.
    ///
    /// # Errors
    ///
    /// Same as [`ForeachDefinition::resolved_iterable`].
    pub fn normalized_iterable(
        &mut self,
        context: &mut Context,
    ) -> Result<&IndexMap<String, Node>, ResolveError> {
        let normalized = match self.normalized_iterable.take() {
            Some(normalized) => normalized,
            None => normalize(self.resolved_iterable(context)?),
        };
        Ok(self.normalized_iterable.insert(normalized))
    }

    /// Returns the `do` body after checking its syntax once.
    ///
    /// # Errors
    ///
    /// Returns the first syntax error, located at `'stages.<name>.<field>'`.
    pub fn do_definition(&mut self) -> Result<Arc<Map<String, Value>>, ResolveError> {
        if !self.do_checked {
            check_syntax_errors(&self.do_definition, &self.name, &self.relpath, &self.where_)?;
            self.do_checked = true;
        }
        Ok(Arc::clone(&self.do_definition))
    }

    /// Returns true if `key` is a member.
    ///
    /// # Errors
    ///
    /// Same as [`ForeachDefinition::resolved_iterable`].
    pub fn has_member(&mut self, context: &mut Context, key: &str) -> Result<bool, ResolveError> {
        Ok(self.normalized_iterable(context)?.contains_key(key))
    }

    /// Returns `<name>@<key>` for every member, in order.
    ///
    /// # Errors
    ///
    /// Same as [`ForeachDefinition::resolved_iterable`].
    pub fn get_generated_names(&mut self, context: &mut Context) -> Result<Vec<String>, ResolveError> {
        let name = self.name.clone();
        Ok(self
            .normalized_iterable(context)?
            .keys()
            .map(|key| generate_name(&name, key))
            .collect())
    }

    /// Resolves the stage generated for member `key`.
    ///
    /// # Errors
    ///
    /// Returns `EntryNotFound` if `key` is not a member. Field errors are
    /// located at `'stages.<name>@<key>.<field>'`, other context errors at
    /// `stage '<name>@<key>'`.
    pub fn resolve_one(
        &mut self,
        context: &mut Context,
        key: &str,
    ) -> Result<ResolvedStage, ParsingError> {
        let Some(value) = self.normalized_iterable(context)?.get(key).cloned() else {
            return Err(EntryNotFoundError::new(format!(
                "Could not find '{key}' in foreach group '{}'",
                self.name
            ))
            .into());
        };

        let mut bindings = IndexMap::new();
        bindings.insert(self.pair.value.to_string(), value);
        if self.resolved_iterable(context)?.is_dict() {
            bindings.insert(
                self.pair.key.to_string(),
                Node::local(Value::String(key.to_string())),
            );
        }

        let generated = generate_name(&self.name, key);
        let entry = EntryDefinition::from_shared(
            generated.as_str(),
            self.do_definition()?,
            self.relpath.as_str(),
        )
        .with_where(self.where_.as_str());

        debug!(stage = %generated, "Resolving generated stage");
        let mut scope = context.set_temporarily(bindings, true);
        entry
            .resolve_stage(&mut scope, true)
            .map_err(|err| err.locate(format!("stage '{generated}'"), &self.relpath).into())
    }

    /// Resolves every member and returns `{<name>@<key>: definition}`.
    ///
    /// # Errors
    ///
    /// Returns the first failure of [`ForeachDefinition::resolve_one`].
    pub fn resolve_all(&mut self, context: &mut Context) -> Result<Map<String, Value>, ParsingError> {
        let keys: Vec<String> = self.normalized_iterable(context)?.keys().cloned().collect();
        let mut resolved = Map::new();
        for key in keys {
            resolved.extend(self.resolve_one(context, &key)?.into_map());
        }
        Ok(resolved)
    }
}

fn generate_name(name: &str, key: &str) -> String {
    format!("{name}{JOIN}{key}")
}

fn normalize(iterable: &Node) -> IndexMap<String, Node> {
    match iterable.kind() {
        NodeValue::Dict(map) => map.clone(),
        NodeValue::List(items) if items.iter().any(Node::is_container) => items
            .iter()
            .enumerate()
            .map(|(index, item)| (index.to_string(), item.clone()))
            .collect(),
        NodeValue::List(items) => items
            .iter()
            .map(|item| (scalar_to_str(&item.to_value()), item.clone()))
            .collect(),
        NodeValue::Scalar(_) => IndexMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Meta;
    use crate::testing::{capture_logs, make_foreach_definition};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tracing::Level;

    fn context(value: Value) -> Context {
        Context::from_value(value).unwrap()
    }

    #[test]
    fn test_normalized_iterable_of_scalars() {
        let mut ctx = Context::new();
        let mut def = make_foreach_definition("build", json!(["foo", 1, true, 2.5]), json!({}));

        let keys: Vec<String> = def.normalized_iterable(&mut ctx).unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["foo", "1", "true", "2.5"]);
    }

    #[test]
    fn test_normalized_iterable_uses_index_for_composites() {
        let mut ctx = Context::new();
        let mut def =
            make_foreach_definition("build", json!(["foo", {"thresh": 10}]), json!({}));

        let keys: Vec<String> = def.normalized_iterable(&mut ctx).unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["0", "1"]);
    }

    #[test]
    fn test_normalized_iterable_of_dictionary() {
        let mut ctx = context(json!({"models": {"us": {"thresh": 10}, "gb": {"thresh": 15}}}));
        let mut def = make_foreach_definition("build", json!("${models}"), json!({}));

        assert_eq!(
            def.get_generated_names(&mut ctx).unwrap(),
            vec!["build@us", "build@gb"]
        );
        assert!(def.has_member(&mut ctx, "gb").unwrap());
        assert!(!def.has_member(&mut ctx, "fr").unwrap());
    }

    #[test]
    fn test_resolve_one_binds_item_and_key() {
        let mut ctx = context(json!({"models": {"us": {"thresh": 10}}}));
        let mut def = make_foreach_definition(
            "build",
            json!("${models}"),
            json!({"cmd": "python script.py --thresh ${item.thresh} --region ${key}"}),
        );

        let stage = def.resolve_one(&mut ctx, "us").unwrap();
        assert_eq!(stage.name, "build@us");
        assert_eq!(
            Value::Object(stage.definition),
            json!({"cmd": "python script.py --thresh 10 --region us"})
        );
        assert_eq!(ctx, json!({"models": {"us": {"thresh": 10}}}));
    }

    #[test]
    fn test_resolve_one_list_does_not_bind_key() {
        let mut ctx = Context::new();
        let mut def = make_foreach_definition("build", json!(["a"]), json!({"cmd": "${key}"}));

        let err = def.resolve_one(&mut ctx, "a").unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to parse 'stages.build@a.cmd' in 'dvc.yaml': Could not find 'key'"
        );
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_resolve_one_tracks_item_source() {
        let mut ctx = Context::from_map(
            json!({"models": {"us": {"thresh": 10}}}).as_object().cloned().unwrap(),
            Meta::from_source("params.yaml", false),
        );
        let mut def = make_foreach_definition(
            "build",
            json!("${models}"),
            json!({"cmd": "echo ${item.thresh} ${key}"}),
        );

        let stage = def.resolve_one(&mut ctx, "us").unwrap();
        assert_eq!(stage.tracked.keys.iter().collect::<Vec<_>>(), vec!["item", "key"]);
        assert_eq!(
            stage.tracked.source("params.yaml").unwrap().get("models.us.thresh"),
            Some(&json!(10))
        );
    }

    #[test]
    fn test_resolve_one_missing_member() {
        let mut ctx = Context::new();
        let mut def = make_foreach_definition("build", json!(["a"]), json!({"cmd": "${item}"}));

        let err = def.resolve_one(&mut ctx, "b").unwrap_err();
        assert!(err.is_entry_not_found());
        assert_eq!(err.to_string(), "Could not find 'b' in foreach group 'build'");
    }

    #[test]
    fn test_not_iterable() {
        let mut ctx = context(json!({"foo": "bar"}));
        let mut def = make_foreach_definition("build", json!("${foo}"), json!({}));

        let err = def.resolved_iterable(&mut ctx).unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to resolve 'stages.build.foreach' in 'dvc.yaml': expected list/dictionary, got str"
        );
    }

    #[test]
    fn test_shadow_warning_is_emitted_once() {
        let mut ctx = context(json!({"item": 1, "key": 2, "models": {"us": 1, "gb": 2}}));
        let mut def = make_foreach_definition("build", json!("${models}"), json!({"cmd": "${item}"}));

        let (result, logs) = capture_logs(Level::WARN, || def.resolve_all(&mut ctx));

        assert_eq!(
            Value::Object(result.unwrap()),
            json!({"build@us": {"cmd": 1}, "build@gb": {"cmd": 2}})
        );
        assert_eq!(logs.warnings().len(), 1);
        assert!(logs.contains(
            "item and key are already specified, will be overwritten for stages generated from 'build'"
        ));
        assert_eq!(ctx, json!({"item": 1, "key": 2, "models": {"us": 1, "gb": 2}}));
    }

    #[test]
    fn test_reserved_bindings_are_released() {
        let mut ctx = Context::new();
        let mut def = make_foreach_definition("build", json!(["a"]), json!({"cmd": "${item}"}));
        def.resolve_one(&mut ctx, "a").unwrap();

        ctx.merge_update(context(json!({"item": 1})), false).unwrap();
        assert_eq!(ctx, json!({"item": 1}));
    }

    #[test]
    fn test_do_definition_is_checked_lazily() {
        let mut ctx = Context::new();
        let mut def = make_foreach_definition("build", json!(["a"]), json!({"cmd": "${item.}"}));

        assert!(def.has_member(&mut ctx, "a").unwrap());
        let err = def.resolve_one(&mut ctx, "a").unwrap_err();
        assert_eq!(
            err.as_resolve_error().map(|err| err.location.as_str()),
            Some("'stages.build.cmd'")
        );
    }

    #[test]
    fn test_do_definition_is_checked_once() {
        let mut ctx = Context::new();
        let mut def =
            make_foreach_definition("build", json!(["a", "b"]), json!({"cmd": "echo ${item}"}));
        assert!(!def.do_checked);

        let first = def.do_definition().unwrap();
        assert!(def.do_checked);
        let second = def.do_definition().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        def.resolve_all(&mut ctx).unwrap();
        assert!(def.do_checked);
        assert!(Arc::ptr_eq(&first, &def.do_definition().unwrap()));

        // A checked body is not parsed again.
        let bad = json!({"cmd": "${item.}"}).as_object().cloned().unwrap();
        def.do_definition = Arc::new(bad);
        assert!(def.do_definition().is_ok());
    }

    #[test]
    fn test_normalized_iterable_null_member() {
        let mut ctx = Context::new();
        let mut def = make_foreach_definition("build", json!([null]), json!({"cmd": "echo ${item}"}));

        assert_eq!(def.get_generated_names(&mut ctx).unwrap(), vec!["build@null"]);
        assert_eq!(
            Value::Object(def.resolve_all(&mut ctx).unwrap()),
            json!({"build@null": {"cmd": "echo null"}})
        );
    }
}
