//! Scoped access to a [`Context`].

use super::{Context, Node};
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use serde_json::Value;
use std::ops::{Deref, DerefMut};

/// Variables read while resolving one stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackedVars {
    /// Every top-level key that was looked up, in first-read order.
    pub keys: IndexSet<String>,
    /// Values read from variables files: source file → dotted path → value.
    pub sources: IndexMap<String, IndexMap<String, Value>>,
}

impl TrackedVars {
    /// Returns true if nothing was read.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Returns the values read from `source`.
    #[must_use]
    pub fn source(&self, source: &str) -> Option<&IndexMap<String, Value>> {
        self.sources.get(source)
    }

    pub(super) fn record(&mut self, top_level: &str, node: &Node) {
        self.keys.insert(top_level.to_string());
        if node.meta().local {
            return;
        }
        if let Some((source, path)) = node.get_sources() {
            self.sources
                .entry(source.to_string())
                .or_default()
                .insert(path, node.to_value());
        }
    }
}

/// Guard returned by [`Context::track`].
///
/// Dereferences to the context. Reads through it are recorded until the
/// guard is finished or dropped.
#[derive(Debug)]
pub struct TrackScope<'a> {
    context: &'a mut Context,
    previous: Option<TrackedVars>,
}

impl<'a> TrackScope<'a> {
    pub(super) fn new(context: &'a mut Context) -> Self {
        let previous = context.tracked.replace(TrackedVars::default());
        Self { context, previous }
    }

    /// Stops recording and returns what was read.
    pub fn finish(mut self) -> TrackedVars {
        self.context.tracked.take().unwrap_or_default()
    }
}

impl Deref for TrackScope<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        &*self.context
    }
}

impl DerefMut for TrackScope<'_> {
    fn deref_mut(&mut self) -> &mut Context {
        &mut *self.context
    }
}

impl Drop for TrackScope<'_> {
    fn drop(&mut self) {
        self.context.tracked = self.previous.take();
    }
}

/// Guard returned by [`Context::set_temporarily`].
///
/// Dereferences to the context with the bindings in place.
#[derive(Debug)]
pub struct TemporaryBindings<'a> {
    context: &'a mut Context,
    inserted: Vec<String>,
    shadowed: Vec<(String, Node)>,
    reserved: Vec<String>,
}

impl<'a> TemporaryBindings<'a> {
    pub(super) fn new(
        context: &'a mut Context,
        bindings: IndexMap<String, Node>,
        reserve: bool,
    ) -> Self {
        let mut inserted = Vec::new();
        let mut shadowed = Vec::new();
        let mut reserved = Vec::new();

        for (key, node) in bindings {
            if reserve && context.reserved_keys.insert(key.clone()) {
                reserved.push(key.clone());
            }
            match context.data.insert(key.clone(), node) {
                Some(previous) => shadowed.push((key, previous)),
                None => inserted.push(key),
            }
        }

        Self {
            context,
            inserted,
            shadowed,
            reserved,
        }
    }
}

impl Deref for TemporaryBindings<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        &*self.context
    }
}

impl DerefMut for TemporaryBindings<'_> {
    fn deref_mut(&mut self) -> &mut Context {
        &mut *self.context
    }
}

impl Drop for TemporaryBindings<'_> {
    fn drop(&mut self) {
        for key in self.reserved.drain(..) {
            self.context.reserved_keys.swap_remove(&key);
        }
        // New keys sit at the tail, so popping them in reverse keeps the
        // order of everything else.
        for key in self.inserted.drain(..).rev() {
            self.context.data.swap_remove(&key);
        }
        for (key, node) in self.shadowed.drain(..) {
            self.context.data.insert(key, node);
        }
    }
}
