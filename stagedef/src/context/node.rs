//! Context nodes with provenance.

use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::fmt;

/// Where a node came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meta {
    /// The file (or `vars[<n>]` item) the data was loaded from.
    pub source: Option<String>,
    /// Path segments from the source root to this node.
    pub dpaths: Vec<String>,
    /// True for inline data that should not be reported as tracked.
    pub local: bool,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            source: None,
            dpaths: Vec::new(),
            local: true,
        }
    }
}

impl Meta {
    /// Creates metadata for data loaded from `source`.
    #[must_use]
    pub fn from_source(source: impl Into<String>, local: bool) -> Self {
        Self {
            source: Some(source.into()),
            dpaths: Vec::new(),
            local,
        }
    }

    /// Returns the metadata of the child stored under `key`.
    #[must_use]
    pub fn child(&self, key: impl fmt::Display) -> Self {
        let mut dpaths = self.dpaths.clone();
        dpaths.push(key.to_string());
        Self {
            source: self.source.clone(),
            dpaths,
            local: self.local,
        }
    }

    /// Returns the dotted path of this node inside its source.
    #[must_use]
    pub fn path(&self) -> String {
        self.dpaths.join(".")
    }
}

impl fmt::Display for Meta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            self.source.as_deref().unwrap_or("<local>"),
            self.path()
        )
    }
}

/// The payload of a [`Node`].
#[derive(Debug, Clone)]
pub enum NodeValue {
    /// A string, number, boolean or null.
    Scalar(Value),
    /// An ordered sequence.
    List(Vec<Node>),
    /// A string-keyed mapping.
    Dict(IndexMap<String, Node>),
}

/// A value in the context, wrapped with its provenance.
///
/// Composite nodes hold child nodes so dotted paths resolve segment by
/// segment. Equality compares values only.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) value: NodeValue,
    pub(crate) meta: Meta,
}

impl Node {
    /// Wraps `value`, giving every child a path derived from `meta`.
    #[must_use]
    pub fn from_value(value: Value, meta: Meta) -> Self {
        let inner = match value {
            Value::Array(items) => NodeValue::List(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(index, item)| Self::from_value(item, meta.child(index)))
                    .collect(),
            ),
            Value::Object(map) => NodeValue::Dict(
                map.into_iter()
                    .map(|(key, item)| {
                        let child = meta.child(&key);
                        (key, Self::from_value(item, child))
                    })
                    .collect(),
            ),
            scalar => NodeValue::Scalar(scalar),
        };
        Self { value: inner, meta }
    }

    /// Wraps `value` as local data.
    #[must_use]
    pub fn local(value: Value) -> Self {
        Self::from_value(value, Meta::default())
    }

    /// Returns the node payload.
    #[must_use]
    pub const fn kind(&self) -> &NodeValue {
        &self.value
    }

    /// Returns the provenance of this node.
    #[must_use]
    pub const fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Returns true for mappings.
    #[must_use]
    pub const fn is_dict(&self) -> bool {
        matches!(self.value, NodeValue::Dict(_))
    }

    /// Returns true for mappings and sequences.
    #[must_use]
    pub const fn is_container(&self) -> bool {
        !matches!(self.value, NodeValue::Scalar(_))
    }

    /// Returns the type name used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match &self.value {
            NodeValue::Scalar(value) => type_name(value),
            NodeValue::List(_) => "list",
            NodeValue::Dict(_) => "dict",
        }
    }

    /// Unwraps the node into plain data.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match &self.value {
            NodeValue::Scalar(value) => value.clone(),
            NodeValue::List(items) => Value::Array(items.iter().map(Self::to_value).collect()),
            NodeValue::Dict(map) => Value::Object(
                map.iter()
                    .map(|(key, node)| (key.clone(), node.to_value()))
                    .collect::<Map<String, Value>>(),
            ),
        }
    }

    /// Returns the source file and path this node reports when tracked.
    ///
    /// Mappings report nothing: only the leaves (or whole lists) read from
    /// them count as used.
    #[must_use]
    pub fn get_sources(&self) -> Option<(&str, String)> {
        match self.value {
            NodeValue::Dict(_) => None,
            NodeValue::Scalar(_) | NodeValue::List(_) => self
                .meta
                .source
                .as_deref()
                .map(|source| (source, self.meta.path())),
        }
    }

    /// Returns the direct child addressed by `segment`.
    ///
    /// List segments must be a valid index.
    #[must_use]
    pub fn get(&self, segment: &str) -> Option<&Self> {
        match &self.value {
            NodeValue::Dict(map) => map.get(segment),
            NodeValue::List(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            NodeValue::Scalar(_) => None,
        }
    }

    /// Follows a `.`-separated path below this node.
    #[must_use]
    pub fn select(&self, key: &str) -> Option<&Self> {
        let (index, rest) = match key.split_once('.') {
            Some((index, rest)) => (index, Some(rest)),
            None => (key, None),
        };
        let node = self.get(index.trim())?;
        match rest {
            Some(rest) => node.select(rest),
            None => Some(node),
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.to_value() == other.to_value()
    }
}

/// Returns the type name used in error messages for plain data.
#[must_use]
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

/// Returns true for strings, numbers, booleans and null.
#[must_use]
pub const fn is_primitive(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}
