//! Error types for stage definition parsing.
//!
//! Lower layers ([`ContextError`], [`ParseError`]) describe what went wrong
//! inside the variable context or an interpolation token. Definitions catch
//! them and wrap them into a [`ResolveError`], which carries the location of
//! the failing field and the document path and renders the
//! `failed to parse '<location>' in '<path>': <detail>` message.

use std::fmt;
use thiserror::Error;

/// The main error type returned by the resolver.
#[derive(Debug, Clone, Error)]
pub enum ParsingError {
    /// The document content could not be resolved.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// The requested stage name does not exist.
    #[error(transparent)]
    EntryNotFound(#[from] EntryNotFoundError),
}

impl ParsingError {
    /// Returns true if the caller asked for a name that does not exist.
    #[must_use]
    pub const fn is_entry_not_found(&self) -> bool {
        matches!(self, Self::EntryNotFound(_))
    }

    /// Returns the resolve error, if this is one.
    #[must_use]
    pub const fn as_resolve_error(&self) -> Option<&ResolveError> {
        match self {
            Self::Resolve(err) => Some(err),
            Self::EntryNotFound(_) => None,
        }
    }
}

/// Error raised when a requested stage or foreach member does not exist.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct EntryNotFoundError {
    /// The error message.
    pub message: String,
}

impl EntryNotFoundError {
    /// Creates a new entry not found error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors raised by the variable context.
#[derive(Debug, Clone, Error)]
pub enum ContextError {
    /// A dotted path does not exist in the context.
    #[error("Could not find '{key}'")]
    KeyNotInContext {
        /// The path that was looked up.
        key: String,
    },

    /// Two variable sources define the same key.
    #[error("{message}")]
    Merge {
        /// The conflicting key.
        key: String,
        /// The rendered message.
        message: String,
    },

    /// A variables file was already (partially) loaded.
    #[error("{0}")]
    VarsAlreadyLoaded(String),

    /// A variables file could not be loaded.
    #[error("{0}")]
    ParamsLoad(String),

    /// A reserved key was about to be modified.
    #[error("{}", reserved_message(.keys, .path))]
    ReservedKey {
        /// The reserved keys that were touched.
        keys: Vec<String>,
        /// The vars item that attempted the modification.
        path: Option<String>,
    },

    /// An interpolation token could not be evaluated.
    #[error(transparent)]
    Parse(#[from] ParseError),
}

fn reserved_message(keys: &[String], path: &Option<String>) -> String {
    let noun = if keys.len() > 1 { "keys" } else { "key" };
    let mut message = format!("attempted to modify reserved {noun} {}", keys.join(", "));
    if let Some(path) = path {
        message.push_str(&format!(" in '{path}'"));
    }
    message
}

impl ContextError {
    /// Creates a key not in context error.
    #[must_use]
    pub fn key_not_in_context(key: impl Into<String>) -> Self {
        Self::KeyNotInContext { key: key.into() }
    }

    /// Creates a merge error.
    #[must_use]
    pub fn merge(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Merge {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Creates a vars already loaded error.
    #[must_use]
    pub fn vars_already_loaded(message: impl Into<String>) -> Self {
        Self::VarsAlreadyLoaded(message.into())
    }

    /// Creates a params load error.
    #[must_use]
    pub fn params_load(message: impl Into<String>) -> Self {
        Self::ParamsLoad(message.into())
    }

    /// Creates a reserved key error.
    #[must_use]
    pub fn reserved_key(keys: Vec<String>, path: Option<String>) -> Self {
        Self::ReservedKey { keys, path }
    }

    /// Returns true for errors raised while evaluating a single field.
    ///
    /// These are reported against the field that failed; every other context
    /// error is reported against the whole stage.
    #[must_use]
    pub const fn is_field_error(&self) -> bool {
        matches!(self, Self::KeyNotInContext { .. } | Self::Parse(_))
    }

    /// Returns true if the rendered detail starts on its own line.
    #[must_use]
    pub const fn is_block(&self) -> bool {
        match self {
            Self::Merge { .. } | Self::VarsAlreadyLoaded(_) => true,
            Self::Parse(err) => err.is_block(),
            Self::KeyNotInContext { .. } | Self::ParamsLoad(_) | Self::ReservedKey { .. } => false,
        }
    }
}

/// Errors raised while parsing or rendering an interpolation token.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The token body is not a valid key path.
    #[error("{0}")]
    Grammar(#[from] GrammarError),

    /// A token embedded in a larger string resolved to a composite value.
    #[error("Cannot interpolate data of type '{type_name}'")]
    NonPrimitive {
        /// The type of the resolved value.
        type_name: &'static str,
    },

    /// A list rendered into command arguments contains nested collections.
    #[error("Cannot interpolate nested iterable in '{key}'")]
    NestedIterable {
        /// The flattened key holding the list.
        key: String,
    },
}

impl ParseError {
    /// Returns true if the rendered detail starts on its own line.
    #[must_use]
    pub const fn is_block(&self) -> bool {
        matches!(self, Self::Grammar(_))
    }
}

/// A syntax error inside `${...}`.
///
/// Renders as three lines: the embraced token, a caret under the failing
/// column, and the grammar message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrammarError {
    /// The token including `${` and `}`.
    pub text: String,
    /// Character offset of the failure within `text`.
    pub loc: usize,
    /// What the grammar expected at `loc`.
    pub expected: String,
}

impl GrammarError {
    /// Creates a grammar error for `expression` failing at character `offset`.
    #[must_use]
    pub fn new(expression: &str, offset: usize, expected: impl Into<String>) -> Self {
        Self {
            text: format!("${{{expression}}}"),
            loc: offset + 2,
            expected: expected.into(),
        }
    }

    fn found(&self) -> String {
        self.text
            .chars()
            .nth(self.loc)
            .map_or_else(|| "end of text".to_string(), |c| format!("'{c}'"))
    }
}

impl fmt::Display for GrammarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.text)?;
        writeln!(f, "{}^", " ".repeat(self.loc))?;
        write!(
            f,
            "ParseException: {}, found {}  (at char {}), (line:1, col:{})",
            self.expected,
            self.found(),
            self.loc,
            self.loc + 1
        )
    }
}

impl std::error::Error for GrammarError {}

/// What went wrong while resolving a document section.
#[derive(Debug, Clone, Error)]
pub enum ResolveErrorKind {
    /// The variable context or an interpolation failed.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// `foreach` did not resolve to a list or a dictionary.
    #[error("expected list/dictionary, got {type_name}")]
    NotIterable {
        /// The type that was found instead.
        type_name: &'static str,
    },

    /// An interpolation appeared where it is not allowed.
    #[error("interpolating is not allowed")]
    InterpolationNotAllowed,

    /// The document has the wrong shape.
    #[error("{0}")]
    InvalidDefinition(String),
}

impl From<ParseError> for ResolveErrorKind {
    fn from(err: ParseError) -> Self {
        Self::Context(ContextError::Parse(err))
    }
}

/// Error raised when a section of the document could not be resolved.
///
/// `location` is already quoted as it should appear in the message, e.g.
/// `'stages.build.cmd'` or `stage 'build@foo'`.
#[derive(Debug, Clone)]
pub struct ResolveError {
    /// Where in the document the failure happened.
    pub location: String,
    /// The document path.
    pub path: String,
    /// The failure itself.
    pub kind: ResolveErrorKind,
}

impl ResolveError {
    /// Creates a new resolve error.
    #[must_use]
    pub fn new(
        location: impl Into<String>,
        path: impl Into<String>,
        kind: impl Into<ResolveErrorKind>,
    ) -> Self {
        Self {
            location: location.into(),
            path: path.into(),
            kind: kind.into(),
        }
    }

    /// Returns the underlying context error, if any.
    #[must_use]
    pub const fn context_error(&self) -> Option<&ContextError> {
        match &self.kind {
            ResolveErrorKind::Context(err) => Some(err),
            _ => None,
        }
    }

    const fn verb(&self) -> &'static str {
        match self.kind {
            ResolveErrorKind::NotIterable { .. } => "resolve",
            _ => "parse",
        }
    }

    const fn separator(&self) -> &'static str {
        match &self.kind {
            ResolveErrorKind::Context(err) if err.is_block() => "\n",
            _ => " ",
        }
    }
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to {} {} in '{}':{}{}",
            self.verb(),
            self.location,
            self.path,
            self.separator(),
            self.kind
        )
    }
}

impl std::error::Error for ResolveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ResolveErrorKind::Context(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grammar_error_layout() {
        let err = GrammarError::new("models.foo.", 10, "Expected end of text");

        assert_eq!(
            err.to_string(),
            "${models.foo.}\n            ^\nParseException: Expected end of text, found '.'  (at char 12), (line:1, col:13)"
        );
    }

    #[test]
    fn test_grammar_error_at_closing_brace() {
        let err = GrammarError::new("", 0, "Expected key");
        assert!(err.to_string().ends_with("found '}'  (at char 2), (line:1, col:3)"));
    }

    #[test]
    fn test_key_not_found_uses_inline_detail() {
        let err = ResolveError::new(
            "'stages.build.cmd'",
            "dvc.yaml",
            ContextError::key_not_in_context("models.foobar"),
        );

        assert_eq!(
            err.to_string(),
            "failed to parse 'stages.build.cmd' in 'dvc.yaml': Could not find 'models.foobar'"
        );
    }

    #[test]
    fn test_grammar_error_uses_block_detail() {
        let grammar = GrammarError::new("a.", 1, "Expected end of text");
        let err = ResolveError::new("'stages.x.cmd'", "dvc.yaml", ParseError::from(grammar));

        assert!(err.to_string().starts_with("failed to parse 'stages.x.cmd' in 'dvc.yaml':\n${a.}"));
    }

    #[test]
    fn test_not_iterable_uses_resolve_verb() {
        let err = ResolveError::new(
            "'stages.build.foreach'",
            "dvc.yaml",
            ResolveErrorKind::NotIterable { type_name: "str" },
        );

        assert_eq!(
            err.to_string(),
            "failed to resolve 'stages.build.foreach' in 'dvc.yaml': expected list/dictionary, got str"
        );
    }

    #[test]
    fn test_reserved_key_message() {
        let single = ContextError::reserved_key(vec!["item".to_string()], None);
        assert_eq!(single.to_string(), "attempted to modify reserved key item");

        let many = ContextError::reserved_key(
            vec!["item".to_string(), "key".to_string()],
            Some("params.yaml".to_string()),
        );
        assert_eq!(
            many.to_string(),
            "attempted to modify reserved keys item, key in 'params.yaml'"
        );
    }

    #[test]
    fn test_field_errors() {
        assert!(ContextError::key_not_in_context("a").is_field_error());
        assert!(!ContextError::merge("a", "conflict").is_field_error());
    }
}
