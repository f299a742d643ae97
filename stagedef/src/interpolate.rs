//! `${...}` interpolation.
//!
//! This module finds tokens in strings, parses their key paths and renders
//! resolved values back into strings. Evaluation against variables lives in
//! [`crate::context::Context::resolve`].

use crate::config::{BoolStyle, ListStyle, ParsingConfig};
use crate::context::node::{is_primitive, type_name};
use crate::errors::{GrammarError, ParseError};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::ops::Range;

/// Field whose dictionaries are rendered as command-line arguments.
pub const CMD_KWD: &str = "cmd";

#[allow(clippy::unwrap_used)]
static KEYCRE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{(?P<inner>.*?)\}").unwrap());

/// An unescaped `${...}` token inside a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    /// Byte range of the whole token, braces included.
    pub span: Range<usize>,
    /// The text between the braces.
    pub inner: &'a str,
}

/// Returns every unescaped token in `template`.
///
/// A token preceded by a backslash (`\${...}`) is literal text.
#[must_use]
pub fn get_matches(template: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut start = 0;

    while let Some(caps) = KEYCRE.captures_at(template, start) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.name("inner")) else {
            break;
        };
        // An escaped `\${` may hide a real token before its `}`; rescan
        // from just past the `$`.
        if template[..whole.start()].ends_with('\\') {
            start = whole.start() + 1;
            continue;
        }
        tokens.push(Token {
            span: whole.range(),
            inner: inner.as_str(),
        });
        start = whole.end();
    }
    tokens
}

/// Returns true if `value` is a string holding at least one token.
#[must_use]
pub fn is_interpolated_string(value: &Value) -> bool {
    matches!(value, Value::String(s) if !get_matches(s).is_empty())
}

/// Returns true if `src` is exactly one token and nothing else.
#[must_use]
pub fn is_exact_string(src: &str, matches: &[Token<'_>]) -> bool {
    matches.len() == 1 && matches[0].span == (0..src.len())
}

/// Wraps a key path in `${` and `}`.
#[must_use]
pub fn embrace(expression: &str) -> String {
    format!("${{{expression}}}")
}

/// Parses a key path and returns it in dotted form.
///
/// The grammar is `word ('.' word | '[' word ']')*` where a word is any run
/// of characters other than `.`, `[` and `]`. `models[foo].bar` becomes
/// `models.foo.bar`.
pub fn parse_expr(expression: &str) -> Result<String, ParseError> {
    let chars: Vec<char> = expression.chars().collect();
    let word_end = |start: usize| {
        let mut end = start;
        while end < chars.len() && !matches!(chars[end], '.' | '[' | ']') {
            end += 1;
        }
        end
    };
    let word = |start: usize, end: usize| chars[start..end].iter().collect::<String>();

    let first_end = word_end(0);
    if first_end == 0 {
        return Err(GrammarError::new(expression, 0, "Expected key").into());
    }
    let mut segments = vec![word(0, first_end)];
    let mut pos = first_end;

    while pos < chars.len() {
        match chars[pos] {
            '.' => {
                let end = word_end(pos + 1);
                if end == pos + 1 {
                    break;
                }
                segments.push(word(pos + 1, end));
                pos = end;
            }
            '[' => {
                let end = word_end(pos + 1);
                if end == pos + 1 || chars.get(end) != Some(&']') {
                    break;
                }
                segments.push(word(pos + 1, end));
                pos = end + 1;
            }
            _ => break,
        }
    }

    if pos < chars.len() {
        return Err(GrammarError::new(expression, pos, "Expected end of text").into());
    }
    Ok(segments.join("."))
}

/// Returns the key path of `token`.
///
/// With `skip_checks` the grammar is not run; bracket access is still
/// normalized into dotted form when it parses.
pub fn get_expression(token: &Token<'_>, skip_checks: bool) -> Result<String, ParseError> {
    if !skip_checks {
        return parse_expr(token.inner);
    }
    if token.inner.contains('[') {
        return Ok(parse_expr(token.inner).unwrap_or_else(|_| token.inner.to_string()));
    }
    Ok(token.inner.to_string())
}

/// Checks that every token in `template` parses.
pub fn check_expression(template: &str) -> Result<(), ParseError> {
    for token in get_matches(template) {
        parse_expr(token.inner)?;
    }
    Ok(())
}

/// Checks every string in `data`, mapping keys included, for syntax errors.
pub fn check_recursive_parse_errors(data: &Value) -> Result<(), ParseError> {
    match data {
        Value::String(s) => check_expression(s),
        Value::Array(items) => items.iter().try_for_each(check_recursive_parse_errors),
        Value::Object(map) => map.iter().try_for_each(|(key, value)| {
            check_expression(key)?;
            check_recursive_parse_errors(value)
        }),
        _ => Ok(()),
    }
}

/// Returns true if any string in `data`, mapping keys included, holds a token.
#[must_use]
pub fn contains_interpolation(data: &Value) -> bool {
    match data {
        Value::String(s) => !get_matches(s).is_empty(),
        Value::Array(items) => items.iter().any(contains_interpolation),
        Value::Object(map) => map
            .iter()
            .any(|(key, value)| !get_matches(key).is_empty() || contains_interpolation(value)),
        _ => false,
    }
}

/// Checks that `value` may be embedded in a larger string of field `key`.
///
/// Only scalars may be embedded, except that dictionaries are allowed in
/// `cmd`, where they are rendered as arguments.
pub fn validate_value(value: &Value, key: Option<&str>) -> Result<(), ParseError> {
    if is_primitive(value) {
        return Ok(());
    }
    if value.is_object() && key == Some(CMD_KWD) {
        return Ok(());
    }
    Err(ParseError::NonPrimitive {
        type_name: type_name(value),
    })
}

/// Renders a scalar as it appears inside an interpolated string.
#[must_use]
pub fn scalar_to_str(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Renders `value` into a string.
///
/// Dictionaries become `--key value` arguments following `config`.
pub fn to_str(value: &Value, config: &ParsingConfig) -> Result<String, ParseError> {
    match value {
        Value::Object(_) => dict_to_args(value, config),
        Value::Array(_) => Err(ParseError::NonPrimitive {
            type_name: type_name(value),
        }),
        scalar => Ok(scalar_to_str(scalar)),
    }
}

fn dict_to_args(value: &Value, config: &ParsingConfig) -> Result<String, ParseError> {
    let mut result = String::new();

    for (key, value) in flatten(value) {
        match value {
            Value::Bool(true) => result.push_str(&format!("--{key} ")),
            Value::Bool(false) => {
                if config.bool == BoolStyle::BooleanOptional {
                    result.push_str(&format!("--no-{key} "));
                }
            }
            Value::String(s) => result.push_str(&format!("--{key} {} ", escape_str(s))),
            Value::Array(items) => {
                for (n, item) in items.iter().enumerate() {
                    let item = match item {
                        Value::String(s) => escape_str(s),
                        Value::Array(_) | Value::Object(_) => {
                            return Err(ParseError::NestedIterable { key });
                        }
                        other => scalar_to_str(other),
                    };
                    if n == 0 || config.list == ListStyle::Append {
                        result.push_str(&format!("--{key} {item} "));
                    } else {
                        result.push_str(&format!("{item} "));
                    }
                }
            }
            other => result.push_str(&format!("--{key} {} ", scalar_to_str(other))),
        }
    }

    Ok(result.trim_end().to_string())
}

/// Flattens nested dictionaries into dotted keys.
fn flatten(value: &Value) -> IndexMap<String, &Value> {
    fn walk<'a>(prefix: Option<&str>, value: &'a Value, out: &mut IndexMap<String, &'a Value>) {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    let path = prefix.map_or_else(|| key.clone(), |p| format!("{p}.{key}"));
                    walk(Some(&path), child, out);
                }
            }
            leaf => {
                if let Some(prefix) = prefix {
                    out.insert(prefix.to_string(), leaf);
                }
            }
        }
    }

    let mut out = IndexMap::new();
    walk(None, value, &mut out);
    out
}

/// Quotes `s` for a POSIX shell when it contains unsafe characters.
#[must_use]
pub fn escape_str(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    let safe = s
        .chars()
        .all(|c| c.is_alphanumeric() || "_@%+=:,./-".contains(c));
    if safe {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r#"'"'"'"#))
}

/// Replaces escaped `\${` with a literal `${`.
#[must_use]
pub fn unescape(s: &str) -> String {
    s.replace(r"\${", "${")
}
