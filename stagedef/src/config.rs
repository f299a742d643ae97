//! Parsing configuration.
//!
//! Controls how a dictionary interpolated into `cmd` is rendered as
//! command-line arguments.

use serde::{Deserialize, Serialize};

/// How boolean values are rendered into command arguments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoolStyle {
    /// `--flag` when true, nothing when false.
    #[default]
    StoreTrue,
    /// `--flag` when true, `--no-flag` when false.
    BooleanOptional,
}

/// How list values are rendered into command arguments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListStyle {
    /// `--key a b c`
    #[default]
    Nargs,
    /// `--key a --key b --key c`
    Append,
}

/// Configuration for the `parsing` section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsingConfig {
    /// Boolean rendering style.
    pub bool: BoolStyle,
    /// List rendering style.
    pub list: ListStyle,
}

impl ParsingConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the boolean style.
    #[must_use]
    pub fn with_bool(mut self, style: BoolStyle) -> Self {
        self.bool = style;
        self
    }

    /// Sets the list style.
    #[must_use]
    pub fn with_list(mut self, style: ListStyle) -> Self {
        self.list = style;
        self
    }

    /// Reads the configuration from a `parsing` section.
    ///
    /// Missing fields fall back to their defaults.
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}
