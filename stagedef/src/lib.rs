//! # Stagedef
//!
//! Variable interpolation and `foreach` expansion for declarative pipeline
//! stage definitions.
//!
//! A pipeline document declares variables (`vars`, plus an optional
//! `params.yaml`) and stages whose fields may reference them:
//!
//! - **Interpolation**: `${models.us.thresh}` inside a string is replaced by
//!   the variable's value; a string that is exactly one token takes the
//!   value whatever its type
//! - **Templates**: a stage with `foreach` and `do` generates one stage per
//!   element, addressed as `<name>@<key>`, with `item` and `key` bound
//! - **Provenance**: every resolved stage records which variables it read
//!   and which file they came from
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagedef::prelude::*;
//! use serde_json::json;
//!
//! let document = json!({
//!     "stages": {
//!         "build": {
//!             "foreach": ["us", "gb"],
//!             "do": {"cmd": "python train.py --region ${item}"}
//!         }
//!     }
//! });
//!
//! let mut resolver = DataResolver::new(&LocalFileSystem::new(), ".", &document)?;
//! let stage = resolver.resolve_one("build@us")?;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, missing_docs, rust_2018_idioms)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod context;
pub mod definition;
pub mod errors;
pub mod fs;
pub mod interpolate;
pub mod resolver;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{BoolStyle, ListStyle, ParsingConfig};
    pub use crate::context::{Context, Meta, Node, TrackedVars};
    pub use crate::definition::{
        make_definition, Definition, EntryDefinition, ForeachDefinition, IterationPair,
        ResolvedStage,
    };
    pub use crate::errors::{
        ContextError, EntryNotFoundError, ParseError, ParsingError, ResolveError,
        ResolveErrorKind,
    };
    pub use crate::fs::{FileSystem, LocalFileSystem};
    pub use crate::resolver::DataResolver;
}

pub use errors::{ParsingError, ResolveError};
pub use resolver::DataResolver;
