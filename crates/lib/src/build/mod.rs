//! Build request data model.
//!
//! A [`BuildSpec`] is the immutable description of one package build: which
//! application and version, where the sources come from, and which profile
//! (container image + script template) produces the package.
//!
//! # Submodules
//!
//! - [`env`] - `${NAME}` interpolation applied once at construction
//! - [`input`] - typed configuration record deserialized from build files

pub mod env;
pub mod input;
mod source;
mod spec;

pub use input::{BuildFile, BuildInput, ConfigurationError};
pub use source::Source;
pub use spec::{BuildError, BuildSpec, BuildSpecBuilder, safe_dirname};
