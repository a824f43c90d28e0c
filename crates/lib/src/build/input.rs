//! Typed build-file records.
//!
//! Build files are YAML documents holding a `builds` list. Each entry maps onto
//! [`BuildInput`]; unknown keys are rejected by the deserializer and the rest
//! of the checks live in [`BuildInput::validate`], a pure function.
//!
//! ```yaml
//! builds:
//!   - app: demo
//!     version: "1.0"
//!     source: { type: directory, path: ./src/demo }
//!     profile: ubuntu-trusty
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::build::source::Source;
use crate::build::spec::{BuildError, BuildSpec};

/// Errors from loading or validating build configuration.
#[derive(Debug, Error)]
pub enum ConfigurationError {
  #[error("missing required field '{0}'")]
  MissingField(&'static str),

  #[error("invalid source: {0}")]
  InvalidSource(String),

  #[error("failed to parse build file: {0}")]
  Parse(#[from] serde_yaml::Error),

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("build #{index}: {source}")]
  Entry {
    index: usize,
    #[source]
    source: Box<ConfigurationError>,
  },

  #[error(transparent)]
  Build(#[from] BuildError),
}

/// One entry of a build file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildInput {
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub app: String,
  #[serde(default, deserialize_with = "scalar_string")]
  pub version: String,
  #[serde(default)]
  pub source: Option<Source>,
  #[serde(default)]
  pub profile: String,
  #[serde(default)]
  pub working_dir: Option<String>,
  #[serde(default)]
  pub requirements_path: Option<String>,
  #[serde(default)]
  pub build_deps: Vec<String>,
  #[serde(default)]
  pub runtime_deps: Vec<String>,
  #[serde(default)]
  pub fpm_args: String,
  #[serde(default)]
  pub pip_args: String,
  #[serde(default)]
  pub custom_filename: Option<String>,
  #[serde(default)]
  pub package_install_root: Option<String>,
  #[serde(default)]
  pub package_tmp_root: Option<String>,
  #[serde(default)]
  pub compile_python: Option<bool>,
  #[serde(default)]
  pub python_version: Option<String>,
  #[serde(default)]
  pub python_basedir: Option<String>,
  #[serde(default)]
  pub use_local_pip_conf: bool,
}

impl BuildInput {
  /// Check required fields and the source descriptor.
  pub fn validate(&self) -> Result<(), ConfigurationError> {
    if self.app.trim().is_empty() {
      return Err(ConfigurationError::MissingField("app"));
    }
    if self.version.trim().is_empty() {
      return Err(ConfigurationError::MissingField("version"));
    }
    if self.profile.trim().is_empty() {
      return Err(ConfigurationError::MissingField("profile"));
    }

    match &self.source {
      None => Err(ConfigurationError::MissingField("source")),
      Some(Source::Git { uri, branch }) => {
        if uri.trim().is_empty() {
          Err(ConfigurationError::InvalidSource("git source has an empty uri".into()))
        } else if branch.trim().is_empty() {
          Err(ConfigurationError::InvalidSource("git source has an empty branch".into()))
        } else {
          Ok(())
        }
      }
      Some(Source::Directory { path }) | Some(Source::GitDirectory { path, .. }) if path.as_os_str().is_empty() => {
        Err(ConfigurationError::InvalidSource("directory source has an empty path".into()))
      }
      Some(_) => Ok(()),
    }
  }

  /// Validate, then build the spec (resolving environment references).
  pub fn into_spec(self) -> Result<BuildSpec, ConfigurationError> {
    self.validate()?;

    let source = self.source.ok_or(ConfigurationError::MissingField("source"))?;
    let mut builder = BuildSpec::builder(self.app, self.version, source, self.profile)
      .build_deps(self.build_deps)
      .runtime_deps(self.runtime_deps)
      .fpm_args(self.fpm_args)
      .pip_args(self.pip_args)
      .use_local_pip_conf(self.use_local_pip_conf);

    if let Some(name) = self.name {
      builder = builder.name(name);
    }
    if let Some(dir) = self.working_dir {
      builder = builder.working_dir(dir);
    }
    if let Some(path) = self.requirements_path {
      builder = builder.requirements_path(path);
    }
    if let Some(filename) = self.custom_filename {
      builder = builder.custom_filename(filename);
    }
    if let Some(root) = self.package_install_root {
      builder = builder.package_install_root(root);
    }
    if let Some(root) = self.package_tmp_root {
      builder = builder.package_tmp_root(root);
    }
    if let Some(compile) = self.compile_python {
      builder = builder.compile_python(compile);
    }
    if let Some(version) = self.python_version {
      builder = builder.python_version(version);
    }
    if let Some(dir) = self.python_basedir {
      builder = builder.python_basedir(dir);
    }

    Ok(builder.build()?)
  }

  fn resolve_relative_source(&mut self, base: &Path) {
    if let Some(Source::Directory { path } | Source::GitDirectory { path, .. }) = &mut self.source {
      if path.is_relative() {
        *path = base.join(&*path);
      }
    }
  }
}

/// A whole build file: the list of builds submitted as one batch.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildFile {
  #[serde(default)]
  pub builds: Vec<BuildInput>,
}

impl BuildFile {
  pub fn from_yaml_str(content: &str) -> Result<Self, ConfigurationError> {
    Ok(serde_yaml::from_str(content)?)
  }

  /// Read a build file. Relative local source paths are resolved against the
  /// directory containing the file.
  pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let mut file = Self::from_yaml_str(&content)?;

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    for build in &mut file.builds {
      build.resolve_relative_source(base);
    }
    Ok(file)
  }

  /// Convert every entry, failing on the first invalid one.
  pub fn into_specs(self) -> Result<Vec<BuildSpec>, ConfigurationError> {
    self
      .builds
      .into_iter()
      .enumerate()
      .map(|(index, input)| {
        input.into_spec().map_err(|e| ConfigurationError::Entry {
          index,
          source: Box::new(e),
        })
      })
      .collect()
  }
}

/// Accept quoted or bare scalars so `version: 1.0` works like `version: "1.0"`.
///
/// Bare floats lose trailing zeros beyond the first (`1.10` reads as `1.1`);
/// quote such versions.
fn scalar_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Scalar {
    Text(String),
    Int(i64),
    Float(f64),
  }

  Ok(match Scalar::deserialize(deserializer)? {
    Scalar::Text(s) => s,
    Scalar::Int(i) => i.to_string(),
    Scalar::Float(f) if f.fract() == 0.0 => format!("{f:.1}"),
    Scalar::Float(f) => f.to_string(),
  })
}
