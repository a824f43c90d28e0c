use std::fmt;

use thiserror::Error;

use crate::build::env::{self, EnvError};
use crate::build::source::Source;
use crate::consts::{
  COMPILED_PYTHON_BASEDIR, DEFAULT_REQUIREMENTS_PATH, PACKAGE_BUILD_ROOT, PACKAGE_TMP_BUILD_ROOT, PYTHON_VERSION,
  SYSTEM_PYTHON_BASEDIR,
};

/// Errors raised while constructing a [`BuildSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
  /// A field referenced an environment variable that is not set.
  #[error("{field}: environment variable '{name}' is not set")]
  MissingVariable { field: &'static str, name: String },

  /// A field contained a malformed environment reference.
  #[error("{field}: {source}")]
  Interpolation {
    field: &'static str,
    #[source]
    source: EnvError,
  },
}

/// Immutable description of one package-build request.
///
/// Constructed through [`BuildSpec::builder`]; environment references in the
/// version are resolved exactly once, when the builder finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSpec {
  pub(crate) name: Option<String>,
  pub(crate) app: String,
  pub(crate) version: String,
  pub(crate) source: Source,
  pub(crate) profile: String,
  pub(crate) working_dir: String,
  pub(crate) requirements_path: String,
  pub(crate) build_deps: Vec<String>,
  pub(crate) runtime_deps: Vec<String>,
  pub(crate) fpm_args: String,
  pub(crate) pip_args: String,
  pub(crate) custom_filename: Option<String>,
  pub(crate) package_install_root: String,
  pub(crate) package_tmp_root: String,
  pub(crate) compile_python: bool,
  pub(crate) python_version: String,
  pub(crate) python_basedir: String,
  pub(crate) use_local_pip_conf: bool,
  pub(crate) safe_name: String,
}

impl BuildSpec {
  /// Start describing a build of `app` at `version` for `profile`.
  pub fn builder(
    app: impl Into<String>,
    version: impl Into<String>,
    source: Source,
    profile: impl Into<String>,
  ) -> BuildSpecBuilder {
    BuildSpecBuilder::new(app.into(), version.into(), source, profile.into())
  }

  /// Label used in log lines: the explicit name, or the safe name.
  pub fn label(&self) -> &str {
    self.name.as_deref().unwrap_or(&self.safe_name)
  }

  pub fn name(&self) -> Option<&str> {
    self.name.as_deref()
  }

  pub fn app(&self) -> &str {
    &self.app
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn source(&self) -> &Source {
    &self.source
  }

  pub fn profile(&self) -> &str {
    &self.profile
  }

  pub fn working_dir(&self) -> &str {
    &self.working_dir
  }

  pub fn requirements_path(&self) -> &str {
    &self.requirements_path
  }

  pub fn build_deps(&self) -> &[String] {
    &self.build_deps
  }

  pub fn runtime_deps(&self) -> &[String] {
    &self.runtime_deps
  }

  pub fn fpm_args(&self) -> &str {
    &self.fpm_args
  }

  pub fn pip_args(&self) -> &str {
    &self.pip_args
  }

  pub fn custom_filename(&self) -> Option<&str> {
    self.custom_filename.as_deref()
  }

  pub fn package_install_root(&self) -> &str {
    &self.package_install_root
  }

  pub fn package_tmp_root(&self) -> &str {
    &self.package_tmp_root
  }

  pub fn compile_python(&self) -> bool {
    self.compile_python
  }

  pub fn python_version(&self) -> &str {
    &self.python_version
  }

  pub fn python_basedir(&self) -> &str {
    &self.python_basedir
  }

  pub fn use_local_pip_conf(&self) -> bool {
    self.use_local_pip_conf
  }

  /// Name of the per-build directory under the output base directory.
  pub fn safe_dirname(&self) -> &str {
    &self.safe_name
  }

  /// Directory name the project sources live in, derived from the source.
  pub fn project_root(&self) -> String {
    self.source.project_root()
  }
}

impl fmt::Display for BuildSpec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} {} ({}, source: {})",
      self.app,
      self.version,
      self.profile,
      self.source.kind()
    )
  }
}

/// Join app, version and profile with `-`, replacing every character outside
/// `[A-Za-z0-9.-]` with `_`.
///
/// Distinct inputs can map to the same name; callers that need unique
/// directories must choose distinguishing app names.
pub fn safe_dirname(app: &str, version: &str, profile: &str) -> String {
  format!("{app}-{version}-{profile}")
    .chars()
    .map(|c| {
      if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
        c
      } else {
        '_'
      }
    })
    .collect()
}

/// Builder for [`BuildSpec`].
#[derive(Debug, Clone)]
pub struct BuildSpecBuilder {
  name: Option<String>,
  app: String,
  version: String,
  source: Source,
  profile: String,
  working_dir: String,
  requirements_path: String,
  build_deps: Vec<String>,
  runtime_deps: Vec<String>,
  fpm_args: String,
  pip_args: String,
  custom_filename: Option<String>,
  package_install_root: String,
  package_tmp_root: String,
  compile_python: bool,
  python_version: String,
  python_basedir: Option<String>,
  use_local_pip_conf: bool,
}

impl BuildSpecBuilder {
  fn new(app: String, version: String, source: Source, profile: String) -> Self {
    Self {
      name: None,
      app,
      version,
      source,
      profile,
      working_dir: String::new(),
      requirements_path: DEFAULT_REQUIREMENTS_PATH.to_string(),
      build_deps: Vec::new(),
      runtime_deps: Vec::new(),
      fpm_args: String::new(),
      pip_args: String::new(),
      custom_filename: None,
      package_install_root: PACKAGE_BUILD_ROOT.to_string(),
      package_tmp_root: PACKAGE_TMP_BUILD_ROOT.to_string(),
      compile_python: true,
      python_version: PYTHON_VERSION.to_string(),
      python_basedir: None,
      use_local_pip_conf: false,
    }
  }

  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
    self.working_dir = dir.into();
    self
  }

  pub fn requirements_path(mut self, path: impl Into<String>) -> Self {
    self.requirements_path = path.into();
    self
  }

  pub fn build_deps<I, S>(mut self, deps: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.build_deps = deps.into_iter().map(Into::into).collect();
    self
  }

  pub fn runtime_deps<I, S>(mut self, deps: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.runtime_deps = deps.into_iter().map(Into::into).collect();
    self
  }

  pub fn fpm_args(mut self, args: impl Into<String>) -> Self {
    self.fpm_args = args.into();
    self
  }

  pub fn pip_args(mut self, args: impl Into<String>) -> Self {
    self.pip_args = args.into();
    self
  }

  pub fn custom_filename(mut self, filename: impl Into<String>) -> Self {
    self.custom_filename = Some(filename.into());
    self
  }

  pub fn package_install_root(mut self, root: impl Into<String>) -> Self {
    self.package_install_root = root.into();
    self
  }

  pub fn package_tmp_root(mut self, root: impl Into<String>) -> Self {
    self.package_tmp_root = root.into();
    self
  }

  pub fn compile_python(mut self, compile: bool) -> Self {
    self.compile_python = compile;
    self
  }

  pub fn python_version(mut self, version: impl Into<String>) -> Self {
    self.python_version = version.into();
    self
  }

  pub fn python_basedir(mut self, dir: impl Into<String>) -> Self {
    self.python_basedir = Some(dir.into());
    self
  }

  pub fn use_local_pip_conf(mut self, enabled: bool) -> Self {
    self.use_local_pip_conf = enabled;
    self
  }

  /// Finish the spec, resolving environment references against the current
  /// process environment.
  pub fn build(self) -> Result<BuildSpec, BuildError> {
    self.build_with(|name| std::env::var(name).ok())
  }

  /// Finish the spec with a caller-supplied environment lookup.
  pub fn build_with<F>(self, lookup: F) -> Result<BuildSpec, BuildError>
  where
    F: Fn(&str) -> Option<String>,
  {
    let version = env::interpolate_with(&self.version, &lookup).map_err(|e| match e {
      EnvError::MissingVariable(name) => BuildError::MissingVariable {
        field: "version",
        name,
      },
      other => BuildError::Interpolation {
        field: "version",
        source: other,
      },
    })?;

    let python_basedir = self.python_basedir.unwrap_or_else(|| {
      if self.compile_python {
        COMPILED_PYTHON_BASEDIR.to_string()
      } else {
        SYSTEM_PYTHON_BASEDIR.to_string()
      }
    });

    let safe_name = safe_dirname(&self.app, &version, &self.profile);

    Ok(BuildSpec {
      name: self.name,
      app: self.app,
      version,
      source: self.source.normalized(),
      profile: self.profile,
      working_dir: self.working_dir,
      requirements_path: self.requirements_path,
      build_deps: self.build_deps,
      runtime_deps: self.runtime_deps,
      fpm_args: self.fpm_args,
      pip_args: self.pip_args,
      custom_filename: self.custom_filename,
      package_install_root: self.package_install_root,
      package_tmp_root: self.package_tmp_root,
      compile_python: self.compile_python,
      python_version: self.python_version,
      python_basedir,
      use_local_pip_conf: self.use_local_pip_conf,
      safe_name,
    })
  }
}
