use std::collections::BTreeMap;

use crate::build::{BuildSpec, Source};
use crate::consts::{SCRATCH_DIR, SHARED_DIR};
use crate::platform::HostIds;

/// A value bound to a template variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateValue {
  Text(String),
  List(Vec<String>),
  Flag(bool),
}

impl TemplateValue {
  pub fn is_truthy(&self) -> bool {
    match self {
      TemplateValue::Text(s) => !s.is_empty(),
      TemplateValue::List(items) => !items.is_empty(),
      TemplateValue::Flag(b) => *b,
    }
  }

  /// Text form substituted by `{{ name }}`.
  pub fn render(&self) -> String {
    match self {
      TemplateValue::Text(s) => s.clone(),
      TemplateValue::List(items) => items.join(" "),
      TemplateValue::Flag(b) => b.to_string(),
    }
  }
}

impl From<&str> for TemplateValue {
  fn from(value: &str) -> Self {
    TemplateValue::Text(value.to_string())
  }
}

impl From<String> for TemplateValue {
  fn from(value: String) -> Self {
    TemplateValue::Text(value)
  }
}

impl From<bool> for TemplateValue {
  fn from(value: bool) -> Self {
    TemplateValue::Flag(value)
  }
}

impl From<Vec<String>> for TemplateValue {
  fn from(value: Vec<String>) -> Self {
    TemplateValue::List(value)
  }
}

/// Values shared by every build of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedContext {
  pub uid: u32,
  pub gid: u32,
  /// In-container mount point of the build root.
  pub shared_dir: String,
  /// Name of the scratch directory under the build root.
  pub scratch_dir: String,
}

impl SharedContext {
  /// Context for the invoking user, mounting at `shared_dir`.
  pub fn new(shared_dir: impl Into<String>) -> Self {
    let ids = HostIds::current();
    Self {
      uid: ids.uid,
      gid: ids.gid,
      shared_dir: shared_dir.into(),
      scratch_dir: SCRATCH_DIR.to_string(),
    }
  }

  pub fn with_ids(mut self, uid: u32, gid: u32) -> Self {
    self.uid = uid;
    self.gid = gid;
    self
  }

  /// In-container path of the scratch directory.
  pub fn container_scratch_path(&self) -> String {
    format!("{}/{}", self.shared_dir.trim_end_matches('/'), self.scratch_dir)
  }
}

impl Default for SharedContext {
  fn default() -> Self {
    Self::new(SHARED_DIR)
  }
}

/// Variables available to a build-script template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderContext {
  values: BTreeMap<String, TemplateValue>,
}

impl RenderContext {
  pub fn new(spec: &BuildSpec, shared: &SharedContext) -> Self {
    let (git_url, branch) = match spec.source() {
      Source::Git { uri, branch } => (uri.clone(), branch.clone()),
      Source::GitDirectory { branch, .. } => (String::new(), branch.clone()),
      Source::Directory { .. } => (String::new(), String::new()),
    };

    let mut ctx = Self::default();
    ctx
      .insert("app", spec.app())
      .insert("version", spec.version())
      .insert("build_deps", spec.build_deps().to_vec())
      .insert("runtime_deps", spec.runtime_deps().to_vec())
      .insert("fpm_args", spec.fpm_args())
      .insert("pip_args", spec.pip_args())
      .insert("project_root", spec.project_root())
      .insert("working_dir", spec.working_dir())
      .insert("python_basedir", spec.python_basedir())
      .insert("compile_python", spec.compile_python())
      .insert("python_version", spec.python_version())
      .insert("requirements_path", spec.requirements_path())
      .insert("package_build_root", spec.package_install_root())
      .insert("package_tmp_root", spec.package_tmp_root())
      .insert("shared_dir", shared.shared_dir.as_str())
      .insert("scratch_dir", shared.container_scratch_path())
      .insert("local_uid", shared.uid.to_string())
      .insert("local_gid", shared.gid.to_string())
      .insert("source_type", spec.source().kind())
      .insert("git_url", git_url)
      .insert("branch", branch)
      .insert("custom_filename", spec.custom_filename().unwrap_or_default())
      .insert("use_local_pip_conf", spec.use_local_pip_conf());
    ctx
  }

  /// Bind or rebind a variable.
  pub fn insert(&mut self, name: impl Into<String>, value: impl Into<TemplateValue>) -> &mut Self {
    self.values.insert(name.into(), value.into());
    self
  }

  pub fn get(&self, name: &str) -> Option<&TemplateValue> {
    self.values.get(name)
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.values.keys().map(String::as_str)
  }
}
