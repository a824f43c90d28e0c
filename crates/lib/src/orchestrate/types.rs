//! Configuration, error and result types for batch execution.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::consts::{LOCAL_PROFILES_FILE, LOCAL_TEMPLATES_DIR, SCRIPT_MODE, SHARED_DIR};
use crate::engine::RegistryCredentials;
use crate::machine::MachineError;
use crate::platform::paths;
use crate::profile::ProfileError;
use crate::template::TemplateError;
use crate::workspace::WorkspaceError;

/// Errors that abort a whole batch before any build starts.
#[derive(Debug, Error)]
pub enum OrchestrateError {
  #[error("no builds queued")]
  NoBuildsFound,

  #[error("failed to load profiles: {0}")]
  Profile(#[from] ProfileError),

  #[error("failed to prepare output directory: {0}")]
  Workspace(#[from] WorkspaceError),

  #[error("batch cancelled before start")]
  Cancelled,
}

/// Errors confined to a single build.
#[derive(Debug, Error)]
pub enum UnitError {
  #[error(transparent)]
  Profile(#[from] ProfileError),

  #[error(transparent)]
  Template(#[from] TemplateError),

  #[error(transparent)]
  Workspace(#[from] WorkspaceError),

  #[error(transparent)]
  Machine(#[from] MachineError),

  #[error("build task panicked: {0}")]
  Panicked(String),

  #[error("staging task failed: {0}")]
  Join(String),
}

impl UnitError {
  pub fn is_cancelled(&self) -> bool {
    matches!(self, UnitError::Machine(MachineError::Cancelled))
  }
}

/// Final state of one build.
#[derive(Debug)]
pub enum BuildStatus {
  /// The container ran to completion.
  Completed {
    container_id: String,
    exit_code: Option<i64>,
  },
  Failed(UnitError),
}

/// Result of one build in a batch.
#[derive(Debug)]
pub struct BuildOutcome {
  /// Position of the build in submission order.
  pub index: usize,
  pub label: String,
  pub profile: String,
  /// Build root; artifacts land here.
  pub build_dir: PathBuf,
  pub status: BuildStatus,
  pub elapsed: Duration,
}

impl BuildOutcome {
  pub fn is_success(&self) -> bool {
    match &self.status {
      BuildStatus::Completed { exit_code, .. } => exit_code.is_none_or(|code| code == 0),
      BuildStatus::Failed(_) => false,
    }
  }

  pub fn error(&self) -> Option<&UnitError> {
    match &self.status {
      BuildStatus::Failed(e) => Some(e),
      BuildStatus::Completed { .. } => None,
    }
  }
}

/// Per-build outcomes of a batch, in submission order.
#[derive(Debug, Default)]
pub struct BatchReport {
  pub outcomes: Vec<BuildOutcome>,
  pub elapsed: Duration,
}

impl BatchReport {
  /// True when every build completed with a zero (or unknown) exit status.
  pub fn is_success(&self) -> bool {
    self.outcomes.iter().all(BuildOutcome::is_success)
  }

  pub fn total(&self) -> usize {
    self.outcomes.len()
  }

  pub fn succeeded(&self) -> usize {
    self.outcomes.iter().filter(|o| o.is_success()).count()
  }

  pub fn failed(&self) -> impl Iterator<Item = &BuildOutcome> {
    self.outcomes.iter().filter(|o| !o.is_success())
  }
}

/// Configuration for a [`Builder`](super::Builder).
#[derive(Debug, Clone)]
pub struct BuilderConfig {
  /// Directory receiving one subdirectory per build. Reset at the start of
  /// every batch.
  pub base_dir: PathBuf,

  /// Profile catalog merged over the built-in one, if it exists.
  pub local_profiles: Option<PathBuf>,

  /// Directory searched for templates before the built-in set.
  pub local_templates: Option<PathBuf>,

  /// In-container mount point of each build root.
  pub shared_dir: String,

  /// Maximum number of builds running at once. `0`, the default, means no limit.
  pub parallelism: usize,

  /// Treat a nonzero script exit status as a failed build.
  pub enforce_exit_status: bool,

  /// Permission bits of the generated build script.
  pub script_mode: u32,

  /// Home directory package-manager credentials are read from.
  pub home_dir: PathBuf,

  pub registry_credentials: Option<RegistryCredentials>,
}

impl Default for BuilderConfig {
  fn default() -> Self {
    let config_dir = paths::config_dir();
    Self {
      base_dir: paths::dist_dir(),
      local_profiles: Some(config_dir.join(LOCAL_PROFILES_FILE)),
      local_templates: Some(config_dir.join(LOCAL_TEMPLATES_DIR)),
      shared_dir: SHARED_DIR.to_string(),
      parallelism: 0,
      enforce_exit_status: false,
      script_mode: SCRIPT_MODE,
      home_dir: paths::home_dir(),
      registry_credentials: None,
    }
  }
}

impl BuilderConfig {
  /// Defaults with a specific output base directory.
  pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
    Self {
      base_dir: base_dir.into(),
      ..Self::default()
    }
  }

  /// Permits for the concurrency gate given `pending` queued builds.
  pub(crate) fn permits(&self, pending: usize) -> usize {
    if self.parallelism == 0 {
      pending.max(1)
    } else {
      self.parallelism
    }
  }
}
