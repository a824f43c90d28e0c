//! Per-build workspace staging.
//!
//! Each build gets `<base>/<safe_dirname>/` with a `scratch/` subdirectory
//! holding the generated script and every local input the container needs.
//! The build root is the only host path mounted into the container.
//!
//! ## Layout
//!
//! ```text
//! <base>/
//!   demo-1.0-ubuntu-trusty/
//!     scratch/
//!       buildscript.sh
//!       .pip/            (use_local_pip_conf)
//!       demo/            (directory / git_directory sources)
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::build::BuildSpec;
use crate::consts::{BUILD_SCRIPT_NAME, PIP_CONF_DIR, SCRATCH_DIR, SCRIPT_MODE};
use crate::platform::paths;

/// Errors from staging a workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
  #[error("source path does not exist: {0}")]
  MissingSource(PathBuf),

  #[error("package-manager credentials not found: {0}")]
  MissingCredentials(PathBuf),

  #[error("refusing to reset unsafe base directory: {0}")]
  UnsafeBaseDir(PathBuf),

  #[error("failed to traverse {path}: {source}")]
  WalkDir {
    path: PathBuf,
    #[source]
    source: walkdir::Error,
  },

  #[error("I/O error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> WorkspaceError + '_ {
  move |source| WorkspaceError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// A staged build root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
  pub root: PathBuf,
  pub scratch: PathBuf,
  pub script_path: PathBuf,
}

/// Materializes build roots under one base directory.
#[derive(Debug, Clone)]
pub struct WorkspaceStager {
  base_dir: PathBuf,
  home_dir: PathBuf,
  script_mode: u32,
}

impl WorkspaceStager {
  pub fn new(base_dir: impl Into<PathBuf>) -> Self {
    Self {
      base_dir: base_dir.into(),
      home_dir: paths::home_dir(),
      script_mode: SCRIPT_MODE,
    }
  }

  /// Permission bits applied to the generated script (unix only).
  pub fn with_script_mode(mut self, mode: u32) -> Self {
    self.script_mode = mode;
    self
  }

  /// Home directory credentials are copied from.
  pub fn with_home_dir(mut self, home: impl Into<PathBuf>) -> Self {
    self.home_dir = home.into();
    self
  }

  pub fn base_dir(&self) -> &Path {
    &self.base_dir
  }

  /// Remove and recreate the base directory. Called once per batch.
  pub fn reset_base_dir(&self) -> Result<(), WorkspaceError> {
    let base = &self.base_dir;
    if base.as_os_str().is_empty() || base.parent().is_none() || *base == self.home_dir {
      return Err(WorkspaceError::UnsafeBaseDir(base.clone()));
    }

    if base.exists() {
      debug!(path = %base.display(), "removing stale base directory");
      fs::remove_dir_all(base).map_err(io_err(base))?;
    }
    fs::create_dir_all(base).map_err(io_err(base))?;
    info!(path = %base.display(), "reset output base directory");
    Ok(())
  }

  /// Root directory of `spec`'s workspace.
  pub fn build_root(&self, spec: &BuildSpec) -> PathBuf {
    self.base_dir.join(spec.safe_dirname())
  }

  /// Stage a fresh workspace for `spec` holding `script`.
  ///
  /// Any previous workspace for the same safe name is deleted first.
  pub fn stage(&self, spec: &BuildSpec, script: &str) -> Result<Workspace, WorkspaceError> {
    let root = self.build_root(spec);
    let scratch = root.join(SCRATCH_DIR);

    if root.exists() {
      debug!(build = %spec.label(), path = %root.display(), "removing stale build root");
      fs::remove_dir_all(&root).map_err(io_err(&root))?;
    }
    fs::create_dir_all(&scratch).map_err(io_err(&scratch))?;

    let script_path = scratch.join(BUILD_SCRIPT_NAME);
    fs::write(&script_path, script).map_err(io_err(&script_path))?;
    set_mode(&script_path, self.script_mode)?;

    if spec.use_local_pip_conf() {
      let credentials = self.home_dir.join(PIP_CONF_DIR);
      if !credentials.is_dir() {
        return Err(WorkspaceError::MissingCredentials(credentials));
      }
      copy_dir(&credentials, &scratch.join(PIP_CONF_DIR))?;
      debug!(build = %spec.label(), "staged package-manager credentials");
    }

    if let Some(source) = spec.source().local_path() {
      if !source.exists() {
        return Err(WorkspaceError::MissingSource(source.to_path_buf()));
      }
      let dest = scratch.join(spec.project_root());
      copy_dir(source, &dest)?;
      debug!(build = %spec.label(), from = %source.display(), "staged local source");
    }

    info!(build = %spec.label(), root = %root.display(), "workspace staged");
    Ok(Workspace {
      root,
      scratch,
      script_path,
    })
  }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), WorkspaceError> {
  use std::os::unix::fs::PermissionsExt;
  fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(io_err(path))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), WorkspaceError> {
  Ok(())
}

/// Recursively copy `src` to `dest`. Symlinks are recreated, not followed.
fn copy_dir(src: &Path, dest: &Path) -> Result<(), WorkspaceError> {
  for entry in WalkDir::new(src).follow_links(false) {
    let entry = entry.map_err(|e| WorkspaceError::WalkDir {
      path: src.to_path_buf(),
      source: e,
    })?;
    let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
    let target = dest.join(relative);
    let file_type = entry.file_type();

    if file_type.is_dir() {
      fs::create_dir_all(&target).map_err(io_err(&target))?;
    } else if file_type.is_symlink() {
      copy_symlink(entry.path(), &target)?;
    } else {
      fs::copy(entry.path(), &target).map_err(io_err(&target))?;
    }
  }
  Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> Result<(), WorkspaceError> {
  let pointee = fs::read_link(link).map_err(io_err(link))?;
  std::os::unix::fs::symlink(pointee, target).map_err(io_err(target))
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> Result<(), WorkspaceError> {
  fs::copy(link, target).map(|_| ()).map_err(io_err(target))
}
