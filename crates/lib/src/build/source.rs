use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::consts::DEFAULT_BRANCH;

/// Where the sources of a build come from.
///
/// Acquisition itself happens elsewhere: a `Git` source is cloned by the build
/// script inside the container, while `Directory` and `GitDirectory` sources
/// are copied into the workspace by the stager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Source {
  /// Remote repository cloned inside the container.
  Git {
    uri: String,
    #[serde(default = "default_branch")]
    branch: String,
  },

  /// Plain local directory.
  Directory { path: PathBuf },

  /// Local checkout of a repository; the script switches to `branch`.
  GitDirectory {
    path: PathBuf,
    #[serde(default = "default_branch")]
    branch: String,
  },
}

fn default_branch() -> String {
  DEFAULT_BRANCH.to_string()
}

impl Source {
  /// Remote repository source. A trailing `.git` is dropped from the URI.
  pub fn git(uri: impl Into<String>, branch: impl Into<String>) -> Self {
    Source::Git {
      uri: uri.into(),
      branch: branch.into(),
    }
    .normalized()
  }

  /// Local directory source. Trailing separators and `.`/`..` components are
  /// resolved lexically, so the path always ends in a real directory name.
  pub fn directory(path: impl Into<PathBuf>) -> Self {
    Source::Directory { path: path.into() }.normalized()
  }

  /// Local repository checkout source, normalised like [`Source::directory`].
  pub fn git_directory(path: impl Into<PathBuf>, branch: impl Into<String>) -> Self {
    Source::GitDirectory {
      path: path.into(),
      branch: branch.into(),
    }
    .normalized()
  }

  /// Apply the constructor normalisation to a deserialized value.
  pub fn normalized(self) -> Self {
    match self {
      Source::Git { uri, branch } => {
        let uri = uri.trim_end_matches('/');
        let uri = uri.strip_suffix(".git").unwrap_or(uri).to_string();
        Source::Git { uri, branch }
      }
      Source::Directory { path } => Source::Directory {
        path: normalize_path(&path),
      },
      Source::GitDirectory { path, branch } => Source::GitDirectory {
        path: normalize_path(&path),
        branch,
      },
    }
  }

  /// Short tag of the variant, as written in build files.
  pub fn kind(&self) -> &'static str {
    match self {
      Source::Git { .. } => "git",
      Source::Directory { .. } => "directory",
      Source::GitDirectory { .. } => "git_directory",
    }
  }

  /// Local path to stage into the workspace, if any.
  pub fn local_path(&self) -> Option<&Path> {
    match self {
      Source::Git { .. } => None,
      Source::Directory { path } | Source::GitDirectory { path, .. } => Some(path),
    }
  }

  pub fn uri(&self) -> Option<&str> {
    match self {
      Source::Git { uri, .. } => Some(uri),
      _ => None,
    }
  }

  pub fn branch(&self) -> Option<&str> {
    match self {
      Source::Git { branch, .. } | Source::GitDirectory { branch, .. } => Some(branch),
      Source::Directory { .. } => None,
    }
  }

  /// Name of the project directory the sources end up in.
  ///
  /// This is the last component of the URI or path, ignoring trailing
  /// separators, so `/foo/bar/` and `/foo/bar` both yield `bar`.
  pub fn project_root(&self) -> String {
    match self {
      Source::Git { uri, .. } => last_component(uri),
      Source::Directory { path } | Source::GitDirectory { path, .. } => last_component(&path.to_string_lossy()),
    }
  }
}

fn last_component(value: &str) -> String {
  let trimmed = value.trim_end_matches(['/', '\\']);
  trimmed
    .rsplit(['/', '\\'])
    .next()
    .unwrap_or(trimmed)
    .to_string()
}

/// Resolve `.` and `..` without touching the filesystem. A path that still
/// has no final name (`.`, `..`, `../..`) is made absolute first.
fn normalize_path(path: &Path) -> PathBuf {
  if path.as_os_str().is_empty() {
    return PathBuf::new();
  }
  let lexical = lexical_normalize(path);
  if lexical.file_name().is_some() {
    return lexical;
  }
  match std::path::absolute(path) {
    Ok(absolute) => lexical_normalize(&absolute),
    Err(_) => lexical,
  }
}

fn lexical_normalize(path: &Path) -> PathBuf {
  let mut out = PathBuf::new();
  for component in path.components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => match out.components().next_back() {
        Some(Component::Normal(_)) => {
          out.pop();
        }
        Some(Component::RootDir | Component::Prefix(_)) => {}
        _ => out.push(".."),
      },
      other => out.push(other),
    }
  }
  if out.as_os_str().is_empty() {
    out.push(".");
  }
  out
}
