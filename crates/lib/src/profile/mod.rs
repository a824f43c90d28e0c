//! Build profiles: named pairings of a container image and a script template.
//!
//! The registry is layered. The built-in catalog ships inside the library;
//! an optional local catalog is merged on top, so redefining an id locally
//! replaces the built-in entry.
//!
//! # Catalog Format
//!
//! ```json
//! {
//!   "ubuntu-trusty": { "image": "ubuntu:14.04", "script": "debian.sh.tmpl" },
//!   "internal": { "image": "registry.local/centos:7", "script": "centos.sh.tmpl", "insecure_registry": true }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Built-in catalog embedded at compile time.
pub const BUILTIN_PROFILES: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/profiles/profiles.json"));

const BUILTIN_ORIGIN: &str = "<built-in>";

/// Errors from loading or resolving profiles.
#[derive(Debug, Error)]
pub enum ProfileError {
  #[error("profile '{0}' not found")]
  NotFound(String),

  #[error("invalid profile '{id}' in {origin}: {reason}")]
  InvalidProfile { origin: String, id: String, reason: String },

  #[error("malformed profile catalog {origin}: {source}")]
  Malformed {
    origin: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to read profile catalog {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// A resolved build profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileEntry {
  pub profile_id: String,
  pub image: String,
  /// Template name looked up by the script renderer.
  pub script: String,
  pub insecure_registry: bool,
}

impl ProfileEntry {
  pub fn new(profile_id: impl Into<String>, image: impl Into<String>, script: impl Into<String>) -> Self {
    Self {
      profile_id: profile_id.into(),
      image: image.into(),
      script: script.into(),
      insecure_registry: false,
    }
  }

  pub fn with_insecure_registry(mut self, insecure: bool) -> Self {
    self.insecure_registry = insecure;
    self
  }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogEntry {
  image: String,
  script: String,
  #[serde(default, deserialize_with = "flag")]
  insecure_registry: bool,
}

/// Older catalogs spell the flag as the string `"true"`.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Flag {
    Bool(bool),
    Text(String),
  }

  Ok(match Flag::deserialize(deserializer)? {
    Flag::Bool(b) => b,
    Flag::Text(s) => s.eq_ignore_ascii_case("true"),
  })
}

/// Profiles keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileRegistry {
  entries: BTreeMap<String, ProfileEntry>,
}

impl ProfileRegistry {
  /// Built-in catalog only.
  pub fn builtin() -> Result<Self, ProfileError> {
    Self::from_json_str(BUILTIN_ORIGIN, BUILTIN_PROFILES)
  }

  /// Built-in catalog merged with `local_file` when it exists.
  ///
  /// A missing local file is not an error; an unreadable or invalid one is.
  pub fn load(local_file: Option<&Path>) -> Result<Self, ProfileError> {
    let mut registry = Self::builtin()?;

    if let Some(path) = local_file {
      if path.exists() {
        let content = std::fs::read_to_string(path).map_err(|source| ProfileError::Read {
          path: path.to_path_buf(),
          source,
        })?;
        let local = Self::from_json_str(&path.display().to_string(), &content)?;
        info!(path = %path.display(), count = local.len(), "loaded local profiles");
        registry.merge(local);
      } else {
        debug!(path = %path.display(), "no local profile catalog");
      }
    }

    Ok(registry)
  }

  /// Parse one catalog document. `origin` names it in error messages.
  pub fn from_json_str(origin: &str, content: &str) -> Result<Self, ProfileError> {
    let raw: BTreeMap<String, serde_json::Value> =
      serde_json::from_str(content).map_err(|source| ProfileError::Malformed {
        origin: origin.to_string(),
        source,
      })?;

    let mut entries = BTreeMap::new();
    for (id, value) in raw {
      let entry: CatalogEntry = serde_json::from_value(value).map_err(|e| ProfileError::InvalidProfile {
        origin: origin.to_string(),
        id: id.clone(),
        reason: e.to_string(),
      })?;
      entries.insert(
        id.clone(),
        ProfileEntry {
          profile_id: id,
          image: entry.image,
          script: entry.script,
          insecure_registry: entry.insecure_registry,
        },
      );
    }

    Ok(Self { entries })
  }

  pub fn from_entries(entries: impl IntoIterator<Item = ProfileEntry>) -> Self {
    Self {
      entries: entries.into_iter().map(|e| (e.profile_id.clone(), e)).collect(),
    }
  }

  /// Merge `other` into this registry; entries of `other` win on collision.
  pub fn merge(&mut self, other: ProfileRegistry) {
    for (id, entry) in other.entries {
      if self.entries.contains_key(&id) {
        debug!(profile = %id, "local profile overrides built-in");
      }
      self.entries.insert(id, entry);
    }
  }

  /// Exact-match lookup.
  pub fn resolve(&self, id: &str) -> Result<&ProfileEntry, ProfileError> {
    self.entries.get(id).ok_or_else(|| ProfileError::NotFound(id.to_string()))
  }

  /// Sorted profile ids.
  pub fn ids(&self) -> Vec<&str> {
    self.entries.keys().map(String::as_str).collect()
  }

  pub fn entries(&self) -> impl Iterator<Item = &ProfileEntry> {
    self.entries.values()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}
