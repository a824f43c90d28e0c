use anyhow::{Context, Result};

use boxpack_lib::{BuilderConfig, ProfileEntry, ProfileRegistry};

use super::CatalogArgs;
use crate::output::{OutputFormat, print_info, print_json, symbols};

pub fn cmd_profiles(catalog: &CatalogArgs, format: OutputFormat) -> Result<()> {
  let mut config = BuilderConfig::default();
  catalog.apply(&mut config);

  let registry = ProfileRegistry::load(config.local_profiles.as_deref()).context("Failed to load profiles")?;
  let entries: Vec<&ProfileEntry> = registry.entries().collect();

  if format.is_json() {
    return print_json(&entries);
  }

  if entries.is_empty() {
    print_info("No profiles defined.");
    return Ok(());
  }

  let width = entries.iter().map(|e| e.profile_id.len()).max().unwrap_or(0);
  for entry in entries {
    let insecure = if entry.insecure_registry { " (insecure registry)" } else { "" };
    println!(
      "{} {:width$}  {}  {} {}{}",
      symbols::INFO,
      entry.profile_id,
      entry.image,
      symbols::ARROW,
      entry.script,
      insecure
    );
  }

  Ok(())
}
