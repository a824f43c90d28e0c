//! Implementation of the `boxpack render` command.
//!
//! Renders the build script of one build exactly as `boxpack build` would,
//! without touching the output directory or any container engine.

use std::path::Path;

use anyhow::{Context, Result, bail};

use boxpack_lib::build::BuildFile;
use boxpack_lib::{BuilderConfig, ProfileRegistry, RenderContext, ScriptRenderer, SharedContext};

use super::CatalogArgs;

pub fn cmd_render(file: &Path, index: usize, catalog: &CatalogArgs) -> Result<()> {
  let mut config = BuilderConfig::default();
  catalog.apply(&mut config);

  let mut specs = BuildFile::load(file)
    .and_then(BuildFile::into_specs)
    .with_context(|| format!("Failed to load build file: {}", file.display()))?;
  if index >= specs.len() {
    bail!("build file has {} build(s); index {} is out of range", specs.len(), index);
  }
  let spec = specs.swap_remove(index);

  let registry = ProfileRegistry::load(config.local_profiles.as_deref()).context("Failed to load profiles")?;
  let profile = registry.resolve(spec.profile())?;

  let renderer = ScriptRenderer::new(config.local_templates.clone());
  let shared = SharedContext::new(config.shared_dir.clone());
  let script = renderer
    .render(&profile.script, &RenderContext::new(&spec, &shared))
    .with_context(|| format!("Failed to render {} for {}", profile.script, spec.label()))?;

  print!("{script}");
  Ok(())
}
