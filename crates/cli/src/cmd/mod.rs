mod build;
mod profiles;
mod render;

use std::path::PathBuf;

use clap::Args;

use boxpack_lib::BuilderConfig;

pub use build::{BuildArgs, cmd_build};
pub use profiles::cmd_profiles;
pub use render::cmd_render;

/// Where to look for local profiles and templates.
#[derive(Debug, Clone, Default, Args)]
pub struct CatalogArgs {
  /// Local profile catalog merged over the built-in profiles
  #[arg(long = "local", value_name = "FILE")]
  pub profiles: Option<PathBuf>,

  /// Directory searched for templates before the built-in ones
  #[arg(long, value_name = "DIR")]
  pub templates: Option<PathBuf>,
}

impl CatalogArgs {
  /// Apply the overrides on top of `config`.
  pub fn apply(&self, config: &mut BuilderConfig) {
    if let Some(profiles) = &self.profiles {
      config.local_profiles = Some(profiles.clone());
    }
    if let Some(templates) = &self.templates {
      config.local_templates = Some(templates.clone());
    }
  }
}
