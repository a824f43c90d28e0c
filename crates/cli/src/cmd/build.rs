//! Implementation of the `boxpack build` command.
//!
//! Loads a YAML build file, runs every build it lists as one batch and prints
//! a per-build summary. The process exits nonzero when any build failed.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use serde::Serialize;
use tracing::{info, warn};

use boxpack_lib::build::BuildFile;
use boxpack_lib::engine::RegistryCredentials;
use boxpack_lib::{BatchReport, BuildOutcome, BuildStatus, Builder, BuilderConfig, EngineKind};

use super::CatalogArgs;
use crate::output::{OutputFormat, format_duration, print_error, print_json, print_stat, print_success, print_warning};

/// Environment variable holding the registry password for `--registry-user`.
pub const REGISTRY_PASSWORD_ENV: &str = "BOXPACK_REGISTRY_PASSWORD";

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum EngineArg {
  /// Docker API over the local socket
  #[default]
  Docker,
  /// docker or podman command-line client
  Cli,
}

impl From<EngineArg> for EngineKind {
  fn from(arg: EngineArg) -> Self {
    match arg {
      EngineArg::Docker => EngineKind::Docker,
      EngineArg::Cli => EngineKind::Cli,
    }
  }
}

#[derive(Debug, Args)]
pub struct BuildArgs {
  /// Path to the build file
  pub file: PathBuf,

  /// Maximum number of builds running at once [default: no limit]
  #[arg(short = 'j', long)]
  pub parallelism: Option<usize>,

  /// Container engine to use
  #[arg(long, value_enum, default_value_t)]
  pub engine: EngineArg,

  /// Program run by the cli engine
  #[arg(long, value_name = "PROGRAM", default_value = "docker")]
  pub engine_program: String,

  /// Treat a nonzero build-script exit status as a failed build
  #[arg(long)]
  pub enforce_exit_status: bool,

  /// Directory receiving one subdirectory per build (reset on every run)
  #[arg(long, value_name = "DIR")]
  pub output_dir: Option<PathBuf>,

  /// Registry user; the password is read from BOXPACK_REGISTRY_PASSWORD
  #[arg(long, value_name = "USER")]
  pub registry_user: Option<String>,

  /// Registry server the credentials belong to
  #[arg(long, value_name = "SERVER", requires = "registry_user")]
  pub registry_server: Option<String>,

  #[command(flatten)]
  pub catalog: CatalogArgs,
}

impl BuildArgs {
  fn builder_config(&self) -> Result<BuilderConfig> {
    let mut config = BuilderConfig::default();
    self.catalog.apply(&mut config);

    if let Some(dir) = &self.output_dir {
      config.base_dir = dir.clone();
    }
    if let Some(parallelism) = self.parallelism {
      config.parallelism = parallelism;
    }
    config.enforce_exit_status = self.enforce_exit_status;

    if let Some(username) = &self.registry_user {
      let password = std::env::var(REGISTRY_PASSWORD_ENV)
        .with_context(|| format!("--registry-user requires {REGISTRY_PASSWORD_ENV} to be set"))?;
      config.registry_credentials = Some(RegistryCredentials {
        username: username.clone(),
        password,
        server: self.registry_server.clone(),
      });
    }

    Ok(config)
  }
}

pub fn cmd_build(args: BuildArgs, format: OutputFormat) -> Result<ExitCode> {
  let specs = BuildFile::load(&args.file)
    .and_then(BuildFile::into_specs)
    .with_context(|| format!("Failed to load build file: {}", args.file.display()))?;

  let config = args.builder_config()?;
  let engine = EngineKind::from(args.engine)
    .connect(Some(args.engine_program.as_str()))
    .context("Failed to connect to container engine")?;

  let mut builder = Builder::new(config, engine);
  for spec in specs {
    builder.add(spec);
  }

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let token = builder.cancellation_token();
  rt.spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!("interrupt received, cancelling builds");
      token.cancel();
    }
  });

  let report = rt.block_on(builder.run()).context("Build batch failed")?;
  info!(base_dir = %builder.config().base_dir.display(), "artifacts written");

  if format.is_json() {
    print_json(&BatchJson::from(&report))?;
  } else {
    print_summary(&report);
  }

  Ok(if report.is_success() {
    ExitCode::SUCCESS
  } else {
    ExitCode::FAILURE
  })
}

fn print_summary(report: &BatchReport) {
  println!();
  for outcome in &report.outcomes {
    let took = format_duration(outcome.elapsed);
    match &outcome.status {
      BuildStatus::Completed { .. } if outcome.is_success() => {
        print_success(&format!("{} [{}] {}", outcome.label, outcome.profile, took));
      }
      BuildStatus::Completed { exit_code, .. } => {
        print_warning(&format!(
          "{} [{}] build script exited with {}; see {}",
          outcome.label,
          outcome.profile,
          exit_code.map_or_else(|| "unknown status".to_string(), |c| format!("status {c}")),
          outcome.build_dir.display()
        ));
      }
      BuildStatus::Failed(err) => {
        print_error(&format!("{} [{}] {}", outcome.label, outcome.profile, err));
      }
    }
  }
  println!();
  print_stat("Builds", &report.total().to_string());
  print_stat("Succeeded", &report.succeeded().to_string());
  print_stat("Failed", &(report.total() - report.succeeded()).to_string());
  print_stat("Elapsed", &format_duration(report.elapsed));
}

#[derive(Serialize)]
struct BatchJson<'a> {
  success: bool,
  elapsed_ms: u128,
  builds: Vec<OutcomeJson<'a>>,
}

#[derive(Serialize)]
struct OutcomeJson<'a> {
  label: &'a str,
  profile: &'a str,
  build_dir: String,
  success: bool,
  container_id: Option<&'a str>,
  exit_code: Option<i64>,
  error: Option<String>,
  elapsed_ms: u128,
}

impl<'a> From<&'a BatchReport> for BatchJson<'a> {
  fn from(report: &'a BatchReport) -> Self {
    Self {
      success: report.is_success(),
      elapsed_ms: report.elapsed.as_millis(),
      builds: report.outcomes.iter().map(OutcomeJson::from).collect(),
    }
  }
}

impl<'a> From<&'a BuildOutcome> for OutcomeJson<'a> {
  fn from(outcome: &'a BuildOutcome) -> Self {
    let (container_id, exit_code) = match &outcome.status {
      BuildStatus::Completed { container_id, exit_code } => (Some(container_id.as_str()), *exit_code),
      BuildStatus::Failed(_) => (None, None),
    };
    Self {
      label: &outcome.label,
      profile: &outcome.profile,
      build_dir: outcome.build_dir.display().to_string(),
      success: outcome.is_success(),
      container_id,
      exit_code,
      error: outcome.error().map(ToString::to_string),
      elapsed_ms: outcome.elapsed.as_millis(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::Parser;
  use serial_test::serial;

  #[derive(Parser)]
  struct Harness {
    #[command(flatten)]
    args: BuildArgs,
  }

  fn parse(argv: &[&str]) -> BuildArgs {
    Harness::parse_from(std::iter::once("boxpack").chain(argv.iter().copied())).args
  }

  #[test]
  fn flags_override_defaults() {
    let args = parse(&[
      "builds.yml",
      "-j",
      "2",
      "--enforce-exit-status",
      "--output-dir",
      "/srv/out",
      "--local",
      "/etc/boxpack/profiles.json",
    ]);
    let config = args.builder_config().unwrap();
    assert_eq!(config.parallelism, 2);
    assert!(config.enforce_exit_status);
    assert_eq!(config.base_dir, PathBuf::from("/srv/out"));
    assert_eq!(config.local_profiles, Some(PathBuf::from("/etc/boxpack/profiles.json")));
    assert!(config.registry_credentials.is_none());
  }

  #[test]
  fn builds_are_unbounded_without_jobs_flag() {
    let config = parse(&["builds.yml"]).builder_config().unwrap();
    assert_eq!(config.parallelism, 0);
  }

  #[test]
  #[serial]
  fn registry_user_reads_password_from_env() {
    let args = parse(&["builds.yml", "--registry-user", "ci", "--registry-server", "registry.local"]);

    temp_env::with_var(REGISTRY_PASSWORD_ENV, Some("s3cret"), || {
      let creds = args.builder_config().unwrap().registry_credentials.unwrap();
      assert_eq!(creds.username, "ci");
      assert_eq!(creds.password, "s3cret");
      assert_eq!(creds.server.as_deref(), Some("registry.local"));
    });

    temp_env::with_var_unset(REGISTRY_PASSWORD_ENV, || {
      assert!(args.builder_config().is_err());
    });
  }
}
