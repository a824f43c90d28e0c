mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::{BuildArgs, CatalogArgs};
use output::OutputFormat;

/// boxpack - build OS packages inside throwaway containers
#[derive(Parser)]
#[command(name = "boxpack")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Output format
  #[arg(short, long, global = true, value_enum, default_value_t)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run every build in a build file
  Build(BuildArgs),

  /// List the available build profiles
  Profiles {
    #[command(flatten)]
    catalog: CatalogArgs,
  },

  /// Print the build script generated for one build, without running it
  Render {
    /// Path to the build file
    file: PathBuf,

    /// Position of the build in the file
    #[arg(long, default_value_t = 0)]
    index: usize,

    #[command(flatten)]
    catalog: CatalogArgs,
  },
}

fn main() -> Result<ExitCode> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "boxpack=debug" } else { "boxpack=info" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match cli.command {
    Commands::Build(args) => cmd::cmd_build(args, cli.output),
    Commands::Profiles { catalog } => cmd::cmd_profiles(&catalog, cli.output).map(|_| ExitCode::SUCCESS),
    Commands::Render { file, index, catalog } => cmd::cmd_render(&file, index, &catalog).map(|_| ExitCode::SUCCESS),
  }
}
