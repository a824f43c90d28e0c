//! Batch execution of builds.
//!
//! [`Builder`] collects build specs and runs them as one batch. Each build is
//! an independent task that resolves its profile, renders its script, stages
//! its workspace and drives its own container. Tasks share only read-only
//! state (profiles, renderer, engine handle) and own a private build root.
//!
//! # Concurrency
//!
//! All tasks are spawned at once; a semaphore sized by
//! [`BuilderConfig::parallelism`] bounds how many run at the same time.
//! Cancelling [`Builder::cancellation_token`] stops waiting tasks and
//! interrupts running ones, which still tear down their containers.
//!
//! # Failure Isolation
//!
//! Errors that concern the whole batch (empty batch, unreadable profiles,
//! output directory reset) are returned from [`Builder::run`] before any
//! build starts. Anything that goes wrong inside one build, including a
//! panic, is recorded in that build's [`BuildOutcome`] and never affects its
//! siblings.

mod types;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use types::{BatchReport, BuildOutcome, BuildStatus, BuilderConfig, OrchestrateError, UnitError};

use crate::build::BuildSpec;
use crate::engine::ContainerEngine;
use crate::machine::{ContainerBuildMachine, LogSink, MachineError, MachineReport, TracingSink};
use crate::profile::ProfileRegistry;
use crate::template::{RenderContext, ScriptRenderer, SharedContext};
use crate::workspace::WorkspaceStager;

/// Queues builds and runs them as a batch.
pub struct Builder {
  config: BuilderConfig,
  engine: Arc<dyn ContainerEngine>,
  sink: Arc<dyn LogSink>,
  shared: SharedContext,
  pending: Vec<BuildSpec>,
  cancel: CancellationToken,
}

/// Read-only state shared by every task of a batch.
struct UnitContext {
  registry: ProfileRegistry,
  renderer: ScriptRenderer,
  stager: WorkspaceStager,
  engine: Arc<dyn ContainerEngine>,
  sink: Arc<dyn LogSink>,
  shared: SharedContext,
  config: BuilderConfig,
  semaphore: Arc<Semaphore>,
  cancel: CancellationToken,
}

impl Builder {
  pub fn new(config: BuilderConfig, engine: Arc<dyn ContainerEngine>) -> Self {
    let shared = SharedContext::new(config.shared_dir.clone());
    Self {
      config,
      engine,
      sink: Arc::new(TracingSink),
      shared,
      pending: Vec::new(),
      cancel: CancellationToken::new(),
    }
  }

  /// Send container output somewhere other than `tracing`.
  pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
    self.sink = sink;
    self
  }

  /// Override the values shared by every build (ids, mount point).
  pub fn with_shared_context(mut self, shared: SharedContext) -> Self {
    self.shared = shared;
    self
  }

  pub fn config(&self) -> &BuilderConfig {
    &self.config
  }

  /// Queue a build. No deduplication is performed.
  pub fn add(&mut self, spec: BuildSpec) -> &mut Self {
    debug!(build = %spec.label(), profile = %spec.profile(), "queued build");
    self.pending.push(spec);
    self
  }

  pub fn pending(&self) -> &[BuildSpec] {
    &self.pending
  }

  /// Token that cancels the running batch.
  pub fn cancellation_token(&self) -> CancellationToken {
    self.cancel.clone()
  }

  /// Run every queued build and wait for all of them.
  ///
  /// The queue is drained. Per-build failures are reported in the returned
  /// [`BatchReport`]; only batch-level failures produce an `Err`.
  pub async fn run(&mut self) -> Result<BatchReport, OrchestrateError> {
    if self.pending.is_empty() {
      return Err(OrchestrateError::NoBuildsFound);
    }

    let started = Instant::now();
    let registry = ProfileRegistry::load(self.config.local_profiles.as_deref())?;
    let renderer = ScriptRenderer::new(self.config.local_templates.clone());
    let stager = WorkspaceStager::new(&self.config.base_dir)
      .with_script_mode(self.config.script_mode)
      .with_home_dir(&self.config.home_dir);

    if self.cancel.is_cancelled() {
      return Err(OrchestrateError::Cancelled);
    }
    stager.reset_base_dir()?;

    let builds = std::mem::take(&mut self.pending);
    let permits = self.config.permits(builds.len());
    info!(
      builds = builds.len(),
      parallelism = permits,
      engine = self.engine.name(),
      base_dir = %self.config.base_dir.display(),
      "starting batch"
    );

    let ctx = Arc::new(UnitContext {
      registry,
      renderer,
      stager,
      engine: self.engine.clone(),
      sink: self.sink.clone(),
      shared: self.shared.clone(),
      config: self.config.clone(),
      semaphore: Arc::new(Semaphore::new(permits)),
      cancel: self.cancel.clone(),
    });

    let mut join_set = JoinSet::new();
    for (index, spec) in builds.into_iter().enumerate() {
      let ctx = ctx.clone();
      join_set.spawn(async move { run_unit(ctx, index, spec).await });
    }

    let mut outcomes = collect_outcomes(join_set).await;
    outcomes.sort_by_key(|o| o.index);

    let report = BatchReport {
      outcomes,
      elapsed: started.elapsed(),
    };
    info!(
      total = report.total(),
      succeeded = report.succeeded(),
      elapsed = ?report.elapsed,
      "batch finished"
    );
    Ok(report)
  }
}

async fn run_unit(ctx: Arc<UnitContext>, index: usize, spec: BuildSpec) -> BuildOutcome {
  let started = Instant::now();
  let label = spec.label().to_string();
  let build_dir = ctx.stager.build_root(&spec);

  let status = match AssertUnwindSafe(execute_unit(&ctx, &spec)).catch_unwind().await {
    Ok(Ok(report)) => {
      info!(build = %label, container = %report.container_id, exit_code = ?report.exit_code, "build completed");
      BuildStatus::Completed {
        container_id: report.container_id,
        exit_code: report.exit_code,
      }
    }
    Ok(Err(e)) if e.is_cancelled() => {
      warn!(build = %label, "build cancelled");
      BuildStatus::Failed(e)
    }
    Ok(Err(e)) => {
      error!(build = %label, error = %e, "build failed");
      BuildStatus::Failed(e)
    }
    Err(panic) => {
      let message = panic_message(panic.as_ref());
      error!(build = %label, panic = %message, "build task panicked");
      BuildStatus::Failed(UnitError::Panicked(message))
    }
  };

  BuildOutcome {
    index,
    label,
    profile: spec.profile().to_string(),
    build_dir,
    status,
    elapsed: started.elapsed(),
  }
}

/// Resolve profile, render, stage, then drive the container.
async fn execute_unit(ctx: &UnitContext, spec: &BuildSpec) -> Result<MachineReport, UnitError> {
  let _permit = tokio::select! {
    _ = ctx.cancel.cancelled() => return Err(MachineError::Cancelled.into()),
    permit = ctx.semaphore.acquire() => permit.map_err(|_| MachineError::Cancelled)?,
  };

  let profile = ctx.registry.resolve(spec.profile())?;
  let script = ctx
    .renderer
    .render(&profile.script, &RenderContext::new(spec, &ctx.shared))?;
  debug!(build = %spec.label(), template = %profile.script, "rendered build script");

  let stager = ctx.stager.clone();
  let staged_spec = spec.clone();
  let workspace = tokio::task::spawn_blocking(move || stager.stage(&staged_spec, &script))
    .await
    .map_err(|e| UnitError::Join(e.to_string()))??;

  let mut machine = ContainerBuildMachine::new(ctx.engine.clone(), spec.label(), profile)
    .with_shared_dir(ctx.shared.shared_dir.clone())
    .with_credentials(ctx.config.registry_credentials.clone());

  Ok(
    machine
      .run(&workspace, ctx.sink.as_ref(), &ctx.cancel, ctx.config.enforce_exit_status)
      .await?,
  )
}

/// Collect outcomes from the task set. A task that fails to join (aborted
/// runtime) has no outcome and is only logged.
async fn collect_outcomes(mut join_set: JoinSet<BuildOutcome>) -> Vec<BuildOutcome> {
  let mut outcomes = Vec::new();

  while let Some(join_result) = join_set.join_next().await {
    match join_result {
      Ok(outcome) => outcomes.push(outcome),
      Err(e) => error!(error = %e, "build task did not complete"),
    }
  }

  outcomes
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}
