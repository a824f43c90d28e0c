//! Container lifecycle for a single build.
//!
//! [`ContainerBuildMachine`] walks one container through a fixed sequence of
//! states. Each state is entered at most once; calling an operation out of
//! order is an error rather than a retry.
//!
//! ```text
//! Idle → ImageEnsured → Running → LogsStreamed → Stopped → Removed
//! ```
//!
//! Failures before `Running` are fatal to the build. A container that was
//! created but failed to start is removed on the way out. Once a container is
//! running, [`ContainerBuildMachine::shutdown`] always runs; stop and remove
//! are each best-effort and only logged on failure.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::consts::{APP_NAME, BUILD_SCRIPT_NAME, SCRATCH_DIR, SHARED_DIR};
use crate::engine::{BindMount, ContainerEngine, ContainerSpec, EngineError, PullOptions, RegistryCredentials};
use crate::profile::ProfileEntry;
use crate::workspace::Workspace;

/// Label attached to every build container.
pub const BUILD_LABEL: &str = "boxpack.build";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MachineState {
  Idle,
  ImageEnsured,
  Running,
  LogsStreamed,
  Stopped,
  Removed,
}

impl fmt::Display for MachineState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      MachineState::Idle => "idle",
      MachineState::ImageEnsured => "image-ensured",
      MachineState::Running => "running",
      MachineState::LogsStreamed => "logs-streamed",
      MachineState::Stopped => "stopped",
      MachineState::Removed => "removed",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Error)]
pub enum MachineError {
  #[error("cannot {action} while {state}")]
  InvalidTransition { state: MachineState, action: &'static str },

  #[error(transparent)]
  Engine(#[from] EngineError),

  #[error("build script exited with status {code}")]
  ScriptFailed { code: i64 },

  #[error("build cancelled")]
  Cancelled,
}

/// Receives container output lines as they arrive.
pub trait LogSink: Send + Sync {
  fn line(&self, build: &str, line: &str);
}

/// Forwards container output to `tracing` at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
  fn line(&self, build: &str, line: &str) {
    info!(target: "boxpack::container", build = %build, "{line}");
  }
}

/// Handle to a started container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSession {
  pub id: String,
  pub image: String,
}

/// What the machine observed while running a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineReport {
  pub container_id: String,
  /// `None` when the engine could not report it.
  pub exit_code: Option<i64>,
}

/// Drives one container through its lifecycle.
pub struct ContainerBuildMachine {
  engine: Arc<dyn ContainerEngine>,
  label: String,
  image: String,
  pull: PullOptions,
  shared_dir: String,
  state: MachineState,
  session: Option<ContainerSession>,
  exit_code: Option<i64>,
}

impl fmt::Debug for ContainerBuildMachine {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ContainerBuildMachine")
      .field("engine", &self.engine.name())
      .field("label", &self.label)
      .field("image", &self.image)
      .field("state", &self.state)
      .field("session", &self.session)
      .finish()
  }
}

impl ContainerBuildMachine {
  pub fn new(engine: Arc<dyn ContainerEngine>, label: impl Into<String>, profile: &ProfileEntry) -> Self {
    Self {
      engine,
      label: label.into(),
      image: profile.image.clone(),
      pull: PullOptions {
        insecure: profile.insecure_registry,
        credentials: None,
      },
      shared_dir: SHARED_DIR.to_string(),
      state: MachineState::Idle,
      session: None,
      exit_code: None,
    }
  }

  /// In-container mount point of the build root.
  pub fn with_shared_dir(mut self, shared_dir: impl Into<String>) -> Self {
    self.shared_dir = shared_dir.into();
    self
  }

  pub fn with_credentials(mut self, credentials: Option<RegistryCredentials>) -> Self {
    self.pull.credentials = credentials;
    self
  }

  pub fn state(&self) -> MachineState {
    self.state
  }

  pub fn session(&self) -> Option<&ContainerSession> {
    self.session.as_ref()
  }

  pub fn exit_code(&self) -> Option<i64> {
    self.exit_code
  }

  fn require_state(&self, allowed: &[MachineState], action: &'static str) -> Result<(), MachineError> {
    if allowed.contains(&self.state) {
      Ok(())
    } else {
      Err(MachineError::InvalidTransition {
        state: self.state,
        action,
      })
    }
  }

  /// Make sure the profile image is available locally, pulling it if not.
  pub async fn ensure_image(&mut self) -> Result<(), MachineError> {
    self.require_state(&[MachineState::Idle], "ensure image")?;

    if self.engine.image_exists(&self.image).await? {
      debug!(build = %self.label, image = %self.image, "image present");
    } else {
      info!(build = %self.label, image = %self.image, insecure = self.pull.insecure, "pulling image");
      self.engine.pull_image(&self.image, &self.pull).await?;
    }

    self.state = MachineState::ImageEnsured;
    Ok(())
  }

  /// The container the machine would create for `workspace`.
  pub fn container_spec(&self, workspace: &Workspace) -> ContainerSpec {
    let shared = self.shared_dir.trim_end_matches('/');
    let mut labels = BTreeMap::new();
    labels.insert(BUILD_LABEL.to_string(), self.label.clone());
    labels.insert(format!("{APP_NAME}.managed"), "true".to_string());

    ContainerSpec {
      image: self.image.clone(),
      name: None,
      entrypoint: vec![format!("{shared}/{SCRATCH_DIR}/{BUILD_SCRIPT_NAME}")],
      working_dir: Some(shared.to_string()),
      binds: vec![BindMount::new(&workspace.root, shared)],
      labels,
    }
  }

  /// Bind-mount the build root and start the build script.
  pub async fn launch(&mut self, workspace: &Workspace) -> Result<&ContainerSession, MachineError> {
    self.require_state(&[MachineState::ImageEnsured], "launch")?;

    let spec = self.container_spec(workspace);
    let id = self.engine.create(&spec).await?;
    if let Err(e) = self.engine.start(&id).await {
      match self.engine.remove(&id).await {
        Ok(()) => debug!(build = %self.label, container = %id, "removed container that failed to start"),
        Err(remove_err) => {
          warn!(build = %self.label, container = %id, error = %remove_err, "failed to remove container, continuing")
        }
      }
      return Err(e.into());
    }
    info!(build = %self.label, container = %id, image = %self.image, "container started");

    self.state = MachineState::Running;
    Ok(self.session.insert(ContainerSession {
      id,
      image: self.image.clone(),
    }))
  }

  /// Forward container output to `sink` until the container exits, then
  /// record its exit status.
  ///
  /// Cancellation stops forwarding and leaves the machine `Running` so the
  /// caller can still shut the container down.
  pub async fn stream_logs(&mut self, sink: &dyn LogSink, cancel: &CancellationToken) -> Result<(), MachineError> {
    self.require_state(&[MachineState::Running], "stream logs")?;
    let id = self.running_id("stream logs")?;

    let mut lines = self.engine.logs(&id).await?;
    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          warn!(build = %self.label, container = %id, "log stream interrupted by cancellation");
          return Err(MachineError::Cancelled);
        }
        next = lines.next() => match next {
          Some(Ok(line)) => sink.line(&self.label, &line),
          Some(Err(e)) => {
            warn!(build = %self.label, container = %id, error = %e, "log stream ended early");
            break;
          }
          None => break,
        },
      }
    }

    self.exit_code = match self.engine.wait(&id).await {
      Ok(code) => {
        debug!(build = %self.label, container = %id, code, "container exited");
        Some(code)
      }
      Err(e) => {
        warn!(build = %self.label, container = %id, error = %e, "could not read exit status");
        None
      }
    };

    self.state = MachineState::LogsStreamed;
    Ok(())
  }

  /// Stop the container. Failures are logged, never returned.
  pub async fn stop(&mut self) -> Result<(), MachineError> {
    self.require_state(&[MachineState::Running, MachineState::LogsStreamed], "stop")?;
    let id = self.running_id("stop")?;

    if let Err(e) = self.engine.stop(&id).await {
      warn!(build = %self.label, container = %id, error = %e, "failed to stop container, continuing");
    }
    self.state = MachineState::Stopped;
    Ok(())
  }

  /// Remove the container. Failures are logged, never returned.
  pub async fn remove(&mut self) -> Result<(), MachineError> {
    self.require_state(&[MachineState::Stopped], "remove")?;
    let id = self.running_id("remove")?;

    if let Err(e) = self.engine.remove(&id).await {
      warn!(build = %self.label, container = %id, error = %e, "failed to remove container, continuing");
    }
    self.state = MachineState::Removed;
    debug!(build = %self.label, container = %id, "container removed");
    Ok(())
  }

  /// Stop then remove.
  pub async fn shutdown(&mut self) -> Result<(), MachineError> {
    self.stop().await?;
    self.remove().await
  }

  /// Run the whole lifecycle against a staged workspace.
  ///
  /// Once the container is running it is always shut down, including when
  /// log streaming is cancelled. With `enforce_exit_status`, a nonzero exit
  /// code becomes [`MachineError::ScriptFailed`].
  pub async fn run(
    &mut self,
    workspace: &Workspace,
    sink: &dyn LogSink,
    cancel: &CancellationToken,
    enforce_exit_status: bool,
  ) -> Result<MachineReport, MachineError> {
    tokio::select! {
      _ = cancel.cancelled() => return Err(MachineError::Cancelled),
      result = self.ensure_image() => result?,
    }
    if cancel.is_cancelled() {
      return Err(MachineError::Cancelled);
    }

    let container_id = self.launch(workspace).await?.id.clone();
    let streamed = self.stream_logs(sink, cancel).await;
    self.shutdown().await?;
    streamed?;

    if let Some(code) = self.exit_code {
      if code != 0 {
        if enforce_exit_status {
          return Err(MachineError::ScriptFailed { code });
        }
        warn!(build = %self.label, code, "build script exited nonzero; inspect the build directory");
      }
    }

    Ok(MachineReport {
      container_id,
      exit_code: self.exit_code,
    })
  }

  fn running_id(&self, action: &'static str) -> Result<String, MachineError> {
    self
      .session
      .as_ref()
      .map(|s| s.id.clone())
      .ok_or(MachineError::InvalidTransition {
        state: self.state,
        action,
      })
  }
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;
  use std::time::Duration;

  use super::*;
  use crate::engine::Operation;
  use crate::util::testutil::{CollectingSink, EngineCall, FakeEngine};

  fn workspace() -> Workspace {
    let root = PathBuf::from("/tmp/dist/demo-1.0-p1");
    Workspace {
      scratch: root.join("scratch"),
      script_path: root.join("scratch/buildscript.sh"),
      root,
    }
  }

  fn machine(engine: &Arc<FakeEngine>) -> ContainerBuildMachine {
    let engine: Arc<dyn ContainerEngine> = engine.clone();
    ContainerBuildMachine::new(engine, "demo-1.0-p1", &ProfileEntry::new("p1", "img:tag", "build.sh.tmpl"))
  }

  #[tokio::test]
  async fn full_lifecycle_in_order() {
    let engine = Arc::new(FakeEngine::new().with_logs(["step 1", "step 2"]));
    let sink = CollectingSink::default();
    let mut m = machine(&engine);

    let report = m.run(&workspace(), &sink, &CancellationToken::new(), false).await.unwrap();

    assert_eq!(m.state(), MachineState::Removed);
    assert_eq!(report.exit_code, Some(0));
    assert_eq!(sink.lines(), vec!["step 1", "step 2"]);

    let id = report.container_id;
    assert_eq!(
      engine.calls(),
      vec![
        EngineCall::ImageExists("img:tag".into()),
        EngineCall::Pull {
          image: "img:tag".into(),
          insecure: false
        },
        EngineCall::Create(m.container_spec(&workspace())),
        EngineCall::Start(id.clone()),
        EngineCall::Logs(id.clone()),
        EngineCall::Wait(id.clone()),
        EngineCall::Stop(id.clone()),
        EngineCall::Remove(id),
      ]
    );
  }

  #[tokio::test]
  async fn present_image_is_not_pulled() {
    let engine = Arc::new(FakeEngine::new().with_image("img:tag"));
    let mut m = machine(&engine);
    m.ensure_image().await.unwrap();
    assert!(!engine.calls().iter().any(|c| matches!(c, EngineCall::Pull { .. })));
  }

  #[tokio::test]
  async fn insecure_flag_reaches_pull() {
    let engine = Arc::new(FakeEngine::new());
    let profile = ProfileEntry::new("p1", "registry.local/img:tag", "build.sh.tmpl").with_insecure_registry(true);
    let mut m = ContainerBuildMachine::new(engine.clone(), "x", &profile);
    m.ensure_image().await.unwrap();
    assert!(engine.calls().contains(&EngineCall::Pull {
      image: "registry.local/img:tag".into(),
      insecure: true
    }));
  }

  #[test]
  fn container_spec_binds_root_and_runs_script() {
    let engine = Arc::new(FakeEngine::new());
    let spec = machine(&engine).with_shared_dir("/shared/").container_spec(&workspace());
    assert_eq!(spec.entrypoint, vec!["/shared/scratch/buildscript.sh".to_string()]);
    assert_eq!(spec.binds, vec![BindMount::new("/tmp/dist/demo-1.0-p1", "/shared")]);
    assert_eq!(spec.labels.get(BUILD_LABEL).map(String::as_str), Some("demo-1.0-p1"));
  }

  #[tokio::test]
  async fn out_of_order_calls_are_rejected() {
    let engine = Arc::new(FakeEngine::new());
    let mut m = machine(&engine);

    let err = m.launch(&workspace()).await.unwrap_err();
    assert!(matches!(
      err,
      MachineError::InvalidTransition {
        state: MachineState::Idle,
        ..
      }
    ));
    assert!(m.shutdown().await.is_err());

    m.ensure_image().await.unwrap();
    assert!(matches!(m.ensure_image().await, Err(MachineError::InvalidTransition { .. })));
    assert!(engine.created().is_empty());
  }

  #[tokio::test]
  async fn pull_failure_is_fatal_before_running() {
    let engine = Arc::new(FakeEngine::new().failing(Operation::Pull));
    let mut m = machine(&engine);
    let err = m
      .run(&workspace(), &CollectingSink::default(), &CancellationToken::new(), false)
      .await
      .unwrap_err();
    assert!(matches!(err, MachineError::Engine(_)));
    assert_eq!(m.state(), MachineState::Idle);
    assert!(engine.created().is_empty());
  }

  #[tokio::test]
  async fn container_that_fails_to_start_is_removed() {
    let engine = Arc::new(FakeEngine::new().failing(Operation::Start));
    let mut m = machine(&engine);
    let err = m
      .run(&workspace(), &CollectingSink::default(), &CancellationToken::new(), false)
      .await
      .unwrap_err();

    assert!(matches!(err, MachineError::Engine(EngineError::Operation { op: Operation::Start, .. })));
    assert_eq!(m.state(), MachineState::ImageEnsured);
    assert!(m.session().is_none());

    let calls = engine.calls();
    assert_eq!(
      &calls[calls.len() - 3..],
      &[
        EngineCall::Create(m.container_spec(&workspace())),
        EngineCall::Start("fake-0".into()),
        EngineCall::Remove("fake-0".into()),
      ]
    );
  }

  #[tokio::test]
  async fn last_line_survives_a_broken_log_stream() {
    let engine = Arc::new(FakeEngine::new().with_logs(["step 1", "last words"]).with_broken_log_stream());
    let sink = CollectingSink::default();
    let mut m = machine(&engine);

    let report = m.run(&workspace(), &sink, &CancellationToken::new(), false).await.unwrap();

    assert_eq!(sink.lines(), vec!["step 1", "last words"]);
    assert_eq!(m.state(), MachineState::Removed);
    assert_eq!(report.exit_code, Some(0));
  }

  #[tokio::test]
  async fn teardown_failures_do_not_change_outcome() {
    let engine = Arc::new(FakeEngine::new().failing(Operation::Stop).failing(Operation::Remove));
    let mut m = machine(&engine);
    let report = m
      .run(&workspace(), &CollectingSink::default(), &CancellationToken::new(), false)
      .await;
    assert!(report.is_ok());
    assert_eq!(m.state(), MachineState::Removed);
  }

  #[tokio::test]
  async fn nonzero_exit_is_recorded_and_optionally_enforced() {
    let engine = Arc::new(FakeEngine::new().with_exit_code(2));
    let report = machine(&engine)
      .run(&workspace(), &CollectingSink::default(), &CancellationToken::new(), false)
      .await
      .unwrap();
    assert_eq!(report.exit_code, Some(2));

    let mut m = machine(&engine);
    let err = m
      .run(&workspace(), &CollectingSink::default(), &CancellationToken::new(), true)
      .await
      .unwrap_err();
    assert!(matches!(err, MachineError::ScriptFailed { code: 2 }));
    assert_eq!(m.state(), MachineState::Removed);
  }

  #[tokio::test]
  async fn cancellation_still_tears_down_container() {
    let engine = Arc::new(FakeEngine::new().with_run_time(Duration::from_secs(30)));
    let cancel = CancellationToken::new();
    let mut m = machine(&engine);

    let trigger = cancel.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(50)).await;
      trigger.cancel();
    });

    let err = m
      .run(&workspace(), &CollectingSink::default(), &cancel, false)
      .await
      .unwrap_err();
    assert!(matches!(err, MachineError::Cancelled));
    assert_eq!(m.state(), MachineState::Removed);
    assert!(engine.calls().iter().any(|c| matches!(c, EngineCall::Remove(_))));
  }
}
