//! Test doubles for the container engine and log sink.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::engine::{ContainerEngine, ContainerSpec, EngineError, LogStream, Operation, PullOptions, split_lines};
use crate::machine::LogSink;

/// One recorded engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
  ImageExists(String),
  Pull { image: String, insecure: bool },
  Create(ContainerSpec),
  Start(String),
  Logs(String),
  Wait(String),
  Stop(String),
  Remove(String),
}

/// In-memory engine that records every call.
///
/// Containers "run" for `run_time`: the log stream yields its lines at once,
/// then stays open until that time has passed.
#[derive(Debug, Default)]
pub struct FakeEngine {
  calls: Mutex<Vec<EngineCall>>,
  images: Mutex<HashSet<String>>,
  failing: HashSet<Operation>,
  failing_images: HashSet<String>,
  log_lines: Vec<String>,
  broken_logs: bool,
  exit_code: i64,
  run_time: Duration,
  next_id: AtomicUsize,
  active: AtomicUsize,
  peak: AtomicUsize,
}

impl FakeEngine {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_image(self, image: &str) -> Self {
    self.images.lock().unwrap().insert(image.to_string());
    self
  }

  pub fn with_logs<I, S>(mut self, lines: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.log_lines = lines.into_iter().map(Into::into).collect();
    self
  }

  /// Deliver the log lines as one unterminated chunk followed by a stream
  /// error, the way a dropped engine connection does.
  pub fn with_broken_log_stream(mut self) -> Self {
    self.broken_logs = true;
    self
  }

  pub fn with_exit_code(mut self, code: i64) -> Self {
    self.exit_code = code;
    self
  }

  pub fn with_run_time(mut self, run_time: Duration) -> Self {
    self.run_time = run_time;
    self
  }

  pub fn failing(mut self, op: Operation) -> Self {
    self.failing.insert(op);
    self
  }

  /// Make pulls of `image` fail.
  pub fn failing_pull_for(mut self, image: &str) -> Self {
    self.failing_images.insert(image.to_string());
    self
  }

  pub fn calls(&self) -> Vec<EngineCall> {
    self.calls.lock().unwrap().clone()
  }

  pub fn created(&self) -> Vec<ContainerSpec> {
    self
      .calls()
      .into_iter()
      .filter_map(|c| match c {
        EngineCall::Create(spec) => Some(spec),
        _ => None,
      })
      .collect()
  }

  /// Highest number of containers running at the same time.
  pub fn peak_running(&self) -> usize {
    self.peak.load(Ordering::SeqCst)
  }

  fn record(&self, call: EngineCall) {
    self.calls.lock().unwrap().push(call);
  }

  fn check(&self, op: Operation, target: &str) -> Result<(), EngineError> {
    if self.failing.contains(&op) {
      Err(EngineError::operation(op, target, "injected failure"))
    } else {
      Ok(())
    }
  }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
  fn name(&self) -> &str {
    "fake"
  }

  async fn image_exists(&self, image: &str) -> Result<bool, EngineError> {
    self.record(EngineCall::ImageExists(image.to_string()));
    self.check(Operation::ImageCheck, image)?;
    Ok(self.images.lock().unwrap().contains(image))
  }

  async fn pull_image(&self, image: &str, options: &PullOptions) -> Result<(), EngineError> {
    self.record(EngineCall::Pull {
      image: image.to_string(),
      insecure: options.insecure,
    });
    self.check(Operation::Pull, image)?;
    if self.failing_images.contains(image) {
      return Err(EngineError::operation(Operation::Pull, image, "manifest unknown"));
    }
    self.images.lock().unwrap().insert(image.to_string());
    Ok(())
  }

  async fn create(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
    self.record(EngineCall::Create(spec.clone()));
    self.check(Operation::Create, &spec.image)?;
    Ok(format!("fake-{}", self.next_id.fetch_add(1, Ordering::SeqCst)))
  }

  async fn start(&self, id: &str) -> Result<(), EngineError> {
    self.record(EngineCall::Start(id.to_string()));
    self.check(Operation::Start, id)?;
    let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
    self.peak.fetch_max(running, Ordering::SeqCst);
    Ok(())
  }

  async fn logs(&self, id: &str) -> Result<LogStream, EngineError> {
    self.record(EngineCall::Logs(id.to_string()));
    self.check(Operation::Logs, id)?;

    if self.broken_logs {
      let chunks = vec![
        Ok(self.log_lines.join("\n").into_bytes()),
        Err(EngineError::operation(Operation::Logs, id, "connection reset")),
      ];
      return Ok(split_lines(stream::iter(chunks)));
    }

    let lines: Vec<Result<String, EngineError>> = self.log_lines.iter().cloned().map(Ok).collect();
    let run_time = self.run_time;
    let tail = stream::once(async move { tokio::time::sleep(run_time).await }).filter_map(|_| async {
      None::<Result<String, EngineError>>
    });
    Ok(stream::iter(lines).chain(tail).boxed())
  }

  async fn wait(&self, id: &str) -> Result<i64, EngineError> {
    self.record(EngineCall::Wait(id.to_string()));
    self.check(Operation::Wait, id)?;
    Ok(self.exit_code)
  }

  async fn stop(&self, id: &str) -> Result<(), EngineError> {
    self.record(EngineCall::Stop(id.to_string()));
    self.active.fetch_sub(1, Ordering::SeqCst);
    self.check(Operation::Stop, id)
  }

  async fn remove(&self, id: &str) -> Result<(), EngineError> {
    self.record(EngineCall::Remove(id.to_string()));
    self.check(Operation::Remove, id)
  }
}

/// Sink that keeps every line it receives.
#[derive(Debug, Default)]
pub struct CollectingSink {
  lines: Mutex<Vec<(String, String)>>,
}

impl CollectingSink {
  pub fn lines(&self) -> Vec<String> {
    self.lines.lock().unwrap().iter().map(|(_, line)| line.clone()).collect()
  }

  pub fn lines_for(&self, build: &str) -> Vec<String> {
    self
      .lines
      .lock()
      .unwrap()
      .iter()
      .filter(|(b, _)| b == build)
      .map(|(_, line)| line.clone())
      .collect()
  }
}

impl LogSink for CollectingSink {
  fn line(&self, build: &str, line: &str) {
    self.lines.lock().unwrap().push((build.to_string(), line.to_string()));
  }
}
