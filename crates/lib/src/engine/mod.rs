//! Container engine seam.
//!
//! [`ContainerEngine`] is the narrow set of operations a build needs from a
//! container runtime. Two implementations ship with the library:
//!
//! - [`DockerEngine`] talks to the Docker API over the local socket
//! - [`CliEngine`] drives a `docker` or `podman` binary
//!
//! # Lifecycle
//!
//! ```text
//! image_exists → [pull_image] → create → start → logs → wait → stop → remove
//! ```

mod cli;
mod docker;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cli::CliEngine;
pub use docker::DockerEngine;

/// Live sequence of container output lines.
pub type LogStream = BoxStream<'static, Result<String, EngineError>>;

/// Engine operation, used to label failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
  ImageCheck,
  Pull,
  Create,
  Start,
  Logs,
  Wait,
  Stop,
  Remove,
}

impl fmt::Display for Operation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Operation::ImageCheck => "image check",
      Operation::Pull => "image pull",
      Operation::Create => "container create",
      Operation::Start => "container start",
      Operation::Logs => "log stream",
      Operation::Wait => "container wait",
      Operation::Stop => "container stop",
      Operation::Remove => "container remove",
    };
    f.write_str(name)
  }
}

/// Errors reported by a container engine.
#[derive(Debug, Error)]
pub enum EngineError {
  #[error("failed to connect to container engine: {0}")]
  Connect(String),

  #[error("{op} failed for {target}: {message}")]
  Operation {
    op: Operation,
    target: String,
    message: String,
  },

  #[error("failed to run {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },
}

impl EngineError {
  pub fn operation(op: Operation, target: impl Into<String>, message: impl fmt::Display) -> Self {
    EngineError::Operation {
      op,
      target: target.into(),
      message: message.to_string(),
    }
  }

  /// The failed operation, if this error came from one.
  pub fn op(&self) -> Option<Operation> {
    match self {
      EngineError::Operation { op, .. } => Some(*op),
      _ => None,
    }
  }
}

/// Host directory mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
  pub host: PathBuf,
  pub container: String,
}

impl BindMount {
  pub fn new(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
    Self {
      host: host.into(),
      container: container.into(),
    }
  }

  /// `host:container` form accepted by the Docker API and CLI.
  pub fn to_spec(&self) -> String {
    format!("{}:{}", self.host.display(), self.container)
  }
}

/// What to create and start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
  pub image: String,
  pub name: Option<String>,
  pub entrypoint: Vec<String>,
  pub working_dir: Option<String>,
  pub binds: Vec<BindMount>,
  pub labels: BTreeMap<String, String>,
}

/// Credentials for an authenticated registry pull.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCredentials {
  pub username: String,
  pub password: String,
  #[serde(default)]
  pub server: Option<String>,
}

impl fmt::Debug for RegistryCredentials {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RegistryCredentials")
      .field("username", &self.username)
      .field("password", &"<redacted>")
      .field("server", &self.server)
      .finish()
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullOptions {
  /// Registry uses a self-signed or plain-HTTP endpoint.
  pub insecure: bool,
  pub credentials: Option<RegistryCredentials>,
}

/// Operations a build needs from a container runtime.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
  /// Short name used in log lines.
  fn name(&self) -> &str;

  /// Whether `image` is present in the local image index.
  async fn image_exists(&self, image: &str) -> Result<bool, EngineError>;

  async fn pull_image(&self, image: &str, options: &PullOptions) -> Result<(), EngineError>;

  /// Create a container without starting it. Returns the container id.
  async fn create(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

  async fn start(&self, id: &str) -> Result<(), EngineError>;

  /// Follow the combined stdout/stderr of a container until it exits.
  async fn logs(&self, id: &str) -> Result<LogStream, EngineError>;

  /// Block until the container exits and return its exit code.
  async fn wait(&self, id: &str) -> Result<i64, EngineError>;

  async fn stop(&self, id: &str) -> Result<(), EngineError>;

  async fn remove(&self, id: &str) -> Result<(), EngineError>;
}

/// Which engine implementation to connect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
  /// Docker API over the local socket.
  #[default]
  Docker,
  /// `docker`/`podman` command-line client.
  Cli,
}

impl EngineKind {
  /// Connect the selected engine. `cli_program` picks the binary for
  /// [`EngineKind::Cli`] and defaults to `docker`.
  pub fn connect(self, cli_program: Option<&str>) -> Result<Arc<dyn ContainerEngine>, EngineError> {
    match self {
      EngineKind::Docker => Ok(Arc::new(DockerEngine::connect()?)),
      EngineKind::Cli => Ok(Arc::new(CliEngine::new(cli_program.unwrap_or("docker")))),
    }
  }
}

impl fmt::Display for EngineKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EngineKind::Docker => f.write_str("docker"),
      EngineKind::Cli => f.write_str("cli"),
    }
  }
}

/// Re-split a stream of raw output chunks into lines.
///
/// Engines deliver output in frames that need not align with line breaks. A
/// trailing partial line is emitted when the stream ends, and ahead of any
/// error that ends it.
pub fn split_lines<S>(chunks: S) -> LogStream
where
  S: Stream<Item = Result<Vec<u8>, EngineError>> + Send + 'static,
{
  struct State<S> {
    chunks: std::pin::Pin<Box<S>>,
    buf: Vec<u8>,
    done: bool,
    error: Option<EngineError>,
  }

  let state = State {
    chunks: Box::pin(chunks),
    buf: Vec::new(),
    done: false,
    error: None,
  };

  stream::unfold(state, |mut st| async move {
    loop {
      if let Some(pos) = st.buf.iter().position(|b| *b == b'\n') {
        let line: Vec<u8> = st.buf.drain(..=pos).collect();
        return Some((Ok(decode_line(&line)), st));
      }
      if st.done {
        if !st.buf.is_empty() {
          let line = std::mem::take(&mut st.buf);
          return Some((Ok(decode_line(&line)), st));
        }
        return st.error.take().map(|e| (Err(e), st));
      }
      match st.chunks.next().await {
        Some(Ok(chunk)) => st.buf.extend_from_slice(&chunk),
        Some(Err(e)) => {
          st.done = true;
          st.error = Some(e);
        }
        None => st.done = true,
      }
    }
  })
  .boxed()
}

fn decode_line(line: &[u8]) -> String {
  String::from_utf8_lossy(line).trim_end_matches(['\n', '\r']).to_string()
}
