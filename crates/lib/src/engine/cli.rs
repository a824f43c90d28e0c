use std::process::{Output, Stdio};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use super::{ContainerEngine, ContainerSpec, EngineError, LogStream, Operation, PullOptions};

/// Drives a `docker`-compatible command-line client.
#[derive(Debug, Clone)]
pub struct CliEngine {
  program: String,
}

impl CliEngine {
  pub fn new(program: impl Into<String>) -> Self {
    Self { program: program.into() }
  }

  pub fn program(&self) -> &str {
    &self.program
  }

  fn is_podman(&self) -> bool {
    std::path::Path::new(&self.program)
      .file_name()
      .is_some_and(|name| name.to_string_lossy().starts_with("podman"))
  }

  fn command(&self) -> Command {
    let mut command = Command::new(&self.program);
    command.stdin(Stdio::null()).kill_on_drop(true);
    command
  }

  async fn output(&self, mut command: Command) -> Result<Output, EngineError> {
    command.output().await.map_err(|source| EngineError::Spawn {
      program: self.program.clone(),
      source,
    })
  }

  /// Run `command`, mapping a nonzero status to an operation failure.
  async fn checked(&self, command: Command, op: Operation, target: &str) -> Result<String, EngineError> {
    let output = self.output(command).await?;
    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      return Err(EngineError::operation(op, target, stderr.trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
  }

  async fn login(&self, options: &PullOptions, image: &str) -> Result<(), EngineError> {
    let Some(creds) = &options.credentials else {
      return Ok(());
    };

    let mut command = Command::new(&self.program);
    command
      .arg("login")
      .args(["--username", creds.username.as_str(), "--password-stdin"])
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true);
    if options.insecure && self.is_podman() {
      command.arg("--tls-verify=false");
    }
    if let Some(server) = &creds.server {
      command.arg(server);
    }

    let mut child = command.spawn().map_err(|source| EngineError::Spawn {
      program: self.program.clone(),
      source,
    })?;
    if let Some(mut stdin) = child.stdin.take() {
      stdin
        .write_all(creds.password.as_bytes())
        .await
        .map_err(|e| EngineError::operation(Operation::Pull, image, e))?;
    }
    let output = child
      .wait_with_output()
      .await
      .map_err(|e| EngineError::operation(Operation::Pull, image, e))?;
    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      return Err(EngineError::operation(
        Operation::Pull,
        image,
        format!("registry login failed: {}", stderr.trim()),
      ));
    }
    Ok(())
  }
}

#[async_trait]
impl ContainerEngine for CliEngine {
  fn name(&self) -> &str {
    &self.program
  }

  async fn image_exists(&self, image: &str) -> Result<bool, EngineError> {
    let mut command = self.command();
    command.args(["image", "inspect", image]);
    let output = self.output(command).await?;
    Ok(output.status.success())
  }

  async fn pull_image(&self, image: &str, options: &PullOptions) -> Result<(), EngineError> {
    self.login(options, image).await?;

    let mut command = self.command();
    command.arg("pull");
    if options.insecure {
      if self.is_podman() {
        command.arg("--tls-verify=false");
      } else {
        warn!(image, "insecure registry requested; trust is decided by the docker daemon configuration");
      }
    }
    command.arg(image);

    self.checked(command, Operation::Pull, image).await?;
    Ok(())
  }

  async fn create(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
    let mut command = self.command();
    command.arg("create");
    if let Some(name) = &spec.name {
      command.args(["--name", name.as_str()]);
    }
    for (key, value) in &spec.labels {
      command.arg("--label").arg(format!("{key}={value}"));
    }
    for bind in &spec.binds {
      command.arg("--volume").arg(bind.to_spec());
    }
    if let Some(dir) = &spec.working_dir {
      command.args(["--workdir", dir.as_str()]);
    }

    let mut entrypoint = spec.entrypoint.iter();
    if let Some(program) = entrypoint.next() {
      command.args(["--entrypoint", program.as_str()]);
    }
    command.arg(&spec.image).args(entrypoint);

    let id = self.checked(command, Operation::Create, &spec.image).await?;
    if id.is_empty() {
      return Err(EngineError::operation(Operation::Create, &spec.image, "engine returned no container id"));
    }
    debug!(container = %id, image = %spec.image, "container created");
    Ok(id)
  }

  async fn start(&self, id: &str) -> Result<(), EngineError> {
    let mut command = self.command();
    command.args(["start", id]);
    self.checked(command, Operation::Start, id).await.map(|_| ())
  }

  async fn logs(&self, id: &str) -> Result<LogStream, EngineError> {
    let mut command = self.command();
    command
      .args(["logs", "--follow", id])
      .stdout(Stdio::piped())
      .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|source| EngineError::Spawn {
      program: self.program.clone(),
      source,
    })?;

    let missing = || EngineError::operation(Operation::Logs, id, "output pipe unavailable");
    let stdout = child.stdout.take().ok_or_else(missing)?;
    let stderr = child.stderr.take().ok_or_else(missing)?;

    let target = id.to_string();
    let out_lines = read_lines(stdout, target.clone());
    let err_lines = read_lines(stderr, target);

    // The child lives as long as the merged stream.
    let merged = stream::select(out_lines, err_lines).map(move |line| {
      let _child = &child;
      line
    });
    Ok(merged.boxed())
  }

  async fn wait(&self, id: &str) -> Result<i64, EngineError> {
    let mut command = self.command();
    command.args(["wait", id]);
    let stdout = self.checked(command, Operation::Wait, id).await?;
    stdout
      .lines()
      .last()
      .and_then(|line| line.trim().parse::<i64>().ok())
      .ok_or_else(|| EngineError::operation(Operation::Wait, id, format!("unexpected output '{stdout}'")))
  }

  async fn stop(&self, id: &str) -> Result<(), EngineError> {
    let mut command = self.command();
    command.args(["stop", id]);
    self.checked(command, Operation::Stop, id).await.map(|_| ())
  }

  async fn remove(&self, id: &str) -> Result<(), EngineError> {
    let mut command = self.command();
    command.args(["rm", "--force", id]);
    self.checked(command, Operation::Remove, id).await.map(|_| ())
  }
}

fn read_lines<R>(reader: R, target: String) -> LogStream
where
  R: AsyncRead + Unpin + Send + 'static,
{
  let lines = BufReader::new(reader).lines();
  stream::unfold((lines, target), |(mut lines, target)| async move {
    match lines.next_line().await {
      Ok(Some(line)) => Some((Ok(line), (lines, target))),
      Ok(None) => None,
      Err(e) => {
        let err = EngineError::operation(Operation::Logs, target.clone(), e);
        Some((Err(err), (lines, target)))
      }
    }
  })
  .boxed()
}
