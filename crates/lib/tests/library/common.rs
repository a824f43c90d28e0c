use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use boxpack_lib::engine::{ContainerSpec, LogStream, PullOptions};
use boxpack_lib::{ContainerEngine, EngineError, LogSink};
use futures::stream::{self, StreamExt};
use tempfile::TempDir;

/// Engine double that records started containers and keeps each one
/// "running" for a fixed time.
#[derive(Debug, Default)]
pub struct RecordingEngine {
  pub run_time: Duration,
  started: Mutex<Vec<ContainerSpec>>,
  pulled: Mutex<HashSet<String>>,
  removed: Mutex<Vec<String>>,
}

impl RecordingEngine {
  pub fn with_run_time(run_time: Duration) -> Self {
    Self {
      run_time,
      ..Self::default()
    }
  }

  pub fn started(&self) -> Vec<ContainerSpec> {
    self.started.lock().unwrap().clone()
  }

  pub fn pulled(&self) -> HashSet<String> {
    self.pulled.lock().unwrap().clone()
  }

  pub fn removed(&self) -> Vec<String> {
    self.removed.lock().unwrap().clone()
  }
}

#[async_trait]
impl ContainerEngine for RecordingEngine {
  fn name(&self) -> &str {
    "recording"
  }

  async fn image_exists(&self, image: &str) -> Result<bool, EngineError> {
    Ok(self.pulled.lock().unwrap().contains(image))
  }

  async fn pull_image(&self, image: &str, _options: &PullOptions) -> Result<(), EngineError> {
    self.pulled.lock().unwrap().insert(image.to_string());
    Ok(())
  }

  async fn create(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
    let mut started = self.started.lock().unwrap();
    started.push(spec.clone());
    Ok(format!("c{}", started.len()))
  }

  async fn start(&self, _id: &str) -> Result<(), EngineError> {
    Ok(())
  }

  async fn logs(&self, id: &str) -> Result<LogStream, EngineError> {
    let run_time = self.run_time;
    let line = format!("{id}: done");
    Ok(
      stream::once(async move {
        tokio::time::sleep(run_time).await;
        Ok(line)
      })
      .boxed(),
    )
  }

  async fn wait(&self, _id: &str) -> Result<i64, EngineError> {
    Ok(0)
  }

  async fn stop(&self, _id: &str) -> Result<(), EngineError> {
    Ok(())
  }

  async fn remove(&self, id: &str) -> Result<(), EngineError> {
    self.removed.lock().unwrap().push(id.to_string());
    Ok(())
  }
}

#[derive(Debug, Default)]
pub struct MemorySink {
  lines: Mutex<Vec<String>>,
}

impl MemorySink {
  pub fn lines(&self) -> Vec<String> {
    self.lines.lock().unwrap().clone()
  }
}

impl LogSink for MemorySink {
  fn line(&self, _build: &str, line: &str) {
    self.lines.lock().unwrap().push(line.to_string());
  }
}

/// Scratch tree with a project directory, a local template and a profile
/// catalog.
pub struct Project {
  pub temp: TempDir,
}

impl Project {
  pub fn new(profiles: &str) -> Self {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    std::fs::create_dir_all(root.join("src/demo/pkg")).unwrap();
    std::fs::write(root.join("src/demo/setup.py"), "from setuptools import setup\n").unwrap();
    std::fs::write(root.join("src/demo/pkg/__init__.py"), "").unwrap();

    std::fs::create_dir_all(root.join("config/templates")).unwrap();
    std::fs::write(
      root.join("config/templates/build.sh.tmpl"),
      "#!/bin/sh\necho building {{ app }} {{ version }} from {{ scratch_dir }}\n",
    )
    .unwrap();
    std::fs::write(root.join("config/profiles.json"), profiles).unwrap();

    Self { temp }
  }

  pub fn path(&self, rel: &str) -> PathBuf {
    self.temp.path().join(rel)
  }

  pub fn source_dir(&self) -> PathBuf {
    self.path("src/demo")
  }

  pub fn dist(&self) -> PathBuf {
    self.path("dist")
  }
}

pub fn read(path: &Path) -> String {
  std::fs::read_to_string(path).unwrap()
}
