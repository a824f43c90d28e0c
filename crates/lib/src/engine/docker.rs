use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::container::{
  Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use futures::StreamExt;
use tracing::{debug, warn};

use super::{ContainerEngine, ContainerSpec, EngineError, LogStream, Operation, PullOptions, split_lines};

/// Docker API client over the local socket (or `DOCKER_HOST`).
#[derive(Debug, Clone)]
pub struct DockerEngine {
  docker: Docker,
}

impl DockerEngine {
  pub fn connect() -> Result<Self, EngineError> {
    let docker = Docker::connect_with_local_defaults().map_err(|e| EngineError::Connect(e.to_string()))?;
    Ok(Self { docker })
  }

  pub fn from_client(docker: Docker) -> Self {
    Self { docker }
  }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
  fn name(&self) -> &str {
    "docker"
  }

  async fn image_exists(&self, image: &str) -> Result<bool, EngineError> {
    match self.docker.inspect_image(image).await {
      Ok(_) => Ok(true),
      Err(BollardError::DockerResponseServerError { status_code: 404, .. }) => Ok(false),
      Err(e) => Err(EngineError::operation(Operation::ImageCheck, image, e)),
    }
  }

  async fn pull_image(&self, image: &str, options: &PullOptions) -> Result<(), EngineError> {
    if options.insecure {
      // The API has no per-pull TLS switch; the daemon's insecure-registries list applies.
      warn!(image, "insecure registry requested; trust is decided by the docker daemon configuration");
    }

    let credentials = options.credentials.as_ref().map(|c| DockerCredentials {
      username: Some(c.username.clone()),
      password: Some(c.password.clone()),
      serveraddress: c.server.clone(),
      ..Default::default()
    });

    let create = CreateImageOptions {
      from_image: image,
      ..Default::default()
    };

    let mut progress = self.docker.create_image(Some(create), None, credentials);
    while let Some(item) = progress.next().await {
      let info = item.map_err(|e| EngineError::operation(Operation::Pull, image, e))?;
      if let Some(message) = info.error {
        return Err(EngineError::operation(Operation::Pull, image, message));
      }
      if let Some(status) = info.status {
        debug!(image, status = %status, "pull progress");
      }
    }
    Ok(())
  }

  async fn create(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
    let host_config = HostConfig {
      binds: Some(spec.binds.iter().map(|b| b.to_spec()).collect()),
      ..Default::default()
    };

    let config = Config {
      image: Some(spec.image.clone()),
      entrypoint: Some(spec.entrypoint.clone()),
      working_dir: spec.working_dir.clone(),
      labels: Some(spec.labels.clone().into_iter().collect::<HashMap<_, _>>()),
      host_config: Some(host_config),
      ..Default::default()
    };

    let options = spec.name.as_ref().map(|name| CreateContainerOptions {
      name: name.clone(),
      ..Default::default()
    });

    let created = self
      .docker
      .create_container(options, config)
      .await
      .map_err(|e| EngineError::operation(Operation::Create, &spec.image, e))?;
    for warning in &created.warnings {
      warn!(container = %created.id, warning = %warning, "engine warning");
    }
    Ok(created.id)
  }

  async fn start(&self, id: &str) -> Result<(), EngineError> {
    self
      .docker
      .start_container(id, None::<StartContainerOptions<String>>)
      .await
      .map_err(|e| EngineError::operation(Operation::Start, id, e))
  }

  async fn logs(&self, id: &str) -> Result<LogStream, EngineError> {
    let options = LogsOptions::<String> {
      follow: true,
      stdout: true,
      stderr: true,
      ..Default::default()
    };

    let target = id.to_string();
    let chunks = self.docker.logs(id, Some(options)).map(move |item| {
      item
        .map(|output| output.into_bytes().to_vec())
        .map_err(|e| EngineError::operation(Operation::Logs, target.clone(), e))
    });
    Ok(split_lines(chunks))
  }

  async fn wait(&self, id: &str) -> Result<i64, EngineError> {
    let mut responses = self.docker.wait_container(id, None::<WaitContainerOptions<String>>);
    match responses.next().await {
      Some(Ok(response)) => Ok(response.status_code),
      // Nonzero exits surface as an error carrying the code.
      Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
      Some(Err(e)) => Err(EngineError::operation(Operation::Wait, id, e)),
      None => Err(EngineError::operation(Operation::Wait, id, "no response from engine")),
    }
  }

  async fn stop(&self, id: &str) -> Result<(), EngineError> {
    self
      .docker
      .stop_container(id, None)
      .await
      .map_err(|e| EngineError::operation(Operation::Stop, id, e))
  }

  async fn remove(&self, id: &str) -> Result<(), EngineError> {
    let options = RemoveContainerOptions {
      force: true,
      ..Default::default()
    };
    self
      .docker
      .remove_container(id, Some(options))
      .await
      .map_err(|e| EngineError::operation(Operation::Remove, id, e))
  }
}
