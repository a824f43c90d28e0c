use std::sync::Arc;
use std::time::{Duration, Instant};

use boxpack_lib::build::BuildFile;
use boxpack_lib::engine::BindMount;
use boxpack_lib::{
  BuildSpec, Builder, BuilderConfig, BuildStatus, ContainerEngine, OrchestrateError, SharedContext, Source,
};

use super::common::{MemorySink, Project, RecordingEngine, read};

const PROFILES: &str = r#"{
  "p1": {"image": "img:tag", "script": "build.sh.tmpl"},
  "p2": {"image": "img:two", "script": "build.sh.tmpl"},
  "p3": {"image": "img:three", "script": "build.sh.tmpl"}
}"#;

fn config(project: &Project, parallelism: usize) -> BuilderConfig {
  BuilderConfig {
    local_profiles: Some(project.path("config/profiles.json")),
    local_templates: Some(project.path("config/templates")),
    home_dir: project.path("home"),
    parallelism,
    ..BuilderConfig::with_base_dir(project.dist())
  }
}

fn builder(config: BuilderConfig, engine: &Arc<RecordingEngine>, sink: &Arc<MemorySink>) -> Builder {
  let engine: Arc<dyn ContainerEngine> = engine.clone();
  Builder::new(config, engine)
    .with_sink(sink.clone())
    .with_shared_context(SharedContext::new("/work").with_ids(1000, 1000))
}

fn demo(project: &Project, profile: &str) -> BuildSpec {
  BuildSpec::builder("demo", "1.0", Source::directory(project.source_dir()), profile)
    .build_with(|_| None)
    .unwrap()
}

#[tokio::test]
async fn single_build_end_to_end() {
  let project = Project::new(PROFILES);
  let engine = Arc::new(RecordingEngine::default());
  let sink = Arc::new(MemorySink::default());
  let mut b = builder(config(&project, 0), &engine, &sink);
  b.add(demo(&project, "p1"));

  let report = b.run().await.unwrap();
  assert!(report.is_success());

  let root = project.dist().join("demo-1.0-p1");
  assert_eq!(report.outcomes[0].build_dir, root);

  let script = read(&root.join("scratch/buildscript.sh"));
  assert_eq!(script, "#!/bin/sh\necho building demo 1.0 from /work/scratch\n");
  assert!(root.join("scratch/demo/setup.py").is_file());
  assert!(root.join("scratch/demo/pkg/__init__.py").is_file());

  let started = engine.started();
  assert_eq!(started.len(), 1);
  assert_eq!(started[0].image, "img:tag");
  assert_eq!(started[0].binds, vec![BindMount::new(&root, "/work")]);
  assert_eq!(started[0].entrypoint, vec!["/work/scratch/buildscript.sh".to_string()]);
  assert!(engine.pulled().contains("img:tag"));
  assert_eq!(engine.removed(), vec!["c1".to_string()]);
  assert_eq!(sink.lines(), vec!["c1: done".to_string()]);
}

#[cfg(unix)]
#[tokio::test]
async fn staged_script_is_executable() {
  use std::os::unix::fs::PermissionsExt;

  let project = Project::new(PROFILES);
  let engine = Arc::new(RecordingEngine::default());
  let sink = Arc::new(MemorySink::default());
  let mut b = builder(config(&project, 0), &engine, &sink);
  b.add(demo(&project, "p1"));
  b.run().await.unwrap();

  let script = project.dist().join("demo-1.0-p1/scratch/buildscript.sh");
  let mode = std::fs::metadata(script).unwrap().permissions().mode();
  assert_eq!(mode & 0o777, 0o777);
}

#[tokio::test]
async fn builds_run_concurrently_in_separate_roots() {
  let project = Project::new(PROFILES);
  let run_time = Duration::from_millis(300);
  let engine = Arc::new(RecordingEngine::with_run_time(run_time));
  let sink = Arc::new(MemorySink::default());
  let mut b = builder(config(&project, 0), &engine, &sink);
  for profile in ["p1", "p2", "p3"] {
    b.add(demo(&project, profile));
  }

  let started = Instant::now();
  let report = b.run().await.unwrap();
  let elapsed = started.elapsed();

  assert!(report.is_success());
  assert!(elapsed < run_time * 3, "batch took {elapsed:?}");

  for profile in ["p1", "p2", "p3"] {
    assert!(project.dist().join(format!("demo-1.0-{profile}/scratch/buildscript.sh")).is_file());
  }
  let mut images: Vec<_> = engine.started().into_iter().map(|s| s.image).collect();
  images.sort();
  assert_eq!(images, vec!["img:tag", "img:three", "img:two"]);
  assert_eq!(engine.removed().len(), 3);

  let labels: Vec<_> = report.outcomes.iter().map(|o| o.profile.as_str()).collect();
  assert_eq!(labels, vec!["p1", "p2", "p3"]);
}

#[tokio::test]
async fn default_config_does_not_serialize_builds() {
  let project = Project::new(PROFILES);
  let run_time = Duration::from_millis(300);
  let engine = Arc::new(RecordingEngine::with_run_time(run_time));
  let sink = Arc::new(MemorySink::default());
  let config = BuilderConfig {
    local_profiles: Some(project.path("config/profiles.json")),
    local_templates: Some(project.path("config/templates")),
    home_dir: project.path("home"),
    ..BuilderConfig::with_base_dir(project.dist())
  };
  assert_eq!(config.parallelism, 0);

  let mut b = builder(config, &engine, &sink);
  for profile in ["p1", "p2", "p3"] {
    b.add(demo(&project, profile));
  }

  let started = Instant::now();
  let report = b.run().await.unwrap();
  let elapsed = started.elapsed();

  assert!(report.is_success());
  assert!(elapsed < run_time * 3, "batch took {elapsed:?}");
}

#[tokio::test]
async fn local_profile_overrides_builtin() {
  let project = Project::new(r#"{"ubuntu-trusty": {"image": "mirror/ubuntu:14.04", "script": "build.sh.tmpl"}}"#);
  let engine = Arc::new(RecordingEngine::default());
  let sink = Arc::new(MemorySink::default());
  let mut b = builder(config(&project, 1), &engine, &sink);
  b.add(demo(&project, "ubuntu-trusty")).add(demo(&project, "centos7"));

  let report = b.run().await.unwrap();
  assert!(report.is_success());

  let started = engine.started();
  assert!(started.iter().any(|s| s.image == "mirror/ubuntu:14.04"));
  assert!(started.iter().any(|s| s.image == "centos:7"));

  let centos_script = read(&project.dist().join("demo-1.0-centos7/scratch/buildscript.sh"));
  assert!(centos_script.contains("yum"));
  assert!(centos_script.contains("-t rpm"));
}

#[tokio::test]
async fn stale_output_is_cleared() {
  let project = Project::new(PROFILES);
  std::fs::create_dir_all(project.dist().join("old-build")).unwrap();
  std::fs::write(project.dist().join("old-build/leftover.deb"), "").unwrap();

  let engine = Arc::new(RecordingEngine::default());
  let sink = Arc::new(MemorySink::default());
  let mut b = builder(config(&project, 0), &engine, &sink);
  b.add(demo(&project, "p1"));
  b.run().await.unwrap();

  assert!(!project.dist().join("old-build").exists());
  assert!(project.dist().join("demo-1.0-p1").is_dir());
}

#[tokio::test]
async fn failed_build_is_reported_alongside_successes() {
  let project = Project::new(PROFILES);
  let engine = Arc::new(RecordingEngine::default());
  let sink = Arc::new(MemorySink::default());
  let mut b = builder(config(&project, 0), &engine, &sink);
  b.add(demo(&project, "p1"));
  b.add(
    BuildSpec::builder("ghost", "1.0", Source::directory(project.path("src/missing")), "p2")
      .build_with(|_| None)
      .unwrap(),
  );

  let report = b.run().await.unwrap();
  assert!(!report.is_success());
  assert_eq!(report.succeeded(), 1);
  assert!(matches!(report.outcomes[0].status, BuildStatus::Completed { .. }));
  let failed: Vec<_> = report.failed().map(|o| o.label.as_str()).collect();
  assert_eq!(failed, vec!["ghost-1.0-p2"]);
  assert_eq!(engine.started().len(), 1);
}

#[tokio::test]
async fn empty_batch_is_an_error() {
  let project = Project::new(PROFILES);
  let engine = Arc::new(RecordingEngine::default());
  let sink = Arc::new(MemorySink::default());
  let err = builder(config(&project, 0), &engine, &sink).run().await.unwrap_err();
  assert!(matches!(err, OrchestrateError::NoBuildsFound));
  assert!(!project.dist().exists());
}

#[tokio::test]
async fn build_file_feeds_builder() {
  let project = Project::new(PROFILES);
  std::fs::write(
    project.path("builds.yml"),
    r#"
builds:
  - app: demo
    version: 1.0
    source: { type: directory, path: src/demo }
    profile: p1
  - app: demo
    version: "1.0"
    source: { type: git, uri: "https://example.com/demo.git", branch: main }
    profile: p2
"#,
  )
  .unwrap();

  let specs = BuildFile::load(&project.path("builds.yml")).unwrap().into_specs().unwrap();
  let engine = Arc::new(RecordingEngine::default());
  let sink = Arc::new(MemorySink::default());
  let mut b = builder(config(&project, 0), &engine, &sink);
  for spec in specs {
    b.add(spec);
  }

  let report = b.run().await.unwrap();
  assert!(report.is_success());
  assert!(project.dist().join("demo-1.0-p1/scratch/demo/setup.py").is_file());
  assert!(!project.dist().join("demo-1.0-p2/scratch/demo").exists());
}
