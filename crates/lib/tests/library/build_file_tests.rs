use boxpack_lib::build::{BuildFile, ConfigurationError};
use boxpack_lib::{ProfileRegistry, RenderContext, ScriptRenderer, SharedContext, Source};
use serial_test::serial;

use super::common::Project;

#[test]
#[serial]
fn version_reads_environment_at_load() {
  let file = BuildFile::from_yaml_str(
    r#"
builds:
  - app: demo
    version: "1.0.${BOXPACK_TEST_BUILD}"
    source: { type: git, uri: "https://example.com/demo.git" }
    profile: ubuntu-trusty
"#,
  )
  .unwrap();

  let specs = temp_env::with_var("BOXPACK_TEST_BUILD", Some("42"), || file.clone().into_specs()).unwrap();
  assert_eq!(specs[0].version(), "1.0.42");
  assert_eq!(specs[0].safe_dirname(), "demo-1.0.42-ubuntu-trusty");
  assert_eq!(
    specs[0].source(),
    &Source::Git {
      uri: "https://example.com/demo".into(),
      branch: "master".into()
    }
  );

  let err = temp_env::with_var_unset("BOXPACK_TEST_BUILD", || file.into_specs()).unwrap_err();
  assert!(matches!(err, ConfigurationError::Entry { index: 0, .. }));
  assert!(err.to_string().contains("BOXPACK_TEST_BUILD"));
}

#[test]
fn unknown_keys_are_rejected() {
  let err = BuildFile::from_yaml_str(
    r#"
builds:
  - app: demo
    version: "1.0"
    source: { type: directory, path: /srv/demo }
    profile: p1
    shiny: true
"#,
  )
  .unwrap_err();
  assert!(matches!(err, ConfigurationError::Parse(_)));
}

#[test]
fn builtin_profiles_render_builtin_scripts() {
  let project = Project::new("{}");
  let registry = ProfileRegistry::builtin().unwrap();
  let renderer = ScriptRenderer::default();
  let shared = SharedContext::new("/work").with_ids(1000, 1000);

  let specs = BuildFile::from_yaml_str(&format!(
    r#"
builds:
  - app: demo
    version: "1.0"
    source: {{ type: directory, path: "{}" }}
    profile: debian-jessie
    runtime_deps: [libssl1.0.0, libffi6]
    fpm_args: --maintainer ops@example.com
"#,
    project.source_dir().display()
  ))
  .unwrap()
  .into_specs()
  .unwrap();

  let profile = registry.resolve(specs[0].profile()).unwrap();
  assert_eq!(profile.image, "debian:8");

  let script = renderer
    .render(&profile.script, &RenderContext::new(&specs[0], &shared))
    .unwrap();
  assert!(script.starts_with("#!"));
  assert!(script.contains("apt-get"));
  assert!(script.contains("--depends libssl1.0.0"));
  assert!(script.contains("--depends libffi6"));
  assert!(script.contains("--maintainer ops@example.com"));
  assert!(script.contains("chown -R 1000:1000 /work"));
  assert!(script.contains("/work/scratch/demo"));
}
