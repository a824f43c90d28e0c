//! boxpack-lib: Build orchestration engine for boxpack
//!
//! This crate turns declarative package-build requests into isolated container
//! runs that produce installable OS packages:
//! - `BuildSpec`: immutable description of one package-build request
//! - `ProfileRegistry`: named pairings of container image and script template
//! - `ScriptRenderer`: template name + context -> build-script text
//! - `WorkspaceStager`: per-build directory tree mounted into the container
//! - `ContainerBuildMachine`: drives one container through its lifecycle
//! - `Builder`: runs a batch of builds concurrently with per-build isolation

pub mod build;
pub mod consts;
pub mod engine;
pub mod machine;
pub mod orchestrate;
pub mod platform;
pub mod profile;
pub mod template;
pub mod workspace;

#[cfg(test)]
pub(crate) mod util;

pub use build::{BuildError, BuildSpec, BuildSpecBuilder, Source};
pub use engine::{ContainerEngine, EngineError, EngineKind};
pub use machine::{ContainerBuildMachine, LogSink, MachineError, MachineState, TracingSink};
pub use orchestrate::{BatchReport, BuildOutcome, BuildStatus, Builder, BuilderConfig, OrchestrateError, UnitError};
pub use profile::{ProfileEntry, ProfileError, ProfileRegistry};
pub use template::{RenderContext, ScriptRenderer, SharedContext, TemplateError};
pub use workspace::{Workspace, WorkspaceError, WorkspaceStager};
