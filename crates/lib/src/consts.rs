//! Fixed names and paths shared by the workspace layout, the templates and the
//! container launch.

pub const APP_NAME: &str = "boxpack";

/// Subdirectory of a build root holding the generated script and staged inputs.
pub const SCRATCH_DIR: &str = "scratch";

/// File name of the generated build script inside the scratch directory.
pub const BUILD_SCRIPT_NAME: &str = "buildscript.sh";

/// In-container mount point of the build root.
pub const SHARED_DIR: &str = "/work";

pub const PACKAGE_BUILD_ROOT: &str = "/opt";
pub const PACKAGE_TMP_BUILD_ROOT: &str = "/tmp";

pub const PYTHON_VERSION: &str = "2.7.9";
pub const COMPILED_PYTHON_BASEDIR: &str = "/opt/boxpack-python";
pub const SYSTEM_PYTHON_BASEDIR: &str = "/usr";

pub const DEFAULT_REQUIREMENTS_PATH: &str = "/requirements.txt";
pub const DEFAULT_BRANCH: &str = "master";

/// Package-manager credential directory, relative to the invoking user's home.
pub const PIP_CONF_DIR: &str = ".pip";

/// Output directory under the data dir holding one subdirectory per build.
pub const DIST_DIR: &str = "dist";

/// Override file merged over the built-in profile catalog.
pub const LOCAL_PROFILES_FILE: &str = "profiles.json";

/// Override directory searched before the built-in templates.
pub const LOCAL_TEMPLATES_DIR: &str = "templates";

/// Mode applied to the generated build script.
///
/// World-writable for compatibility with existing build images that run the
/// script as an arbitrary user. `BuilderConfig::script_mode` narrows it.
pub const SCRIPT_MODE: u32 = 0o777;
