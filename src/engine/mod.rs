//! Build-engine boundary.
//!
//! The protocol never parses build scripts itself. It drives an engine
//! through [`BuildEngine`], created once per protocol activation by an
//! [`EngineFactory`].
//!
//! # Engines
//!
//! | Engine                | Backing                                       |
//! |-----------------------|-----------------------------------------------|
//! | [`FilesystemEngine`]  | Scans `CMakeLists.txt` / `*.cmake` on disk    |
//!
//! # Contract
//!
//! - `configure` and `compute` are all-or-nothing: on error the engine keeps
//!   the results of its last successful run.
//! - Long-running steps report through the [`Reporter`] they are handed.
//! - Accessors for results that do not exist yet return
//!   [`ServerError::Engine`](crate::error::ServerError::Engine).

mod filesystem;
mod model;
mod script;

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use filesystem::{FilesystemEngine, FilesystemEngineFactory, MODEL_FILE_NAME};
pub use model::{
    CacheEntry, ConfigurationModel, FileGroup, ProjectInfo, ProjectModel, TargetInfo, TargetType,
};
pub use script::{parse_script, ScriptSummary, ScriptTarget};

use crate::error::Result;
use crate::protocol::{Handshake, Reporter};

/// Engine configuration visible through `globalSettings`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSettings {
    /// Directory holding the top-level build script
    pub source_directory: String,
    /// Directory receiving generated output
    pub build_directory: String,
    /// Generator name
    pub generator: String,
    /// Secondary generator name
    pub extra_generator: String,
    /// Verbose engine diagnostics
    pub debug_output: bool,
    /// Trace script execution
    pub trace: bool,
    /// Trace with variables expanded
    pub trace_expand: bool,
    /// Warn on uninitialized variables
    pub warn_uninitialized: bool,
    /// Warn on unused variables
    pub warn_unused: bool,
    /// Warn on unused command-line variables
    pub warn_unused_cli: bool,
    /// Check system variables
    pub check_system_vars: bool,
}

/// Partial update accepted by `setGlobalSettings`; absent fields are kept
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    /// New source directory
    #[serde(default)]
    pub source_directory: Option<String>,
    /// New build directory
    #[serde(default)]
    pub build_directory: Option<String>,
    /// New generator
    #[serde(default)]
    pub generator: Option<String>,
    /// New secondary generator
    #[serde(default)]
    pub extra_generator: Option<String>,
    /// Toggle debug output
    #[serde(default)]
    pub debug_output: Option<bool>,
    /// Toggle tracing
    #[serde(default)]
    pub trace: Option<bool>,
    /// Toggle expanded tracing
    #[serde(default)]
    pub trace_expand: Option<bool>,
    /// Toggle uninitialized-variable warnings
    #[serde(default)]
    pub warn_uninitialized: Option<bool>,
    /// Toggle unused-variable warnings
    #[serde(default)]
    pub warn_unused: Option<bool>,
    /// Toggle unused command-line variable warnings
    #[serde(default)]
    pub warn_unused_cli: Option<bool>,
    /// Toggle system variable checks
    #[serde(default)]
    pub check_system_vars: Option<bool>,
}

impl SettingsUpdate {
    /// Apply every present field onto `settings`
    pub fn apply_to(&self, settings: &mut GlobalSettings) {
        fn set<T: Clone>(target: &mut T, value: Option<&T>) {
            if let Some(v) = value {
                *target = v.clone();
            }
        }

        set(&mut settings.source_directory, self.source_directory.as_ref());
        set(&mut settings.build_directory, self.build_directory.as_ref());
        set(&mut settings.generator, self.generator.as_ref());
        set(&mut settings.extra_generator, self.extra_generator.as_ref());
        set(&mut settings.debug_output, self.debug_output.as_ref());
        set(&mut settings.trace, self.trace.as_ref());
        set(&mut settings.trace_expand, self.trace_expand.as_ref());
        set(&mut settings.warn_uninitialized, self.warn_uninitialized.as_ref());
        set(&mut settings.warn_unused, self.warn_unused.as_ref());
        set(&mut settings.warn_unused_cli, self.warn_unused_cli.as_ref());
        set(&mut settings.check_system_vars, self.check_system_vars.as_ref());
    }

    /// True if no field is present
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Static engine description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineCapabilities {
    /// Engine version string
    pub version: String,
    /// Generators the engine knows by name
    pub generators: Vec<String>,
}

/// Operations the protocol needs from a build engine.
pub trait BuildEngine: Send {
    /// Static engine description
    fn capabilities(&self) -> EngineCapabilities;

    /// Snapshot of the current configuration
    fn global_settings(&self) -> GlobalSettings;

    /// Change configuration before the first configure
    fn set_configuration(&mut self, update: &SettingsUpdate) -> Result<()>;

    /// Run the configure step with cache arguments
    fn configure(&mut self, arguments: &[String], reporter: &dyn Reporter) -> Result<()>;

    /// Run the generate/compute step
    fn compute(&mut self, reporter: &dyn Reporter) -> Result<()>;

    /// Model produced by the last successful compute
    fn project_model(&self) -> Result<ProjectModel>;

    /// Files read by the last successful configure, in read order
    fn input_files(&self) -> Result<Vec<PathBuf>>;

    /// Cache written by the last successful configure
    fn cache_entries(&self) -> Result<Vec<CacheEntry>>;

    /// Directory holding files that ship with the engine itself, if any
    fn root_directory(&self) -> Option<PathBuf> {
        None
    }
}

/// Creates the engine a protocol owns after activation.
pub trait EngineFactory: Send + Sync {
    /// Build a fresh engine for the given handshake
    fn create(&self, handshake: &Handshake) -> Result<Box<dyn BuildEngine>>;
}

impl<F> EngineFactory for F
where
    F: Fn(&Handshake) -> Result<Box<dyn BuildEngine>> + Send + Sync,
{
    fn create(&self, handshake: &Handshake) -> Result<Box<dyn BuildEngine>> {
        self(handshake)
    }
}

/// Shared factory handle
pub type SharedEngineFactory = Arc<dyn EngineFactory>;
