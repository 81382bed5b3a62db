//! The 1.x pipeline state machine.
//!
//! ```text
//!   activate         configure           compute
//! [Inactive] ──> [Active] ──────> [Configured] ──────> [Computed]
//!                                   │    ^  ^                │
//!                                   └────┘  └── configure ───┘
//! ```
//!
//! A request that is illegal in the current state is answered with an error
//! and leaves the state untouched. A failed engine step also leaves the state
//! untouched; the engine keeps the results of its last successful step.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::{json, Value};

use super::message::{Request, Response};
use super::version::{Handshake, ProtocolVersion};
use super::versioned::{ProtocolCore, VersionedProtocol};
use super::{
    TYPE_CACHE, TYPE_CMAKE_INPUTS, TYPE_CODE_MODEL, TYPE_COMPUTE, TYPE_CONFIGURE,
    TYPE_GLOBAL_SETTINGS, TYPE_SET_GLOBAL_SETTINGS,
};
use crate::engine::SettingsUpdate;
use crate::error::{Result, ServerError};

/// Signal emitted when a successful configure invalidates earlier results
pub const SIGNAL_DIRTY: &str = "dirty";

/// Pipeline stage gating which requests are legal
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineState {
    /// Not activated
    Inactive,
    /// Activated, not configured
    Active,
    /// Configure succeeded
    Configured,
    /// Compute succeeded
    Computed,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineState::Inactive => "inactive",
            PipelineState::Active => "active",
            PipelineState::Configured => "configured",
            PipelineState::Computed => "computed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigureData {
    #[serde(default)]
    cache_arguments: Vec<String>,
}

/// Protocol 1.0: handshake, settings, configure, compute, inspect.
pub struct Protocol1_0 {
    core: ProtocolCore,
    state: PipelineState,
}

impl Default for Protocol1_0 {
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol1_0 {
    /// Create an inactive instance
    pub fn new() -> Self {
        Self {
            core: ProtocolCore::new(),
            state: PipelineState::Inactive,
        }
    }

    /// Current pipeline stage
    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn handle(&mut self, request: &Request<'_>) -> Result<Value> {
        match request.request_type() {
            TYPE_GLOBAL_SETTINGS => self.process_global_settings(),
            TYPE_SET_GLOBAL_SETTINGS => self.process_set_global_settings(request),
            TYPE_CONFIGURE => self.process_configure(request),
            TYPE_COMPUTE => self.process_compute(request),
            TYPE_CMAKE_INPUTS => self.process_cmake_inputs(),
            TYPE_CODE_MODEL => self.process_code_model(),
            other => Err(ServerError::UnknownRequest(other.to_string())),
        }
    }

    fn require_at_least(
        &self,
        wanted: PipelineState,
        request_type: &str,
        missing: &str,
    ) -> Result<()> {
        if self.state < wanted {
            return Err(ServerError::StateViolation(format!(
                "{request_type} requires a {wanted} project: {missing} has not been performed."
            )));
        }
        Ok(())
    }

    fn process_global_settings(&self) -> Result<Value> {
        self.require_at_least(PipelineState::Active, TYPE_GLOBAL_SETTINGS, "handshake")?;
        let engine = self.core.engine()?;

        let mut settings = serde_json::to_value(engine.global_settings())?;
        if let Value::Object(object) = &mut settings {
            object.insert(
                "capabilities".into(),
                serde_json::to_value(engine.capabilities())?,
            );
        }
        Ok(settings)
    }

    fn process_set_global_settings(&mut self, request: &Request<'_>) -> Result<Value> {
        if self.state != PipelineState::Active {
            return Err(ServerError::StateViolation(format!(
                "{TYPE_SET_GLOBAL_SETTINGS} is only allowed before configure: \
                 configure already performed."
            )));
        }
        let update: SettingsUpdate = serde_json::from_value(request.data().clone())
            .map_err(|e| ServerError::InvalidMessage(format!("{TYPE_SET_GLOBAL_SETTINGS}: {e}")))?;

        self.core.engine_mut()?.set_configuration(&update)?;
        Ok(json!({}))
    }

    fn process_configure(&mut self, request: &Request<'_>) -> Result<Value> {
        self.require_at_least(PipelineState::Active, TYPE_CONFIGURE, "handshake")?;
        let data: ConfigureData = serde_json::from_value(request.data().clone())
            .map_err(|e| ServerError::InvalidMessage(format!("{TYPE_CONFIGURE}: {e}")))?;

        self.core
            .engine_mut()?
            .configure(&data.cache_arguments, request)?;

        if self.state >= PipelineState::Configured {
            if let Err(err) = self.core.send_signal(SIGNAL_DIRTY, json!({})) {
                tracing::warn!(error = %err, "Dirty signal not delivered");
            }
        }
        let previous = std::mem::replace(&mut self.state, PipelineState::Configured);
        tracing::info!(from = %previous, "Configure succeeded");
        Ok(json!({}))
    }

    fn process_compute(&mut self, request: &Request<'_>) -> Result<Value> {
        match self.state {
            PipelineState::Computed => {
                return Err(ServerError::StateViolation(format!(
                    "{TYPE_COMPUTE} is only allowed once per configure: \
                     the build system was already computed."
                )))
            },
            _ => self.require_at_least(PipelineState::Configured, TYPE_COMPUTE, "configure")?,
        }

        self.core.engine_mut()?.compute(request)?;
        self.state = PipelineState::Computed;
        tracing::info!("Compute succeeded");
        Ok(json!({}))
    }

    fn process_cmake_inputs(&self) -> Result<Value> {
        self.require_at_least(PipelineState::Configured, TYPE_CMAKE_INPUTS, "configure")?;
        let engine = self.core.engine()?;
        let settings = engine.global_settings();
        let root = engine.root_directory();
        let source = Path::new(&settings.source_directory);
        let build = Path::new(&settings.build_directory);

        // (isCMake, isTemporary) -> sources
        let mut groups: BTreeMap<(bool, bool), Vec<String>> = BTreeMap::new();
        for path in engine.input_files()? {
            let is_cmake = root.as_deref().is_some_and(|r| path.starts_with(r));
            let is_temporary = path.starts_with(build);
            let shown = path.strip_prefix(source).unwrap_or(&path);
            groups
                .entry((is_cmake, is_temporary))
                .or_default()
                .push(shown.display().to_string());
        }

        let build_files: Vec<Value> = groups
            .into_iter()
            .map(|((is_cmake, is_temporary), sources)| {
                json!({"isCMake": is_cmake, "isTemporary": is_temporary, "sources": sources})
            })
            .collect();

        let mut reply = json!({
            "sourceDirectory": settings.source_directory,
            "buildDirectory": settings.build_directory,
            "buildFiles": build_files,
        });
        if let Some(root) = root {
            reply["cmakeRootDirectory"] = json!(root.display().to_string());
        }
        Ok(reply)
    }

    fn process_code_model(&self) -> Result<Value> {
        self.require_at_least(PipelineState::Computed, TYPE_CODE_MODEL, "compute")?;
        Ok(serde_json::to_value(self.core.engine()?.project_model()?)?)
    }
}

impl VersionedProtocol for Protocol1_0 {
    const VERSION: ProtocolVersion = ProtocolVersion::new(1, 0);
    const EXPERIMENTAL: bool = false;

    fn core(&self) -> &ProtocolCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ProtocolCore {
        &mut self.core
    }

    fn do_activate(&mut self, handshake: &Handshake) -> Result<()> {
        let required = |value: &Option<String>, name: &str| -> Result<String> {
            match value.as_deref() {
                Some(v) if !v.is_empty() => Ok(v.to_string()),
                _ => Err(ServerError::ActivationFailed(format!("\"{name}\" is missing."))),
            }
        };
        let build_directory = required(&handshake.build_directory, "buildDirectory")?;
        let source_directory = required(&handshake.source_directory, "sourceDirectory")?;

        let update = SettingsUpdate {
            source_directory: Some(source_directory),
            build_directory: Some(build_directory),
            generator: handshake.generator.clone(),
            extra_generator: handshake.extra_generator.clone(),
            ..Default::default()
        };
        self.core.engine_mut()?.set_configuration(&update)?;

        self.state = PipelineState::Active;
        tracing::info!(version = %Self::VERSION, "Protocol activated");
        Ok(())
    }

    fn process(&mut self, request: &Request<'_>) -> Response {
        let before = self.state;
        match self.handle(request) {
            Ok(data) => request.reply(data),
            Err(err) => {
                debug_assert_eq!(before, self.state, "failed request changed pipeline state");
                tracing::debug!(
                    request_type = request.request_type(),
                    state = %self.state,
                    error = %err,
                    "Request failed"
                );
                request.report_error(&err.to_string())
            },
        }
    }
}

/// Protocol 1.1 (experimental): 1.0 plus the `cache` request.
pub struct Protocol1_1 {
    base: Protocol1_0,
}

impl Default for Protocol1_1 {
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol1_1 {
    /// Create an inactive instance
    pub fn new() -> Self {
        Self {
            base: Protocol1_0::new(),
        }
    }

    /// Current pipeline stage
    pub fn state(&self) -> PipelineState {
        self.base.state()
    }

    fn process_cache(&self) -> Result<Value> {
        self.base
            .require_at_least(PipelineState::Configured, TYPE_CACHE, "configure")?;
        let entries = self.base.core.engine()?.cache_entries()?;
        Ok(json!({ "cache": entries }))
    }
}

impl VersionedProtocol for Protocol1_1 {
    const VERSION: ProtocolVersion = ProtocolVersion::new(1, 1);
    const EXPERIMENTAL: bool = true;

    fn core(&self) -> &ProtocolCore {
        self.base.core()
    }

    fn core_mut(&mut self) -> &mut ProtocolCore {
        self.base.core_mut()
    }

    fn do_activate(&mut self, handshake: &Handshake) -> Result<()> {
        self.base.do_activate(handshake)
    }

    fn process(&mut self, request: &Request<'_>) -> Response {
        if request.request_type() != TYPE_CACHE {
            return self.base.process(request);
        }
        match self.process_cache() {
            Ok(data) => request.reply(data),
            Err(err) => request.report_error(&err.to_string()),
        }
    }
}
