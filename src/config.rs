//! Session configuration parsing and validation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::orchestrator::session_manager::{ExitPolicy, SessionOptions};
use crate::rpc::codec::DEFAULT_MAX_FRAME_BYTES;
use crate::rpc::spawner::SpawnSpec;
use crate::{AppError, Result};

/// Child process launch settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    /// Executable path or name resolved through `PATH`.
    pub path: PathBuf,
    /// Arguments passed after the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for the child; canonicalized during validation.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Inherit the full parent environment instead of the allowlist.
    #[serde(default = "default_true")]
    pub inherit_env: bool,
    /// Extra environment variables for the child.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Session timing and framing limits.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionSection {
    /// Budget from spawn to teardown.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Classification of early child exits.
    #[serde(default)]
    pub exit_policy: ExitPolicy,
    /// Delay between SIGTERM and SIGKILL during teardown.
    #[serde(default = "default_terminate_grace_ms")]
    pub terminate_grace_ms: u64,
    /// How long stdout is drained after the child exits.
    #[serde(default = "default_exit_drain_grace_ms")]
    pub exit_drain_grace_ms: u64,
    /// Largest accepted frame body.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Optional JSONL transcript destination.
    #[serde(default)]
    pub transcript: Option<PathBuf>,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            exit_policy: ExitPolicy::default(),
            terminate_grace_ms: default_terminate_grace_ms(),
            exit_drain_grace_ms: default_exit_drain_grace_ms(),
            max_frame_bytes: default_max_frame_bytes(),
            transcript: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_terminate_grace_ms() -> u64 {
    2_000
}

fn default_exit_drain_grace_ms() -> u64 {
    250
}

fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}

/// Configuration parsed from a session TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// What to spawn.
    pub server: ServerConfig,
    /// How long and how strictly to run.
    #[serde(default)]
    pub session: SessionSection,
}

impl SessionConfig {
    /// Configuration for `path` with default session settings.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if validation fails.
    pub fn for_server(path: impl Into<PathBuf>) -> Result<Self> {
        let mut config = Self {
            server: ServerConfig {
                path: path.into(),
                args: Vec::new(),
                working_dir: None,
                inherit_env: true,
                env: BTreeMap::new(),
            },
            session: SessionSection::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Re-check limits after fields were overridden in place.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first invalid field.
    pub fn validate(&mut self) -> Result<()> {
        if self.server.path.as_os_str().is_empty() {
            return Err(AppError::Config("server.path must not be empty".into()));
        }

        if self.session.timeout_ms == 0 {
            return Err(AppError::Config(
                "session.timeout_ms must be greater than zero".into(),
            ));
        }

        if self.session.max_frame_bytes == 0 {
            return Err(AppError::Config(
                "session.max_frame_bytes must be greater than zero".into(),
            ));
        }

        if let Some(dir) = &self.server.working_dir {
            let canonical = dir
                .canonicalize()
                .map_err(|err| AppError::Config(format!("server.working_dir invalid: {err}")))?;
            self.server.working_dir = Some(canonical);
        }

        Ok(())
    }

    /// Launch settings for the child.
    #[must_use]
    pub fn spawn_spec(&self) -> SpawnSpec {
        let mut spec = SpawnSpec::new(&self.server.path)
            .args(self.server.args.iter().cloned())
            .inherit_env(self.server.inherit_env)
            .terminate_grace(Duration::from_millis(self.session.terminate_grace_ms));
        for (key, value) in &self.server.env {
            spec = spec.env(key, value);
        }
        if let Some(dir) = &self.server.working_dir {
            spec = spec.working_dir(dir);
        }
        spec
    }

    /// Runtime session tunables.
    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            timeout: self.timeout(),
            exit_policy: self.session.exit_policy,
            max_frame_bytes: self.session.max_frame_bytes,
            exit_drain_grace: Duration::from_millis(self.session.exit_drain_grace_ms),
        }
    }

    /// Session budget.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.session.timeout_ms)
    }

    /// Transcript destination, if configured.
    #[must_use]
    pub fn transcript(&self) -> Option<&Path> {
        self.session.transcript.as_deref()
    }
}
