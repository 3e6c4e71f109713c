//! Orchestrator configuration
//!
//! Every section is optional; an empty file yields the defaults below.
//!
//! ```toml
//! static_fallback = true
//!
//! [limits]
//! install_timeout = "3m"
//!
//! [install]
//! program = "pnpm"
//! args = ["install"]
//!
//! [[start.strategies]]
//! name = "dev-script"
//! program = "pnpm"
//! args = ["run", "dev"]
//! requires_script = "dev"
//! ```

use crate::error::ConfigError;
use crate::limits::PhaseLimits;
use crate::strategy::{default_strategies, StartStrategy};
use crate::types::CommandSpec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Render static file sets as self-contained documents without the sandbox
    pub static_fallback: bool,

    /// Also serve static file sets from the sandbox's static server
    pub serve_static_in_sandbox: bool,

    pub limits: PhaseLimits,
    pub install: CommandSpec,
    pub start: StartConfig,
    pub logs: LogConfig,
    pub detector: DetectorConfig,
    pub preview: PreviewConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            static_fallback: true,
            serve_static_in_sandbox: false,
            limits: PhaseLimits::default(),
            install: CommandSpec::new("npm").args(["install", "--no-audit", "--no-fund"]),
            start: StartConfig::default(),
            logs: LogConfig::default(),
            detector: DetectorConfig::default(),
            preview: PreviewConfig::default(),
        }
    }
}

/// Start-phase configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartConfig {
    /// Ordered start strategies; tried strictly in sequence
    pub strategies: Vec<StartStrategy>,

    /// Generic static file server used for static file sets
    pub static_server: CommandSpec,
}

impl Default for StartConfig {
    fn default() -> Self {
        Self {
            strategies: default_strategies(),
            static_server: CommandSpec::new("npx").args([
                "--yes",
                "http-server",
                "-p",
                "8080",
                "-c-1",
                ".",
            ]),
        }
    }
}

/// Log buffering configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Maximum lines retained per run (oldest dropped first)
    pub capacity: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { capacity: 2000 }
    }
}

/// Project type detection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Dependency manifest file name
    pub manifest_name: String,

    /// Conventional names of browser-preview subfolders inside native projects
    pub preview_dirs: Vec<String>,

    /// File names that mark a native app target
    pub native_manifests: Vec<String>,

    /// Content fragments (imports) that mark a native app target
    pub native_import_markers: Vec<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            manifest_name: "package.json".to_string(),
            preview_dirs: ["web", "preview", "web-preview", "browser", "webapp"]
                .into_iter()
                .map(String::from)
                .collect(),
            native_manifests: [
                "app.json",
                "eas.json",
                "pubspec.yaml",
                "AndroidManifest.xml",
                "Podfile",
                "metro.config.js",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            native_import_markers: [
                "from 'react-native'",
                "from \"react-native\"",
                "require('react-native')",
                "require(\"react-native\")",
                "from 'expo",
                "from \"expo",
                "package:flutter/",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// Preview channel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// How many times SET_MODE is sent before the surface acknowledges readiness
    pub set_mode_attempts: u32,

    /// Fixed delay between SET_MODE attempts
    #[serde(with = "humantime_serde")]
    pub set_mode_backoff: Duration,

    /// Picked-element text is truncated to this many characters
    pub text_preview_chars: usize,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            set_mode_attempts: 5,
            set_mode_backoff: Duration::from_millis(250),
            text_preview_chars: 80,
        }
    }
}

impl OrchestratorConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: OrchestratorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Load from `path` when given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Reject settings the orchestrator cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start.strategies.is_empty() {
            return Err(ConfigError::Invalid(
                "start.strategies must list at least one strategy".to_string(),
            ));
        }
        if self.install.program.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "install.program must not be empty".to_string(),
            ));
        }
        if self.logs.capacity == 0 {
            return Err(ConfigError::Invalid(
                "logs.capacity must be greater than zero".to_string(),
            ));
        }
        if self.preview.set_mode_attempts == 0 {
            return Err(ConfigError::Invalid(
                "preview.set_mode_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
