//! Ordered start strategies.
//!
//! The start phase walks this list strictly in order; a strategy that fails to
//! spawn (or whose precondition does not hold) hands over to the next one.

use crate::detect::Manifest;
use crate::types::CommandSpec;
use serde::{Deserialize, Serialize};

/// One way of starting the dev server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartStrategy {
    /// Name used in logs
    pub name: String,

    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Manifest script that must exist for this strategy to apply
    #[serde(default)]
    pub requires_script: Option<String>,
}

impl StartStrategy {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            requires_script: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn requires_script(mut self, script: impl Into<String>) -> Self {
        self.requires_script = Some(script.into());
        self
    }

    /// Why this strategy cannot run against `manifest`, if it cannot
    pub fn precondition_failure(&self, manifest: Option<&Manifest>) -> Option<String> {
        let script = self.requires_script.as_deref()?;
        match manifest {
            Some(m) if m.has_script(script) => None,
            Some(_) => Some(format!("manifest has no '{}' script", script)),
            None => Some(format!("no readable manifest for '{}' script", script)),
        }
    }

    /// Command for this strategy scoped to `working_dir`
    pub fn command(&self, working_dir: &str) -> CommandSpec {
        CommandSpec::new(self.program.clone())
            .args(self.args.iter().cloned())
            .in_dir(working_dir)
    }
}

/// Dev script, direct dev-server binary, bare dependency runner, shell-wrapped runner
pub fn default_strategies() -> Vec<StartStrategy> {
    vec![
        StartStrategy::new("dev-script", "npm")
            .args(["run", "dev"])
            .requires_script("dev"),
        StartStrategy::new("dev-server-binary", "node")
            .args(["node_modules/vite/bin/vite.js", "--host"]),
        StartStrategy::new("dependency-runner", "npx").args(["--yes", "vite", "--host"]),
        StartStrategy::new("shell-wrapped", "sh").args(["-c", "npx --yes vite --host"]),
    ]
}
