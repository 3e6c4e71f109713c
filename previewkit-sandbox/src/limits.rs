//! Phase timeout configuration for build runs

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bounds on how long each pipeline phase may take
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseLimits {
    /// Maximum time to write the mount tree into the runtime
    #[serde(with = "humantime_serde")]
    pub mount_timeout: Option<Duration>,

    /// Maximum time for a single install attempt
    #[serde(with = "humantime_serde")]
    pub install_timeout: Option<Duration>,

    /// Maximum time between spawning the start command and server readiness
    #[serde(with = "humantime_serde")]
    pub ready_timeout: Option<Duration>,
}

impl Default for PhaseLimits {
    fn default() -> Self {
        Self {
            mount_timeout: Some(Duration::from_secs(30)),
            install_timeout: Some(Duration::from_secs(300)), // 5 minutes
            ready_timeout: Some(Duration::from_secs(120)),   // 2 minutes
        }
    }
}

impl PhaseLimits {
    /// No timeouts at all (a hung install blocks the run forever!)
    pub fn unlimited() -> Self {
        Self {
            mount_timeout: None,
            install_timeout: None,
            ready_timeout: None,
        }
    }

    /// Tight limits for interactive sessions on small projects
    pub fn strict() -> Self {
        Self {
            mount_timeout: Some(Duration::from_secs(5)),
            install_timeout: Some(Duration::from_secs(60)),
            ready_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Await `fut`, bounded by `limit` when one is set
pub(crate) async fn bounded<F: std::future::Future>(
    limit: Option<Duration>,
    fut: F,
) -> Result<F::Output, tokio::time::error::Elapsed> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await,
        None => Ok(fut.await),
    }
}
