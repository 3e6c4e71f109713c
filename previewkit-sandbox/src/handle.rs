//! Lazily booted, shared runtime instance

use crate::error::BootError;
use crate::runtime::{RuntimeBooter, SandboxRuntime};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

type BootFuture = Shared<BoxFuture<'static, Result<Arc<dyn SandboxRuntime>, BootError>>>;

/// Owns the boot lifecycle of one runtime instance.
///
/// The first `acquire` starts the boot; callers arriving while it is in flight
/// await the same future, and later callers get the memoized outcome. A failed
/// boot stays memoized until [`RuntimeHandle::reset`].
pub struct RuntimeHandle {
    booter: Arc<dyn RuntimeBooter>,
    boot: Mutex<Option<BootFuture>>,
    boots: Arc<AtomicUsize>,
}

impl RuntimeHandle {
    pub fn new(booter: Arc<dyn RuntimeBooter>) -> Self {
        Self {
            booter,
            boot: Mutex::new(None),
            boots: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn state(&self) -> MutexGuard<'_, Option<BootFuture>> {
        self.boot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get the runtime, booting it on first use
    pub async fn acquire(&self) -> Result<Arc<dyn SandboxRuntime>, BootError> {
        let boot = {
            let mut state = self.state();
            state
                .get_or_insert_with(|| {
                    let booter = self.booter.clone();
                    let boots = self.boots.clone();
                    async move {
                        let attempt = boots.fetch_add(1, Ordering::SeqCst) + 1;
                        tracing::info!(attempt, "booting sandbox runtime");
                        let result = booter.boot().await;
                        match &result {
                            Ok(runtime) => {
                                tracing::info!(runtime = runtime.name(), "sandbox runtime ready")
                            }
                            Err(e) if e.is_fatal() => {
                                tracing::error!(error = %e, "sandbox boot failed fatally")
                            }
                            Err(e) => tracing::warn!(error = %e, "sandbox boot failed"),
                        }
                        result
                    }
                    .boxed()
                    .shared()
                })
                .clone()
        };
        boot.await
    }

    /// The runtime if boot already finished successfully
    pub fn try_get(&self) -> Option<Arc<dyn SandboxRuntime>> {
        self.state().as_ref()?.peek()?.as_ref().ok().cloned()
    }

    /// The memoized boot error, if boot finished and failed
    pub fn boot_error(&self) -> Option<BootError> {
        self.state().as_ref()?.peek()?.as_ref().err().cloned()
    }

    /// How many times the booter has actually run
    pub fn boot_count(&self) -> usize {
        self.boots.load(Ordering::SeqCst)
    }

    /// Forget the memoized boot so the next `acquire` boots again
    pub fn reset(&self) {
        if self.state().take().is_some() {
            tracing::info!("runtime handle reset");
        }
    }
}
