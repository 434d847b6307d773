//! The user module contract and its once-per-process loader.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use boot_types::{BootError, HandlerResult};
use tokio::sync::OnceCell;

use crate::broker::Broker;

/// User code packaged with the function.
///
/// `load` runs once per process. It is expected to publish a server into
/// the broker, either before returning or from a task it spawns, and may
/// publish an OAuth provider and a callback handler as well. Values it
/// never publishes are treated as absent features.
#[async_trait]
pub trait UserModule: Send + Sync + 'static {
    /// Initialize the module.
    async fn load(&self, broker: Arc<Broker>) -> HandlerResult<()>;
}

/// A [`UserModule`] backed by an async closure.
pub struct FnModule<F>(F);

/// Wrap an async closure as a [`UserModule`].
///
/// ```
/// use boot_runtime::module_fn;
///
/// let module = module_fn(|broker| async move {
///     let _ = broker;
///     Ok(())
/// });
/// # let _ = module;
/// ```
pub fn module_fn<F, Fut>(load: F) -> FnModule<F>
where
    F: Fn(Arc<Broker>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<()>> + Send + 'static,
{
    FnModule(load)
}

#[async_trait]
impl<F, Fut> UserModule for FnModule<F>
where
    F: Fn(Arc<Broker>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<()>> + Send + 'static,
{
    async fn load(&self, broker: Arc<Broker>) -> HandlerResult<()> {
        (self.0)(broker).await
    }
}

/// Loads a [`UserModule`] at most once successfully.
///
/// Concurrent callers share one load. A failed load is not cached and is
/// attempted again by the next caller.
pub(crate) struct ModuleLoader {
    module: Arc<dyn UserModule>,
    loaded: OnceCell<()>,
}

impl ModuleLoader {
    pub(crate) fn new(module: Arc<dyn UserModule>) -> Self {
        Self {
            module,
            loaded: OnceCell::new(),
        }
    }

    pub(crate) async fn ensure_loaded(&self, broker: &Arc<Broker>) -> Result<(), BootError> {
        self.loaded
            .get_or_try_init(|| async {
                tracing::debug!("loading user module");
                self.module
                    .load(Arc::clone(broker))
                    .await
                    .map_err(|e| BootError::Module(e.to_string()))
            })
            .await
            .map(|_| ())
    }

    pub(crate) fn is_loaded(&self) -> bool {
        self.loaded.initialized()
    }
}
