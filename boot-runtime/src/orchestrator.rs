//! Per-invocation entry point.
//!
//! Every invocation makes one pass: open a capture session, load the user
//! module, dispatch the action, then drain and restore the capture
//! whatever happened. Failures become a failed [`ResultEnvelope`] that
//! still carries every line captured before the failure.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use boot_capture::{Capture, join_line};
use boot_types::{
    ActionEnvelope, ActionOutput, Args, BootError, Classification, ClientIdentity, LogBatch,
    ResultEnvelope,
};
use futures::FutureExt;
use serde_json::Value;

use crate::batch::{NotificationCollector, run_batch};
use crate::broker::Broker;
use crate::clients::{ClientManager, ClientOptions, Connection};
use crate::config::BootConfig;
use crate::discover::discover;
use crate::module::{ModuleLoader, UserModule};
use crate::{callbacks, oauth};

/// Process-wide state shared by every invocation.
///
/// Holds the broker, the memoized client connections and the capture hub.
/// Build one per process and call [`handle`](Self::handle) for each
/// invocation; warm invocations reuse the loaded module and connections.
pub struct BootContext {
    config: BootConfig,
    broker: Arc<Broker>,
    module: ModuleLoader,
    clients: ClientManager,
    capture: Capture,
    notifications: NotificationCollector,
}

impl BootContext {
    /// Create a context for `module`, capturing through `capture`.
    pub fn new(module: impl UserModule, capture: Capture, config: BootConfig) -> Self {
        let broker = Arc::new(Broker::new());
        let clients = ClientManager::new(
            Arc::clone(&broker),
            config.startup_timeout,
            config.request_timeout,
        );
        Self {
            module: ModuleLoader::new(Arc::new(module)),
            broker,
            clients,
            capture,
            notifications: NotificationCollector::new(),
            config,
        }
    }

    /// The configuration in effect.
    pub fn config(&self) -> &BootConfig {
        &self.config
    }

    /// The slots user code publishes into.
    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// The connection cache.
    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    /// The capture hub sessions are opened on.
    pub fn capture(&self) -> &Capture {
        &self.capture
    }

    /// Handle a raw JSON envelope.
    ///
    /// A malformed envelope or unknown action yields a failed result with
    /// the `invalid_request` code.
    pub async fn handle_json(&self, raw: Value) -> ResultEnvelope {
        match serde_json::from_value::<ActionEnvelope>(raw) {
            Ok(envelope) => self.handle(envelope).await,
            Err(e) => {
                tracing::warn!(error = %e, "rejecting malformed envelope");
                ResultEnvelope::failed(&BootError::from(e))
            }
        }
    }

    /// Handle one invocation.
    ///
    /// A panic anywhere in the action is reported as an execution error,
    /// with the logs captured up to that point.
    pub async fn handle(&self, envelope: ActionEnvelope) -> ResultEnvelope {
        let action = envelope.name();
        let logs: Arc<Mutex<Vec<LogBatch>>> = Arc::default();
        let sink = {
            let logs = Arc::clone(&logs);
            move |batches: Vec<LogBatch>| {
                logs.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend(batches);
            }
        };
        let session = match self.capture.begin(self.config.capture.clone(), sink) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!(action, error = %e, "running without output capture");
                None
            }
        };

        tracing::info!(action, "invocation started");
        let outcome = AssertUnwindSafe(self.dispatch(envelope))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(BootError::from_panic(&*payload)));
        let result = match outcome {
            Ok(output) => ResultEnvelope::ok(output),
            Err(err) => {
                tracing::error!(action, code = err.code(), error = %err, "invocation failed");
                self.capture.record(
                    Classification::Error,
                    &join_line([format!("{action} failed: {err}")]),
                );
                ResultEnvelope::failed(&err)
            }
        };

        if let Some(mut session) = session {
            session.drain();
            session.restore();
        }
        let logs = std::mem::take(&mut *logs.lock().unwrap_or_else(PoisonError::into_inner));
        tracing::info!(action, success = result.success, "invocation finished");
        result.with_logs(logs)
    }

    async fn dispatch(&self, envelope: ActionEnvelope) -> Result<ActionOutput, BootError> {
        self.module.ensure_loaded(&self.broker).await?;

        match envelope {
            ActionEnvelope::Discover(request) => {
                let connection = self.connect(&request.args, request.client_info).await?;
                let discovery = discover(connection.client(), self.config.request_timeout).await;
                Ok(ActionOutput::Discovery(discovery))
            }
            ActionEnvelope::ProtocolBatch(request) => {
                if request.messages.is_empty() {
                    return Err(BootError::InvalidRequest("no messages provided".into()));
                }
                let connection = self.connect(&request.args, request.client_info).await?;
                self.notifications.arm();
                let mut responses = run_batch(
                    connection.client(),
                    &request.messages,
                    self.config.request_timeout,
                )
                .await;
                if !self.config.settle_delay.is_zero() {
                    tokio::time::sleep(self.config.settle_delay).await;
                }
                responses.extend(self.notifications.disarm());
                Ok(ActionOutput::Responses(responses))
            }
            ActionEnvelope::OAuth(request) => {
                let provider = self
                    .broker
                    .credentials()
                    .get_with_timeout(self.config.handler_timeout)
                    .await;
                oauth::run(provider, request).await.map(ActionOutput::OAuth)
            }
            ActionEnvelope::Callbacks(request) => {
                let handler = self
                    .broker
                    .callbacks()
                    .get_with_timeout(self.config.handler_timeout)
                    .await;
                callbacks::run(handler, request)
                    .await
                    .map(ActionOutput::Callbacks)
            }
        }
    }

    async fn connect(
        &self,
        args: &Args,
        identity: Option<ClientIdentity>,
    ) -> Result<Arc<Connection>, BootError> {
        let identity = identity.unwrap_or_else(|| self.config.default_client.clone());
        let collector = self.notifications.clone();
        let options = ClientOptions::new(identity)
            .with_notifications(Arc::new(move |notification| collector.push(notification)));
        self.clients.get_client(args, options).await
    }
}
