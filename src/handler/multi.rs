use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    AckNotification, DataUpPayload, ErrorNotification, Event, Handler, JoinNotification,
};
use crate::errors::{DeliveryFailure, Error};
use crate::storage::{self, Integration};

/// Builds a handler from the settings of a stored integration.
pub type Factory = Box<dyn Fn(&serde_json::Value) -> Result<Arc<dyn Handler>> + Send + Sync>;

/// Maps integration kinds onto the handler implementation interpreting them.
#[derive(Default)]
pub struct Registry {
    factories: HashMap<String, Factory>,
}

impl Registry {
    pub fn register(&mut self, kind: &str, f: Factory) {
        self.factories.insert(kind.to_string(), f);
    }

    /// Returns None when no handler is registered for the integration kind.
    fn build(&self, i: &Integration) -> Option<Result<Arc<dyn Handler>>> {
        self.factories.get(&i.kind).map(|f| f(&i.settings))
    }
}

/// Delivers every event to the process-wide handlers and to the handlers of
/// the integrations configured for the application of the event.
pub struct MultiHandler {
    handlers: Vec<Arc<dyn Handler>>,
    registry: Registry,
    timeout: Duration,
    closed: AtomicBool,
}

impl MultiHandler {
    pub fn new(handlers: Vec<Arc<dyn Handler>>, registry: Registry, timeout: Duration) -> Self {
        MultiHandler {
            handlers,
            registry,
            timeout,
            closed: AtomicBool::new(false),
        }
    }

    pub async fn send_data_up(&self, pl: &DataUpPayload) -> Result<(), Error> {
        self.dispatch(Event::DataUp(pl)).await
    }

    pub async fn send_join_notification(&self, pl: &JoinNotification) -> Result<(), Error> {
        self.dispatch(Event::Join(pl)).await
    }

    pub async fn send_ack_notification(&self, pl: &AckNotification) -> Result<(), Error> {
        self.dispatch(Event::Ack(pl)).await
    }

    pub async fn send_error_notification(&self, pl: &ErrorNotification) -> Result<(), Error> {
        self.dispatch(Event::Error(pl)).await
    }

    /// Checks that a handler is registered for the integration kind and that
    /// it accepts the settings.
    pub async fn validate_integration(&self, i: &Integration) -> Result<(), Error> {
        match self.registry.build(i) {
            None => Err(Error::Validation(format!(
                "unknown integration kind: {}",
                i.kind
            ))),
            Some(Err(e)) => Err(Error::Validation(format!("{:#}", e))),
            Some(Ok(h)) => {
                if let Err(e) = h.close().await {
                    warn!(backend = %h.name(), error = %e, "Closing handler failed");
                }
                Ok(())
            }
        }
    }

    /// Closes the process-wide handlers. Only the first call has an effect.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        for h in &self.handlers {
            if let Err(e) = h.close().await {
                warn!(backend = %h.name(), error = %e, "Closing handler failed");
            }
        }

        Ok(())
    }

    // Every resolved handler is attempted, failures are collected and
    // reported together once all sends have completed.
    async fn dispatch(&self, ev: Event<'_>) -> Result<(), Error> {
        let application_id = ev.application_id();
        let (integration_handlers, mut failures) = self.integration_handlers(application_id).await;

        let results = join_all(
            self.handlers
                .iter()
                .chain(integration_handlers.iter())
                .map(|h| async move {
                    let res = match tokio::time::timeout(self.timeout, ev.send_to(h.as_ref())).await
                    {
                        Ok(v) => v,
                        Err(_) => Err(anyhow!("Delivery timed out after {:?}", self.timeout)),
                    };
                    (h.name().to_string(), res)
                }),
        )
        .await;

        for (backend, res) in results {
            match res {
                Ok(()) => {
                    debug!(backend = %backend, kind = ?ev.kind(), dev_eui = %ev.dev_eui(), "Event delivered");
                }
                Err(e) => {
                    let error = format!("{:#}", e);
                    warn!(backend = %backend, kind = ?ev.kind(), dev_eui = %ev.dev_eui(), error = %error, "Event delivery failed");
                    failures.push(DeliveryFailure { backend, error });
                }
            }
        }

        for h in &integration_handlers {
            if let Err(e) = h.close().await {
                warn!(backend = %h.name(), error = %e, "Closing handler failed");
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::PartialDelivery(failures))
        }
    }

    // Integrations which can not be loaded or decoded are reported as
    // failures, they never prevent delivery to the other handlers.
    async fn integration_handlers(
        &self,
        application_id: Uuid,
    ) -> (Vec<Arc<dyn Handler>>, Vec<DeliveryFailure>) {
        let mut handlers = Vec::new();
        let mut failures = Vec::new();

        let integrations = match storage::integration::get_for_application_id(&application_id).await
        {
            Ok(v) => v,
            Err(e) => {
                warn!(application_id = %application_id, error = %e, "Loading integrations failed");
                failures.push(DeliveryFailure {
                    backend: "integrations".into(),
                    error: e.to_string(),
                });
                return (handlers, failures);
            }
        };

        for i in &integrations {
            match self.registry.build(i) {
                None => {
                    info!(application_id = %application_id, kind = %i.kind, "No handler registered for integration kind, skipping");
                }
                Some(Ok(h)) => handlers.push(h),
                Some(Err(e)) => {
                    warn!(application_id = %application_id, kind = %i.kind, error = %e, "Invalid integration settings");
                    failures.push(DeliveryFailure {
                        backend: i.kind.clone(),
                        error: format!("{:#}", e),
                    });
                }
            }
        }

        (handlers, failures)
    }
}
