//! Execution backend contract.
//!
//! The execution backend is the out-of-process (or native in-process) runtime
//! that actually loads and runs plugin code. The host only talks to it through
//! [`ExecutionBackend`]; the trait carries no logic of its own.
//!
//! Backends push crash and permission notifications on a broadcast channel.
//! [`BackendEvents`] is the sending half implementations can embed.

use crate::config::EventConfig;
use crate::error::BackendError;
use crate::models::{
    AutomationPoint, BackendEvent, FactoryPreset, InstanceHandle, InstantiateOptions,
    PluginDescriptor, PluginFormat,
};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Result type for backend calls.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Narrow async contract to the plugin execution runtime.
///
/// Instance-scoped calls take the *backend* instance id, except
/// [`acknowledge_crash`](ExecutionBackend::acknowledge_crash), which takes the
/// logical id carried by the crash notification.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Enumerate installed plugins, optionally filtered by format.
    async fn list_plugins(
        &self,
        format: Option<PluginFormat>,
    ) -> BackendResult<Vec<PluginDescriptor>>;

    /// Instantiate a plugin by identifier.
    async fn instantiate(
        &self,
        identifier: &str,
        options: &InstantiateOptions,
    ) -> BackendResult<InstanceHandle>;

    /// Stop and free a backend instance.
    async fn release(&self, backend_instance_id: &str) -> BackendResult<()>;

    async fn load_preset(
        &self,
        backend_instance_id: &str,
        preset: &FactoryPreset,
    ) -> BackendResult<()>;

    async fn set_parameter(
        &self,
        backend_instance_id: &str,
        parameter_id: &str,
        value: f64,
    ) -> BackendResult<()>;

    /// Hand an automation envelope to the backend. Ordering and
    /// interpolation are the backend's business.
    async fn schedule_automation(
        &self,
        backend_instance_id: &str,
        parameter_id: &str,
        points: &[AutomationPoint],
    ) -> BackendResult<()>;

    /// Create (or locate) the sandbox directory for a plugin identifier.
    async fn provision_sandbox(&self, identifier: &str) -> BackendResult<PathBuf>;

    /// Tell the backend a crash notification was received.
    async fn acknowledge_crash(&self, instance_id: &str) -> BackendResult<()>;

    /// Register for backend events. Each receiver sees every event sent
    /// after it subscribed.
    fn subscribe(&self) -> broadcast::Receiver<BackendEvent>;
}

/// Shared handle to a backend.
pub type DynBackend = Arc<dyn ExecutionBackend>;

/// Sending half of the backend event channel.
#[derive(Debug, Clone)]
pub struct BackendEvents {
    tx: broadcast::Sender<BackendEvent>,
}

impl BackendEvents {
    pub fn new() -> Self {
        Self::with_capacity(EventConfig::CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Deliver an event to every current subscriber. Returns the number of
    /// subscribers reached; events sent with no subscriber are dropped.
    pub fn emit(&self, event: BackendEvent) -> usize {
        match self.tx.send(event) {
            Ok(count) => count,
            Err(_) => {
                debug!("Backend event dropped: no subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BackendEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BackendEvents {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SandboxPermissionRequest;

    fn permission_event() -> BackendEvent {
        BackendEvent::SandboxPermissionRequired(SandboxPermissionRequest {
            identifier: "com.x.echo".into(),
            required_entitlements: vec!["storage".into()],
            reason: "first launch".into(),
        })
    }

    #[test]
    fn test_emit_without_subscribers() {
        let events = BackendEvents::new();
        assert_eq!(events.emit(permission_event()), 0);
    }

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let events = BackendEvents::new();
        let mut a = events.subscribe();
        let mut b = events.subscribe();
        assert_eq!(events.subscriber_count(), 2);
        assert_eq!(events.emit(permission_event()), 2);
        assert_eq!(a.recv().await.unwrap(), permission_event());
        assert_eq!(b.recv().await.unwrap(), permission_event());
    }
}
