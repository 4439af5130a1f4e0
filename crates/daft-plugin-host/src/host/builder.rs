//! Builder for configuring PluginHost initialization.

use super::PluginHost;
use crate::backend::DynBackend;
use crate::config::HostConfig;
use crate::error::{PluginHostError, Result};
use crate::platform::{ConsentHook, PermissionGate, Platform, StoragePermissions};
use crate::sandbox::SandboxRegistry;
use crate::storage::{DynStore, MemoryStore};
use std::sync::Arc;
use tracing::debug;

/// Builder for configuring PluginHost initialization.
///
/// # Example
///
/// ```rust,ignore
/// use daft_plugin_host::{JsonFileStore, PluginHost};
///
/// let host = PluginHost::builder()
///     .backend(backend)
///     .store(Arc::new(JsonFileStore::open_default()?))
///     .consent_hook(Arc::new(|_: &PluginDescriptor| true))
///     .build()?;
/// ```
#[derive(Default)]
pub struct PluginHostBuilder {
    config: HostConfig,
    backend: Option<DynBackend>,
    store: Option<DynStore>,
    consent: Option<Arc<dyn ConsentHook>>,
    permissions: Option<Arc<dyn StoragePermissions>>,
}

impl PluginHostBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole runtime configuration.
    pub fn config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the detected platform.
    pub fn platform(mut self, platform: Platform) -> Self {
        self.config.platform = platform;
        self
    }

    /// The execution backend. Required.
    pub fn backend(mut self, backend: DynBackend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Durable store for sandbox records.
    ///
    /// Default: an in-memory store (records do not survive restarts)
    pub fn store(mut self, store: DynStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Prompt asked before provisioning sandbox storage on Android.
    pub fn consent_hook(mut self, hook: Arc<dyn ConsentHook>) -> Self {
        self.consent = Some(hook);
        self
    }

    /// OS storage permission provider, consulted on Android below the
    /// scoped storage API level.
    pub fn storage_permissions(mut self, permissions: Arc<dyn StoragePermissions>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    /// Build the host. Must be called inside a tokio runtime.
    ///
    /// Fails with [`PluginHostError::BackendUnavailable`] when no backend was
    /// supplied.
    pub fn build(self) -> Result<PluginHost> {
        self.config.validate()?;
        let platform = self.config.platform;

        let backend = self
            .backend
            .ok_or_else(|| PluginHostError::BackendUnavailable {
                platform: platform.to_string(),
            })?;

        let mut gate = PermissionGate::new(platform);
        if let Some(hook) = self.consent {
            gate = gate.with_consent_hook(hook);
        }
        if let Some(permissions) = self.permissions {
            gate = gate.with_storage_permissions(permissions);
        }

        let store = self.store.unwrap_or_else(|| {
            debug!("No store configured; sandbox records will not persist");
            Arc::new(MemoryStore::new())
        });

        let sandboxes = SandboxRegistry::new(
            Arc::clone(&backend),
            store,
            gate,
            self.config.storage_key.clone(),
            self.config.persist_debounce(),
        );

        PluginHost::new(backend, sandboxes, platform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockBackend;

    #[test]
    fn test_missing_backend_is_unavailable() {
        let result = PluginHostBuilder::new().platform(Platform::Ios).build();
        match result {
            Err(PluginHostError::BackendUnavailable { platform }) => assert_eq!(platform, "ios"),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("expected BackendUnavailable"),
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = HostConfig {
            storage_key: " ".into(),
            ..Default::default()
        };
        let result = PluginHostBuilder::new()
            .config(config)
            .backend(Arc::new(MockBackend::new()))
            .build();
        assert!(matches!(result, Err(PluginHostError::Config { .. })));
    }

    #[tokio::test]
    async fn test_build_with_defaults() {
        let host = PluginHost::builder()
            .platform(Platform::Android { api_level: 34 })
            .backend(Arc::new(MockBackend::new()))
            .build()
            .unwrap();
        assert_eq!(host.platform(), Platform::Android { api_level: 34 });
        assert!(host.instance_ids().is_empty());
    }
}
