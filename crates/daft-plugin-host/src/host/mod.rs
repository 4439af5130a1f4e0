//! Plugin instance lifecycle manager.
//!
//! [`PluginHost`] owns the binding from each logical instance id to the
//! backend instance currently serving it. It loads, releases and drives
//! instances through the [`ExecutionBackend`](crate::backend::ExecutionBackend),
//! and pumps backend events to recover crashed instances and notify
//! listeners.

mod builder;
mod crash;
mod listeners;

pub use builder::PluginHostBuilder;
pub use listeners::{Listener, Subscription};

use crate::backend::DynBackend;
use crate::error::{PluginHostError, Result};
use crate::models::{
    AutomationPoint, BackendEvent, CrashReport, InstanceBinding, InstanceHandle, InstanceState,
    InstantiateOptions, PluginDescriptor, PluginFormat, SandboxPermissionRequest,
};
use crate::platform::Platform;
use crate::sandbox::{SandboxRecord, SandboxRegistry};
use futures::FutureExt;
use listeners::ListenerSet;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// State shared between the host handle and its event pump.
pub(crate) struct HostInner {
    backend: DynBackend,
    platform: Platform,
    sandboxes: SandboxRegistry,
    bindings: Mutex<HashMap<String, InstanceBinding>>,
    descriptors: RwLock<HashMap<String, PluginDescriptor>>,
    crash_listeners: ListenerSet<CrashReport>,
    permission_listeners: ListenerSet<SandboxPermissionRequest>,
}

impl HostInner {
    fn bindings(&self) -> MutexGuard<'_, HashMap<String, InstanceBinding>> {
        self.bindings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn binding(&self, instance_id: &str) -> Result<InstanceBinding> {
        self.bindings()
            .get(instance_id)
            .cloned()
            .ok_or_else(|| PluginHostError::unknown_instance(instance_id))
    }

    fn backend_id(&self, instance_id: &str) -> Result<String> {
        self.bindings()
            .get(instance_id)
            .map(|b| b.backend_instance_id.clone())
            .ok_or_else(|| PluginHostError::unknown_instance(instance_id))
    }

    /// Swap a restarted backend instance into the binding. Hands the handle
    /// back if the binding was removed while the restart was in flight.
    fn apply_restart(
        &self,
        instance_id: &str,
        handle: InstanceHandle,
    ) -> std::result::Result<(), InstanceHandle> {
        match self.bindings().get_mut(instance_id) {
            Some(binding) => {
                binding.apply_restart(handle);
                Ok(())
            }
            None => Err(handle),
        }
    }

    /// Release a backend instance nobody is bound to anymore.
    async fn release_orphan(&self, instance_id: &str, handle: InstanceHandle) {
        let backend_id = handle.backend_instance_id();
        warn!(
            "Instance {} was released during restart; releasing orphaned backend instance {}",
            instance_id, backend_id
        );
        if let Err(e) = self.backend.release(backend_id).await {
            warn!("Failed to release orphaned instance {}: {}", backend_id, e);
        }
    }

    /// Process one backend event.
    pub(crate) async fn handle_event(&self, event: BackendEvent) {
        match event {
            BackendEvent::PluginCrashed(crash) => self.handle_crash(crash).await,
            BackendEvent::SandboxPermissionRequired(request) => {
                info!(
                    "Backend requests sandbox entitlements for {}: {}",
                    request.identifier, request.reason
                );
                let delivered = self.permission_listeners.dispatch(&request);
                debug!("Delivered permission request to {} listeners", delivered);
            }
        }
    }
}

async fn run_event_pump(inner: Arc<HostInner>, mut events: broadcast::Receiver<BackendEvent>) {
    debug!("Backend event pump started");
    loop {
        match events.recv().await {
            Ok(event) => {
                let handled = AssertUnwindSafe(inner.handle_event(event))
                    .catch_unwind()
                    .await;
                if handled.is_err() {
                    error!("Backend event handler panicked; continuing with the next event");
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("Backend event pump lagged; {} events were dropped", skipped);
            }
            Err(RecvError::Closed) => {
                debug!("Backend event channel closed");
                break;
            }
        }
    }
}

/// Plugin instance lifecycle manager.
///
/// Must be created inside a tokio runtime: construction subscribes to the
/// backend's event channel and spawns the task that pumps it.
///
/// # Example
///
/// ```rust,ignore
/// use daft_plugin_host::{InstantiateOptions, PluginHost};
///
/// let host = PluginHost::builder().backend(backend).build()?;
/// let binding = host
///     .load_plugin(&descriptor, InstantiateOptions::default().with_cpu_budget(45.0))
///     .await?;
/// host.set_parameter(&binding.instance_id, "mix", 0.5).await?;
/// ```
pub struct PluginHost {
    inner: Arc<HostInner>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl PluginHost {
    /// Create a builder for configuring the host.
    pub fn builder() -> PluginHostBuilder {
        PluginHostBuilder::new()
    }

    /// Create a host over an already built registry.
    pub fn new(backend: DynBackend, sandboxes: SandboxRegistry, platform: Platform) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| PluginHostError::Config {
            message: "PluginHost must be created inside a tokio runtime".to_string(),
        })?;

        let events = backend.subscribe();
        let inner = Arc::new(HostInner {
            backend,
            platform,
            sandboxes,
            bindings: Mutex::new(HashMap::new()),
            descriptors: RwLock::new(HashMap::new()),
            crash_listeners: ListenerSet::new(),
            permission_listeners: ListenerSet::new(),
        });

        let pump = runtime.spawn(run_event_pump(Arc::clone(&inner), events));
        info!("Plugin host started on {}", platform);

        Ok(Self {
            inner,
            pump: Mutex::new(Some(pump)),
        })
    }

    pub fn platform(&self) -> Platform {
        self.inner.platform
    }

    /// The sandbox registry backing this host.
    pub fn sandboxes(&self) -> &SandboxRegistry {
        &self.inner.sandboxes
    }

    // ========================================
    // Catalog
    // ========================================

    /// Enumerate installed plugins and remember their descriptors.
    pub async fn list_plugins(&self, format: Option<PluginFormat>) -> Result<Vec<PluginDescriptor>> {
        let plugins = self.inner.backend.list_plugins(format).await?;

        let mut cache = self
            .inner
            .descriptors
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for plugin in &plugins {
            cache.insert(plugin.identifier.clone(), plugin.clone());
        }
        debug!("Backend listed {} plugins", plugins.len());
        Ok(plugins)
    }

    /// Descriptor seen by a previous [`list_plugins`](Self::list_plugins).
    pub fn descriptor(&self, identifier: &str) -> Option<PluginDescriptor> {
        self.inner
            .descriptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identifier)
            .cloned()
    }

    // ========================================
    // Lifecycle
    // ========================================

    /// Instantiate a plugin and bind it to a new logical instance id.
    ///
    /// On iOS and Android a sandbox is resolved first when the plugin
    /// supports one; `options.sandbox_identifier` is the preferred sandbox id
    /// and is replaced by the resolved one.
    pub async fn load_plugin(
        &self,
        descriptor: &PluginDescriptor,
        mut options: InstantiateOptions,
    ) -> Result<InstanceBinding> {
        let sandbox = if descriptor.supports_sandbox && self.inner.platform.uses_plugin_sandbox() {
            let record = self
                .inner
                .sandboxes
                .ensure_sandbox(descriptor, options.sandbox_identifier.as_deref())
                .await?;
            options.sandbox_identifier = Some(record.identifier.clone());
            Some(record)
        } else {
            None
        };

        let handle = self
            .inner
            .backend
            .instantiate(&descriptor.identifier, &options)
            .await?;

        let binding = InstanceBinding::from_handle(
            handle,
            descriptor.clone(),
            &options,
            sandbox.as_ref().map(SandboxRecord::assignment),
        );
        info!(
            "Loaded {} as instance {} (backend {})",
            descriptor.identifier, binding.instance_id, binding.backend_instance_id
        );
        self.inner
            .bindings()
            .insert(binding.instance_id.clone(), binding.clone());

        if let Some(record) = sandbox {
            self.inner.sandboxes.record_sandbox(record).await;
        }

        Ok(binding)
    }

    /// Stop an instance and drop its binding.
    ///
    /// The binding is dropped once the backend call settles, whatever its
    /// outcome; a backend failure is still returned.
    pub async fn release_plugin(&self, instance_id: &str) -> Result<()> {
        let backend_id = self.inner.backend_id(instance_id)?;
        let result = self.inner.backend.release(&backend_id).await;
        self.inner.bindings().remove(instance_id);

        match result {
            Ok(()) => {
                info!("Released instance {}", instance_id);
                Ok(())
            }
            Err(e) => {
                warn!(
                    "Backend failed to release instance {} (backend {}): {}",
                    instance_id, backend_id, e
                );
                Err(e.into())
            }
        }
    }

    /// Load one of the plugin's factory presets.
    pub async fn load_preset(&self, instance_id: &str, preset_id: &str) -> Result<()> {
        let binding = self.inner.binding(instance_id)?;
        let preset = binding.descriptor.preset(preset_id).cloned().ok_or_else(|| {
            PluginHostError::PresetNotFound {
                identifier: binding.descriptor.identifier.clone(),
                preset_id: preset_id.to_string(),
            }
        })?;

        self.inner
            .backend
            .load_preset(&binding.backend_instance_id, &preset)
            .await?;
        debug!("Loaded preset {} on instance {}", preset_id, instance_id);
        Ok(())
    }

    pub async fn set_parameter(&self, instance_id: &str, parameter_id: &str, value: f64) -> Result<()> {
        let backend_id = self.inner.backend_id(instance_id)?;
        self.inner
            .backend
            .set_parameter(&backend_id, parameter_id, value)
            .await?;
        Ok(())
    }

    /// Hand an automation envelope to the backend. `points` are
    /// `(relative time, value)` pairs in the order given.
    pub async fn schedule_automation(
        &self,
        instance_id: &str,
        parameter_id: &str,
        points: &[AutomationPoint],
    ) -> Result<()> {
        let backend_id = self.inner.backend_id(instance_id)?;
        self.inner
            .backend
            .schedule_automation(&backend_id, parameter_id, points)
            .await?;
        debug!(
            "Scheduled {} automation points for {} on {}",
            points.len(),
            parameter_id,
            instance_id
        );
        Ok(())
    }

    /// Re-instantiate an instance by hand.
    ///
    /// Reuses the binding's last known sandbox and CPU budget. On success the
    /// backend id and restart token are swapped in and `true` is returned;
    /// on failure the binding is left untouched and `false` is returned.
    pub async fn retry_instance(&self, instance_id: &str) -> Result<bool> {
        let binding = self.inner.binding(instance_id)?;
        let options = binding.restart_options();

        let handle = match self
            .inner
            .backend
            .instantiate(&binding.descriptor.identifier, &options)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Retry of instance {} failed: {}", instance_id, e);
                return Ok(false);
            }
        };

        match self.inner.apply_restart(instance_id, handle) {
            Ok(()) => {
                info!("Instance {} re-instantiated on retry", instance_id);
                Ok(true)
            }
            Err(handle) => {
                self.inner.release_orphan(instance_id, handle).await;
                Ok(false)
            }
        }
    }

    // ========================================
    // Inspection
    // ========================================

    /// Snapshot of an instance binding.
    pub fn instance(&self, instance_id: &str) -> Option<InstanceBinding> {
        self.inner.bindings().get(instance_id).cloned()
    }

    /// Logical ids of all bound instances, sorted.
    pub fn instance_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.bindings().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn instance_state(&self, instance_id: &str) -> InstanceState {
        self.inner
            .bindings()
            .get(instance_id)
            .map(|b| b.state)
            .unwrap_or(InstanceState::Unloaded)
    }

    /// Record render diagnostics reported for an instance.
    pub fn record_diagnostics(
        &self,
        instance_id: &str,
        cpu_load_percent: f32,
        latency_ms: f32,
    ) -> Result<()> {
        let mut bindings = self.inner.bindings();
        let binding = bindings
            .get_mut(instance_id)
            .ok_or_else(|| PluginHostError::unknown_instance(instance_id))?;
        binding.cpu_load_percent = Some(cpu_load_percent);
        binding.latency_ms = Some(latency_ms);
        Ok(())
    }

    // ========================================
    // Events
    // ========================================

    /// Register a crash listener. Reports arrive after any automatic
    /// restart attempt, with `recovered` set accordingly.
    pub fn on_crash<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&CrashReport) + Send + Sync + 'static,
    {
        self.inner.crash_listeners.add(Arc::new(listener))
    }

    /// Register a listener for backend sandbox entitlement requests.
    pub fn on_sandbox_permission<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SandboxPermissionRequest) + Send + Sync + 'static,
    {
        self.inner.permission_listeners.add(Arc::new(listener))
    }

    /// Feed one backend event through the same path the event pump uses.
    pub async fn handle_event(&self, event: BackendEvent) {
        self.inner.handle_event(event).await;
    }

    /// Stop the event pump, drop all listeners and forget every binding.
    ///
    /// Backend instances are not released.
    pub fn dispose(&self) {
        if let Some(pump) = self.take_pump() {
            pump.abort();
        }
        let listeners =
            self.inner.crash_listeners.len() + self.inner.permission_listeners.len();
        self.inner.crash_listeners.clear();
        self.inner.permission_listeners.clear();
        let dropped = {
            let mut bindings = self.inner.bindings();
            let count = bindings.len();
            bindings.clear();
            count
        };
        info!(
            "Plugin host disposed; forgot {} instances and {} listeners",
            dropped, listeners
        );
    }

    fn take_pump(&self) -> Option<JoinHandle<()>> {
        self.pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Drop for PluginHost {
    fn drop(&mut self) {
        if let Some(pump) = self.take_pump() {
            pump.abort();
        }
    }
}
