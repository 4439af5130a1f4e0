//! Shared fixtures for unit tests.

use crate::backend::{BackendEvents, BackendResult, ExecutionBackend};
use crate::error::{BackendError, PluginHostError, Result};
use crate::models::{
    AutomationPoint, BackendEvent, FactoryPreset, InstanceHandle, InstantiateOptions,
    PluginDescriptor, PluginFormat,
};
use crate::storage::{KeyValueStore, MemoryStore};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Sandboxable AUv3 descriptor with one factory preset.
pub fn descriptor(identifier: &str) -> PluginDescriptor {
    PluginDescriptor {
        identifier: identifier.to_string(),
        name: identifier.rsplit('.').next().unwrap_or(identifier).to_string(),
        format: PluginFormat::Auv3,
        manufacturer: "Daft".to_string(),
        version: "1.0.0".to_string(),
        supports_sandbox: true,
        input_channels: 2,
        output_channels: 2,
        accepts_midi: false,
        emits_midi: false,
        parameters: Vec::new(),
        factory_presets: vec![FactoryPreset {
            id: "init".to_string(),
            name: "Init".to_string(),
            payload: "aW5pdA==".to_string(),
            payload_format: "aupreset".to_string(),
        }],
    }
}

/// A recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    ListPlugins(Option<PluginFormat>),
    Instantiate {
        identifier: String,
        options: InstantiateOptions,
    },
    Release(String),
    LoadPreset {
        instance: String,
        preset_id: String,
    },
    SetParameter {
        instance: String,
        parameter_id: String,
        value: f64,
    },
    ScheduleAutomation {
        instance: String,
        parameter_id: String,
        points: usize,
    },
    ProvisionSandbox(String),
    AcknowledgeCrash(String),
}

/// Scriptable in-process backend.
///
/// Instantiation hands out queued handles first, then generated ones
/// (`i{n}` / `n{n}` / `t{n}`).
#[derive(Default)]
pub struct MockBackend {
    events: BackendEvents,
    calls: Mutex<Vec<Call>>,
    handles: Mutex<VecDeque<InstanceHandle>>,
    plugins: Mutex<Vec<PluginDescriptor>>,
    counter: AtomicUsize,
    fail_instantiate: AtomicBool,
    fail_release: AtomicBool,
    fail_provision: AtomicBool,
    fail_ack: AtomicBool,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: BackendEvent) -> usize {
        self.events.emit(event)
    }

    pub fn push_handle(&self, handle: InstanceHandle) {
        self.handles.lock().unwrap().push_back(handle);
    }

    pub fn set_plugins(&self, plugins: Vec<PluginDescriptor>) {
        *self.plugins.lock().unwrap() = plugins;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| matches(call)).count()
    }

    pub fn provision_count(&self) -> usize {
        self.count(|call| matches!(call, Call::ProvisionSandbox(_)))
    }

    pub fn instantiate_count(&self) -> usize {
        self.count(|call| matches!(call, Call::Instantiate { .. }))
    }

    pub fn list_count(&self) -> usize {
        self.count(|call| matches!(call, Call::ListPlugins(_)))
    }

    pub fn released(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Release(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn acknowledged(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::AcknowledgeCrash(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn fail_instantiate(&self, fail: bool) {
        self.fail_instantiate.store(fail, Ordering::SeqCst);
    }

    pub fn fail_release(&self, fail: bool) {
        self.fail_release.store(fail, Ordering::SeqCst);
    }

    pub fn fail_provision(&self, fail: bool) {
        self.fail_provision.store(fail, Ordering::SeqCst);
    }

    pub fn fail_ack(&self, fail: bool) {
        self.fail_ack.store(fail, Ordering::SeqCst);
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(flag: &AtomicBool, operation: &str) -> BackendResult<()> {
        if flag.load(Ordering::SeqCst) {
            Err(BackendError::new(operation, "mock failure"))
        } else {
            Ok(())
        }
    }

    fn next_handle(&self) -> InstanceHandle {
        if let Some(handle) = self.handles.lock().unwrap().pop_front() {
            return handle;
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        InstanceHandle {
            instance_id: format!("i{}", n),
            native_instance_id: Some(format!("n{}", n)),
            restart_token: Some(format!("t{}", n)),
            cpu_load_percent: Some(10.0),
            latency_ms: Some(2.5),
        }
    }
}

#[async_trait]
impl ExecutionBackend for MockBackend {
    async fn list_plugins(
        &self,
        format: Option<PluginFormat>,
    ) -> BackendResult<Vec<PluginDescriptor>> {
        self.record(Call::ListPlugins(format));
        let plugins = self.plugins.lock().unwrap().clone();
        Ok(plugins
            .into_iter()
            .filter(|p| format.map_or(true, |f| p.format == f))
            .collect())
    }

    async fn instantiate(
        &self,
        identifier: &str,
        options: &InstantiateOptions,
    ) -> BackendResult<InstanceHandle> {
        self.record(Call::Instantiate {
            identifier: identifier.to_string(),
            options: options.clone(),
        });
        tokio::task::yield_now().await;
        Self::check(&self.fail_instantiate, "instantiate")?;
        Ok(self.next_handle())
    }

    async fn release(&self, backend_instance_id: &str) -> BackendResult<()> {
        self.record(Call::Release(backend_instance_id.to_string()));
        Self::check(&self.fail_release, "release")
    }

    async fn load_preset(
        &self,
        backend_instance_id: &str,
        preset: &FactoryPreset,
    ) -> BackendResult<()> {
        self.record(Call::LoadPreset {
            instance: backend_instance_id.to_string(),
            preset_id: preset.id.clone(),
        });
        Ok(())
    }

    async fn set_parameter(
        &self,
        backend_instance_id: &str,
        parameter_id: &str,
        value: f64,
    ) -> BackendResult<()> {
        self.record(Call::SetParameter {
            instance: backend_instance_id.to_string(),
            parameter_id: parameter_id.to_string(),
            value,
        });
        Ok(())
    }

    async fn schedule_automation(
        &self,
        backend_instance_id: &str,
        parameter_id: &str,
        points: &[AutomationPoint],
    ) -> BackendResult<()> {
        self.record(Call::ScheduleAutomation {
            instance: backend_instance_id.to_string(),
            parameter_id: parameter_id.to_string(),
            points: points.len(),
        });
        Ok(())
    }

    async fn provision_sandbox(&self, identifier: &str) -> BackendResult<PathBuf> {
        self.record(Call::ProvisionSandbox(identifier.to_string()));
        Self::check(&self.fail_provision, "provisionSandbox")?;
        Ok(PathBuf::from("/sandboxes").join(identifier))
    }

    async fn acknowledge_crash(&self, instance_id: &str) -> BackendResult<()> {
        self.record(Call::AcknowledgeCrash(instance_id.to_string()));
        tokio::task::yield_now().await;
        Self::check(&self.fail_ack, "acknowledgeCrash")
    }

    fn subscribe(&self) -> broadcast::Receiver<BackendEvent> {
        self.events.subscribe()
    }
}

/// Memory store that counts writes and can be told to fail them.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryStore,
    writes: AtomicUsize,
    fail: bool,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose reads succeed and whose writes always fail.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyValueStore for CountingStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(PluginHostError::Storage {
                message: "quota exceeded".to_string(),
            });
        }
        self.inner.set(key, value).await
    }
}
