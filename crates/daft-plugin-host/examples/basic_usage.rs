//! Basic usage example - load a plugin, crash it, watch it come back

use async_trait::async_trait;
use daft_plugin_host::{
    AutomationPoint, BackendError, BackendEvent, BackendEvents, BackendResult, CrashEvent,
    ExecutionBackend, FactoryPreset, InstanceHandle, InstantiateOptions, Platform,
    PluginDescriptor, PluginFormat, PluginHost, Result,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{broadcast, oneshot};

/// In-process stand-in for a real plugin runtime.
#[derive(Default)]
struct DemoBackend {
    events: BackendEvents,
    next: AtomicUsize,
}

#[async_trait]
impl ExecutionBackend for DemoBackend {
    async fn list_plugins(
        &self,
        _format: Option<PluginFormat>,
    ) -> BackendResult<Vec<PluginDescriptor>> {
        let echo = serde_json::from_str(
            r#"{ "identifier": "com.x.echo", "name": "Echo", "format": "auv3",
                 "supportsSandbox": true, "inputChannels": 2, "outputChannels": 2 }"#,
        )
        .map_err(|e| BackendError::new("listPlugins", e.to_string()))?;
        Ok(vec![echo])
    }

    async fn instantiate(
        &self,
        identifier: &str,
        _options: &InstantiateOptions,
    ) -> BackendResult<InstanceHandle> {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        println!("  backend: instantiate {} -> native-{}", identifier, n);
        Ok(InstanceHandle {
            instance_id: "echo-1".to_string(),
            native_instance_id: Some(format!("native-{}", n)),
            restart_token: Some(format!("token-{}", n)),
            ..Default::default()
        })
    }

    async fn release(&self, backend_instance_id: &str) -> BackendResult<()> {
        println!("  backend: release {}", backend_instance_id);
        Ok(())
    }

    async fn load_preset(&self, _id: &str, _preset: &FactoryPreset) -> BackendResult<()> {
        Ok(())
    }

    async fn set_parameter(&self, id: &str, parameter_id: &str, value: f64) -> BackendResult<()> {
        println!("  backend: {}.{} = {}", id, parameter_id, value);
        Ok(())
    }

    async fn schedule_automation(
        &self,
        _id: &str,
        _parameter_id: &str,
        _points: &[AutomationPoint],
    ) -> BackendResult<()> {
        Ok(())
    }

    async fn provision_sandbox(&self, identifier: &str) -> BackendResult<PathBuf> {
        Ok(std::env::temp_dir().join("daft-sandboxes").join(identifier))
    }

    async fn acknowledge_crash(&self, instance_id: &str) -> BackendResult<()> {
        println!("  backend: crash of {} acknowledged", instance_id);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BackendEvent> {
        self.events.subscribe()
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let backend = std::sync::Arc::new(DemoBackend::default());
    let host = PluginHost::builder()
        .platform(Platform::Ios)
        .backend(backend.clone())
        .build()?;

    let plugins = host.list_plugins(None).await?;
    println!("Found {} plugins", plugins.len());

    let binding = host
        .load_plugin(&plugins[0], InstantiateOptions::default().with_cpu_budget(45.0))
        .await?;
    println!(
        "Loaded {} as {} in sandbox {:?}",
        binding.descriptor.name, binding.instance_id, binding.sandbox
    );

    let (tx, rx) = oneshot::channel();
    let tx = std::sync::Mutex::new(Some(tx));
    let _sub = host.on_crash(move |report| {
        if let Some(tx) = tx.lock().ok().and_then(|mut tx| tx.take()) {
            let _ = tx.send(report.clone());
        }
    });

    backend.events.emit(BackendEvent::PluginCrashed(CrashEvent {
        instance_id: binding.instance_id.clone(),
        descriptor: binding.descriptor.clone(),
        timestamp: String::new(),
        reason: "simulated crash".to_string(),
        recovered: false,
        restart_token: binding.restart_token.clone(),
    }));

    if let Ok(report) = rx.await {
        println!("Crash report: recovered = {}", report.recovered);
    }

    host.set_parameter(&binding.instance_id, "mix", 0.5).await?;
    host.release_plugin(&binding.instance_id).await?;
    host.sandboxes().flush().await?;
    Ok(())
}
