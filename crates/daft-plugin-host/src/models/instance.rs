//! Instance bindings and the values exchanged with the backend when a plugin
//! is instantiated.

use super::PluginDescriptor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Options passed to the backend's `instantiate`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstantiateOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_preset_id: Option<String>,
    /// Sandbox the instance should run in. On `load_plugin` this is the
    /// preferred sandbox id; the resolved id replaces it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_budget_percent: Option<f32>,
    /// Parameter ids bound to host automation lanes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub automation_bindings: Vec<String>,
}

impl InstantiateOptions {
    pub fn with_cpu_budget(mut self, percent: f32) -> Self {
        self.cpu_budget_percent = Some(percent);
        self
    }

    pub fn with_initial_preset(mut self, preset_id: impl Into<String>) -> Self {
        self.initial_preset_id = Some(preset_id.into());
        self
    }

    pub fn with_sandbox_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.sandbox_identifier = Some(identifier.into());
        self
    }
}

/// Handle returned by the backend's `instantiate`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceHandle {
    pub instance_id: String,
    #[serde(default)]
    pub native_instance_id: Option<String>,
    #[serde(default)]
    pub restart_token: Option<String>,
    #[serde(default)]
    pub cpu_load_percent: Option<f32>,
    #[serde(default)]
    pub latency_ms: Option<f32>,
}

impl InstanceHandle {
    /// Id the backend understands for this instantiation. Falls back to
    /// `instance_id` when the backend reports no separate native id.
    pub fn backend_instance_id(&self) -> &str {
        self.native_instance_id
            .as_deref()
            .unwrap_or(self.instance_id.as_str())
    }
}

/// One automation point: time relative to the envelope start (seconds)
/// and the target value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationPoint {
    pub time: f64,
    pub value: f64,
}

impl AutomationPoint {
    pub fn new(time: f64, value: f64) -> Self {
        Self { time, value }
    }
}

/// Sandbox an instance was loaded into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxAssignment {
    pub identifier: String,
    pub path: PathBuf,
}

/// Lifecycle state of a logical instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// No binding exists.
    Unloaded,
    Active,
    /// Crash received, restart not yet attempted.
    Crashed,
    /// Restart in flight.
    Recovering,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceState::Unloaded => "unloaded",
            InstanceState::Active => "active",
            InstanceState::Crashed => "crashed",
            InstanceState::Recovering => "recovering",
        };
        write!(f, "{}", s)
    }
}

/// Binding between a logical instance id and its current backend instance.
///
/// The logical id never changes; the backend id and restart token rotate
/// on every successful restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceBinding {
    pub instance_id: String,
    pub backend_instance_id: String,
    pub descriptor: PluginDescriptor,
    pub restart_token: Option<String>,
    pub cpu_load_percent: Option<f32>,
    pub latency_ms: Option<f32>,
    pub cpu_budget_percent: Option<f32>,
    pub sandbox: Option<SandboxAssignment>,
    pub automation_bindings: Vec<String>,
    pub state: InstanceState,
    pub loaded_at: DateTime<Utc>,
    pub restarted_at: Option<DateTime<Utc>>,
}

impl InstanceBinding {
    /// Create the binding for a first load. The handle's `instance_id`
    /// becomes the logical id.
    pub fn from_handle(
        handle: InstanceHandle,
        descriptor: PluginDescriptor,
        options: &InstantiateOptions,
        sandbox: Option<SandboxAssignment>,
    ) -> Self {
        Self {
            backend_instance_id: handle.backend_instance_id().to_string(),
            instance_id: handle.instance_id,
            descriptor,
            restart_token: handle.restart_token,
            cpu_load_percent: handle.cpu_load_percent,
            latency_ms: handle.latency_ms,
            cpu_budget_percent: options.cpu_budget_percent,
            sandbox,
            automation_bindings: options.automation_bindings.clone(),
            state: InstanceState::Active,
            loaded_at: Utc::now(),
            restarted_at: None,
        }
    }

    /// Swap in a restarted backend instance, keeping the logical id.
    pub fn apply_restart(&mut self, handle: InstanceHandle) {
        self.backend_instance_id = handle.backend_instance_id().to_string();
        self.restart_token = handle.restart_token;
        if handle.cpu_load_percent.is_some() {
            self.cpu_load_percent = handle.cpu_load_percent;
        }
        if handle.latency_ms.is_some() {
            self.latency_ms = handle.latency_ms;
        }
        self.state = InstanceState::Active;
        self.restarted_at = Some(Utc::now());
    }

    /// Options for re-instantiating this binding, reusing its last known
    /// sandbox and CPU budget instead of provisioning again.
    pub fn restart_options(&self) -> InstantiateOptions {
        InstantiateOptions {
            initial_preset_id: self.descriptor.first_preset_id().map(str::to_string),
            sandbox_identifier: self.sandbox.as_ref().map(|s| s.identifier.clone()),
            cpu_budget_percent: self.cpu_budget_percent,
            automation_bindings: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::descriptor;

    fn handle(native: Option<&str>, token: &str) -> InstanceHandle {
        InstanceHandle {
            instance_id: "i1".into(),
            native_instance_id: native.map(str::to_string),
            restart_token: Some(token.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_native_id_defaults_to_logical() {
        let binding = InstanceBinding::from_handle(
            handle(None, "t1"),
            descriptor("com.x.echo"),
            &InstantiateOptions::default(),
            None,
        );
        assert_eq!(binding.instance_id, "i1");
        assert_eq!(binding.backend_instance_id, "i1");
        assert_eq!(binding.state, InstanceState::Active);
    }

    #[test]
    fn test_apply_restart_keeps_logical_id() {
        let mut binding = InstanceBinding::from_handle(
            handle(Some("n1"), "t1"),
            descriptor("com.x.echo"),
            &InstantiateOptions::default().with_cpu_budget(45.0),
            None,
        );
        binding.apply_restart(InstanceHandle {
            instance_id: "i9".into(),
            native_instance_id: Some("n2".into()),
            restart_token: Some("t2".into()),
            ..Default::default()
        });
        assert_eq!(binding.instance_id, "i1");
        assert_eq!(binding.backend_instance_id, "n2");
        assert_eq!(binding.restart_token.as_deref(), Some("t2"));
        assert!(binding.restarted_at.is_some());
        assert_eq!(binding.restart_options().cpu_budget_percent, Some(45.0));
    }

    #[test]
    fn test_options_serialize_sparse() {
        let options = InstantiateOptions::default()
            .with_cpu_budget(45.0)
            .with_sandbox_identifier("com.x.echo");
        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "sandboxIdentifier": "com.x.echo", "cpuBudgetPercent": 45.0 })
        );
    }
}
