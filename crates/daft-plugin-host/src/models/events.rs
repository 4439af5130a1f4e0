//! Events delivered by the execution backend, and the crash reports handed
//! to listeners.

use super::PluginDescriptor;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Crash notification payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashEvent {
    /// Logical instance id of the crashed instance.
    pub instance_id: String,
    pub descriptor: PluginDescriptor,
    /// ISO 8601 time of the crash. Filled in on receipt when empty.
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub reason: String,
    /// Set when the backend already restarted the instance itself.
    #[serde(default)]
    pub recovered: bool,
    #[serde(default)]
    pub restart_token: Option<String>,
}

/// The backend needs entitlements before it can open a plugin's sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxPermissionRequest {
    pub identifier: String,
    #[serde(default)]
    pub required_entitlements: Vec<String>,
    #[serde(default)]
    pub reason: String,
}

/// Everything the backend can push on its event channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BackendEvent {
    PluginCrashed(CrashEvent),
    SandboxPermissionRequired(SandboxPermissionRequest),
}

/// Crash report dispatched to crash listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashReport {
    pub instance_id: String,
    pub descriptor: PluginDescriptor,
    pub timestamp: String,
    pub reason: String,
    /// True once an automatic restart succeeded (or the backend recovered
    /// the instance itself).
    pub recovered: bool,
}

impl From<&CrashEvent> for CrashReport {
    fn from(event: &CrashEvent) -> Self {
        let timestamp = if event.timestamp.is_empty() {
            Utc::now().to_rfc3339()
        } else {
            event.timestamp.clone()
        };
        Self {
            instance_id: event.instance_id.clone(),
            descriptor: event.descriptor.clone(),
            timestamp,
            reason: event.reason.clone(),
            recovered: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_event_wire_shape() {
        let event: BackendEvent = serde_json::from_str(
            r#"{
                "type": "pluginCrashed",
                "instanceId": "i1",
                "descriptor": { "identifier": "com.x.echo", "name": "Echo", "format": "auv3" },
                "timestamp": "2026-01-01T00:00:00Z",
                "reason": "segfault",
                "recovered": false,
                "restartToken": "t1"
            }"#,
        )
        .unwrap();
        let BackendEvent::PluginCrashed(crash) = event else {
            panic!("expected crash event");
        };
        assert_eq!(crash.restart_token.as_deref(), Some("t1"));

        let event: BackendEvent = serde_json::from_str(
            r#"{ "type": "sandboxPermissionRequired", "identifier": "com.x.echo",
                 "requiredEntitlements": ["storage"], "reason": "first launch" }"#,
        )
        .unwrap();
        assert!(matches!(event, BackendEvent::SandboxPermissionRequired(_)));
    }

    #[test]
    fn test_report_starts_unrecovered() {
        let event = CrashEvent {
            instance_id: "i1".into(),
            descriptor: crate::test_support::descriptor("com.x.echo"),
            timestamp: String::new(),
            reason: "segfault".into(),
            recovered: true,
            restart_token: None,
        };
        let report = CrashReport::from(&event);
        assert!(!report.recovered);
        assert!(!report.timestamp.is_empty());
    }
}
