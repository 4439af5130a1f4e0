//! Crash recovery.
//!
//! A crash report is acknowledged to the backend, then the instance is
//! restarted only if the report presents the restart token issued for the
//! binding's current backend instance. The stored token is consumed at the
//! moment it matches, so a repeated report cannot restart the same instance
//! twice.

use super::HostInner;
use crate::models::{CrashEvent, CrashReport, InstanceState, InstantiateOptions};
use tracing::{debug, info, warn};

impl HostInner {
    pub(super) async fn handle_crash(&self, event: CrashEvent) {
        let mut report = CrashReport::from(&event);
        warn!(
            "Plugin {} crashed (instance {}): {}",
            event.descriptor.identifier, event.instance_id, event.reason
        );

        if event.recovered {
            debug!("Backend already recovered instance {}", event.instance_id);
            report.recovered = true;
        } else {
            self.set_state(&event.instance_id, InstanceState::Crashed);
            if let Err(e) = self.backend.acknowledge_crash(&event.instance_id).await {
                warn!(
                    "Failed to acknowledge crash of instance {}: {}",
                    event.instance_id, e
                );
            }
            report.recovered = self.restart_crashed(&event).await;
        }

        let delivered = self.crash_listeners.dispatch(&report);
        debug!(
            "Delivered crash report for {} to {} listeners (recovered: {})",
            report.instance_id, delivered, report.recovered
        );
    }

    fn set_state(&self, instance_id: &str, state: InstanceState) {
        if let Some(binding) = self.bindings().get_mut(instance_id) {
            binding.state = state;
        }
    }

    /// Restart a crashed instance if its token checks out. Returns whether
    /// the instance is running again.
    async fn restart_crashed(&self, event: &CrashEvent) -> bool {
        let instance_id = event.instance_id.as_str();
        let Some((identifier, options)) = self.claim_restart(event) else {
            return false;
        };

        match self.backend.instantiate(&identifier, &options).await {
            Ok(handle) => match self.apply_restart(instance_id, handle) {
                Ok(()) => {
                    info!("Instance {} restarted after crash", instance_id);
                    true
                }
                Err(handle) => {
                    self.release_orphan(instance_id, handle).await;
                    false
                }
            },
            Err(e) => {
                warn!("Restart of instance {} failed: {}", instance_id, e);
                self.bindings().remove(instance_id);
                false
            }
        }
    }

    /// Match the offered token against the binding and consume it.
    ///
    /// Removes the binding when the token is missing or stale. On a match
    /// returns the identifier and options to re-instantiate with.
    fn claim_restart(&self, event: &CrashEvent) -> Option<(String, InstantiateOptions)> {
        let instance_id = event.instance_id.as_str();
        let mut bindings = self.bindings();

        let Some(binding) = bindings.get_mut(instance_id) else {
            debug!("No binding for crashed instance {}", instance_id);
            return None;
        };

        let matched = matches!(
            (event.restart_token.as_deref(), binding.restart_token.as_deref()),
            (Some(offered), Some(stored)) if offered == stored
        );
        if !matched {
            if event.restart_token.is_some() {
                warn!(
                    "Restart token mismatch for instance {}; dropping binding",
                    instance_id
                );
            } else {
                debug!(
                    "Crash report for instance {} carried no restart token; dropping binding",
                    instance_id
                );
            }
            bindings.remove(instance_id);
            return None;
        }

        binding.restart_token = None;
        binding.state = InstanceState::Recovering;
        Some((binding.descriptor.identifier.clone(), binding.restart_options()))
    }
}
