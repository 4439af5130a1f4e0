//! Storage permission gate for sandbox provisioning.
//!
//! Android-class platforms gate plugin sandbox storage behind a runtime
//! permission. The gate runs, in order:
//! 1. The caller-supplied consent hook (if any)
//! 2. The API level check (new enough levels need no permission)
//! 3. The grant query, followed by a request when not yet granted
//!
//! Other platforms skip the gate entirely.

use super::Platform;
use crate::config::PermissionConfig;
use crate::error::{PluginHostError, Result};
use crate::models::PluginDescriptor;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Caller-supplied consent prompt, asked before any storage is provisioned.
#[async_trait]
pub trait ConsentHook: Send + Sync {
    /// Resolve `true` to allow provisioning a sandbox for `descriptor`.
    async fn confirm(&self, descriptor: &PluginDescriptor) -> bool;
}

#[async_trait]
impl<F> ConsentHook for F
where
    F: Fn(&PluginDescriptor) -> bool + Send + Sync,
{
    async fn confirm(&self, descriptor: &PluginDescriptor) -> bool {
        self(descriptor)
    }
}

/// OS-level storage permission state.
#[async_trait]
pub trait StoragePermissions: Send + Sync {
    /// Whether the storage permission is currently granted.
    async fn is_granted(&self) -> Result<bool>;

    /// Prompt for the storage permission. Resolves `true` when granted.
    async fn request(&self) -> Result<bool>;
}

/// Runs the storage consent check for a platform.
#[derive(Clone)]
pub struct PermissionGate {
    platform: Platform,
    consent: Option<Arc<dyn ConsentHook>>,
    permissions: Option<Arc<dyn StoragePermissions>>,
}

impl PermissionGate {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            consent: None,
            permissions: None,
        }
    }

    pub fn with_consent_hook(mut self, hook: Arc<dyn ConsentHook>) -> Self {
        self.consent = Some(hook);
        self
    }

    pub fn with_storage_permissions(mut self, permissions: Arc<dyn StoragePermissions>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Check that a sandbox may be provisioned for `identifier`.
    ///
    /// Fails with [`PluginHostError::PermissionDenied`] when consent is refused.
    pub async fn check(&self, descriptor: &PluginDescriptor, identifier: &str) -> Result<()> {
        if !self.platform.requires_storage_consent() {
            return Ok(());
        }

        if let Some(ref hook) = self.consent {
            if !hook.confirm(descriptor).await {
                return Err(denied(identifier, "consent hook declined"));
            }
        }

        let api_level = self.platform.api_level().unwrap_or(0);
        if api_level >= PermissionConfig::SCOPED_STORAGE_API_LEVEL {
            debug!(
                "API level {} needs no storage permission for {}",
                api_level, identifier
            );
            return Ok(());
        }

        let Some(ref permissions) = self.permissions else {
            warn!(
                "No storage permission provider configured; denying sandbox for {}",
                identifier
            );
            return Err(denied(identifier, "storage permission unavailable"));
        };

        if granted(permissions.is_granted().await, "query") {
            return Ok(());
        }

        if granted(permissions.request().await, "request") {
            Ok(())
        } else {
            Err(denied(identifier, "storage permission not granted"))
        }
    }
}

fn granted(result: Result<bool>, step: &str) -> bool {
    match result {
        Ok(granted) => granted,
        Err(e) => {
            warn!("Storage permission {} failed: {}", step, e);
            false
        }
    }
}

fn denied(identifier: &str, reason: &str) -> PluginHostError {
    PluginHostError::PermissionDenied {
        identifier: identifier.to_string(),
        reason: reason.to_string(),
    }
}
