//! Platform abstraction layer.
//!
//! Plugin sandboxing and storage consent differ per platform: iOS and Android
//! hosts give sandbox-capable plugins their own storage area, and only
//! Android-class platforms gate that storage behind a runtime permission.
//! All `#[cfg]` detection lives here.

pub mod permissions;

pub use permissions::{ConsentHook, PermissionGate, StoragePermissions};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Platform the host process runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "os", rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android {
        /// Android API level (SDK_INT). `0` when unknown.
        #[serde(rename = "apiLevel", default)]
        api_level: u32,
    },
    Macos,
    Windows,
    Linux,
    Other,
}

impl Platform {
    /// Detect the platform this binary was built for.
    ///
    /// The Android API level is not known at compile time; callers on Android
    /// should pass the real level through [`HostConfig`](crate::HostConfig).
    pub fn current() -> Self {
        #[cfg(target_os = "ios")]
        {
            Platform::Ios
        }
        #[cfg(target_os = "android")]
        {
            Platform::Android { api_level: 0 }
        }
        #[cfg(target_os = "macos")]
        {
            Platform::Macos
        }
        #[cfg(target_os = "windows")]
        {
            Platform::Windows
        }
        #[cfg(target_os = "linux")]
        {
            Platform::Linux
        }
        #[cfg(not(any(
            target_os = "ios",
            target_os = "android",
            target_os = "macos",
            target_os = "windows",
            target_os = "linux"
        )))]
        {
            Platform::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android { .. } => "android",
            Platform::Macos => "macos",
            Platform::Windows => "windows",
            Platform::Linux => "linux",
            Platform::Other => "other",
        }
    }

    /// Whether sandbox-capable plugins get a provisioned sandbox on this platform.
    pub fn uses_plugin_sandbox(&self) -> bool {
        matches!(self, Platform::Ios | Platform::Android { .. })
    }

    /// Whether sandbox provisioning must pass the storage consent check.
    pub fn requires_storage_consent(&self) -> bool {
        matches!(self, Platform::Android { .. })
    }

    /// Android API level, if running on Android.
    pub fn api_level(&self) -> Option<u32> {
        match self {
            Platform::Android { api_level } => Some(*api_level),
            _ => None,
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Platform::current()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Android { api_level } => write!(f, "android (api {})", api_level),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_platforms() {
        assert!(Platform::Ios.uses_plugin_sandbox());
        assert!(Platform::Android { api_level: 34 }.uses_plugin_sandbox());
        assert!(!Platform::Macos.uses_plugin_sandbox());
        assert!(!Platform::Linux.uses_plugin_sandbox());
    }

    #[test]
    fn test_consent_only_on_android() {
        assert!(Platform::Android { api_level: 28 }.requires_storage_consent());
        assert!(!Platform::Ios.requires_storage_consent());
        assert_eq!(Platform::Ios.api_level(), None);
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_string(&Platform::Android { api_level: 30 }).unwrap();
        assert_eq!(json, r#"{"os":"android","apiLevel":30}"#);
        let parsed: Platform = serde_json::from_str(r#"{"os":"ios"}"#).unwrap();
        assert_eq!(parsed, Platform::Ios);
    }
}
