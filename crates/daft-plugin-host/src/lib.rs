//! Daft Plugin Host - plugin instance lifecycle management for the Daft
//! audio engine.
//!
//! This crate sits between the session engine and a plugin execution backend
//! (the runtime that actually loads AUv3/VST3/CLAP code). It provides:
//! - A durable sandbox registry: one provisioned storage sandbox per plugin
//!   identity, cached in memory and persisted through a [`KeyValueStore`]
//! - An instance lifecycle manager that keeps stable logical instance ids
//!   while backend instances come and go
//! - Token-gated automatic restart of crashed instances, with crash reports
//!   dispatched to listeners
//!
//! # Example
//!
//! ```rust,ignore
//! use daft_plugin_host::{InstantiateOptions, PluginHost};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> daft_plugin_host::Result<()> {
//!     let host = PluginHost::builder()
//!         .backend(Arc::new(MyBackend::connect()?))
//!         .build()?;
//!
//!     let plugins = host.list_plugins(None).await?;
//!     let binding = host
//!         .load_plugin(&plugins[0], InstantiateOptions::default())
//!         .await?;
//!
//!     let _sub = host.on_crash(|report| {
//!         println!("{} crashed, recovered: {}", report.instance_id, report.recovered);
//!     });
//!
//!     host.set_parameter(&binding.instance_id, "mix", 0.5).await?;
//!     host.release_plugin(&binding.instance_id).await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod host;
pub mod models;
pub mod platform;
pub mod sandbox;
pub mod storage;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use backend::{BackendEvents, BackendResult, DynBackend, ExecutionBackend};
pub use config::HostConfig;
pub use error::{BackendError, PluginHostError, Result};
pub use host::{PluginHost, PluginHostBuilder, Subscription};
pub use models::{
    AutomationPoint, BackendEvent, CrashEvent, CrashReport, FactoryPreset, InstanceBinding,
    InstanceHandle, InstanceState, InstantiateOptions, ParameterDescriptor, PluginBusCapabilities,
    PluginDescriptor, PluginFormat, SandboxAssignment, SandboxPermissionRequest,
};
pub use platform::{ConsentHook, PermissionGate, Platform, StoragePermissions};
pub use sandbox::{PersistTicket, SandboxKey, SandboxRecord, SandboxRegistry};
pub use storage::{DynStore, JsonFileStore, KeyValueStore, MemoryStore};
