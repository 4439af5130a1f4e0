//! Data model shared by the sandbox registry and the lifecycle manager.
//!
//! - `descriptor` - plugin descriptors, parameters and factory presets
//! - `instance` - instantiate options, backend handles and instance bindings
//! - `events` - backend event payloads and crash reports

mod descriptor;
mod events;
mod instance;

pub use descriptor::{
    FactoryPreset, ParameterDescriptor, PluginBusCapabilities, PluginDescriptor, PluginFormat,
};
pub use events::{BackendEvent, CrashEvent, CrashReport, SandboxPermissionRequest};
pub use instance::{
    AutomationPoint, InstanceBinding, InstanceHandle, InstanceState, InstantiateOptions,
    SandboxAssignment,
};
