//! Per-plugin sandbox provisioning and its durable registry.

mod persist;
mod registry;

pub use persist::PersistTicket;
pub use registry::{SandboxKey, SandboxRecord, SandboxRegistry};
