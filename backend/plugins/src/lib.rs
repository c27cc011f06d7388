pub mod manifest;
pub mod permissions;
pub mod probe;
pub mod process;
pub mod registry;

pub use manifest::PluginManifest;
pub use permissions::{Capability, PermissionReport};
pub use process::{PluginProcess, PluginStatus, StatusReport};
pub use registry::{DiscoveredPlugin, PluginRegistry, MANIFEST_FILENAME};
