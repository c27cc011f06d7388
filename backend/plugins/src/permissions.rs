//! Capability tags and the consent gate.
//!
//! Capabilities are partitioned into a sensitive set that requires explicit
//! user approval before a plugin holding them may start.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Closed set of capability tags a plugin may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    FileIo,
    Network,
    ReadConfig,
    WriteConfig,
    Clipboard,
    Notifications,
}

impl Capability {
    /// Whether this capability requires explicit user consent.
    pub fn is_sensitive(self) -> bool {
        matches!(
            self,
            Capability::FileIo
                | Capability::Network
                | Capability::ReadConfig
                | Capability::WriteConfig
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::FileIo => "file_io",
            Capability::Network => "network",
            Capability::ReadConfig => "read_config",
            Capability::WriteConfig => "write_config",
            Capability::Clipboard => "clipboard",
            Capability::Notifications => "notifications",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Required vs granted permissions for one plugin, as reported to the UI.
#[derive(Debug, Clone, Serialize)]
pub struct PermissionReport {
    pub required: BTreeSet<Capability>,
    pub granted: BTreeSet<Capability>,
    pub missing: BTreeSet<Capability>,
    pub user_approved: bool,
}

/// Compute the sensitive capabilities in `required` that `granted` does not cover.
pub fn missing_sensitive(
    required: &BTreeSet<Capability>,
    granted: &BTreeSet<Capability>,
) -> BTreeSet<Capability> {
    required
        .iter()
        .copied()
        .filter(|c| c.is_sensitive() && !granted.contains(c))
        .collect()
}
