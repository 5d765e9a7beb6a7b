//! ## hotplug-engine::collaborators
//! **Interfaces to the parts of the daemon the executor drives but does not own**

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use hotplug_core::builtin::BuiltinCommand;
use hotplug_core::event::NodePermissions;
use hotplug_core::{Device, Event};

use crate::error::ExecuteError;

/// Matches the configured rules against an event and records their actions
/// on it: derived name, owner/group/mode, security labels, run list.
#[async_trait]
pub trait RuleApplier<D: Device>: Send + Sync {
    async fn apply_rules(
        &self,
        event: &mut Event<'_, D>,
        timeout: Duration,
        warn_after: Duration,
        properties: &[(String, String)],
    ) -> Result<(), ExecuteError>;
}

/// In-process builtin commands.
#[async_trait]
pub trait Builtins<D: Device>: Send + Sync {
    async fn run_builtin(
        &self,
        device: &mut D,
        builtin: BuiltinCommand,
        command: &str,
        test: bool,
    ) -> Result<(), ExecuteError>;
}

/// Device node and symlink lifecycle, plus the inotify watch on the node.
pub trait NodeManager<D: Device>: Send + Sync {
    fn add_node(
        &self,
        device: &D,
        permissions: NodePermissions,
        seclabels: &[(String, String)],
    ) -> io::Result<()>;

    fn remove_node(&self, device: &D) -> io::Result<()>;

    /// Drops or repoints symlinks that `previous` owned and `device` no
    /// longer claims.
    fn update_old_links(&self, device: &D, previous: &D) -> io::Result<()>;

    fn watch_begin(&self, device: &D);

    fn watch_end(&self, device: &D);
}
