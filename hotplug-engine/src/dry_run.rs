//! Collaborators that log and record what they would do instead of touching
//! the system. Used by the offline harness.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use hotplug_core::builtin::BuiltinCommand;
use hotplug_core::event::NodePermissions;
use hotplug_core::netlink::{NetlinkConnector, NetlinkHandle};
use hotplug_core::Device;
use parking_lot::Mutex;
use tracing::info;

use crate::collaborators::{Builtins, NodeManager};
use crate::error::ExecuteError;

/// Ordered record of collaborator calls, shared between dry-run
/// collaborators so their relative order is observable.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        let entry = entry.into();
        info!(target: "hotplug::dry_run", "{}", entry);
        self.entries.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Index of the first entry starting with `prefix`.
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.entries.lock().iter().position(|e| e.starts_with(prefix))
    }
}

#[derive(Debug, Clone, Default)]
pub struct DryRunNodes {
    journal: Journal,
}

impl DryRunNodes {
    pub fn new(journal: Journal) -> Self {
        Self { journal }
    }
}

impl<D: Device> NodeManager<D> for DryRunNodes {
    fn add_node(
        &self,
        device: &D,
        permissions: NodePermissions,
        seclabels: &[(String, String)],
    ) -> io::Result<()> {
        let labels: Vec<String> = seclabels.iter().map(|(m, l)| format!("{m}={l}")).collect();
        self.journal.record(format!(
            "add_node {} {} mode={:04o} uid={} gid={} apply={} links=[{}] seclabels=[{}]",
            device.devnode().unwrap_or("-"),
            device.devnum(),
            permissions.mode,
            permissions.uid,
            permissions.gid,
            permissions.apply,
            device.devlinks().join(" "),
            labels.join(" "),
        ));
        Ok(())
    }

    fn remove_node(&self, device: &D) -> io::Result<()> {
        self.journal.record(format!(
            "remove_node {} {}",
            device.devnode().unwrap_or("-"),
            device.devnum()
        ));
        Ok(())
    }

    fn update_old_links(&self, device: &D, previous: &D) -> io::Result<()> {
        let stale: Vec<&str> = previous
            .devlinks()
            .iter()
            .filter(|link| !device.devlinks().contains(*link))
            .map(String::as_str)
            .collect();
        self.journal
            .record(format!("update_old_links [{}]", stale.join(" ")));
        Ok(())
    }

    fn watch_begin(&self, device: &D) {
        self.journal
            .record(format!("watch_begin {}", device.devnode().unwrap_or("-")));
    }

    fn watch_end(&self, device: &D) {
        self.journal
            .record(format!("watch_end {}", device.devnode().unwrap_or("-")));
    }
}

#[derive(Debug, Clone, Default)]
pub struct DryRunBuiltins {
    journal: Journal,
}

impl DryRunBuiltins {
    pub fn new(journal: Journal) -> Self {
        Self { journal }
    }
}

#[async_trait]
impl<D: Device> Builtins<D> for DryRunBuiltins {
    async fn run_builtin(
        &self,
        device: &mut D,
        builtin: BuiltinCommand,
        command: &str,
        test: bool,
    ) -> Result<(), ExecuteError> {
        self.journal.record(format!(
            "builtin {} '{}' test={} on {}",
            builtin,
            command,
            test,
            device.devpath()
        ));
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct DryRunNetlink {
    journal: Journal,
}

impl DryRunNetlink {
    pub fn new(journal: Journal) -> Self {
        Self { journal }
    }
}

impl NetlinkConnector for DryRunNetlink {
    fn connect(&self) -> io::Result<Box<dyn NetlinkHandle>> {
        self.journal.record("netlink_connect");
        Ok(Box::new(self.clone()))
    }
}

impl NetlinkHandle for DryRunNetlink {
    fn set_link_name(&mut self, ifindex: u32, name: &str) -> io::Result<()> {
        self.journal.record(format!("set_link_name {ifindex} {name}"));
        Ok(())
    }
}
