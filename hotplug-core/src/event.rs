//! ## hotplug-core::event
//! **Per-transition accumulator**
//!
//! An [`Event`] is created when a device transition starts processing and is
//! threaded through every step of it: rule application fills in the derived
//! name, permission overrides, security labels and run list; the executor
//! resolves permissions, consumes the run list once and drops the event when
//! all side effects are applied.

use std::fmt;
use std::io;
use std::time::{Duration, Instant};

use crate::builtin::BuiltinCommand;
use crate::device::Device;
use crate::netlink::{NetlinkConnector, NetlinkHandle};

/// One queued command template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunEntry {
    pub command: String,
    pub builtin: Option<BuiltinCommand>,
}

/// Final permissions handed to node creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodePermissions {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Apply the permissions to an existing node rather than only to a
    /// freshly created one.
    pub apply: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct Overrides {
    uid: u32,
    gid: u32,
    mode: u32,
    owner_set: bool,
    group_set: bool,
    mode_set: bool,
}

pub struct Event<'a, D: Device> {
    device: &'a mut D,
    parent: Option<D>,
    birth: Instant,
    name: Option<String>,
    overrides: Overrides,
    seclabels: Vec<(String, String)>,
    run_list: Vec<RunEntry>,
    program_result: Option<String>,
    exec_delay: Option<Duration>,
    netlink: Option<Box<dyn NetlinkHandle>>,
    previous: Option<D>,
    watch: bool,
}

impl<'a, D: Device> Event<'a, D> {
    pub fn new(device: &'a mut D) -> Self {
        Self {
            device,
            parent: None,
            birth: Instant::now(),
            name: None,
            overrides: Overrides::default(),
            seclabels: Vec::new(),
            run_list: Vec::new(),
            program_result: None,
            exec_delay: None,
            netlink: None,
            previous: None,
            watch: false,
        }
    }

    pub fn device(&self) -> &D {
        &*self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut *self.device
    }

    /// Monotonic creation time; the timeout budget of every command spawned
    /// for this event is measured from here.
    pub fn birth(&self) -> Instant {
        self.birth
    }

    pub fn age(&self) -> Duration {
        self.birth.elapsed()
    }

    /// Parent device selected by rule matching.
    pub fn parent(&self) -> Option<&D> {
        self.parent.as_ref()
    }

    pub fn set_parent(&mut self, parent: Option<D>) {
        self.parent = parent;
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn set_owner(&mut self, uid: u32) {
        self.overrides.uid = uid;
        self.overrides.owner_set = true;
    }

    pub fn set_group(&mut self, gid: u32) {
        self.overrides.gid = gid;
        self.overrides.group_set = true;
    }

    pub fn set_mode(&mut self, mode: u32) {
        self.overrides.mode = mode;
        self.overrides.mode_set = true;
    }

    pub fn owner(&self) -> Option<u32> {
        self.overrides.owner_set.then_some(self.overrides.uid)
    }

    pub fn group(&self) -> Option<u32> {
        self.overrides.group_set.then_some(self.overrides.gid)
    }

    pub fn mode(&self) -> Option<u32> {
        self.overrides.mode_set.then_some(self.overrides.mode)
    }

    /// Settles owner, group and mode for node creation.
    ///
    /// Unset owner and group fall back to what the kernel reported. An unset
    /// mode falls back to the kernel mode, else `0660` when a group is
    /// assigned, else `0600`. Permissions are applied to an existing node only
    /// on "add" or when a rule set any of the three explicitly.
    pub fn resolve_permissions(&mut self) -> NodePermissions {
        let dev = &*self.device;
        let o = &mut self.overrides;
        if !o.owner_set {
            o.uid = dev.devnode_uid().unwrap_or(0);
        }
        if !o.group_set {
            o.gid = dev.devnode_gid().unwrap_or(0);
        }
        if !o.mode_set {
            o.mode = match dev.devnode_mode() {
                Some(mode) if mode > 0 => mode,
                _ if o.gid > 0 => 0o660,
                _ => 0o600,
            };
        }
        let apply = dev.action() == Some(crate::Action::Add)
            || o.owner_set
            || o.group_set
            || o.mode_set;
        NodePermissions {
            mode: o.mode,
            uid: o.uid,
            gid: o.gid,
            apply,
        }
    }

    /// Assigns a security label; a later assignment for the same module
    /// replaces the earlier value in place.
    pub fn add_seclabel(&mut self, module: &str, label: &str) {
        match self.seclabels.iter_mut().find(|(m, _)| m == module) {
            Some(entry) => entry.1 = label.to_string(),
            None => self.seclabels.push((module.to_string(), label.to_string())),
        }
    }

    pub fn seclabels(&self) -> &[(String, String)] {
        &self.seclabels
    }

    /// Queues a command template. Duplicates are kept and run independently.
    pub fn push_run(&mut self, command: impl Into<String>, builtin: Option<BuiltinCommand>) {
        self.run_list.push(RunEntry {
            command: command.into(),
            builtin,
        });
    }

    pub fn run_list(&self) -> &[RunEntry] {
        &self.run_list
    }

    /// Hands over the queued commands, leaving the run list empty.
    pub fn take_run_list(&mut self) -> Vec<RunEntry> {
        std::mem::take(&mut self.run_list)
    }

    pub fn program_result(&self) -> Option<&str> {
        self.program_result.as_deref()
    }

    pub fn set_program_result(&mut self, result: impl Into<String>) {
        self.program_result = Some(result.into());
    }

    pub fn exec_delay(&self) -> Option<Duration> {
        self.exec_delay
    }

    pub fn set_exec_delay(&mut self, delay: Option<Duration>) {
        self.exec_delay = delay.filter(|d| !d.is_zero());
    }

    /// Link-control handle, opened through `connector` on first use.
    pub fn netlink(
        &mut self,
        connector: &dyn NetlinkConnector,
    ) -> io::Result<&mut (dyn NetlinkHandle + 'static)> {
        if self.netlink.is_none() {
            self.netlink = Some(connector.connect()?);
        }
        match self.netlink.as_deref_mut() {
            Some(handle) => Ok(handle),
            None => Err(io::Error::other("netlink handle unavailable")),
        }
    }

    pub fn has_netlink(&self) -> bool {
        self.netlink.is_some()
    }

    /// Whether the node should be watched for writes once processing ends.
    pub fn watch(&self) -> bool {
        self.watch
    }

    pub fn set_watch(&mut self, watch: bool) {
        self.watch = watch;
    }

    /// Previously persisted record, loaded during a constructive transition.
    pub fn previous(&self) -> Option<&D> {
        self.previous.as_ref()
    }

    pub fn set_previous(&mut self, previous: Option<D>) {
        self.previous = previous;
    }

    pub fn take_previous(&mut self) -> Option<D> {
        self.previous.take()
    }

    /// Splits the event into the device and the previous record so both can
    /// be borrowed at once.
    pub fn device_and_previous(&mut self) -> (&mut D, Option<&D>) {
        (&mut *self.device, self.previous.as_ref())
    }
}

impl<D: Device> fmt::Debug for Event<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("devpath", &self.device.devpath())
            .field("name", &self.name)
            .field("run_list", &self.run_list)
            .field("netlink", &self.netlink.is_some())
            .field("previous", &self.previous.is_some())
            .finish()
    }
}
