//! ## hotplug-core::device
//! **Device abstraction consumed by the executor**
//!
//! The executor never touches sysfs or the on-disk database itself. Everything
//! it needs to know about a device, and every persistence operation it
//! triggers, goes through [`Device`].

mod memory;

pub use memory::{DbRecord, MemoryDb, MemoryDevice};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

/// Kernel-reported lifecycle action of a device transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Add,
    Remove,
    Change,
    Move,
    Online,
    Offline,
    Bind,
    Unbind,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Add => "add",
            Action::Remove => "remove",
            Action::Change => "change",
            Action::Move => "move",
            Action::Online => "online",
            Action::Offline => "offline",
            Action::Bind => "bind",
            Action::Unbind => "unbind",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "add" => Action::Add,
            "remove" => Action::Remove,
            "change" => Action::Change,
            "move" => Action::Move,
            "online" => Action::Online,
            "offline" => Action::Offline,
            "bind" => Action::Bind,
            "unbind" => Action::Unbind,
            other => return Err(DeviceError::UnknownAction(other.to_string())),
        })
    }
}

/// Device number split into its major and minor components.
///
/// A device "owns a device number" when its major is non-zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DevNum {
    pub major: u32,
    pub minor: u32,
}

impl DevNum {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.major != 0
    }
}

impl fmt::Display for DevNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major, self.minor)
    }
}

/// Device state and persistence operations used while executing a transition.
///
/// Implementations are expected to be cheap to clone: the executor keeps a
/// clone of the previously persisted record for the duration of a
/// constructive transition.
pub trait Device: Clone + Send + Sync + 'static {
    fn devpath(&self) -> &str;
    fn sysname(&self) -> &str;
    /// Numeric suffix of the kernel name, if any.
    fn sysnum(&self) -> Option<&str>;
    fn subsystem(&self) -> Option<&str>;
    fn driver(&self) -> Option<&str>;
    fn devnum(&self) -> DevNum;
    fn devnode(&self) -> Option<&str>;
    fn devlinks(&self) -> &[String];
    fn action(&self) -> Option<Action>;
    fn ifindex(&self) -> Option<u32>;

    /// Node permissions reported by the kernel.
    fn devnode_mode(&self) -> Option<u32>;
    fn devnode_uid(&self) -> Option<u32>;
    fn devnode_gid(&self) -> Option<u32>;

    /// The device's own sysfs parent.
    fn parent(&self) -> Option<&Self>;

    fn property(&self, key: &str) -> Option<String>;
    /// Full property set, as handed to spawned programs as their environment.
    fn properties(&self) -> Vec<(String, String)>;
    fn sysattr_value(&self, attr: &str) -> Option<String>;

    /// Reads `attr` from the device `subsystem`/`sysname`, which need not be
    /// related to `self`.
    fn subsystem_sysattr(&self, _subsystem: &str, _sysname: &str, _attr: &str) -> Option<String> {
        None
    }

    /// Renames the device after its network interface was renamed, updating
    /// the kernel name and devpath.
    fn rename(&mut self, name: &str) -> Result<(), DeviceError>;
    /// Copies properties from a previous record that are not set on `self`.
    fn copy_properties(&mut self, from: &Self);

    fn usec_initialized(&self) -> Option<u64>;
    /// Keeps the initialization stamp of `previous` if it has one, otherwise
    /// assigns a fresh one.
    fn ensure_usec_initialized(&mut self, previous: Option<&Self>);
    fn set_is_initialized(&mut self);
    fn is_initialized(&self) -> bool;

    fn read_db(&mut self) -> Result<(), DeviceError>;
    fn update_db(&self) -> Result<(), DeviceError>;
    fn delete_db(&self) -> Result<(), DeviceError>;
    /// Adds (or removes) this device's tags to the tag index, dropping tags
    /// that only `previous` carried.
    fn tag_index(&self, previous: Option<&Self>, add: bool) -> Result<(), DeviceError>;
    /// Clone of this device with its previously persisted record loaded, or
    /// `None` when no record exists.
    fn clone_with_db(&self) -> Result<Option<Self>, DeviceError>;
}
