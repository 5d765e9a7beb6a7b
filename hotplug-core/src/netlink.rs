//! Link-control handle used to rename network interfaces.
//!
//! An [`Event`](crate::Event) opens at most one handle, on first use, and
//! releases it when the event is dropped.

use std::io;

/// Maximum interface name length in bytes, excluding the terminator.
pub const IFNAMSIZ_MAX: usize = 15;

pub trait NetlinkHandle: Send + Sync {
    /// Renames the live interface with index `ifindex`.
    fn set_link_name(&mut self, ifindex: u32, name: &str) -> io::Result<()>;
}

/// Opens link-control handles on demand.
pub trait NetlinkConnector: Send + Sync {
    fn connect(&self) -> io::Result<Box<dyn NetlinkHandle>>;
}

/// Truncates `name` to the platform interface-name limit on a char boundary.
pub fn truncate_ifname(name: &str) -> &str {
    if name.len() <= IFNAMSIZ_MAX {
        return name;
    }
    let mut end = IFNAMSIZ_MAX;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}
