//! YAML device fixtures.
//!
//! ```yaml
//! device:
//!   devpath: /devices/pci0000:00/0000:00:1f.2/ata1/host0/block/sda
//!   subsystem: block
//!   action: add
//!   devnum: { major: 8, minor: 0 }
//!   devnode: /dev/sda
//! related:
//!   - devpath: /devices/virtual/net/eth0
//!     subsystem: net
//!     sysattrs: { address: "00:11:22:33:44:55" }
//! database:
//!   /devices/pci0000:00/0000:00:1f.2/ata1/host0/block/sda:
//!     devlinks: [/dev/disk/by-id/ata-old]
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use hotplug_core::device::{DbRecord, MemoryDb, MemoryDevice};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceFixture {
    pub device: MemoryDevice,
    /// Devices reachable through `[subsystem/sysname]attr` lookups.
    pub related: Vec<MemoryDevice>,
    /// Records persisted by earlier transitions, keyed by devpath.
    pub database: BTreeMap<String, DbRecord>,
}

impl DeviceFixture {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading device fixture {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing device fixture {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let fixture: Self = serde_yaml::from_str(text)?;
        anyhow::ensure!(!fixture.device.devpath.is_empty(), "device.devpath is required");
        Ok(fixture)
    }

    /// Materialises the fixture on a fresh database and returns the device,
    /// attached to it.
    pub fn into_device(self) -> (MemoryDevice, MemoryDb) {
        let db = MemoryDb::new();
        for related in &self.related {
            db.register(related);
        }
        for (devpath, record) in self.database {
            db.insert_record(&devpath, record);
        }
        db.register(&self.device);
        let device = self.device.with_db(db.clone());
        (device, db)
    }
}
