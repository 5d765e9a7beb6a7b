//! In-memory device and database.
//!
//! `MemoryDevice` is the concrete [`Device`] used by the offline harness and by
//! tests across the workspace. Devices sharing a [`MemoryDb`] see each other's
//! persisted records and tag index, which is what the executor's database
//! calls operate on.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{Action, DevNum, Device};
use crate::error::DeviceError;
use crate::time::now_usec;

/// Persisted per-device snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbRecord {
    pub properties: BTreeMap<String, String>,
    pub devlinks: Vec<String>,
    pub tags: BTreeSet<String>,
    pub usec_initialized: Option<u64>,
}

#[derive(Debug, Default)]
struct DbState {
    records: HashMap<String, DbRecord>,
    tags: BTreeMap<String, BTreeSet<String>>,
    sysattrs: HashMap<(String, String), BTreeMap<String, String>>,
}

/// Shared device database: records keyed by devpath, a tag index, and a
/// registry of known devices' attributes for cross-device lookups.
#[derive(Debug, Clone, Default)]
pub struct MemoryDb {
    inner: Arc<RwLock<DbState>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, devpath: &str) -> Option<DbRecord> {
        self.inner.read().records.get(devpath).cloned()
    }

    pub fn insert_record(&self, devpath: &str, record: DbRecord) {
        self.inner
            .write()
            .records
            .insert(devpath.to_string(), record);
    }

    /// Devpaths currently indexed under `tag`.
    pub fn tagged(&self, tag: &str) -> Vec<String> {
        self.inner
            .read()
            .tags
            .get(tag)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Makes `device`'s attributes reachable through
    /// [`Device::subsystem_sysattr`] from any device on this database.
    pub fn register(&self, device: &MemoryDevice) {
        let Some(subsystem) = device.subsystem.clone() else {
            return;
        };
        self.inner.write().sysattrs.insert(
            (subsystem, device.sysname().to_string()),
            device.sysattrs.clone(),
        );
    }

    fn lookup_sysattr(&self, subsystem: &str, sysname: &str, attr: &str) -> Option<String> {
        self.inner
            .read()
            .sysattrs
            .get(&(subsystem.to_string(), sysname.to_string()))
            .and_then(|attrs| attrs.get(attr).cloned())
    }

    fn remove_record(&self, devpath: &str) -> bool {
        self.inner.write().records.remove(devpath).is_some()
    }

    fn index_tag(&self, tag: &str, devpath: &str, add: bool) {
        let mut state = self.inner.write();
        if add {
            state
                .tags
                .entry(tag.to_string())
                .or_default()
                .insert(devpath.to_string());
        } else if let Some(set) = state.tags.get_mut(tag) {
            set.remove(devpath);
            if set.is_empty() {
                state.tags.remove(tag);
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryDevice {
    pub devpath: String,
    pub subsystem: Option<String>,
    pub driver: Option<String>,
    pub devnum: DevNum,
    pub devnode: Option<String>,
    pub devlinks: Vec<String>,
    pub action: Option<Action>,
    pub ifindex: Option<u32>,
    pub devnode_mode: Option<u32>,
    pub devnode_uid: Option<u32>,
    pub devnode_gid: Option<u32>,
    pub sysattrs: BTreeMap<String, String>,
    pub properties: BTreeMap<String, String>,
    pub tags: BTreeSet<String>,
    pub parent: Option<Box<MemoryDevice>>,
    pub usec_initialized: Option<u64>,
    pub initialized: bool,
    #[serde(skip)]
    db: Option<MemoryDb>,
}

impl MemoryDevice {
    pub fn new(devpath: impl Into<String>) -> Self {
        Self {
            devpath: devpath.into(),
            ..Self::default()
        }
    }

    pub fn with_subsystem(mut self, subsystem: &str) -> Self {
        self.subsystem = Some(subsystem.to_string());
        self
    }

    pub fn with_driver(mut self, driver: &str) -> Self {
        self.driver = Some(driver.to_string());
        self
    }

    pub fn with_devnum(mut self, major: u32, minor: u32) -> Self {
        self.devnum = DevNum::new(major, minor);
        self
    }

    pub fn with_devnode(mut self, devnode: &str) -> Self {
        self.devnode = Some(devnode.to_string());
        self
    }

    pub fn with_devlink(mut self, link: &str) -> Self {
        self.devlinks.push(link.to_string());
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_ifindex(mut self, ifindex: u32) -> Self {
        self.ifindex = Some(ifindex);
        self
    }

    pub fn with_devnode_mode(mut self, mode: u32) -> Self {
        self.devnode_mode = Some(mode);
        self
    }

    pub fn with_devnode_owner(mut self, uid: u32, gid: u32) -> Self {
        self.devnode_uid = Some(uid);
        self.devnode_gid = Some(gid);
        self
    }

    pub fn with_sysattr(mut self, attr: &str, value: &str) -> Self {
        self.sysattrs.insert(attr.to_string(), value.to_string());
        self
    }

    pub fn with_property(mut self, key: &str, value: &str) -> Self {
        self.set_property(key, value);
        self
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.insert(tag.to_string());
        self
    }

    pub fn with_parent(mut self, parent: MemoryDevice) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    pub fn with_db(mut self, db: MemoryDb) -> Self {
        self.attach_db(db);
        self
    }

    pub fn attach_db(&mut self, db: MemoryDb) {
        self.db = Some(db);
    }

    pub fn db(&self) -> Option<&MemoryDb> {
        self.db.as_ref()
    }

    pub fn set_property(&mut self, key: &str, value: &str) {
        self.properties.insert(key.to_string(), value.to_string());
    }

    pub fn add_devlink(&mut self, link: &str) {
        if !self.devlinks.iter().any(|l| l == link) {
            self.devlinks.push(link.to_string());
        }
    }

    fn db_or_err(&self) -> Result<&MemoryDb, DeviceError> {
        self.db
            .as_ref()
            .ok_or_else(|| DeviceError::NoDatabase(self.devpath.clone()))
    }

    fn to_record(&self) -> DbRecord {
        DbRecord {
            properties: self.properties.clone(),
            devlinks: self.devlinks.clone(),
            tags: self.tags.clone(),
            usec_initialized: self.usec_initialized,
        }
    }

    fn base_properties(&self) -> BTreeMap<String, String> {
        let mut props = BTreeMap::new();
        props.insert("DEVPATH".to_string(), self.devpath.clone());
        if let Some(action) = self.action {
            props.insert("ACTION".to_string(), action.to_string());
        }
        if let Some(subsystem) = &self.subsystem {
            props.insert("SUBSYSTEM".to_string(), subsystem.clone());
        }
        if let Some(driver) = &self.driver {
            props.insert("DRIVER".to_string(), driver.clone());
        }
        if let Some(devnode) = &self.devnode {
            props.insert("DEVNAME".to_string(), devnode.clone());
        }
        if self.devnum.is_set() {
            props.insert("MAJOR".to_string(), self.devnum.major.to_string());
            props.insert("MINOR".to_string(), self.devnum.minor.to_string());
        }
        if let Some(ifindex) = self.ifindex {
            props.insert("IFINDEX".to_string(), ifindex.to_string());
        }
        if !self.devlinks.is_empty() {
            props.insert("DEVLINKS".to_string(), self.devlinks.join(" "));
        }
        if !self.tags.is_empty() {
            let tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();
            props.insert("TAGS".to_string(), format!(":{}:", tags.join(":")));
        }
        if let Some(usec) = self.usec_initialized {
            props.insert("USEC_INITIALIZED".to_string(), usec.to_string());
        }
        props
    }
}

impl Device for MemoryDevice {
    fn devpath(&self) -> &str {
        &self.devpath
    }

    fn sysname(&self) -> &str {
        self.devpath.rsplit('/').next().unwrap_or_default()
    }

    fn sysnum(&self) -> Option<&str> {
        let sysname = self.sysname();
        let digits = sysname
            .bytes()
            .rev()
            .take_while(|b| b.is_ascii_digit())
            .count();
        if digits == 0 {
            return None;
        }
        Some(&sysname[sysname.len() - digits..])
    }

    fn subsystem(&self) -> Option<&str> {
        self.subsystem.as_deref()
    }

    fn driver(&self) -> Option<&str> {
        self.driver.as_deref()
    }

    fn devnum(&self) -> DevNum {
        self.devnum
    }

    fn devnode(&self) -> Option<&str> {
        self.devnode.as_deref()
    }

    fn devlinks(&self) -> &[String] {
        &self.devlinks
    }

    fn action(&self) -> Option<Action> {
        self.action
    }

    fn ifindex(&self) -> Option<u32> {
        self.ifindex
    }

    fn devnode_mode(&self) -> Option<u32> {
        self.devnode_mode
    }

    fn devnode_uid(&self) -> Option<u32> {
        self.devnode_uid
    }

    fn devnode_gid(&self) -> Option<u32> {
        self.devnode_gid
    }

    fn parent(&self) -> Option<&Self> {
        self.parent.as_deref()
    }

    fn property(&self, key: &str) -> Option<String> {
        if let Some(value) = self.properties.get(key) {
            return Some(value.clone());
        }
        self.base_properties().remove(key)
    }

    fn properties(&self) -> Vec<(String, String)> {
        let mut props = self.base_properties();
        props.extend(self.properties.clone());
        props.into_iter().collect()
    }

    fn sysattr_value(&self, attr: &str) -> Option<String> {
        self.sysattrs.get(attr).cloned()
    }

    fn subsystem_sysattr(&self, subsystem: &str, sysname: &str, attr: &str) -> Option<String> {
        if self.subsystem.as_deref() == Some(subsystem) && self.sysname() == sysname {
            return self.sysattr_value(attr);
        }
        self.db.as_ref()?.lookup_sysattr(subsystem, sysname, attr)
    }

    fn rename(&mut self, name: &str) -> Result<(), DeviceError> {
        if name.is_empty() || name.contains('/') {
            return Err(DeviceError::InvalidName(name.to_string()));
        }
        let dir = match self.devpath.rfind('/') {
            Some(idx) => &self.devpath[..idx],
            None => "",
        };
        self.devpath = format!("{dir}/{name}");
        if self.properties.contains_key("INTERFACE") {
            self.set_property("INTERFACE", name);
        }
        trace!(devpath = %self.devpath, "renamed device");
        Ok(())
    }

    fn copy_properties(&mut self, from: &Self) {
        for (key, value) in &from.properties {
            self.properties
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }

    fn usec_initialized(&self) -> Option<u64> {
        self.usec_initialized
    }

    fn ensure_usec_initialized(&mut self, previous: Option<&Self>) {
        if let Some(usec) = previous.and_then(|p| p.usec_initialized) {
            self.usec_initialized = Some(usec);
        } else if self.usec_initialized.is_none() {
            self.usec_initialized = Some(now_usec());
        }
    }

    fn set_is_initialized(&mut self) {
        self.initialized = true;
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn read_db(&mut self) -> Result<(), DeviceError> {
        let Some(record) = self.db_or_err()?.record(&self.devpath) else {
            debug!(devpath = %self.devpath, "no database record");
            return Ok(());
        };
        for (key, value) in record.properties {
            self.properties.entry(key).or_insert(value);
        }
        for link in &record.devlinks {
            self.add_devlink(link);
        }
        self.tags.extend(record.tags);
        if self.usec_initialized.is_none() {
            self.usec_initialized = record.usec_initialized;
        }
        self.initialized = true;
        Ok(())
    }

    fn update_db(&self) -> Result<(), DeviceError> {
        self.db_or_err()?
            .insert_record(&self.devpath, self.to_record());
        Ok(())
    }

    fn delete_db(&self) -> Result<(), DeviceError> {
        if !self.db_or_err()?.remove_record(&self.devpath) {
            debug!(devpath = %self.devpath, "no database record to delete");
        }
        Ok(())
    }

    fn tag_index(&self, previous: Option<&Self>, add: bool) -> Result<(), DeviceError> {
        let db = self.db_or_err()?;
        if let Some(previous) = previous {
            for tag in previous.tags.difference(&self.tags) {
                db.index_tag(tag, &self.devpath, false);
            }
        }
        for tag in &self.tags {
            db.index_tag(tag, &self.devpath, add);
        }
        Ok(())
    }

    fn clone_with_db(&self) -> Result<Option<Self>, DeviceError> {
        let Some(record) = self.db_or_err()?.record(&self.devpath) else {
            return Ok(None);
        };
        let mut clone = self.clone();
        clone.properties = record.properties;
        clone.devlinks = record.devlinks;
        clone.tags = record.tags;
        clone.usec_initialized = record.usec_initialized;
        clone.initialized = true;
        Ok(Some(clone))
    }
}
