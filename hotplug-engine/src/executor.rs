//! ## hotplug-engine::executor
//! **Ordered application of one device transition**
//!
//! Destructive transitions tear down database state before rules run and
//! remove the node last. Constructive transitions end the prior watch before
//! any node mutation, rename network interfaces, create the node with
//! resolved permissions and only then persist the record. The run list is
//! executed separately, after rule application, in insertion order.

use std::sync::Arc;
use std::time::Duration;

use hotplug_config::ExecConfig;
use hotplug_core::netlink::{truncate_ifname, NetlinkConnector};
use hotplug_core::{Action, Device, Event};
use hotplug_format::{expand, PATH_SIZE};
use hotplug_spawn::Spawner;
use hotplug_telemetry::{EventLogger, MetricsRecorder};
use opentelemetry::KeyValue;
use tracing::{debug, error, instrument, warn};

use crate::collaborators::{Builtins, NodeManager, RuleApplier};

/// Counts of what one run-list pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub builtins: usize,
    pub spawned: usize,
    pub failed: usize,
}

pub struct EventExecutor<D: Device> {
    rules: Arc<dyn RuleApplier<D>>,
    builtins: Arc<dyn Builtins<D>>,
    nodes: Arc<dyn NodeManager<D>>,
    netlink: Arc<dyn NetlinkConnector>,
    spawner: Spawner,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl<D: Device> EventExecutor<D> {
    pub fn new(
        rules: Arc<dyn RuleApplier<D>>,
        builtins: Arc<dyn Builtins<D>>,
        nodes: Arc<dyn NodeManager<D>>,
        netlink: Arc<dyn NetlinkConnector>,
        spawner: Spawner,
    ) -> Self {
        Self {
            rules,
            builtins,
            nodes,
            netlink,
            spawner,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn spawner(&self) -> &Spawner {
        &self.spawner
    }

    /// Applies rules and their node/database side effects for `event`.
    ///
    /// Devices without a subsystem are ignored. Collaborator failures are
    /// logged and never stop the transition.
    #[instrument(skip_all, fields(devpath = %event.device().devpath()))]
    pub async fn execute_rules(
        &self,
        event: &mut Event<'_, D>,
        timeout: Duration,
        warn_after: Duration,
        properties: &[(String, String)],
    ) {
        if event.device().subsystem().is_none() {
            debug!("Device has no subsystem, skipping");
            return;
        }

        if event.device().action() == Some(Action::Remove) {
            self.execute_remove(event, timeout, warn_after, properties)
                .await;
        } else {
            self.execute_change(event, timeout, warn_after, properties)
                .await;
        }
    }

    async fn execute_remove(
        &self,
        event: &mut Event<'_, D>,
        timeout: Duration,
        warn_after: Duration,
        properties: &[(String, String)],
    ) {
        if let Err(e) = event.device_mut().read_db() {
            warn!("Failed to read database record: {}", e);
        }
        if let Err(e) = event.device().tag_index(None, false) {
            warn!("Failed to remove tag index entries: {}", e);
        }
        if let Err(e) = event.device().delete_db() {
            warn!("Failed to delete database record: {}", e);
        }

        if event.device().devnum().is_set() {
            self.nodes.watch_end(event.device());
        }

        self.apply_rules(event, timeout, warn_after, properties)
            .await;

        if event.device().devnum().is_set() {
            if let Err(e) = self.nodes.remove_node(event.device()) {
                warn!("Failed to remove device node: {}", e);
            }
        }
    }

    async fn execute_change(
        &self,
        event: &mut Event<'_, D>,
        timeout: Duration,
        warn_after: Duration,
        properties: &[(String, String)],
    ) {
        let previous = event.device().clone_with_db().unwrap_or_else(|e| {
            warn!("Failed to load previous database record: {}", e);
            None
        });
        event.set_previous(previous);

        if let Some(previous) = event.previous() {
            let owns_node = event.device().devnum().is_set();
            // No watch events for the node's own update.
            if owns_node {
                self.nodes.watch_end(previous);
            }
            if !owns_node && event.device().action() == Some(Action::Move) {
                let (device, previous) = event.device_and_previous();
                if let Some(previous) = previous {
                    device.copy_properties(previous);
                }
            }
        }

        self.apply_rules(event, timeout, warn_after, properties)
            .await;

        self.rename_netif(event);

        if event.device().devnum().is_set() {
            if let Some(previous) = event.previous() {
                if let Err(e) = self.nodes.update_old_links(event.device(), previous) {
                    warn!("Failed to update old symlinks: {}", e);
                }
            }

            let permissions = event.resolve_permissions();
            if let Err(e) = self
                .nodes
                .add_node(event.device(), permissions, event.seclabels())
            {
                warn!("Failed to create device node: {}", e);
            }
        }

        let (device, previous) = event.device_and_previous();
        device.ensure_usec_initialized(previous);
        if let Err(e) = device.tag_index(previous, true) {
            warn!("Failed to update tag index: {}", e);
        }
        if let Err(e) = device.update_db() {
            warn!("Failed to write database record: {}", e);
        }
        device.set_is_initialized();

        event.take_previous();
    }

    async fn apply_rules(
        &self,
        event: &mut Event<'_, D>,
        timeout: Duration,
        warn_after: Duration,
        properties: &[(String, String)],
    ) {
        if let Err(e) = self
            .rules
            .apply_rules(event, timeout, warn_after, properties)
            .await
        {
            error!("{}", e);
        }
    }

    /// Renames a freshly added network interface to the rule-derived name.
    fn rename_netif(&self, event: &mut Event<'_, D>) {
        let device = event.device();
        let Some(ifindex) = device.ifindex().filter(|&index| index > 0) else {
            return;
        };
        if device.action() != Some(Action::Add) {
            return;
        }
        let Some(name) = event.name().filter(|&name| name != device.sysname()) else {
            return;
        };
        let old_name = device.sysname().to_string();
        let new_name = truncate_ifname(name).to_string();

        let renamed = event
            .netlink(self.netlink.as_ref())
            .and_then(|handle| handle.set_link_name(ifindex, &new_name));
        if let Err(e) = renamed {
            warn!(
                "Could not rename interface '{}' from '{}' to '{}': {}",
                ifindex, old_name, new_name, e
            );
            return;
        }
        debug!("Renamed network interface '{}' to '{}'", old_name, new_name);

        match event.device_mut().rename(&new_name) {
            Ok(()) => debug!("Changed devpath to '{}'", event.device().devpath()),
            Err(e) => warn!(
                "Renamed interface '{}' from '{}' to '{}', but could not update the device: {}",
                ifindex, old_name, new_name, e
            ),
        }
    }

    /// Executes the queued commands in insertion order. The run list is
    /// consumed; a second call does nothing.
    #[instrument(skip_all, fields(devpath = %event.device().devpath()))]
    pub async fn execute_run(
        &self,
        event: &mut Event<'_, D>,
        timeout: Duration,
        warn_after: Duration,
    ) -> RunSummary {
        let mut summary = RunSummary::default();

        for entry in event.take_run_list() {
            let command = expand(event, &entry.command, PATH_SIZE, false);

            if let Some(builtin) = entry.builtin {
                summary.builtins += 1;
                if let Err(e) = self
                    .builtins
                    .run_builtin(event.device_mut(), builtin, &command, false)
                    .await
                {
                    summary.failed += 1;
                    warn!("{}", e);
                }
                continue;
            }

            if let Some(delay) = event.exec_delay() {
                debug!("Delay execution of '{}'", command);
                tokio::time::sleep(delay).await;
            }

            summary.spawned += 1;
            match self
                .spawner
                .run(event, &command, timeout, warn_after, false, None)
                .await
            {
                Ok(outcome) if outcome.success() => {}
                Ok(_) => summary.failed += 1,
                Err(e) => {
                    summary.failed += 1;
                    error!("{}", e);
                }
            }
        }

        summary
    }

    /// Runs a whole transition: rules, run list and the write watch, with
    /// budgets and delay taken from `config`.
    pub async fn process(
        &self,
        event: &mut Event<'_, D>,
        config: &ExecConfig,
        properties: &[(String, String)],
    ) -> RunSummary {
        if event.exec_delay().is_none() {
            event.set_exec_delay(config.exec_delay());
        }

        self.execute_rules(event, config.timeout(), config.timeout_warn(), properties)
            .await;
        let summary = self
            .execute_run(event, config.timeout(), config.timeout_warn())
            .await;

        if event.watch() && event.device().action() != Some(Action::Remove) {
            self.nodes.watch_begin(event.device());
        }

        if let Some(metrics) = &self.metrics {
            metrics.inc_processed_events();
        }

        let device = event.device();
        let action = device.action().map_or("none", Action::as_str);
        EventLogger::log_event(
            action,
            vec![
                KeyValue::new("devpath", device.devpath().to_string()),
                KeyValue::new("builtins", summary.builtins as i64),
                KeyValue::new("spawned", summary.spawned as i64),
                KeyValue::new("failed", summary.failed as i64),
                KeyValue::new("elapsed_ms", event.age().as_millis() as i64),
            ],
        )
        .await;

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dry_run::{DryRunBuiltins, DryRunNetlink, DryRunNodes, Journal};
    use crate::error::ExecuteError;
    use async_trait::async_trait;
    use hotplug_core::builtin::BuiltinCommand;
    use hotplug_core::device::{MemoryDb, MemoryDevice};
    use hotplug_core::netlink::NetlinkHandle;
    use std::io;
    use tracing_test::traced_test;

    type Configure = Box<dyn Fn(&mut Event<'_, MemoryDevice>) + Send + Sync>;

    struct RecordingRules {
        journal: Journal,
        configure: Configure,
    }

    #[async_trait]
    impl RuleApplier<MemoryDevice> for RecordingRules {
        async fn apply_rules(
            &self,
            event: &mut Event<'_, MemoryDevice>,
            _timeout: Duration,
            _warn_after: Duration,
            _properties: &[(String, String)],
        ) -> Result<(), ExecuteError> {
            self.journal.record("rules");
            (self.configure)(event);
            Ok(())
        }
    }

    struct FailingNetlink;

    impl NetlinkConnector for FailingNetlink {
        fn connect(&self) -> io::Result<Box<dyn NetlinkHandle>> {
            Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "operation not permitted",
            ))
        }
    }

    fn executor(
        journal: &Journal,
        configure: impl Fn(&mut Event<'_, MemoryDevice>) + Send + Sync + 'static,
    ) -> EventExecutor<MemoryDevice> {
        EventExecutor::new(
            Arc::new(RecordingRules {
                journal: journal.clone(),
                configure: Box::new(configure),
            }),
            Arc::new(DryRunBuiltins::new(journal.clone())),
            Arc::new(DryRunNodes::new(journal.clone())),
            Arc::new(DryRunNetlink::new(journal.clone())),
            Spawner::default(),
        )
    }

    fn disk(db: &MemoryDb, action: Action) -> MemoryDevice {
        MemoryDevice::new("/devices/pci0000:00/0000:00:1f.2/ata1/host0/block/sda")
            .with_subsystem("block")
            .with_devnum(8, 0)
            .with_devnode("/dev/sda")
            .with_tag("systemd")
            .with_action(action)
            .with_db(db.clone())
    }

    const BUDGET: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn remove_ends_watch_before_rules_and_node_removal() {
        let db = MemoryDb::new();
        let journal = Journal::new();
        let exec = executor(&journal, |event| event.push_run("/bin/true", None));

        let mut dev = disk(&db, Action::Add);
        let mut event = Event::new(&mut dev);
        exec.execute_rules(&mut event, BUDGET, Duration::ZERO, &[])
            .await;
        drop(event);
        assert!(db.record(&dev.devpath).is_some());
        assert_eq!(db.tagged("systemd"), vec![dev.devpath.clone()]);

        let journal = Journal::new();
        let exec = executor(&journal, |event| event.push_run("/bin/true", None));
        let mut dev = disk(&db, Action::Remove);
        let mut event = Event::new(&mut dev);
        exec.execute_rules(&mut event, BUDGET, Duration::ZERO, &[])
            .await;
        assert_eq!(
            journal.entries(),
            vec!["watch_end /dev/sda", "rules", "remove_node /dev/sda 8:0"]
        );
        assert_eq!(event.run_list().len(), 1);
        drop(event);
        assert!(db.record(&dev.devpath).is_none());
        assert!(db.tagged("systemd").is_empty());
    }

    #[tokio::test]
    async fn remove_without_devnum_touches_no_node() {
        let db = MemoryDb::new();
        let journal = Journal::new();
        let exec = executor(&journal, |_| {});
        let mut dev = MemoryDevice::new("/devices/virtual/net/eth0")
            .with_subsystem("net")
            .with_action(Action::Remove)
            .with_db(db);
        let mut event = Event::new(&mut dev);
        exec.execute_rules(&mut event, BUDGET, Duration::ZERO, &[])
            .await;
        assert_eq!(journal.entries(), vec!["rules"]);
    }

    #[tokio::test]
    async fn device_without_subsystem_is_ignored() {
        let journal = Journal::new();
        let exec = executor(&journal, |_| {});
        let mut dev = MemoryDevice::new("/devices/virtual/foo").with_action(Action::Add);
        let mut event = Event::new(&mut dev);
        exec.execute_rules(&mut event, BUDGET, Duration::ZERO, &[])
            .await;
        drop(event);
        assert!(journal.entries().is_empty());
        assert!(!dev.initialized);
    }

    #[tokio::test]
    async fn add_resolves_group_mode_and_persists() {
        let db = MemoryDb::new();
        let journal = Journal::new();
        let exec = executor(&journal, |event| {
            event.set_group(6);
            event.add_seclabel("selinux", "fixed_disk_t");
        });
        let mut dev = disk(&db, Action::Add);
        let mut event = Event::new(&mut dev);
        exec.execute_rules(&mut event, BUDGET, Duration::ZERO, &[])
            .await;
        drop(event);

        let entries = journal.entries();
        assert_eq!(entries[0], "rules");
        assert!(entries[1].starts_with("add_node /dev/sda 8:0 mode=0660 uid=0 gid=6 apply=true"));
        assert!(entries[1].ends_with("seclabels=[selinux=fixed_disk_t]"));
        assert!(dev.initialized);
        let record = db.record(&dev.devpath).unwrap();
        assert!(record.usec_initialized.is_some());
    }

    #[tokio::test]
    async fn pass_through_change_keeps_kernel_mode_and_does_not_apply() {
        let db = MemoryDb::new();
        let journal = Journal::new();
        let exec = executor(&journal, |_| {});
        let mut dev = disk(&db, Action::Change).with_devnode_mode(0o640);
        let mut event = Event::new(&mut dev);
        exec.execute_rules(&mut event, BUDGET, Duration::ZERO, &[])
            .await;
        let add = journal.position("add_node").unwrap();
        assert!(journal.entries()[add].contains("mode=0640 uid=0 gid=0 apply=false"));
    }

    #[tokio::test]
    async fn change_reuses_previous_record() {
        let db = MemoryDb::new();
        let mut first = disk(&db, Action::Add).with_devlink("/dev/disk/by-id/old");
        let journal = Journal::new();
        let exec = executor(&journal, |_| {});
        let mut event = Event::new(&mut first);
        exec.execute_rules(&mut event, BUDGET, Duration::ZERO, &[])
            .await;
        drop(event);
        let stamp = db.record(&first.devpath).unwrap().usec_initialized;

        let journal = Journal::new();
        let exec = executor(&journal, |_| {});
        let mut second = disk(&db, Action::Change).with_devlink("/dev/disk/by-id/new");
        let mut event = Event::new(&mut second);
        exec.execute_rules(&mut event, BUDGET, Duration::ZERO, &[])
            .await;
        assert!(event.previous().is_none());
        drop(event);

        let entries = journal.entries();
        assert_eq!(entries[0], "watch_end /dev/sda");
        assert_eq!(entries[1], "rules");
        assert_eq!(entries[2], "update_old_links [/dev/disk/by-id/old]");
        assert!(entries[3].starts_with("add_node"));
        assert_eq!(second.usec_initialized, stamp);
        assert_eq!(
            db.record(&second.devpath).unwrap().devlinks,
            vec!["/dev/disk/by-id/new".to_string()]
        );
    }

    #[tokio::test]
    async fn move_without_devnum_carries_properties_forward() {
        let db = MemoryDb::new();
        let mut old = MemoryDevice::new("/devices/virtual/net/eth0")
            .with_subsystem("net")
            .with_property("ID_NET_NAME", "enp3s0")
            .with_action(Action::Add)
            .with_db(db.clone());
        let journal = Journal::new();
        let exec = executor(&journal, |_| {});
        let mut event = Event::new(&mut old);
        exec.execute_rules(&mut event, BUDGET, Duration::ZERO, &[])
            .await;
        drop(event);

        let mut moved = MemoryDevice::new("/devices/virtual/net/eth0")
            .with_subsystem("net")
            .with_action(Action::Move)
            .with_db(db);
        let mut event = Event::new(&mut moved);
        exec.execute_rules(&mut event, BUDGET, Duration::ZERO, &[])
            .await;
        drop(event);
        assert_eq!(moved.property("ID_NET_NAME").as_deref(), Some("enp3s0"));
    }

    fn nic(action: Action) -> MemoryDevice {
        MemoryDevice::new("/devices/pci0000:00/0000:00:19.0/net/eth0")
            .with_subsystem("net")
            .with_ifindex(3)
            .with_property("INTERFACE", "eth0")
            .with_action(action)
            .with_db(MemoryDb::new())
    }

    #[tokio::test]
    async fn add_renames_network_interface() {
        let journal = Journal::new();
        let exec = executor(&journal, |event| event.set_name("lan0"));
        let mut dev = nic(Action::Add);
        let mut event = Event::new(&mut dev);
        exec.execute_rules(&mut event, BUDGET, Duration::ZERO, &[])
            .await;
        assert!(event.has_netlink());
        drop(event);
        assert_eq!(
            journal.entries(),
            vec!["rules", "netlink_connect", "set_link_name 3 lan0"]
        );
        assert_eq!(dev.devpath, "/devices/pci0000:00/0000:00:19.0/net/lan0");
        assert_eq!(dev.property("INTERFACE").as_deref(), Some("lan0"));
    }

    #[tokio::test]
    async fn rename_is_add_only_and_skips_same_name() {
        let journal = Journal::new();
        let exec = executor(&journal, |event| event.set_name("lan0"));
        let mut dev = nic(Action::Change);
        let mut event = Event::new(&mut dev);
        exec.execute_rules(&mut event, BUDGET, Duration::ZERO, &[])
            .await;
        assert!(!event.has_netlink());

        let exec = executor(&journal, |event| event.set_name("eth0"));
        let mut dev = nic(Action::Add);
        let mut event = Event::new(&mut dev);
        exec.execute_rules(&mut event, BUDGET, Duration::ZERO, &[])
            .await;
        assert!(!event.has_netlink());
    }

    #[tokio::test]
    async fn long_interface_names_are_truncated() {
        let journal = Journal::new();
        let exec = executor(&journal, |event| event.set_name("wan-uplink-primary"));
        let mut dev = nic(Action::Add);
        let mut event = Event::new(&mut dev);
        exec.execute_rules(&mut event, BUDGET, Duration::ZERO, &[])
            .await;
        assert!(journal
            .entries()
            .contains(&"set_link_name 3 wan-uplink-prim".to_string()));
    }

    #[tokio::test]
    #[traced_test]
    async fn rename_failure_is_not_fatal() {
        let journal = Journal::new();
        let exec = EventExecutor::new(
            Arc::new(RecordingRules {
                journal: journal.clone(),
                configure: Box::new(|event| event.set_name("lan0")),
            }),
            Arc::new(DryRunBuiltins::new(journal.clone())),
            Arc::new(DryRunNodes::new(journal.clone())),
            Arc::new(FailingNetlink),
            Spawner::default(),
        );
        let db = MemoryDb::new();
        let mut dev = nic(Action::Add).with_db(db.clone());
        let mut event = Event::new(&mut dev);
        exec.execute_rules(&mut event, BUDGET, Duration::ZERO, &[])
            .await;
        drop(event);
        assert!(logs_contain("Could not rename interface"));
        assert_eq!(dev.sysname(), "eth0");
        assert!(dev.initialized);
        assert!(db.record(&dev.devpath).is_some());
    }

    #[tokio::test]
    async fn run_list_dispatches_in_order_and_is_consumed() {
        let journal = Journal::new();
        let exec = executor(&journal, |_| {});
        let mut dev = MemoryDevice::new("/devices/virtual/block/sda")
            .with_subsystem("block")
            .with_action(Action::Add);
        let mut event = Event::new(&mut dev);
        event.push_run("path_id $kernel", Some(BuiltinCommand::PathId));
        event.push_run("/bin/true", None);
        event.push_run("/bin/sh -c 'exit 4'", None);
        event.push_run("usb_id", Some(BuiltinCommand::UsbId));

        let summary = exec.execute_run(&mut event, BUDGET, Duration::ZERO).await;
        assert_eq!(
            summary,
            RunSummary {
                builtins: 2,
                spawned: 2,
                failed: 1
            }
        );
        assert_eq!(
            journal.entries(),
            vec![
                "builtin path_id 'path_id sda' test=false on /devices/virtual/block/sda",
                "builtin usb_id 'usb_id' test=false on /devices/virtual/block/sda",
            ]
        );
        let again = exec.execute_run(&mut event, BUDGET, Duration::ZERO).await;
        assert_eq!(again, RunSummary::default());
    }

    #[tokio::test]
    async fn exec_delay_skips_builtins() {
        let journal = Journal::new();
        let exec = executor(&journal, |_| {});
        let mut dev = MemoryDevice::new("/devices/virtual/block/sda").with_subsystem("block");
        let mut event = Event::new(&mut dev);
        event.set_exec_delay(Some(Duration::from_secs(60)));
        event.push_run("path_id", Some(BuiltinCommand::PathId));
        let summary = tokio::time::timeout(
            Duration::from_secs(5),
            exec.execute_run(&mut event, BUDGET, Duration::ZERO),
        )
        .await
        .unwrap();
        assert_eq!(summary.builtins, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exec_delay_precedes_each_spawn() {
        let journal = Journal::new();
        let exec = executor(&journal, |_| {});
        let mut dev = MemoryDevice::new("/devices/virtual/block/sda").with_subsystem("block");
        let mut event = Event::new(&mut dev);
        event.set_exec_delay(Some(Duration::from_secs(60)));
        event.push_run("/bin/true", None);
        event.push_run("/bin/true", None);

        let start = tokio::time::Instant::now();
        // No deadlines, so the paused clock only moves for the delay.
        let summary = exec.execute_run(&mut event, Duration::ZERO, Duration::ZERO).await;
        assert_eq!(summary.spawned, 2);
        assert_eq!(summary.failed, 0);
        assert!(start.elapsed() >= Duration::from_secs(120));
    }

    #[tokio::test]
    async fn process_begins_watch_and_counts_event() {
        let db = MemoryDb::new();
        let journal = Journal::new();
        let metrics = Arc::new(MetricsRecorder::new().unwrap());
        let exec = executor(&journal, |event| event.set_watch(true)).with_metrics(metrics.clone());
        let mut dev = disk(&db, Action::Add);
        let mut event = Event::new(&mut dev);
        exec.process(&mut event, &ExecConfig::default(), &[])
            .await;
        assert_eq!(
            journal.entries().last().map(String::as_str),
            Some("watch_begin /dev/sda")
        );
        assert_eq!(metrics.processed_events.get() as u64, 1);
    }
}
