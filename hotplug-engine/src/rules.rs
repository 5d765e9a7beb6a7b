//! ## hotplug-engine::rules
//! **A fixed rule outcome loaded from YAML**
//!
//! Stands in for the rule engine in the offline harness: every event is
//! treated as matching one rule whose actions are given verbatim. Values are
//! templates and are expanded against the event like real rule values.
//!
//! ```yaml
//! program: "/bin/echo $kernel"
//! name: "disk-$result"
//! mode: "0640"
//! group: 6
//! seclabels:
//!   - { module: selinux, label: "system_u:object_r:fixed_disk_device_t" }
//! properties:
//!   ID_SERIAL: "$attr{serial}"
//! run:
//!   - builtin: path_id
//!   - program: "/usr/bin/logger added $devnode"
//! watch: true
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use hotplug_core::builtin::BuiltinCommand;
use hotplug_core::device::MemoryDevice;
use hotplug_core::Event;
use hotplug_format::{expand, NAME_SIZE, PATH_SIZE};
use hotplug_spawn::{CaptureBuffer, Spawner};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::collaborators::RuleApplier;
use crate::error::ExecuteError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SeclabelRule {
    pub module: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunRule {
    Program(String),
    Builtin(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuleSet {
    /// Run before everything else; its output becomes `$result`. A failing
    /// program makes the rule not match.
    pub program: Option<String>,
    pub name: Option<String>,
    pub owner: Option<u32>,
    pub group: Option<u32>,
    /// Octal, as in rule files.
    pub mode: Option<String>,
    pub seclabels: Vec<SeclabelRule>,
    pub properties: BTreeMap<String, String>,
    pub run: Vec<RunRule>,
    pub watch: bool,
}

pub struct StaticRules {
    rules: RuleSet,
    mode: Option<u32>,
    spawner: Spawner,
    result_capacity: usize,
}

impl StaticRules {
    pub fn new(
        rules: RuleSet,
        spawner: Spawner,
        result_capacity: usize,
    ) -> Result<Self, ExecuteError> {
        let mode = rules
            .mode
            .as_deref()
            .map(|mode| {
                u32::from_str_radix(mode.trim_start_matches("0o"), 8)
                    .map_err(|_| ExecuteError::Rules(format!("invalid mode '{mode}'")))
            })
            .transpose()?;
        for entry in &rules.run {
            if let RunRule::Builtin(command) = entry {
                if BuiltinCommand::lookup(command).is_none() {
                    return Err(ExecuteError::Rules(format!("unknown builtin '{command}'")));
                }
            }
        }
        Ok(Self {
            rules,
            mode,
            spawner,
            result_capacity,
        })
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    async fn run_program(
        &self,
        event: &mut Event<'_, MemoryDevice>,
        template: &str,
        timeout: Duration,
        warn_after: Duration,
    ) -> Result<bool, ExecuteError> {
        let command = expand(event, template, PATH_SIZE, false);
        let mut capture = CaptureBuffer::new(self.result_capacity);
        let outcome = self
            .spawner
            .run(event, &command, timeout, warn_after, true, Some(&mut capture))
            .await?;
        if !outcome.success() {
            debug!("Program '{}' failed, rule does not match", command);
            return Ok(false);
        }
        let result = capture.to_string_lossy();
        let result = result.trim_end_matches('\n');
        debug!("Program '{}' returned '{}'", command, result);
        event.set_program_result(result);
        Ok(true)
    }
}

#[async_trait]
impl RuleApplier<MemoryDevice> for StaticRules {
    async fn apply_rules(
        &self,
        event: &mut Event<'_, MemoryDevice>,
        timeout: Duration,
        warn_after: Duration,
        properties: &[(String, String)],
    ) -> Result<(), ExecuteError> {
        for (key, value) in properties {
            event.device_mut().set_property(key, value);
        }

        if let Some(program) = &self.rules.program {
            if !self.run_program(event, program, timeout, warn_after).await? {
                return Ok(());
            }
        }

        for (key, template) in &self.rules.properties {
            let value = expand(event, template, NAME_SIZE, false);
            event.device_mut().set_property(key, &value);
        }

        if let Some(template) = &self.rules.name {
            let name = expand(event, template, NAME_SIZE, true);
            if name.is_empty() {
                warn!("Name '{}' expanded to nothing, ignoring", template);
            } else {
                event.set_name(name);
            }
        }

        if let Some(uid) = self.rules.owner {
            event.set_owner(uid);
        }
        if let Some(gid) = self.rules.group {
            event.set_group(gid);
        }
        if let Some(mode) = self.mode {
            event.set_mode(mode);
        }

        for SeclabelRule { module, label } in &self.rules.seclabels {
            event.add_seclabel(module, label);
        }

        for entry in &self.rules.run {
            match entry {
                RunRule::Program(command) => event.push_run(command.clone(), None),
                RunRule::Builtin(command) => {
                    event.push_run(command.clone(), BuiltinCommand::lookup(command))
                }
            }
        }

        if self.rules.watch {
            event.set_watch(true);
        }
        Ok(())
    }
}
