//! Run-list execution parameters.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::validation;

#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq, Eq)]
#[validate(schema(function = validation::validate_exec_budget))]
pub struct ExecConfig {
    /// Budget for every command spawned on behalf of one event, counted from
    /// the event's creation. Zero disables the deadline.
    #[serde(default = "default_timeout")]
    #[validate(range(max = 86400))]
    pub timeout_secs: u64,

    /// Point at which a still running command is reported. Zero disables it.
    #[serde(default = "default_timeout_warn")]
    pub timeout_warn_secs: u64,

    /// Pause before each external (non-builtin) command.
    #[serde(default)]
    #[validate(range(max = 60))]
    pub exec_delay_secs: u64,

    #[serde(default = "default_helper_dir")]
    #[validate(custom(function = validation::validate_helper_dir))]
    pub helper_dir: PathBuf,

    /// Size of the buffer capturing a program's output, terminator included.
    #[serde(default = "default_result_capacity")]
    #[validate(range(min = 2, max = 1048576))]
    pub result_capacity: usize,
}

fn default_timeout() -> u64 {
    180
}

fn default_timeout_warn() -> u64 {
    60
}

fn default_helper_dir() -> PathBuf {
    PathBuf::from("/usr/lib/udev")
}

fn default_result_capacity() -> usize {
    4096
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            timeout_warn_secs: default_timeout_warn(),
            exec_delay_secs: 0,
            helper_dir: default_helper_dir(),
            result_capacity: default_result_capacity(),
        }
    }
}

impl ExecConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn timeout_warn(&self) -> Duration {
        Duration::from_secs(self.timeout_warn_secs)
    }

    pub fn exec_delay(&self) -> Option<Duration> {
        (self.exec_delay_secs > 0).then(|| Duration::from_secs(self.exec_delay_secs))
    }
}
