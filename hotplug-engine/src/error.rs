use std::io;

use hotplug_core::builtin::BuiltinCommand;
use hotplug_core::DeviceError;
use hotplug_spawn::SpawnError;
use thiserror::Error;

/// Faults reported by collaborators. None of them abort a transition; the
/// executor logs them and carries on.
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("Rule application failed: {0}")]
    Rules(String),

    #[error("Builtin '{builtin}' failed: {reason}")]
    Builtin {
        builtin: BuiltinCommand,
        reason: String,
    },

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Spawn error: {0}")]
    Spawn(#[from] SpawnError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
