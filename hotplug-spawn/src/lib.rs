//! # hotplug spawn
//!
//! Runs one external helper per call under the time budget of the device
//! transition that requested it. Output is multiplexed with the exit watch
//! and the two deadlines in a single request-scoped `select!` loop.

pub mod capture;
pub mod command;
pub mod error;
pub mod exit;
pub mod spawner;

pub use capture::CaptureBuffer;
pub use command::{resolve_program, split_command};
pub use error::SpawnError;
pub use exit::{signal_name, ExitKind, SpawnOutcome};
pub use spawner::{Spawner, DEFAULT_HELPER_DIR};
