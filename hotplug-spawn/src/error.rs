use std::io;

use thiserror::Error;

/// Setup faults. A command that runs and fails, or is killed on timeout, is
/// not an error: it is reported through [`crate::SpawnOutcome`].
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("empty command line")]
    EmptyCommand,

    #[error("failed to execute '{command}': {source}")]
    Exec {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to wait for '{command}': {source}")]
    Wait {
        command: String,
        #[source]
        source: io::Error,
    },
}
