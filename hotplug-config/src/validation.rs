//! Custom validation functions for configuration.

use std::path::Path;

use regex::Regex;
use validator::ValidationError;

use crate::exec::ExecConfig;

/// Validate a tracing level name.
pub fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let re = Regex::new("^(trace|debug|info|warn|error)$")
        .map_err(|_| ValidationError::new("invalid_regex"))?;
    if re.is_match(&level.to_lowercase()) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_log_level"))
    }
}

/// Helper programs are resolved against this directory, so it must not
/// depend on the daemon's working directory.
pub fn validate_helper_dir(dir: &Path) -> Result<(), ValidationError> {
    if dir.is_absolute() {
        Ok(())
    } else {
        Err(ValidationError::new("helper_dir_not_absolute"))
    }
}

/// The warn deadline only makes sense strictly inside the kill deadline.
pub fn validate_exec_budget(exec: &ExecConfig) -> Result<(), ValidationError> {
    if exec.timeout_secs == 0 || exec.timeout_warn_secs == 0 {
        return Ok(());
    }
    if exec.timeout_warn_secs < exec.timeout_secs {
        Ok(())
    } else {
        Err(ValidationError::new("warn_not_below_timeout"))
    }
}
