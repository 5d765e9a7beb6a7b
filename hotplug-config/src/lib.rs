//! # hotplug configuration
//!
//! Layered configuration for the device-event executor.
//!
//! Hierarchy, later layers win:
//! 1. Built-in defaults
//! 2. `config/hotplug.yaml`, when present
//! 3. `HOTPLUG_*` environment variables, `__` separating nested keys
//!    (`HOTPLUG_EXEC__TIMEOUT_SECS=30`)

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

mod error;
mod exec;
mod telemetry;
mod validation;

pub use error::ConfigError;
pub use exec::ExecConfig;
pub use telemetry::TelemetryConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config/hotplug.yaml";
const ENV_PREFIX: &str = "HOTPLUG_";

#[derive(Debug, Serialize, Deserialize, Validate, Default, Clone, PartialEq, Eq)]
pub struct HotplugConfig {
    #[serde(default)]
    #[validate(nested)]
    pub exec: ExecConfig,

    #[serde(default)]
    #[validate(nested)]
    pub telemetry: TelemetryConfig,
}

impl HotplugConfig {
    /// Load from the default file location and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(HotplugConfig::default()));
        if Path::new(DEFAULT_CONFIG_PATH).exists() {
            figment = figment.merge(Yaml::file(DEFAULT_CONFIG_PATH));
        }
        Self::finish(figment)
    }

    /// Load from an explicit file, which must exist.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(PathBuf::from(path)));
        }
        let figment =
            Figment::from(Serialized::defaults(HotplugConfig::default())).merge(Yaml::file(path));
        Self::finish(figment)
    }

    fn finish(figment: Figment) -> Result<Self, ConfigError> {
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn defaults_validate() {
        let config = HotplugConfig::default();
        config.validate().expect("default config should validate");
        assert_eq!(config.exec.timeout(), Duration::from_secs(180));
        assert_eq!(config.exec.timeout_warn(), Duration::from_secs(60));
        assert_eq!(config.exec.exec_delay(), None);
        assert_eq!(config.exec.result_capacity, 4096);
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "exec:\n  timeout_secs: 30\n  timeout_warn_secs: 10\n  exec_delay_secs: 2\ntelemetry:\n  log_level: debug"
        )
        .unwrap();
        let config = HotplugConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.exec.timeout_secs, 30);
        assert_eq!(config.exec.exec_delay(), Some(Duration::from_secs(2)));
        assert_eq!(config.exec.helper_dir, PathBuf::from("/usr/lib/udev"));
        assert_eq!(config.telemetry.log_level, "debug");
    }

    #[test]
    fn warn_must_be_below_timeout() {
        let mut config = HotplugConfig::default();
        config.exec.timeout_secs = 10;
        config.exec.timeout_warn_secs = 10;
        assert!(config.validate().is_err());
        config.exec.timeout_warn_secs = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn relative_helper_dir_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "exec:\n  helper_dir: lib/udev").unwrap();
        let err = HotplugConfig::load_from_path(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("helper_dir_not_absolute"));
    }

    #[test]
    fn missing_file_is_reported() {
        let err = HotplugConfig::load_from_path("/nonexistent/hotplug.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn environment_override() {
        std::env::set_var("HOTPLUG_EXEC__RESULT_CAPACITY", "8192");
        let config = HotplugConfig::load().unwrap();
        std::env::remove_var("HOTPLUG_EXEC__RESULT_CAPACITY");
        assert_eq!(config.exec.result_capacity, 8192);
    }
}
