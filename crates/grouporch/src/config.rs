//! Engine configuration.

use grouporch_types::DeviceId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GroupOrchConfig {
    /// How often devices without a provider are polled through their
    /// driver, in milliseconds. Zero disables polling.
    pub driver_poll_interval_ms: u64,
    /// First id handed out to groups without a preferred id.
    pub first_group_id: u32,
    /// Undelivered event count above which a warning is logged.
    pub event_queue_warn_threshold: usize,
    /// Devices served by the in-memory simulated provider.
    pub simulated_devices: Vec<DeviceId>,
    /// Simulated devices reachable only through their driver.
    pub driver_devices: Vec<DeviceId>,
}

impl Default for GroupOrchConfig {
    fn default() -> Self {
        Self {
            driver_poll_interval_ms: 5_000,
            first_group_id: 1,
            event_queue_warn_threshold: 1_024,
            simulated_devices: Vec::new(),
            driver_devices: Vec::new(),
        }
    }
}

impl GroupOrchConfig {
    /// Loads a YAML config file; absent fields take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| (path.to_path_buf(), e))?;
        let config: GroupOrchConfig =
            serde_yaml::from_str(&contents).map_err(|e| (path.to_path_buf(), e))?;
        Ok(config)
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("error reading \"{}\": {}", path.display(), err)]
    Io { path: PathBuf, err: std::io::Error },
    #[error("error parsing \"{}\": {}", path.display(), err)]
    Parse {
        path: PathBuf,
        err: serde_yaml::Error,
    },
}

impl From<(PathBuf, std::io::Error)> for LoadError {
    fn from((path, err): (PathBuf, std::io::Error)) -> Self {
        LoadError::Io { path, err }
    }
}

impl From<(PathBuf, serde_yaml::Error)> for LoadError {
    fn from((path, err): (PathBuf, serde_yaml::Error)) -> Self {
        LoadError::Parse { path, err }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = GroupOrchConfig::default();
        assert_eq!(config.first_group_id, 1);
        assert_eq!(config.driver_poll_interval_ms, 5_000);
        assert!(config.simulated_devices.is_empty());
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "first_group_id: 256").unwrap();
        writeln!(file, "simulated_devices:").unwrap();
        writeln!(file, "  - \"sim:leaf1\"").unwrap();
        writeln!(file, "  - \"sim:leaf2\"").unwrap();

        let config = GroupOrchConfig::from_file(file.path()).unwrap();
        assert_eq!(config.first_group_id, 256);
        assert_eq!(config.driver_poll_interval_ms, 5_000);
        assert_eq!(
            config.simulated_devices,
            vec![
                DeviceId::new("sim:leaf1").unwrap(),
                DeviceId::new("sim:leaf2").unwrap()
            ]
        );
    }

    #[test]
    fn test_from_file_errors() {
        let err = GroupOrchConfig::from_file("/nonexistent/grouporch.yaml").unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "simulated_devices: [\"no-scheme\"]").unwrap();
        let err = GroupOrchConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, LoadError::Parse { .. }));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "poll_ms: 3").unwrap();
        assert!(GroupOrchConfig::from_file(file.path()).is_err());
    }
}
