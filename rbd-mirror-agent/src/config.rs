// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration related types used by rbd-mirror-agent

use camino::{Utf8Path, Utf8PathBuf};
use dropshot::ConfigLogging;
use rbd_mirror_reconciler::StatusPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

fn default_tick_interval_secs() -> u64 {
    300
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory holding relation data, leadership markers and the status
    /// file.
    pub state_dir: Utf8PathBuf,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Deadline for each `rbd` invocation. Absent means no deadline.
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
    pub log: ConfigLogging,
    #[serde(default)]
    pub status: StatusPolicy,
}

impl Config {
    /// Load a `Config` from the given TOML file
    pub fn from_file<P: AsRef<Utf8Path>>(
        path: P,
    ) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|error| {
            ConfigError::Io { error, path: path.to_owned() }
        })?;
        let config: Config =
            toml::from_str(&data).map_err(|error| ConfigError::Parse {
                error,
                path: path.to_owned(),
            })?;
        config.validate().map_err(|reason| ConfigError::Invalid {
            reason,
            path: path.to_owned(),
        })?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), &'static str> {
        if self.tick_interval_secs == 0 {
            return Err("tick_interval_secs must be non-zero");
        }
        if self.command_timeout_secs == Some(0) {
            return Err("command_timeout_secs must be non-zero");
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {path}")]
    Io {
        #[source]
        error: std::io::Error,
        path: Utf8PathBuf,
    },
    #[error("Failed to parse config file: {path}")]
    Parse {
        #[source]
        error: toml::de::Error,
        path: Utf8PathBuf,
    },
    #[error("Invalid config file {path}: {reason}")]
    Invalid { reason: &'static str, path: Utf8PathBuf },
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;
    use camino_tempfile::Utf8TempDir;

    #[test]
    fn example_config_parses() {
        let path =
            Utf8Path::new(env!("CARGO_MANIFEST_DIR")).join("config.toml");
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.state_dir, "/var/lib/rbd-mirror-agent");
        assert_eq!(config.tick_interval(), Duration::from_secs(300));
        assert_eq!(config.command_timeout(), Some(Duration::from_secs(60)));
        assert!(!config.status.escalate_unhealthy_pools);
    }

    #[test]
    fn defaults_apply() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            state_dir = "/tmp/state"

            [log]
            mode = "stderr-terminal"
            level = "debug"
            "#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.tick_interval_secs, 300);
        assert_eq!(config.command_timeout(), None);
        assert_eq!(config.status, StatusPolicy::default());
    }

    #[test]
    fn errors_name_the_file() {
        let dir = Utf8TempDir::new().unwrap();
        let missing = dir.path().join("missing.toml");
        assert_matches!(
            Config::from_file(&missing),
            Err(ConfigError::Io { path, .. }) if path == missing
        );

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "state_dir = 7\n").unwrap();
        let err = Config::from_file(&bad).unwrap_err();
        assert_matches!(err, ConfigError::Parse { .. });
        assert!(err.to_string().contains("bad.toml"), "{err}");
    }

    #[test]
    fn zero_durations_are_rejected() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let base = r#"
            state_dir = "/tmp/state"

            [log]
            mode = "stderr-terminal"
            level = "info"
        "#;

        std::fs::write(&path, format!("tick_interval_secs = 0\n{base}"))
            .unwrap();
        assert_matches!(
            Config::from_file(&path),
            Err(ConfigError::Invalid { reason, .. })
                if reason.contains("tick_interval_secs")
        );

        std::fs::write(&path, format!("command_timeout_secs = 0\n{base}"))
            .unwrap();
        assert_matches!(
            Config::from_file(&path),
            Err(ConfigError::Invalid { reason, .. })
                if reason.contains("command_timeout_secs")
        );

        std::fs::write(&path, format!("tick_interval_secs = 1\n{base}"))
            .unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
    }
}
