use crate::error::AppResult;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub general: GeneralSettings,
    #[serde(default)]
    pub network: NetworkSettings,
    #[serde(default)]
    pub transfers: TransferSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    #[serde(default = "default_remote_path")]
    pub default_remote_path: String,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_remote_path() -> String {
    "/".to_string()
}

fn default_log_filter() -> String {
    crate::logging::DEFAULT_FILTER.to_string()
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            default_remote_path: default_remote_path(),
            log_filter: default_log_filter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_io_timeout")]
    pub io_timeout_secs: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_io_timeout() -> u64 {
    60
}

fn default_idle_timeout() -> u64 {
    900
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            io_timeout_secs: default_io_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl NetworkSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs.max(1))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Upper bound on transfers moving bytes at once; unbounded when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<usize>,
    #[serde(default = "default_speed_sample_ms")]
    pub speed_sample_ms: u64,
}

fn default_chunk_size() -> usize {
    64 * 1024
}

fn default_speed_sample_ms() -> u64 {
    200
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_concurrent: None,
            speed_sample_ms: default_speed_sample_ms(),
        }
    }
}

impl TransferSettings {
    pub fn speed_sample_interval(&self) -> Duration {
        Duration::from_millis(self.speed_sample_ms)
    }
}

impl AppSettings {
    pub fn load(config_dir: &Path) -> AppResult<Self> {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: AppSettings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            let settings = AppSettings::default();
            settings.save(config_dir)?;
            Ok(settings)
        }
    }

    pub fn save(&self, config_dir: &Path) -> AppResult<()> {
        std::fs::create_dir_all(config_dir)?;
        let config_path = config_dir.join("config.toml");
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_load_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = AppSettings::load(dir.path()).unwrap();
        assert_eq!(settings.transfers.chunk_size, 64 * 1024);
        assert_eq!(settings.transfers.max_concurrent, None);
        assert!(dir.path().join("config.toml").exists());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "[transfers]\nmax_concurrent = 2\n",
        )
        .unwrap();

        let settings = AppSettings::load(dir.path()).unwrap();
        assert_eq!(settings.transfers.max_concurrent, Some(2));
        assert_eq!(settings.transfers.speed_sample_ms, 200);
        assert_eq!(settings.network.connect_timeout(), Duration::from_secs(30));
        assert_eq!(settings.general.default_remote_path, "/");
    }
}
