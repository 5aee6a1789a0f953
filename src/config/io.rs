use std::env::current_exe;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::str;
use directories_next::ProjectDirs;
use fd_lock::{RwLock, RwLockWriteGuard};
use log::{info, warn};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::config::types::Config;
use crate::error::ConfigError;

const CONFIG_FILE_NAME: &str = "feeder-control.json";

/// Where the config lives when no path is given: next to the executable if a file is already
/// there (portable installs), otherwise in the per-user config directory.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    match current_exe() {
        Ok(mut portable) => {
            // F:\feeder-control.exe => F:\feeder-control.json
            if portable.set_extension("json") && portable.is_file() {
                return Ok(portable);
            }
        },
        Err(err) => warn!("Failed to get current exe path: {:?}", err),
    }

    ProjectDirs::from("org", "petfeeder", "feeder-control")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
        .ok_or(ConfigError::NoConfigPath)
}

/// Exclusive lock on the config file, held for as long as the application runs.
pub struct InstanceLock {
    rw_lock: RwLock<std::fs::File>,
}

impl InstanceLock {
    /// A second instance fails here with [`ConfigError::CanNotLock`].
    pub fn acquire(&mut self) -> Result<RwLockWriteGuard<'_, std::fs::File>, ConfigError> {
        self.rw_lock.try_write().map_err(|source| ConfigError::CanNotLock { source })
    }
}

pub struct ConfigIO {
    file: std::fs::File,
}

impl ConfigIO {
    /// Open (creating if needed) the config file at `path`, or at [`default_config_path`].
    pub fn open(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => default_config_path()?,
        };
        info!("Using config file {}", path.to_string_lossy());

        if let Some(directory) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(directory)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .truncate(false)
            .create(true)
            .open(&path)?;

        Ok(ConfigIO { file })
    }

    pub fn instance_lock(&self) -> Result<InstanceLock, ConfigError> {
        Ok(InstanceLock { rw_lock: RwLock::new(self.file.try_clone()?) })
    }

    fn async_file(&self) -> Result<File, ConfigError> {
        Ok(File::from_std(self.file.try_clone()?))
    }

    /// Returns `None` when the file is empty, i.e. it was just created.
    pub async fn read(&self) -> Result<Option<Config>, ConfigError> {
        let mut file = self.async_file()?;
        info!("Reading config file");

        let mut content = vec![];
        file.rewind().await?;
        file.read_to_end(&mut content).await?;

        if content.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(None);
        }

        let config = serde_json::from_str(str::from_utf8(&content)?)?;
        Ok(Some(config))
    }

    pub async fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let mut file = self.async_file()?;
        info!("Saving config");

        let content = serde_json::to_string_pretty(config)?;
        file.rewind().await?;
        file.set_len(0).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Read the config, writing the defaults back when the file is new so they can be edited.
    pub async fn load_or_init(&self) -> Result<Config, ConfigError> {
        match self.read().await? {
            Some(config) => Ok(config),
            None => {
                info!("Config file is empty, writing defaults");
                let config = Config::default();
                self.save(&config).await?;
                Ok(config)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_file_is_initialized_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);
        let config_io = ConfigIO::open(Some(&path)).unwrap();

        assert_eq!(config_io.load_or_init().await.unwrap(), Config::default());

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("\"connectTimeoutMs\""));
    }

    #[tokio::test]
    async fn saved_changes_are_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config_io = ConfigIO::open(Some(&path)).unwrap();

        let config = Config { name_filter: Some("HMSoft".to_string()), connect_timeout_ms: 3000, ..Config::default() };
        config_io.save(&config).await.unwrap();

        // a shorter document must not leave a tail of the previous one behind
        let shorter = Config { name_filter: None, ..config.clone() };
        config_io.save(&shorter).await.unwrap();

        assert_eq!(config_io.read().await.unwrap(), Some(shorter));
    }

    #[tokio::test]
    async fn malformed_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "{ not json").unwrap();

        let config_io = ConfigIO::open(Some(&path)).unwrap();
        assert!(matches!(config_io.read().await, Err(ConfigError::JsonError { .. })));
    }

    #[test]
    fn second_instance_cannot_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let first = ConfigIO::open(Some(&path)).unwrap();
        let mut first_lock = first.instance_lock().unwrap();
        let _guard = first_lock.acquire().unwrap();

        let second = ConfigIO::open(Some(&path)).unwrap();
        let mut second_lock = second.instance_lock().unwrap();
        assert!(matches!(second_lock.acquire(), Err(ConfigError::CanNotLock { .. })));
    }
}
