//! Live configuration snapshots with validated, atomic updates

use crate::config::{Config, ConfigValidator};
use crate::error::{MeldError, Result};
use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

/// Callback fired after every successful commit
pub type ConfigListener = Arc<dyn Fn(&Config) -> Result<()> + Send + Sync>;

/// Owns the active configuration snapshot.
///
/// Readers get an `Arc<Config>` that never changes underneath them. Writers
/// go through [`ConfigManager::update`] or [`ConfigManager::load`], which
/// validate a complete candidate before swapping it in; a rejected candidate
/// leaves the active snapshot and version untouched.
pub struct ConfigManager {
    current: RwLock<Arc<Config>>,
    version: AtomicU64,
    path: Option<PathBuf>,
    profile: Option<String>,
    listeners: Mutex<Vec<(u64, ConfigListener)>>,
    next_listener_id: AtomicU64,
    commit_lock: Mutex<()>,
    file_stamp: Mutex<Option<SystemTime>>,
}

impl ConfigManager {
    /// Create a manager around an in-memory configuration
    pub fn new(config: Config) -> Result<Self> {
        ConfigValidator::validate(&config)?;
        Ok(Self::with_snapshot(config, None, None))
    }

    /// Create a manager backed by a config file (re-read by [`ConfigManager::load`])
    pub fn from_file(path: impl Into<PathBuf>, profile: Option<String>) -> Result<Self> {
        let path = path.into();
        let config = Self::read_layers(&path, profile.as_deref())?;
        let manager = Self::with_snapshot(config, Some(path.clone()), profile);
        *manager.file_stamp.lock() = modified_time(&path);
        Ok(manager)
    }

    fn with_snapshot(config: Config, path: Option<PathBuf>, profile: Option<String>) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
            version: AtomicU64::new(1),
            path,
            profile,
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            commit_lock: Mutex::new(()),
            file_stamp: Mutex::new(None),
        }
    }

    fn read_layers(path: &Path, profile: Option<&str>) -> Result<Config> {
        let mut config = Config::load_unvalidated(path)?;
        config.apply_env_overrides();
        if let Some(profile) = profile {
            config.apply_profile(profile)?;
        }
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Current immutable snapshot
    pub fn get(&self) -> Arc<Config> {
        Arc::clone(&self.current.read())
    }

    /// Number of commits so far (starts at 1)
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Re-read the backing file. On failure the running snapshot stays active.
    pub fn load(&self) -> Result<u64> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| MeldError::Config("No configuration file to reload".to_string()))?;

        let _guard = self.commit_lock.lock();
        match Self::read_layers(path, self.profile.as_deref()) {
            Ok(config) => {
                *self.file_stamp.lock() = modified_time(path);
                Ok(self.commit(config))
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Config reload rejected, keeping previous snapshot");
                Err(e)
            }
        }
    }

    /// Deep-merge `partial` into the current snapshot and commit if valid
    pub fn update(&self, partial: toml::Value) -> Result<u64> {
        let _guard = self.commit_lock.lock();
        let base = self.get();

        let mut candidate = base.merged_with(partial, "update")?;
        candidate.meta.last_modified = chrono::Utc::now().to_rfc3339();

        if let Err(e) = ConfigValidator::validate(&candidate) {
            tracing::warn!(error = %e, "Config update rejected");
            return Err(e);
        }

        Ok(self.commit(candidate))
    }

    /// Same as [`ConfigManager::update`] with a JSON patch
    pub fn update_json(&self, partial: serde_json::Value) -> Result<u64> {
        let patch = toml::Value::try_from(partial).map_err(|e| MeldError::InvalidConfigValue {
            path: "update".to_string(),
            message: e.to_string(),
        })?;
        self.update(patch)
    }

    /// Write the active snapshot back to the backing file
    pub fn persist(&self) -> Result<()> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| MeldError::Config("No configuration file to write".to_string()))?;
        self.get().save(path)?;
        *self.file_stamp.lock() = modified_time(path);
        Ok(())
    }

    /// Reload if the backing file changed since the last read
    pub fn reload_if_changed(&self) -> Result<bool> {
        let Some(path) = self.path.as_ref() else {
            return Ok(false);
        };
        let stamp = modified_time(path);
        if stamp.is_none() || stamp == *self.file_stamp.lock() {
            return Ok(false);
        }

        tracing::info!(path = %path.display(), "Config file changed, reloading");
        let result = self.load();
        // Remember the stamp even on failure so a broken file is not re-parsed every tick.
        *self.file_stamp.lock() = stamp;
        result.map(|_| true)
    }

    /// Register a listener; returns an id for [`ConfigManager::unsubscribe`]
    pub fn subscribe(&self, listener: ConfigListener) -> u64 {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn commit(&self, config: Config) -> u64 {
        let snapshot = Arc::new(config);
        *self.current.write() = Arc::clone(&snapshot);
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::info!(version, "Configuration committed");

        let listeners: Vec<(u64, ConfigListener)> = self.listeners.lock().clone();
        for (id, listener) in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(&snapshot))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(listener = id, error = %e, "Config listener failed"),
                Err(_) => tracing::error!(listener = id, "Config listener panicked"),
            }
        }

        version
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
