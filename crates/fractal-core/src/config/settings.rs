//! Operator admission policy and its persisted store.
//!
//! The policy only changes through validated mutators, so a state with no
//! permitted network transport cannot be produced through this API. A policy
//! loaded from disk in that state is normalized back to Wi-Fi.
//!
//! A running client and the `settings` command are separate processes sharing
//! one file. [`SettingsStore::watch`] marks the published policy stale when the
//! file changes, and the next [`SettingsStore::snapshot`] re-reads it.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("at least one network transport (Wi-Fi or cellular) must stay enabled")]
    NoTransport,

    #[error("minimum charge must be between 0 and 100, got {0}")]
    InvalidChargeLimit(u16),

    #[error("failed to read settings: {0}")]
    Read(String),

    #[error("failed to parse settings: {0}")]
    Parse(String),

    #[error("failed to write settings: {0}")]
    Write(String),

    #[error("failed to watch settings: {0}")]
    Watch(String),
}

pub type SettingsResult<T> = std::result::Result<T, SettingsError>;

/// When the device may train and which networks it may use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PolicyFile")]
pub struct AdmissionPolicy {
    on_wifi: bool,
    on_data: bool,
    overnight_only: bool,
    idle_only: bool,
    min_charge_percent: u8,
    charging_exclusive: bool,
}

/// Serialized form; every field optional so partial files load.
#[derive(Deserialize)]
#[serde(default)]
struct PolicyFile {
    on_wifi: bool,
    on_data: bool,
    overnight_only: bool,
    idle_only: bool,
    min_charge_percent: u8,
    charging_exclusive: bool,
}

impl Default for PolicyFile {
    fn default() -> Self {
        let d = AdmissionPolicy::default();
        Self {
            on_wifi: d.on_wifi,
            on_data: d.on_data,
            overnight_only: d.overnight_only,
            idle_only: d.idle_only,
            min_charge_percent: d.min_charge_percent,
            charging_exclusive: d.charging_exclusive,
        }
    }
}

impl From<PolicyFile> for AdmissionPolicy {
    fn from(file: PolicyFile) -> Self {
        let mut policy = Self {
            on_wifi: file.on_wifi,
            on_data: file.on_data,
            overnight_only: file.overnight_only,
            idle_only: file.idle_only,
            min_charge_percent: file.min_charge_percent.min(100),
            charging_exclusive: file.charging_exclusive,
        };
        if !policy.on_wifi && !policy.on_data {
            warn!("settings permit no network transport, re-enabling Wi-Fi");
            policy.on_wifi = true;
        }
        policy
    }
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            on_wifi: true,
            on_data: false,
            overnight_only: false,
            idle_only: true,
            min_charge_percent: 34,
            charging_exclusive: false,
        }
    }
}

impl AdmissionPolicy {
    pub fn on_wifi(&self) -> bool {
        self.on_wifi
    }

    pub fn on_data(&self) -> bool {
        self.on_data
    }

    pub fn overnight_only(&self) -> bool {
        self.overnight_only
    }

    pub fn idle_only(&self) -> bool {
        self.idle_only
    }

    pub fn min_charge_percent(&self) -> u8 {
        self.min_charge_percent
    }

    pub fn charging_exclusive(&self) -> bool {
        self.charging_exclusive
    }

    /// Flip Wi-Fi permission. Returns the new value.
    pub fn toggle_wifi(&mut self) -> SettingsResult<bool> {
        self.set_transports(!self.on_wifi, self.on_data)?;
        Ok(self.on_wifi)
    }

    /// Flip cellular permission. Returns the new value.
    pub fn toggle_data(&mut self) -> SettingsResult<bool> {
        self.set_transports(self.on_wifi, !self.on_data)?;
        Ok(self.on_data)
    }

    pub fn set_transports(&mut self, wifi: bool, data: bool) -> SettingsResult<()> {
        if !wifi && !data {
            return Err(SettingsError::NoTransport);
        }
        self.on_wifi = wifi;
        self.on_data = data;
        Ok(())
    }

    pub fn set_overnight_only(&mut self, enabled: bool) {
        self.overnight_only = enabled;
    }

    pub fn set_idle_only(&mut self, enabled: bool) {
        self.idle_only = enabled;
    }

    pub fn set_charging_exclusive(&mut self, enabled: bool) {
        self.charging_exclusive = enabled;
    }

    pub fn set_min_charge_percent(&mut self, percent: u16) -> SettingsResult<()> {
        let percent = u8::try_from(percent)
            .ok()
            .filter(|p| *p <= 100)
            .ok_or(SettingsError::InvalidChargeLimit(percent))?;
        self.min_charge_percent = percent;
        Ok(())
    }

    pub fn from_toml(content: &str) -> SettingsResult<Self> {
        toml::from_str(content).map_err(|e| SettingsError::Parse(e.to_string()))
    }

    pub fn to_toml(&self) -> SettingsResult<String> {
        toml::to_string_pretty(self).map_err(|e| SettingsError::Write(e.to_string()))
    }
}

/// Current admission policy, swapped atomically as a whole on every update.
pub struct SettingsStore {
    path: Option<PathBuf>,
    current: RwLock<Arc<AdmissionPolicy>>,
    stale: Arc<AtomicBool>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl fmt::Debug for SettingsStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsStore")
            .field("path", &self.path)
            .field("current", &self.snapshot_unchecked())
            .field("stale", &self.stale.load(Ordering::SeqCst))
            .field("watching", &self.watcher.lock().unwrap_or_else(PoisonError::into_inner).is_some())
            .finish()
    }
}

impl SettingsStore {
    fn with_policy(path: Option<PathBuf>, policy: AdmissionPolicy) -> Self {
        Self {
            path,
            current: RwLock::new(Arc::new(policy)),
            stale: Arc::new(AtomicBool::new(false)),
            watcher: Mutex::new(None),
        }
    }

    /// A store that never touches disk.
    pub fn in_memory(policy: AdmissionPolicy) -> Self {
        Self::with_policy(None, policy)
    }

    /// Load persisted settings from `path`, or start from `fallback` if none exist yet.
    pub fn open(path: PathBuf, fallback: AdmissionPolicy) -> SettingsResult<Self> {
        let policy = read_policy(&path)?.unwrap_or(fallback);
        Ok(Self::with_policy(Some(path), policy))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The published policy, re-read from disk first if the file changed.
    pub fn snapshot(&self) -> Arc<AdmissionPolicy> {
        if self.stale.swap(false, Ordering::SeqCst)
            && let Err(e) = self.reload()
        {
            warn!(error = %e, "keeping previous admission policy");
        }
        self.snapshot_unchecked()
    }

    fn snapshot_unchecked(&self) -> Arc<AdmissionPolicy> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Re-read the settings file and publish its policy.
    ///
    /// Returns whether the published policy changed. A missing file keeps the
    /// current policy.
    pub fn reload(&self) -> SettingsResult<bool> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        let Some(policy) = read_policy(path)? else {
            return Ok(false);
        };
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if **guard == policy {
            return Ok(false);
        }
        info!(policy = ?policy, "admission policy reloaded from disk");
        *guard = Arc::new(policy);
        Ok(true)
    }

    /// Watch the settings file for edits made by other processes.
    ///
    /// The parent directory is watched because updates replace the file by
    /// rename. No-op for in-memory stores.
    pub fn watch(&self) -> SettingsResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(|e| SettingsError::Watch(format!("{}: {e}", dir.display())))?;

        let file_name = path.file_name().map(std::ffi::OsStr::to_os_string);
        let stale = Arc::clone(&self.stale);
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| match result {
            Ok(event) => {
                let ours = event.paths.iter().any(|p| p.file_name() == file_name.as_deref());
                if ours && !matches!(event.kind, EventKind::Access(_)) {
                    debug!(kind = ?event.kind, "settings file changed");
                    stale.store(true, Ordering::SeqCst);
                }
            }
            Err(e) => warn!(error = %e, "settings watcher error"),
        })
        .map_err(|e| SettingsError::Watch(e.to_string()))?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| SettingsError::Watch(format!("{}: {e}", dir.display())))?;

        info!(path = %path.display(), "watching admission settings");
        *self.watcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(watcher);
        Ok(())
    }

    /// Apply `change` to a copy of the policy, persist it, then publish it.
    ///
    /// A rejected change leaves both the published policy and the file untouched.
    pub fn update<T>(&self, change: impl FnOnce(&mut AdmissionPolicy) -> SettingsResult<T>) -> SettingsResult<T> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = AdmissionPolicy::clone(&guard);
        let out = change(&mut next)?;
        if let Some(path) = &self.path {
            persist(path, &next)?;
        }
        info!(policy = ?next, "admission policy updated");
        *guard = Arc::new(next);
        Ok(out)
    }
}

fn read_policy(path: &Path) -> SettingsResult<Option<AdmissionPolicy>> {
    match std::fs::read_to_string(path) {
        Ok(content) => AdmissionPolicy::from_toml(&content)
            .map(Some)
            .map_err(|e| SettingsError::Parse(format!("{}: {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SettingsError::Read(format!("{}: {e}", path.display()))),
    }
}

fn persist(path: &Path, policy: &AdmissionPolicy) -> SettingsResult<()> {
    let content = policy.to_toml()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| SettingsError::Write(e.to_string()))?;
    }
    fractal_training::artifacts::write_atomic(path, content.as_bytes())
        .map_err(|e| SettingsError::Write(format!("{}: {e}", path.display())))
}
