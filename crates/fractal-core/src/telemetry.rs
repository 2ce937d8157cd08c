//! Device state readings consumed by the admission gate.

use chrono::Timelike;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

/// Network transports currently up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportSet {
    pub wifi: bool,
    pub cellular: bool,
}

impl TransportSet {
    pub const NONE: Self = Self { wifi: false, cellular: false };
    pub const WIFI: Self = Self { wifi: true, cellular: false };
    pub const CELLULAR: Self = Self { wifi: false, cellular: true };
    pub const BOTH: Self = Self { wifi: true, cellular: true };

    pub fn any(self) -> bool {
        self.wifi || self.cellular
    }
}

/// One reading of everything admission depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub battery_percent: u8,
    /// Charging or full.
    pub charging: bool,
    pub transports: TransportSet,
    /// Screen on / user present.
    pub interactive: bool,
    /// Wall-clock hour 0-23. `None` reads the local clock at evaluation.
    pub local_hour: Option<u8>,
}

impl Default for DeviceSnapshot {
    fn default() -> Self {
        Self {
            battery_percent: 100,
            charging: true,
            transports: TransportSet::WIFI,
            interactive: false,
            local_hour: None,
        }
    }
}

impl DeviceSnapshot {
    pub fn hour(&self) -> u8 {
        self.local_hour.unwrap_or_else(current_local_hour)
    }
}

pub fn current_local_hour() -> u8 {
    chrono::Local::now().hour() as u8
}

/// Cheap synchronous reads with no side effects.
pub trait DeviceTelemetry: Send + Sync {
    fn snapshot(&self) -> DeviceSnapshot;
}

/// A settable snapshot, for tests and hosts without sysfs.
#[derive(Debug, Default)]
pub struct StaticTelemetry {
    state: RwLock<DeviceSnapshot>,
}

impl StaticTelemetry {
    pub fn new(snapshot: DeviceSnapshot) -> Self {
        Self { state: RwLock::new(snapshot) }
    }

    pub fn set(&self, snapshot: DeviceSnapshot) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    pub fn update(&self, change: impl FnOnce(&mut DeviceSnapshot)) {
        change(&mut self.state.write().unwrap_or_else(PoisonError::into_inner));
    }
}

impl DeviceTelemetry for StaticTelemetry {
    fn snapshot(&self) -> DeviceSnapshot {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Linux `/sys/class` reader.
///
/// Battery comes from `power_supply/*`; without a battery the host is treated
/// as mains-powered (100%, charging). Transports come from `net/*/operstate`:
/// wireless links count as Wi-Fi, `wwan*`/`rmnet*`/`ppp*` as cellular, and other
/// non-loopback wired links as unmetered Wi-Fi-class transport. A headless host
/// is never interactive.
#[derive(Debug, Clone)]
pub struct SysfsTelemetry {
    root: PathBuf,
}

impl SysfsTelemetry {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn read_trimmed(path: &Path) -> Option<String> {
        fs::read_to_string(path).ok().map(|s| s.trim().to_string())
    }

    fn power(&self) -> (u8, bool) {
        let Ok(entries) = fs::read_dir(self.root.join("power_supply")) else {
            return (100, true);
        };

        let mut battery: Option<(u8, bool)> = None;
        let mut mains_online = false;
        for entry in entries.flatten() {
            let dir = entry.path();
            match Self::read_trimmed(&dir.join("type")).as_deref() {
                Some("Battery") if battery.is_none() => {
                    let capacity = Self::read_trimmed(&dir.join("capacity"))
                        .and_then(|c| c.parse::<u8>().ok())
                        .map_or(0, |c| c.min(100));
                    let status = Self::read_trimmed(&dir.join("status")).unwrap_or_default();
                    battery = Some((capacity, status == "Charging" || status == "Full"));
                }
                Some("Mains" | "USB") => {
                    mains_online |= Self::read_trimmed(&dir.join("online")).as_deref() == Some("1");
                }
                _ => {}
            }
        }

        match battery {
            Some((capacity, charging)) => (capacity, charging || mains_online),
            None => (100, true),
        }
    }

    fn transports(&self) -> TransportSet {
        let mut set = TransportSet::NONE;
        let Ok(entries) = fs::read_dir(self.root.join("net")) else {
            return set;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if name == "lo" {
                continue;
            }
            let dir = entry.path();
            if Self::read_trimmed(&dir.join("operstate")).as_deref() != Some("up") {
                continue;
            }
            if ["wwan", "rmnet", "ppp"].iter().any(|p| name.starts_with(p)) {
                set.cellular = true;
            } else {
                set.wifi = true;
            }
        }
        set
    }
}

impl DeviceTelemetry for SysfsTelemetry {
    fn snapshot(&self) -> DeviceSnapshot {
        let (battery_percent, charging) = self.power();
        DeviceSnapshot {
            battery_percent,
            charging,
            transports: self.transports(),
            interactive: false,
            local_hour: Some(current_local_hour()),
        }
    }
}
