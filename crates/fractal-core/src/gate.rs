//! Admission gate: whether device and network conditions permit work.

use crate::config::settings::{AdmissionPolicy, SettingsStore};
use crate::telemetry::{DeviceSnapshot, DeviceTelemetry};
use fractal_training::{ClientEvent, CycleContext, Flow, LiveConditions, SleepOutcome};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Interval between admission re-evaluations while blocked.
pub const ADMISSION_POLL: Duration = Duration::from_secs(3);

/// Overnight window is `[0, OVERNIGHT_END_HOUR)` local time.
pub const OVERNIGHT_END_HOUR: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    OutsideOvernightWindow,
    Interactive,
    BatteryTooLow { minimum: u8 },
    AwaitingCharger,
    AwaitingWifi,
    AwaitingCellular,
    AwaitingNetwork,
    Offline,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutsideOvernightWindow => write!(f, "Waiting for over-night hours (12AM - 8AM)"),
            Self::Interactive => write!(f, "Waiting for device to be idle (Screen Off)"),
            Self::BatteryTooLow { minimum } => write!(f, "Battery too low (Need {minimum}%)"),
            Self::AwaitingCharger => write!(f, "Awaiting charger connection..."),
            Self::AwaitingWifi => write!(f, "Awaiting Wi-Fi..."),
            Self::AwaitingCellular => write!(f, "Awaiting Cellular Data..."),
            Self::AwaitingNetwork => write!(f, "Awaiting Network Connection..."),
            Self::Offline => write!(f, "Offline. Waiting for Network..."),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Blocked(BlockReason),
}

impl Admission {
    pub fn is_allowed(self) -> bool {
        self == Self::Allowed
    }
}

/// Full admission check. Rules run in a fixed order and the first failing
/// rule decides the reason.
pub fn evaluate_policy(policy: &AdmissionPolicy, device: &DeviceSnapshot) -> Admission {
    if policy.overnight_only() && device.hour() >= OVERNIGHT_END_HOUR {
        return Admission::Blocked(BlockReason::OutsideOvernightWindow);
    }
    if policy.idle_only() && device.interactive {
        return Admission::Blocked(BlockReason::Interactive);
    }
    if device.battery_percent < policy.min_charge_percent() {
        return Admission::Blocked(BlockReason::BatteryTooLow { minimum: policy.min_charge_percent() });
    }
    if policy.charging_exclusive() && !device.charging {
        return Admission::Blocked(BlockReason::AwaitingCharger);
    }
    evaluate_network_only_policy(policy, device)
}

/// Only the network rule.
pub fn evaluate_network_only_policy(policy: &AdmissionPolicy, device: &DeviceSnapshot) -> Admission {
    let present = device.transports;
    let blocked = match (policy.on_wifi(), policy.on_data()) {
        (true, false) if !present.wifi => Some(BlockReason::AwaitingWifi),
        (false, true) if !present.cellular => Some(BlockReason::AwaitingCellular),
        (true, true) if !present.any() => Some(BlockReason::AwaitingNetwork),
        // Unreachable through AdmissionPolicy; kept as the upload path's offline fallback.
        (false, false) if !present.any() => Some(BlockReason::Offline),
        _ => None,
    };
    blocked.map_or(Admission::Allowed, Admission::Blocked)
}

/// Status prefix and abort text for one kind of wait.
#[derive(Debug, Clone, Copy)]
struct WaitText {
    prefix: &'static str,
    aborted: &'static str,
}

const ADMISSION_WAIT: WaitText = WaitText { prefix: "Standby: ", aborted: "Process Aborted by User" };
const UPLOAD_WAIT: WaitText = WaitText { prefix: "Upload Paused: ", aborted: "Upload Aborted by User" };

/// Evaluates the current settings snapshot against live telemetry.
///
/// Stateless apart from its two collaborators. Every call takes a fresh
/// settings snapshot, so policy changes (including edits picked up by a
/// watching [`SettingsStore`]) apply on the next evaluation.
#[derive(Clone)]
pub struct AdmissionGate {
    settings: Arc<SettingsStore>,
    telemetry: Arc<dyn DeviceTelemetry>,
}

impl AdmissionGate {
    pub fn new(settings: Arc<SettingsStore>, telemetry: Arc<dyn DeviceTelemetry>) -> Self {
        Self { settings, telemetry }
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn evaluate(&self) -> Admission {
        evaluate_policy(&self.settings.snapshot(), &self.telemetry.snapshot())
    }

    pub fn evaluate_network_only(&self) -> Admission {
        evaluate_network_only_policy(&self.settings.snapshot(), &self.telemetry.snapshot())
    }

    /// Block until the full admission check passes.
    pub fn wait_for_admission(&self, ctx: &CycleContext) -> Flow {
        self.wait(ctx, ADMISSION_WAIT, || self.evaluate())
    }

    /// Block until a permitted transport is up, as part of task acquisition.
    pub fn wait_for_task_network(&self, ctx: &CycleContext) -> Flow {
        self.wait(ctx, ADMISSION_WAIT, || self.evaluate_network_only())
    }

    /// Block until a permitted transport is up, ahead of an upload.
    pub fn wait_for_network(&self, ctx: &CycleContext) -> Flow {
        self.wait(ctx, UPLOAD_WAIT, || self.evaluate_network_only())
    }

    fn wait(&self, ctx: &CycleContext, text: WaitText, evaluate: impl Fn() -> Admission) -> Flow {
        let mut last: Option<BlockReason> = None;
        let abort = |last: Option<BlockReason>| {
            if last.is_some() {
                ctx.emit(ClientEvent::Waiting { waiting: false });
            }
            ctx.status(text.aborted);
            Flow::Cancelled
        };
        loop {
            if ctx.is_cancelled() {
                return abort(last);
            }
            match evaluate() {
                Admission::Allowed => {
                    if last.is_some() {
                        info!("admission conditions cleared");
                        ctx.emit(ClientEvent::Waiting { waiting: false });
                    }
                    return Flow::Continue;
                }
                Admission::Blocked(reason) => {
                    if last.is_none() {
                        ctx.emit(ClientEvent::Waiting { waiting: true });
                    }
                    if last != Some(reason) {
                        debug!(%reason, "admission blocked");
                        ctx.status(format!("{}{reason}", text.prefix));
                        last = Some(reason);
                    }
                }
            }
            if ctx.sleep(ADMISSION_POLL, false) == SleepOutcome::Cancelled {
                return abort(last);
            }
        }
    }
}

impl LiveConditions for AdmissionGate {
    fn check_live_conditions(&self) -> Option<String> {
        match self.evaluate() {
            Admission::Allowed => None,
            Admission::Blocked(reason) => Some(format!("{}{reason}", ADMISSION_WAIT.prefix)),
        }
    }
}
