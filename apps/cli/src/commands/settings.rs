//! Admission policy commands.

use anyhow::{Context, Result};
use clap::{Subcommand, ValueEnum};
use colored::Colorize;
use fractal_core::{AdmissionPolicy, ClientConfig, SettingsStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    fn enabled(self) -> bool {
        self == Self::On
    }
}

/// Settings subcommands
#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    /// Show the current admission policy
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Toggle training over Wi-Fi
    Wifi,
    /// Toggle training over cellular data
    Data,
    /// Only train between midnight and 8 AM
    Overnight { state: Switch },
    /// Only train while the screen is off
    Idle { state: Switch },
    /// Only train while charging
    Charging { state: Switch },
    /// Minimum battery percentage required to train
    MinCharge { percent: u16 },
}

pub fn execute(cmd: SettingsCommand, config: &ClientConfig) -> Result<()> {
    let path = config.settings_path();
    let store = SettingsStore::open(path.clone(), config.admission.clone())
        .with_context(|| format!("Failed to open settings at {}", path.display()))?;

    match cmd {
        SettingsCommand::Show { json } => {
            let policy = store.snapshot();
            if json {
                println!("{}", serde_json::to_string_pretty(&*policy)?);
            } else {
                print_policy(&policy);
            }
            return Ok(());
        }
        SettingsCommand::Wifi => {
            store.update(AdmissionPolicy::toggle_wifi)?;
        }
        SettingsCommand::Data => {
            store.update(AdmissionPolicy::toggle_data)?;
        }
        SettingsCommand::Overnight { state } => {
            store.update(|p| {
                p.set_overnight_only(state.enabled());
                Ok(())
            })?;
        }
        SettingsCommand::Idle { state } => {
            store.update(|p| {
                p.set_idle_only(state.enabled());
                Ok(())
            })?;
        }
        SettingsCommand::Charging { state } => {
            store.update(|p| {
                p.set_charging_exclusive(state.enabled());
                Ok(())
            })?;
        }
        SettingsCommand::MinCharge { percent } => {
            store.update(|p| p.set_min_charge_percent(percent))?;
        }
    }

    println!("{} Settings saved to {}", "✓".green(), path.display());
    print_policy(&store.snapshot());
    Ok(())
}

fn on_off(enabled: bool) -> colored::ColoredString {
    if enabled { "on".green() } else { "off".dimmed() }
}

fn print_policy(policy: &AdmissionPolicy) {
    println!("{}", "Admission policy".bold());
    println!("  Wi-Fi:          {}", on_off(policy.on_wifi()));
    println!("  Cellular data:  {}", on_off(policy.on_data()));
    println!("  Overnight only: {}", on_off(policy.overnight_only()));
    println!("  Idle only:      {}", on_off(policy.idle_only()));
    println!("  Charging only:  {}", on_off(policy.charging_exclusive()));
    println!("  Minimum charge: {}%", policy.min_charge_percent());
}
