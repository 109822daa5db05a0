//! Configuration file support for the vitals portal engine.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/vitals/config.toml`.
//! Every field is optional; timer constants differ per role and are never
//! hard-coded outside the defaults below.

use crate::{Error, Result, Role};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub lockout: LockoutConfig,

    #[serde(default)]
    pub verification: VerificationConfig,

    #[serde(default)]
    pub challenge: ChallengeConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Idle and renewal timers for one role
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionTimers {
    pub idle_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl SessionTimers {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Session monitor configuration, per role
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_patient_timers")]
    pub patient: SessionTimers,

    #[serde(default = "default_clinician_timers")]
    pub clinician: SessionTimers,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            patient: default_patient_timers(),
            clinician: default_clinician_timers(),
        }
    }
}

impl SessionConfig {
    /// Timers that apply to a session of the given role
    pub fn timers_for(&self, role: Role) -> SessionTimers {
        match role {
            Role::Patient => self.patient,
            Role::Clinician => self.clinician,
        }
    }
}

/// Failed-credential lockout policy
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LockoutConfig {
    #[serde(default = "default_lockout_threshold")]
    pub threshold: u32,

    #[serde(default = "default_lockout_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            threshold: default_lockout_threshold(),
            cooldown_ms: default_lockout_cooldown_ms(),
        }
    }
}

impl LockoutConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// One-time code settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerificationConfig {
    #[serde(default = "default_resend_cooldown_ms")]
    pub resend_cooldown_ms: u64,

    #[serde(default = "default_one_time_code_length")]
    pub one_time_code_length: usize,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            resend_cooldown_ms: default_resend_cooldown_ms(),
            one_time_code_length: default_one_time_code_length(),
        }
    }
}

impl VerificationConfig {
    pub fn resend_cooldown(&self) -> Duration {
        Duration::from_millis(self.resend_cooldown_ms)
    }
}

/// Ordering challenge checklist, in canonical order
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChallengeConfig {
    #[serde(default = "default_challenge_items")]
    pub items: Vec<String>,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            items: default_challenge_items(),
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| {
        std::env::var("HOME")
            .map(|home| PathBuf::from(home).join(".local/share"))
            .unwrap_or_else(|_| PathBuf::from("."))
    });
    base.join("vitals")
}

fn default_patient_timers() -> SessionTimers {
    SessionTimers {
        idle_timeout_ms: 60_000,
        poll_interval_ms: 45_000,
    }
}

fn default_clinician_timers() -> SessionTimers {
    SessionTimers {
        idle_timeout_ms: 120_000,
        poll_interval_ms: 90_000,
    }
}

fn default_lockout_threshold() -> u32 {
    2
}

fn default_lockout_cooldown_ms() -> u64 {
    60_000
}

fn default_resend_cooldown_ms() -> u64 {
    10_000
}

fn default_one_time_code_length() -> usize {
    6
}

fn default_challenge_items() -> Vec<String> {
    vec![
        "Measure blood pressure".into(),
        "Take the pill".into(),
        "Drink water".into(),
        "Record the result".into(),
    ]
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            std::env::var("HOME")
                .map(|home| PathBuf::from(home).join(".config"))
                .unwrap_or_else(|_| PathBuf::from("."))
        });
        base.join("vitals").join("config.toml")
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Check the configuration for values the engine cannot run with
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for (role, timers) in [
            (Role::Patient, self.session.patient),
            (Role::Clinician, self.session.clinician),
        ] {
            if timers.idle_timeout_ms == 0 {
                errors.push(format!("session.{}.idle_timeout_ms must be positive", role));
            }
            if timers.poll_interval_ms == 0 {
                errors.push(format!("session.{}.poll_interval_ms must be positive", role));
            }
        }

        if self.lockout.threshold == 0 {
            errors.push("lockout.threshold must be at least 1".to_string());
        }

        let len = self.verification.one_time_code_length;
        if !(4..=6).contains(&len) {
            errors.push(format!(
                "verification.one_time_code_length must be between 4 and 6 (got {})",
                len
            ));
        }

        if self.challenge.items.len() < 2 {
            errors.push("challenge.items needs at least two entries".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for item in &self.challenge.items {
            if !seen.insert(item) {
                errors.push(format!("challenge.items has duplicate entry '{}'", item));
            }
        }

        errors
    }
}
