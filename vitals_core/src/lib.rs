#![forbid(unsafe_code)]

//! Core session lifecycle and verification engine for the vitals portal.
//!
//! This crate provides:
//! - Domain types (roles, sessions, readings)
//! - Multi-step verification wizards with credential lockout
//! - Background session monitoring with token renewal and idle expiry
//! - Risk classification of biometric readings
//! - Persistence (session store, reading files, CSV export)

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod api;
pub mod store;
pub mod policy;
pub mod risk;
pub mod alerts;
pub mod readings;
pub mod lockout;
pub mod challenge;
pub mod wizard;
pub mod flows;
pub mod monitor;
pub mod portal;

// Re-export commonly used types
pub use error::{Error, ExpiryReason, Result};
pub use types::*;
pub use config::Config;
pub use alerts::{Alert, AlertLevel};
pub use api::{ApiError, MockPortalApi, PortalApi};
pub use store::{FileSessionStore, MemorySessionStore, PersistedSession, SessionStore};
pub use risk::{assess, classify, RiskAssessment, RiskTier};
pub use lockout::LockoutGuard;
pub use challenge::OrderingChallenge;
pub use wizard::{StepAnswer, StepOutcome, WizardEngine, WizardStatus};
pub use monitor::{MonitorHandle, SessionEvent, TokenState};
pub use portal::{FlowKind, LandingView, Portal};
pub use readings::{export_csv, read_readings, JsonlReadingSink, Period, ReadingSink};
