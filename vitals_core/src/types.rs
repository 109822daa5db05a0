//! Core domain types for the vitals portal.
//!
//! This module defines the fundamental types used throughout the system:
//! - Roles, profiles and the credentials issued by the service
//! - The active session owned by the monitor
//! - Biometric readings and prescriptions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

// ============================================================================
// Identity Types
// ============================================================================

/// Portal role, fixed for the lifetime of a session
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Patient,
    Clinician,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Patient => write!(f, "patient"),
            Role::Clinician => write!(f, "clinician"),
        }
    }
}

/// User profile as returned by the service
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub subject_id: String,
    pub email: String,
    #[serde(default)]
    pub username: Option<String>,
}

/// Successful authentication or registration response
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub role: Role,
    pub profile: Profile,
}

impl std::fmt::Debug for AuthGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGrant")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("role", &self.role)
            .field("profile", &self.profile)
            .finish()
    }
}

/// Access/refresh token pair shared with the API call layer
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenPair(<redacted>)")
    }
}

// ============================================================================
// Session
// ============================================================================

/// An authenticated session.
///
/// Owned exclusively by the session monitor while it is alive. Timestamps
/// are monotonic instants from the runtime clock so idle checks follow
/// simulated time in tests.
pub struct Session {
    pub id: Uuid,
    pub tokens: TokenPair,
    pub role: Role,
    pub profile: Profile,
    pub issued_at: Instant,
    pub last_activity_at: Instant,
}

impl Session {
    /// Open a session from a grant issued at `now`
    pub fn from_grant(grant: AuthGrant, now: Instant) -> Self {
        Self {
            id: Uuid::new_v4(),
            tokens: TokenPair {
                access_token: grant.access_token,
                refresh_token: grant.refresh_token,
            },
            role: grant.role,
            profile: grant.profile,
            issued_at: now,
            last_activity_at: now,
        }
    }

    /// Record user activity at `at`. Out-of-order signals never move the clock back.
    pub fn touch(&mut self, at: Instant) {
        if at > self.last_activity_at {
            self.last_activity_at = at;
        }
    }

    /// How long the session has gone without activity
    pub fn idle_for(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.last_activity_at)
    }

    /// A session without a refresh token cannot be renewed
    pub fn can_renew(&self) -> bool {
        !self.tokens.refresh_token.trim().is_empty()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("subject_id", &self.profile.subject_id)
            .field("issued_at", &self.issued_at)
            .field("last_activity_at", &self.last_activity_at)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Biometric Types
// ============================================================================

/// A single biometric measurement for one subject
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    pub subject_id: String,
    /// Blood glucose, mmol/L
    pub glucose: f64,
    pub systolic: u16,
    pub diastolic: u16,
    pub pulse: u16,
    /// Body weight, kg
    pub weight: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub note: Option<String>,
}

/// A medication assigned to a patient
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Prescription {
    pub id: String,
    /// Patient the medication is assigned to
    #[serde(default)]
    pub subject_id: String,
    pub drug: String,
    #[serde(default)]
    pub was_taken: bool,
}

/// Data collected by the registration flow
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub condition_id: u32,
    pub height_cm: u16,
    pub weight_kg: u16,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("email", &self.email)
            .field("condition_id", &self.condition_id)
            .field("height_cm", &self.height_cm)
            .field("weight_kg", &self.weight_kg)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn grant() -> AuthGrant {
        AuthGrant {
            access_token: "access-secret".into(),
            refresh_token: "refresh-secret".into(),
            role: Role::Patient,
            profile: Profile {
                subject_id: "p-1".into(),
                email: "anna@example.com".into(),
                username: None,
            },
        }
    }

    #[test]
    fn test_debug_output_hides_tokens() {
        let session = Session::from_grant(grant(), Instant::now());
        let rendered = format!("{:?} {:?}", session, grant());
        assert!(!rendered.contains("access-secret"));
        assert!(!rendered.contains("refresh-secret"));
    }

    #[test]
    fn test_touch_never_moves_backwards() {
        let start = Instant::now();
        let mut session = Session::from_grant(grant(), start);
        session.touch(start + Duration::from_secs(30));
        session.touch(start + Duration::from_secs(10));
        assert_eq!(session.last_activity_at, start + Duration::from_secs(30));
        assert_eq!(
            session.idle_for(start + Duration::from_secs(45)),
            Duration::from_secs(15)
        );
    }

    #[test]
    fn test_empty_refresh_token_cannot_renew() {
        let mut g = grant();
        g.refresh_token = "  ".into();
        let session = Session::from_grant(g, Instant::now());
        assert!(!session.can_renew());
    }

    #[test]
    fn test_role_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Role::Clinician).unwrap(), "\"clinician\"");
    }
}
