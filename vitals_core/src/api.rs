//! Contract for the remote authentication and data service.
//!
//! The engine never talks HTTP itself; it awaits these calls and maps each
//! outcome onto its own error kinds. `MockPortalApi` is an in-memory
//! implementation for tests and local runs.

use crate::{AuthGrant, Error, Prescription, Reading, Registration, Role};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApiError {
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Invalid request: {}", .0.join("; "))]
    Invalid(Vec<String>),

    #[error("Network error: {0}")]
    Network(String),
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<ApiError> for Error {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Rejected(reason) => Error::AuthenticationRejected(reason),
            ApiError::Invalid(problems) => Error::Validation(problems),
            ApiError::Network(msg) => Error::Network(msg),
        }
    }
}

#[async_trait]
pub trait PortalApi: Send + Sync {
    async fn authenticate(&self, email: &str, password: &str) -> ApiResult<AuthGrant>;

    /// Ask the service to issue (or re-issue) a one-time code for `email`
    async fn request_one_time_code(&self, email: &str) -> ApiResult<()>;

    /// Compare `code` against the most recently issued value
    async fn verify_one_time_code(&self, code: &str) -> ApiResult<()>;

    /// Exchange a refresh token for a new access token
    async fn renew_token(&self, refresh_token: &str) -> ApiResult<String>;

    async fn register(&self, registration: &Registration) -> ApiResult<AuthGrant>;

    async fn submit_reading(&self, access_token: &str, reading: &Reading) -> ApiResult<()>;

    async fn fetch_latest_readings(
        &self,
        access_token: &str,
        subject_id: Option<&str>,
    ) -> ApiResult<Vec<Reading>>;

    /// Prescriptions for `subject_id`, or for every visible subject when None
    async fn fetch_prescriptions(
        &self,
        access_token: &str,
        subject_id: Option<&str>,
    ) -> ApiResult<Vec<Prescription>>;
}

// ============================================================================
// Mock implementation
// ============================================================================

struct MockAccount {
    password: String,
    grant: AuthGrant,
}

/// In-memory service for testing
pub struct MockPortalApi {
    accounts: Mutex<HashMap<String, MockAccount>>,
    issued_code: Mutex<Option<String>>,
    readings: Mutex<Vec<Reading>>,
    prescriptions: Mutex<Vec<Prescription>>,
    reachable: AtomicBool,
    renewal_fails: AtomicBool,
    renewal_delay: Mutex<Duration>,
    authenticate_calls: AtomicU64,
    code_requests: AtomicU64,
    renew_calls: AtomicU64,
    token_counter: AtomicU64,
}

impl MockPortalApi {
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            issued_code: Mutex::new(None),
            readings: Mutex::new(Vec::new()),
            prescriptions: Mutex::new(Vec::new()),
            reachable: AtomicBool::new(true),
            renewal_fails: AtomicBool::new(false),
            renewal_delay: Mutex::new(Duration::ZERO),
            authenticate_calls: AtomicU64::new(0),
            code_requests: AtomicU64::new(0),
            renew_calls: AtomicU64::new(0),
            token_counter: AtomicU64::new(0),
        }
    }

    /// Register an account that `authenticate` will accept
    pub fn with_account(self, email: &str, password: &str, role: Role) -> Self {
        let grant = AuthGrant {
            access_token: format!("access-{}", email),
            refresh_token: format!("refresh-{}", email),
            role,
            profile: crate::Profile {
                subject_id: email.to_string(),
                email: email.to_string(),
                username: email.split('@').next().map(str::to_string),
            },
        };
        lock(&self.accounts).insert(
            email.to_string(),
            MockAccount {
                password: password.to_string(),
                grant,
            },
        );
        self
    }

    /// Assign a prescription that `fetch_prescriptions` will return
    pub fn with_prescription(self, prescription: Prescription) -> Self {
        lock(&self.prescriptions).push(prescription);
        self
    }

    /// Simulate a dropped connection for every call
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_renewal_fails(&self, fails: bool) {
        self.renewal_fails.store(fails, Ordering::SeqCst);
    }

    /// Delay every renewal response by `delay`
    pub fn set_renewal_delay(&self, delay: Duration) {
        *lock(&self.renewal_delay) = delay;
    }

    /// Code most recently issued by `request_one_time_code`
    pub fn issued_code(&self) -> Option<String> {
        lock(&self.issued_code).clone()
    }

    pub fn authenticate_calls(&self) -> u64 {
        self.authenticate_calls.load(Ordering::SeqCst)
    }

    pub fn code_requests(&self) -> u64 {
        self.code_requests.load(Ordering::SeqCst)
    }

    pub fn renew_calls(&self) -> u64 {
        self.renew_calls.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> ApiResult<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ApiError::Network("connection refused".to_string()))
        }
    }
}

impl Default for MockPortalApi {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl PortalApi for MockPortalApi {
    async fn authenticate(&self, email: &str, password: &str) -> ApiResult<AuthGrant> {
        self.authenticate_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;

        let accounts = lock(&self.accounts);
        match accounts.get(email) {
            Some(account) if account.password == password => Ok(account.grant.clone()),
            _ => Err(ApiError::Rejected("invalid email or password".to_string())),
        }
    }

    async fn request_one_time_code(&self, email: &str) -> ApiResult<()> {
        self.check_reachable()?;
        let n = self.code_requests.fetch_add(1, Ordering::SeqCst) + 1;
        // Deterministic but distinct per request so resends are observable
        let code = format!("{:06}", (n * 137_911) % 1_000_000);
        tracing::info!(email = %email, "[MOCK] One-time code issued");
        *lock(&self.issued_code) = Some(code);
        Ok(())
    }

    async fn verify_one_time_code(&self, code: &str) -> ApiResult<()> {
        self.check_reachable()?;
        match lock(&self.issued_code).as_deref() {
            Some(issued) if issued == code => Ok(()),
            _ => Err(ApiError::Rejected("incorrect code".to_string())),
        }
    }

    async fn renew_token(&self, refresh_token: &str) -> ApiResult<String> {
        self.renew_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.renewal_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.check_reachable()?;

        if self.renewal_fails.load(Ordering::SeqCst) || refresh_token.is_empty() {
            return Err(ApiError::Rejected("refresh token expired".to_string()));
        }
        let n = self.token_counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("renewed-access-{}", n))
    }

    async fn register(&self, registration: &Registration) -> ApiResult<AuthGrant> {
        self.check_reachable()?;
        if lock(&self.accounts).contains_key(&registration.email) {
            return Err(ApiError::Rejected("email already registered".to_string()));
        }

        let email = registration.email.clone();
        let mut accounts = lock(&self.accounts);
        let grant = AuthGrant {
            access_token: format!("access-{}", email),
            refresh_token: format!("refresh-{}", email),
            role: Role::Patient,
            profile: crate::Profile {
                subject_id: email.clone(),
                email: email.clone(),
                username: Some(email.clone()),
            },
        };
        accounts.insert(
            email,
            MockAccount {
                password: registration.password.clone(),
                grant: grant.clone(),
            },
        );
        Ok(grant)
    }

    async fn submit_reading(&self, access_token: &str, reading: &Reading) -> ApiResult<()> {
        self.check_reachable()?;
        if access_token.is_empty() {
            return Err(ApiError::Rejected("missing access token".to_string()));
        }
        let problems = reading.validate();
        if !problems.is_empty() {
            return Err(ApiError::Invalid(problems));
        }
        lock(&self.readings).push(reading.clone());
        Ok(())
    }

    async fn fetch_latest_readings(
        &self,
        access_token: &str,
        subject_id: Option<&str>,
    ) -> ApiResult<Vec<Reading>> {
        self.check_reachable()?;
        if access_token.is_empty() {
            return Err(ApiError::Rejected("missing access token".to_string()));
        }
        let readings = lock(&self.readings);
        Ok(readings
            .iter()
            .filter(|r| subject_id.map_or(true, |s| r.subject_id == s))
            .cloned()
            .collect())
    }

    async fn fetch_prescriptions(
        &self,
        access_token: &str,
        subject_id: Option<&str>,
    ) -> ApiResult<Vec<Prescription>> {
        self.check_reachable()?;
        if access_token.is_empty() {
            return Err(ApiError::Rejected("missing access token".to_string()));
        }
        Ok(lock(&self.prescriptions)
            .iter()
            .filter(|p| subject_id.map_or(true, |s| p.subject_id == s))
            .cloned()
            .collect())
    }
}
