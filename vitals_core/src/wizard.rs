//! Generic multi-step verification wizard.
//!
//! A wizard is configured with an ordered list of steps and a terminal
//! action. Steps only move forward, one validated submission at a time:
//!
//! ```text
//! Step 1 ──ok──> Step 2 ──ok──> ... Step n ──ok──> terminal action ──> Succeeded
//!   │  fail: stay       │                                         └──> Failed
//!   └── reset_step (current step only)
//! ```
//!
//! The same engine drives login, registration and the clinician two-factor
//! terminal; see `flows` for those configurations.

use crate::api::PortalApi;
use crate::challenge::OrderingChallenge;
use crate::lockout::LockoutGuard;
use crate::{AuthGrant, Error, Result, Session};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// What the user submitted for a step
#[derive(Clone, PartialEq)]
pub enum StepAnswer {
    Credentials {
        email: String,
        password: String,
    },
    NewAccount {
        email: String,
        password: String,
        confirmation: String,
    },
    /// Submit the ordering challenge as currently arranged
    SubmitOrder,
    Code(String),
    Profile {
        condition_id: u32,
        height_cm: u16,
        weight_kg: u16,
    },
}

impl std::fmt::Debug for StepAnswer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepAnswer::Credentials { email, .. } => f
                .debug_struct("Credentials")
                .field("email", email)
                .finish_non_exhaustive(),
            StepAnswer::NewAccount { email, .. } => f
                .debug_struct("NewAccount")
                .field("email", email)
                .finish_non_exhaustive(),
            StepAnswer::SubmitOrder => f.write_str("SubmitOrder"),
            StepAnswer::Code(_) => f.write_str("Code(<redacted>)"),
            StepAnswer::Profile {
                condition_id,
                height_cm,
                weight_kg,
            } => f
                .debug_struct("Profile")
                .field("condition_id", condition_id)
                .field("height_cm", height_cm)
                .field("weight_kg", weight_kg)
                .finish(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WizardStatus {
    InProgress,
    Succeeded,
    Failed,
}

/// State shared between the steps of one wizard instance
pub struct FlowContext {
    pub api: Arc<dyn PortalApi>,
    /// Accepted answers, keyed by step name
    pub data: BTreeMap<String, StepAnswer>,
    /// Email the flow is verifying, once known
    pub email: Option<String>,
    /// Grant from a successful credentials step
    pub grant: Option<AuthGrant>,
    pub challenge: Option<OrderingChallenge>,
}

impl FlowContext {
    fn new(api: Arc<dyn PortalApi>) -> Self {
        Self {
            api,
            data: BTreeMap::new(),
            email: None,
            grant: None,
            challenge: None,
        }
    }
}

/// One step of a wizard
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    /// Failures of this step feed the lockout guard
    fn is_credentials(&self) -> bool {
        false
    }

    /// Re-entering this step re-issues something and is rate limited
    fn has_resend_cooldown(&self) -> bool {
        false
    }

    /// The ordering challenge can be rearranged while this step is current
    fn holds_challenge(&self) -> bool {
        false
    }

    /// Side effect run each time the step becomes current
    async fn on_enter(&self, _ctx: &mut FlowContext) -> Result<()> {
        Ok(())
    }

    async fn validate(&self, answer: &StepAnswer, ctx: &mut FlowContext) -> Result<()>;
}

/// External call made once every step has passed
#[async_trait]
pub trait TerminalAction: Send + Sync {
    async fn complete(&self, ctx: &mut FlowContext) -> Result<AuthGrant>;
}

/// Steps, terminal action and timing for one kind of flow
pub struct WizardConfig {
    pub steps: Vec<Box<dyn Step>>,
    pub terminal: Box<dyn TerminalAction>,
    pub resend_cooldown: Duration,
}

/// Result of an accepted submission
#[derive(Debug)]
pub enum StepOutcome {
    /// Moved on to the named step
    Advanced { step: String },
    /// Terminal action succeeded; the session now belongs to the caller
    Succeeded(Session),
}

pub struct WizardEngine {
    steps: Vec<Box<dyn Step>>,
    terminal: Box<dyn TerminalAction>,
    resend_cooldown: Duration,
    ctx: FlowContext,
    lockout: LockoutGuard,
    current: usize,
    status: WizardStatus,
    resend_ready_at: Option<Instant>,
}

impl WizardEngine {
    /// Create a wizard positioned on its first step and run that step's entry
    pub async fn start(
        config: WizardConfig,
        api: Arc<dyn PortalApi>,
        lockout: LockoutGuard,
    ) -> Result<Self> {
        if config.steps.is_empty() {
            return Err(Error::Config("a wizard needs at least one step".to_string()));
        }

        let mut wizard = Self {
            steps: config.steps,
            terminal: config.terminal,
            resend_cooldown: config.resend_cooldown,
            ctx: FlowContext::new(api),
            lockout,
            current: 0,
            status: WizardStatus::InProgress,
            resend_ready_at: None,
        };
        wizard.enter_current().await?;
        Ok(wizard)
    }

    /// Submit `answer` for the step called `step_name`
    pub async fn submit_step(&mut self, step_name: &str, answer: StepAnswer) -> Result<StepOutcome> {
        let now = Instant::now();
        if let Some(remaining) = self.lockout.remaining(now) {
            tracing::debug!(step = step_name, "Submission refused during lockout");
            return Err(Error::LockedOut { remaining });
        }
        self.expect_current(step_name)?;

        let step = &self.steps[self.current];
        if let Err(err) = step.validate(&answer, &mut self.ctx).await {
            if step.is_credentials() && err.is_credential_failure() {
                self.lockout.record_failure(Instant::now());
            }
            tracing::info!(step = step_name, error = %err, "Step rejected");
            return Err(err);
        }

        if step.is_credentials() {
            self.lockout.record_success(Instant::now());
        }
        self.ctx.data.insert(step_name.to_string(), answer);
        tracing::info!(
            step = step_name,
            number = self.current + 1,
            of = self.steps.len(),
            "Step passed"
        );

        if self.current + 1 == self.steps.len() {
            return self.finish().await;
        }

        self.current += 1;
        self.enter_current().await?;
        Ok(StepOutcome::Advanced {
            step: self.current_step_name().to_string(),
        })
    }

    /// Re-enter the current step, re-issuing whatever it issues on entry
    pub async fn reset_step(&mut self, step_name: &str) -> Result<()> {
        self.expect_current(step_name)?;

        if self.steps[self.current].has_resend_cooldown() {
            if let Some(remaining) = self.resend_available_in() {
                return Err(Error::ResendCooldown { remaining });
            }
        }

        self.ctx.data.remove(step_name);
        tracing::info!(step = step_name, "Step reset");
        self.enter_current().await
    }

    /// Move a challenge item to the end of the list. Only while the
    /// challenge step is current.
    pub fn move_challenge_item(&mut self, index: usize) -> Result<()> {
        if self.status != WizardStatus::InProgress || !self.steps[self.current].holds_challenge() {
            return Err(self.transition_error("<challenge move>"));
        }
        match self.ctx.challenge.as_mut() {
            Some(challenge) => challenge.move_to_end(index),
            None => Err(Error::invalid("no challenge has been issued")),
        }
    }

    pub fn challenge(&self) -> Option<&OrderingChallenge> {
        self.ctx.challenge.as_ref()
    }

    pub fn status(&self) -> WizardStatus {
        self.status
    }

    /// Current step number, 1-based
    pub fn current_step(&self) -> usize {
        self.current + 1
    }

    pub fn current_step_name(&self) -> &str {
        self.steps[self.current].name()
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn answer(&self, step_name: &str) -> Option<&StepAnswer> {
        self.ctx.data.get(step_name)
    }

    /// Remaining resend cooldown on the current step
    pub fn resend_available_in(&self) -> Option<Duration> {
        let now = Instant::now();
        self.resend_ready_at
            .filter(|ready| now < *ready)
            .map(|ready| ready - now)
    }

    pub fn lockout_remaining(&self) -> Option<Duration> {
        self.lockout.remaining(Instant::now())
    }

    pub fn lockout(&self) -> &LockoutGuard {
        &self.lockout
    }

    /// Hand the lockout guard to the next wizard instance
    pub fn into_lockout(self) -> LockoutGuard {
        self.lockout
    }

    async fn enter_current(&mut self) -> Result<()> {
        let step = &self.steps[self.current];
        self.resend_ready_at = None;
        step.on_enter(&mut self.ctx).await?;
        if step.has_resend_cooldown() {
            self.resend_ready_at = Some(Instant::now() + self.resend_cooldown);
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<StepOutcome> {
        match self.terminal.complete(&mut self.ctx).await {
            Ok(grant) => {
                let session = Session::from_grant(grant, Instant::now());
                self.status = WizardStatus::Succeeded;
                self.resend_ready_at = None;
                tracing::info!(session_id = %session.id, role = %session.role, "Verification succeeded");
                Ok(StepOutcome::Succeeded(session))
            }
            Err(err) => {
                self.status = WizardStatus::Failed;
                self.resend_ready_at = None;
                tracing::warn!(error = %err, "Verification failed");
                Err(err)
            }
        }
    }

    fn expect_current(&self, step_name: &str) -> Result<()> {
        if self.status == WizardStatus::InProgress && self.current_step_name() == step_name {
            Ok(())
        } else {
            Err(self.transition_error(step_name))
        }
    }

    fn transition_error(&self, actual: &str) -> Error {
        let expected = match self.status {
            WizardStatus::InProgress => self.current_step_name().to_string(),
            WizardStatus::Succeeded => "<succeeded>".to_string(),
            WizardStatus::Failed => "<failed>".to_string(),
        };
        Error::InvalidTransition {
            expected,
            actual: actual.to_string(),
        }
    }
}
