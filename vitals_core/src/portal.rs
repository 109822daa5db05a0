//! Top-level portal state: unauthenticated with a wizard, or authenticated
//! with a running session monitor.
//!
//! All role-specific behavior is decided here from the session's `Role`:
//! monitor timers, the landing view, which wizard to show after the session
//! ends, and which data calls are allowed.

use crate::alerts::{self, Alert};
use crate::api::PortalApi;
use crate::config::{Config, SessionTimers};
use crate::error::ExpiryReason;
use crate::flows;
use crate::lockout::LockoutGuard;
use crate::monitor::{self, MonitorHandle, SessionEvent};
use crate::risk::{self, CohortSummary};
use crate::store::SessionStore;
use crate::wizard::{StepAnswer, StepOutcome, WizardConfig, WizardEngine, WizardStatus};
use crate::{Error, Reading, Result, Role};
use std::sync::Arc;

/// First screen after sign-in
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LandingView {
    PatientDashboard,
    ClinicianCohort,
}

/// Which wizard an unauthenticated portal is running
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowKind {
    Login,
    ClinicianTerminal,
    Registration,
}

impl FlowKind {
    /// Sign-in flow to return to when a session of `role` ends
    pub fn sign_in_for(role: Role) -> Self {
        match role {
            Role::Patient => FlowKind::Login,
            Role::Clinician => FlowKind::ClinicianTerminal,
        }
    }

    pub fn wizard_config(&self, config: &Config) -> WizardConfig {
        match self {
            FlowKind::Login => flows::login(config),
            FlowKind::ClinicianTerminal => flows::clinician_terminal(config),
            FlowKind::Registration => flows::registration(config),
        }
    }
}

pub fn landing_view(role: Role) -> LandingView {
    match role {
        Role::Patient => LandingView::PatientDashboard,
        Role::Clinician => LandingView::ClinicianCohort,
    }
}

pub fn timers_for(config: &Config, role: Role) -> SessionTimers {
    config.session.timers_for(role)
}

enum PortalState {
    Unauthenticated {
        wizard: WizardEngine,
        kind: FlowKind,
    },
    Authenticated(MonitorHandle),
}

pub struct Portal<S> {
    config: Config,
    api: Arc<dyn PortalApi>,
    store: S,
    state: PortalState,
    last_end: Option<ExpiryReason>,
}

impl<S> Portal<S>
where
    S: SessionStore + Clone + 'static,
{
    /// Start unauthenticated, running the `kind` wizard
    pub async fn open(config: Config, api: Arc<dyn PortalApi>, store: S, kind: FlowKind) -> Result<Self> {
        let wizard = WizardEngine::start(
            kind.wizard_config(&config),
            api.clone(),
            LockoutGuard::from_config(&config.lockout),
        )
        .await?;

        Ok(Self {
            config,
            api,
            store,
            state: PortalState::Unauthenticated { wizard, kind },
            last_end: None,
        })
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, PortalState::Authenticated(_))
    }

    pub fn wizard(&self) -> Option<&WizardEngine> {
        match &self.state {
            PortalState::Unauthenticated { wizard, .. } => Some(wizard),
            PortalState::Authenticated(_) => None,
        }
    }

    pub fn wizard_mut(&mut self) -> Option<&mut WizardEngine> {
        match &mut self.state {
            PortalState::Unauthenticated { wizard, .. } => Some(wizard),
            PortalState::Authenticated(_) => None,
        }
    }

    pub fn flow_kind(&self) -> Option<FlowKind> {
        match &self.state {
            PortalState::Unauthenticated { kind, .. } => Some(*kind),
            PortalState::Authenticated(_) => None,
        }
    }

    pub fn monitor(&self) -> Option<&MonitorHandle> {
        match &self.state {
            PortalState::Authenticated(handle) => Some(handle),
            PortalState::Unauthenticated { .. } => None,
        }
    }

    pub fn landing(&self) -> Option<LandingView> {
        self.monitor().map(|handle| landing_view(handle.role()))
    }

    /// Why the previous session ended, if one did
    pub fn last_end(&self) -> Option<ExpiryReason> {
        self.last_end
    }

    /// Forward a step answer to the current wizard.
    ///
    /// A completed wizard hands its session to a new monitor. A failed one is
    /// replaced by a fresh wizard of the same kind that keeps the lockout.
    pub async fn submit_step(&mut self, step_name: &str, answer: StepAnswer) -> Result<()> {
        let PortalState::Unauthenticated { wizard, kind } = &mut self.state else {
            return Err(Error::InvalidTransition {
                expected: "<authenticated>".to_string(),
                actual: step_name.to_string(),
            });
        };
        let kind = *kind;

        match wizard.submit_step(step_name, answer).await {
            Ok(StepOutcome::Advanced { .. }) => Ok(()),
            Ok(StepOutcome::Succeeded(session)) => {
                let timers = timers_for(&self.config, session.role);
                let handle = monitor::start(
                    session,
                    timers,
                    self.api.clone(),
                    Box::new(self.store.clone()),
                )?;
                self.last_end = None;
                self.state = PortalState::Authenticated(handle);
                Ok(())
            }
            Err(err) => {
                if wizard.status() == WizardStatus::Failed {
                    let lockout = wizard.lockout().clone();
                    let fresh =
                        WizardEngine::start(kind.wizard_config(&self.config), self.api.clone(), lockout)
                            .await?;
                    tracing::info!(flow = ?kind, "Verification failed; starting over");
                    self.state = PortalState::Unauthenticated { wizard: fresh, kind };
                }
                Err(err)
            }
        }
    }

    /// Wait for the next monitor event. When the session ends the portal
    /// falls back to the sign-in flow for the session's role.
    pub async fn next_event(&mut self) -> Result<Option<SessionEvent>> {
        let PortalState::Authenticated(handle) = &mut self.state else {
            return Ok(None);
        };

        let event = handle.next_event().await;
        if let Some(reason) = handle.end_reason() {
            let role = handle.role();
            self.sign_out(role, reason).await?;
        }
        Ok(event)
    }

    /// Record user activity on the active session
    pub fn touch(&self) {
        if let Some(handle) = self.monitor() {
            handle.touch();
        }
    }

    pub async fn logout(&mut self) -> Result<()> {
        let PortalState::Authenticated(handle) = &mut self.state else {
            return Ok(());
        };
        handle.logout().await;
        let role = handle.role();
        self.sign_out(role, ExpiryReason::Logout).await
    }

    /// Access token for the next call
    pub fn access_token(&self) -> Result<String> {
        match (&self.state, self.last_end) {
            (PortalState::Authenticated(handle), _) => handle.access_token(),
            (PortalState::Unauthenticated { .. }, Some(reason)) => Err(Error::SessionExpired(reason)),
            (PortalState::Unauthenticated { .. }, None) => {
                Err(Error::AuthenticationRejected("not signed in".to_string()))
            }
        }
    }

    /// Validate locally, then submit a reading for the signed-in patient
    pub async fn submit_reading(&mut self, reading: &Reading) -> Result<()> {
        let problems = reading.validate();
        if !problems.is_empty() {
            return Err(Error::Validation(problems));
        }
        let token = self.access_token()?;
        self.api.submit_reading(&token, reading).await?;
        self.touch();
        Ok(())
    }

    /// Readings visible to the signed-in user. Patients only see their own.
    pub async fn latest_readings(&self, subject_id: Option<&str>) -> Result<Vec<Reading>> {
        let token = self.access_token()?;
        let Some(handle) = self.monitor() else {
            return Err(Error::AuthenticationRejected("not signed in".to_string()));
        };

        let subject = match handle.role() {
            Role::Patient => {
                let own = handle.profile().subject_id.as_str();
                if subject_id.map_or(false, |s| s != own) {
                    return Err(Error::AuthenticationRejected(
                        "patients can only view their own readings".to_string(),
                    ));
                }
                Some(own)
            }
            Role::Clinician => subject_id,
        };

        let readings = self.api.fetch_latest_readings(&token, subject).await?;
        self.touch();
        Ok(readings)
    }

    /// Alerts for the signed-in patient from their latest reading and
    /// their prescriptions, most severe first
    pub async fn alerts(&self) -> Result<Vec<Alert>> {
        let token = self.access_token()?;
        let Some(handle) = self.monitor() else {
            return Err(Error::AuthenticationRejected("not signed in".to_string()));
        };
        if handle.role() != Role::Patient {
            return Err(Error::AuthenticationRejected(
                "alerts are only available to patients".to_string(),
            ));
        }

        let subject = handle.profile().subject_id.as_str();
        let readings = self.api.fetch_latest_readings(&token, Some(subject)).await?;
        let prescriptions = self.api.fetch_prescriptions(&token, Some(subject)).await?;
        self.touch();
        Ok(alerts::build_alerts(risk::latest(&readings), &prescriptions))
    }

    /// Risk counts and medication adherence across `roster`; clinicians only
    pub async fn cohort_summary(&self, roster: &[String]) -> Result<CohortSummary> {
        match self.monitor().map(|h| h.role()) {
            Some(Role::Clinician) => {}
            Some(Role::Patient) => {
                return Err(Error::AuthenticationRejected(
                    "clinician access required".to_string(),
                ))
            }
            None => return Err(Error::AuthenticationRejected("not signed in".to_string())),
        }

        let readings = self.latest_readings(None).await?;
        let entries = risk::assess_cohort(roster, &readings);
        let mut summary = risk::summarize(&entries);

        let token = self.access_token()?;
        let prescriptions = self.api.fetch_prescriptions(&token, None).await?;
        summary.adherence = risk::cohort_adherence(&entries, &prescriptions);
        Ok(summary)
    }

    async fn sign_out(&mut self, role: Role, reason: ExpiryReason) -> Result<()> {
        let kind = FlowKind::sign_in_for(role);
        let wizard = WizardEngine::start(
            kind.wizard_config(&self.config),
            self.api.clone(),
            LockoutGuard::from_config(&self.config.lockout),
        )
        .await?;

        tracing::info!(role = %role, reason = %reason, "Returned to sign-in");
        self.last_end = Some(reason);
        self.state = PortalState::Unauthenticated { wizard, kind };
        Ok(())
    }
}
