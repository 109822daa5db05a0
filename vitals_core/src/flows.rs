//! Concrete wizard configurations: login, clinician two-factor and registration.

use crate::challenge::OrderingChallenge;
use crate::config::Config;
use crate::policy;
use crate::wizard::{FlowContext, Step, StepAnswer, TerminalAction, WizardConfig};
use crate::{AuthGrant, Error, Registration, Result, Role};
use async_trait::async_trait;

pub const CREDENTIALS_STEP: &str = "credentials";
pub const CHALLENGE_STEP: &str = "challenge";
pub const CODE_STEP: &str = "code";
pub const ACCOUNT_STEP: &str = "account";
pub const PROFILE_STEP: &str = "profile";

/// Login: credentials, ordering challenge, then a one-time code checked by
/// the terminal action
pub fn login(config: &Config) -> WizardConfig {
    verified_login(config, None)
}

/// Login for the clinician console; a non-clinician grant fails at the end
pub fn clinician_terminal(config: &Config) -> WizardConfig {
    verified_login(config, Some(Role::Clinician))
}

/// Registration: account details, emailed code, then profile
pub fn registration(config: &Config) -> WizardConfig {
    WizardConfig {
        steps: vec![
            Box::new(AccountStep),
            Box::new(CodeStep {
                length: config.verification.one_time_code_length,
                verify_in_step: true,
            }),
            Box::new(ProfileStep),
        ],
        terminal: Box::new(RegisterAccount),
        resend_cooldown: config.verification.resend_cooldown(),
    }
}

fn verified_login(config: &Config, required_role: Option<Role>) -> WizardConfig {
    WizardConfig {
        steps: vec![
            Box::new(CredentialsStep),
            Box::new(ChallengeStep {
                items: config.challenge.items.clone(),
            }),
            Box::new(CodeStep {
                length: config.verification.one_time_code_length,
                verify_in_step: false,
            }),
        ],
        terminal: Box::new(VerifyCodeAndOpen { required_role }),
        resend_cooldown: config.verification.resend_cooldown(),
    }
}

fn unexpected(step: &str, answer: &StepAnswer) -> Error {
    Error::invalid(format!("step '{}' cannot accept {:?}", step, answer))
}

fn checked(problems: Vec<String>) -> Result<()> {
    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(problems))
    }
}

// ============================================================================
// Steps
// ============================================================================

struct CredentialsStep;

#[async_trait]
impl Step for CredentialsStep {
    fn name(&self) -> &str {
        CREDENTIALS_STEP
    }

    fn is_credentials(&self) -> bool {
        true
    }

    async fn validate(&self, answer: &StepAnswer, ctx: &mut FlowContext) -> Result<()> {
        let StepAnswer::Credentials { email, password } = answer else {
            return Err(unexpected(self.name(), answer));
        };
        checked(policy::check_login(email, password))?;

        let email = email.trim();
        let grant = ctx.api.authenticate(email, password).await?;
        ctx.email = Some(email.to_string());
        ctx.grant = Some(grant);
        Ok(())
    }
}

struct ChallengeStep {
    items: Vec<String>,
}

#[async_trait]
impl Step for ChallengeStep {
    fn name(&self) -> &str {
        CHALLENGE_STEP
    }

    fn holds_challenge(&self) -> bool {
        true
    }

    async fn on_enter(&self, ctx: &mut FlowContext) -> Result<()> {
        ctx.challenge = Some(OrderingChallenge::new(self.items.clone())?);
        Ok(())
    }

    async fn validate(&self, answer: &StepAnswer, ctx: &mut FlowContext) -> Result<()> {
        if *answer != StepAnswer::SubmitOrder {
            return Err(unexpected(self.name(), answer));
        }
        match &ctx.challenge {
            Some(challenge) if challenge.verify() => Ok(()),
            Some(_) => Err(Error::invalid("the checklist is not in the right order")),
            None => Err(Error::invalid("no challenge has been issued")),
        }
    }
}

struct CodeStep {
    length: usize,
    /// Check the code with the service here rather than in the terminal action
    verify_in_step: bool,
}

#[async_trait]
impl Step for CodeStep {
    fn name(&self) -> &str {
        CODE_STEP
    }

    fn has_resend_cooldown(&self) -> bool {
        true
    }

    async fn on_enter(&self, ctx: &mut FlowContext) -> Result<()> {
        let email = ctx
            .email
            .clone()
            .ok_or_else(|| Error::invalid("no email to send a code to"))?;
        ctx.api.request_one_time_code(&email).await?;
        tracing::info!("One-time code requested");
        Ok(())
    }

    async fn validate(&self, answer: &StepAnswer, ctx: &mut FlowContext) -> Result<()> {
        let StepAnswer::Code(code) = answer else {
            return Err(unexpected(self.name(), answer));
        };
        checked(policy::check_one_time_code(code, self.length))?;

        if self.verify_in_step {
            ctx.api.verify_one_time_code(code.trim()).await?;
        }
        Ok(())
    }
}

struct AccountStep;

#[async_trait]
impl Step for AccountStep {
    fn name(&self) -> &str {
        ACCOUNT_STEP
    }

    async fn validate(&self, answer: &StepAnswer, ctx: &mut FlowContext) -> Result<()> {
        let StepAnswer::NewAccount {
            email,
            password,
            confirmation,
        } = answer
        else {
            return Err(unexpected(self.name(), answer));
        };

        let mut problems = policy::check_email(email);
        problems.extend(policy::check_new_password(password, confirmation));
        checked(problems)?;

        ctx.email = Some(email.trim().to_string());
        Ok(())
    }
}

struct ProfileStep;

#[async_trait]
impl Step for ProfileStep {
    fn name(&self) -> &str {
        PROFILE_STEP
    }

    async fn validate(&self, answer: &StepAnswer, _ctx: &mut FlowContext) -> Result<()> {
        match answer {
            StepAnswer::Profile {
                condition_id,
                height_cm,
                weight_kg,
            } => checked(policy::check_profile(*condition_id, *height_cm, *weight_kg)),
            other => Err(unexpected(self.name(), other)),
        }
    }
}

// ============================================================================
// Terminal actions
// ============================================================================

struct VerifyCodeAndOpen {
    required_role: Option<Role>,
}

#[async_trait]
impl TerminalAction for VerifyCodeAndOpen {
    async fn complete(&self, ctx: &mut FlowContext) -> Result<AuthGrant> {
        let code = match ctx.data.get(CODE_STEP) {
            Some(StepAnswer::Code(code)) => code.trim().to_string(),
            _ => return Err(Error::invalid("no one-time code collected")),
        };
        ctx.api.verify_one_time_code(&code).await?;

        let grant = ctx
            .grant
            .take()
            .ok_or_else(|| Error::invalid("no credentials collected"))?;
        if let Some(required) = self.required_role {
            if grant.role != required {
                return Err(Error::AuthenticationRejected(format!(
                    "this console requires a {} account",
                    required
                )));
            }
        }
        Ok(grant)
    }
}

struct RegisterAccount;

#[async_trait]
impl TerminalAction for RegisterAccount {
    async fn complete(&self, ctx: &mut FlowContext) -> Result<AuthGrant> {
        let (email, password) = match ctx.data.get(ACCOUNT_STEP) {
            Some(StepAnswer::NewAccount {
                email, password, ..
            }) => (email.trim().to_string(), password.clone()),
            _ => return Err(Error::invalid("no account details collected")),
        };
        let (condition_id, height_cm, weight_kg) = match ctx.data.get(PROFILE_STEP) {
            Some(StepAnswer::Profile {
                condition_id,
                height_cm,
                weight_kg,
            }) => (*condition_id, *height_cm, *weight_kg),
            _ => return Err(Error::invalid("no profile collected")),
        };

        let registration = Registration {
            email,
            password,
            condition_id,
            height_cm,
            weight_kg,
        };
        Ok(ctx.api.register(&registration).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{MockPortalApi, PortalApi};
    use crate::lockout::LockoutGuard;
    use crate::wizard::{StepOutcome, WizardEngine, WizardStatus};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    const PASSWORD: &str = "Correct1horse!";

    fn credentials(password: &str) -> StepAnswer {
        StepAnswer::Credentials {
            email: "anna@example.com".into(),
            password: password.into(),
        }
    }

    fn api(role: Role) -> Arc<MockPortalApi> {
        Arc::new(MockPortalApi::new().with_account("anna@example.com", PASSWORD, role))
    }

    async fn start(config: WizardConfig, api: &Arc<MockPortalApi>) -> WizardEngine {
        WizardEngine::start(config, api.clone(), LockoutGuard::default())
            .await
            .unwrap()
    }

    fn solve(wizard: &mut WizardEngine, canonical: &[String]) {
        for item in canonical {
            let index = wizard
                .challenge()
                .unwrap()
                .current_order()
                .iter()
                .position(|i| i == item)
                .unwrap();
            wizard.move_challenge_item(index).unwrap();
        }
        assert!(wizard.challenge().unwrap().verify());
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_happy_path() {
        let config = Config::default();
        let api = api(Role::Patient);
        let mut wizard = start(login(&config), &api).await;

        wizard
            .submit_step(CREDENTIALS_STEP, credentials(PASSWORD))
            .await
            .unwrap();
        solve(&mut wizard, &config.challenge.items);
        wizard
            .submit_step(CHALLENGE_STEP, StepAnswer::SubmitOrder)
            .await
            .unwrap();
        assert_eq!(api.code_requests(), 1);

        let code = api.issued_code().unwrap();
        let outcome = wizard
            .submit_step(CODE_STEP, StepAnswer::Code(code))
            .await
            .unwrap();

        match outcome {
            StepOutcome::Succeeded(session) => {
                assert_eq!(session.role, Role::Patient);
                assert_eq!(session.profile.email, "anna@example.com");
                assert!(session.can_renew());
            }
            other => panic!("expected a session, got {:?}", other),
        }
        assert_eq!(wizard.status(), WizardStatus::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_challenge_only_moves_while_its_step_is_current() {
        let config = Config::default();
        let api = api(Role::Patient);
        let mut wizard = start(login(&config), &api).await;

        // Not issued yet
        assert!(matches!(
            wizard.move_challenge_item(0),
            Err(Error::InvalidTransition { .. })
        ));

        wizard
            .submit_step(CREDENTIALS_STEP, credentials(PASSWORD))
            .await
            .unwrap();
        solve(&mut wizard, &config.challenge.items);
        wizard
            .submit_step(CHALLENGE_STEP, StepAnswer::SubmitOrder)
            .await
            .unwrap();
        assert_eq!(wizard.current_step_name(), CODE_STEP);

        // Passed: the accepted order is frozen
        let err = wizard.move_challenge_item(0).unwrap_err();
        assert!(
            matches!(&err, Error::InvalidTransition { expected, .. } if expected == CODE_STEP),
            "{:?}",
            err
        );
        assert!(wizard.challenge().unwrap().verify());
        assert_eq!(wizard.challenge().unwrap().current_order(), &config.challenge.items[..]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_challenge_stays_on_step_two_without_lockout() {
        let config = Config::default();
        let api = api(Role::Patient);
        let mut wizard = start(login(&config), &api).await;

        wizard
            .submit_step(CREDENTIALS_STEP, credentials(PASSWORD))
            .await
            .unwrap();

        // A freshly issued challenge never starts solved
        for _ in 0..3 {
            let err = wizard
                .submit_step(CHALLENGE_STEP, StepAnswer::SubmitOrder)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Validation(_)));
        }

        assert_eq!(wizard.status(), WizardStatus::InProgress);
        assert_eq!(wizard.current_step(), 2);
        assert_eq!(wizard.lockout().failure_count(Instant::now()), 0);
        assert!(wizard.lockout_remaining().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_bad_passwords_block_without_service_call() {
        let api = api(Role::Patient);
        let mut wizard = start(login(&Config::default()), &api).await;

        for _ in 0..2 {
            let err = wizard
                .submit_step(CREDENTIALS_STEP, credentials("Wrong-password-1"))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::AuthenticationRejected(_)));
        }
        assert_eq!(api.authenticate_calls(), 2);

        let err = wizard
            .submit_step(CREDENTIALS_STEP, credentials(PASSWORD))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LockedOut { remaining } if remaining == Duration::from_secs(60)));
        assert_eq!(api.authenticate_calls(), 2);

        tokio::time::advance(Duration::from_secs(60)).await;
        wizard
            .submit_step(CREDENTIALS_STEP, credentials(PASSWORD))
            .await
            .unwrap();
        assert_eq!(wizard.current_step(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_password_never_reaches_service() {
        let api = api(Role::Patient);
        let mut wizard = start(login(&Config::default()), &api).await;

        for _ in 0..3 {
            let err = wizard
                .submit_step(CREDENTIALS_STEP, credentials("short"))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Validation(_)));
        }
        assert_eq!(api.authenticate_calls(), 0);
        assert!(wizard.lockout_remaining().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_service_counts_as_credential_failure() {
        let api = api(Role::Patient);
        api.set_reachable(false);
        let mut wizard = start(login(&Config::default()), &api).await;

        for _ in 0..2 {
            let err = wizard
                .submit_step(CREDENTIALS_STEP, credentials(PASSWORD))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Network(_)));
        }
        assert!(wizard.lockout_remaining().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_code_fails_login_and_lockout_carries_over() {
        let config = Config::default();
        let api = api(Role::Patient);
        let mut wizard = start(login(&config), &api).await;

        let _ = wizard
            .submit_step(CREDENTIALS_STEP, credentials("Wrong-password-1"))
            .await;
        wizard
            .submit_step(CREDENTIALS_STEP, credentials(PASSWORD))
            .await
            .unwrap();
        solve(&mut wizard, &config.challenge.items);
        wizard
            .submit_step(CHALLENGE_STEP, StepAnswer::SubmitOrder)
            .await
            .unwrap();

        // Well-formed but not the issued code
        let wrong = if api.issued_code().as_deref() == Some("000000") {
            "111111"
        } else {
            "000000"
        };
        let err = wizard
            .submit_step(CODE_STEP, StepAnswer::Code(wrong.into()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthenticationRejected(_)));
        assert_eq!(wizard.status(), WizardStatus::Failed);

        let guard = wizard.into_lockout();
        let next = WizardEngine::start(login(&config), api.clone(), guard)
            .await
            .unwrap();
        assert_eq!(next.current_step(), 1);
        assert_eq!(next.status(), WizardStatus::InProgress);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_code_keeps_step() {
        let config = Config::default();
        let api = api(Role::Patient);
        let mut wizard = start(login(&config), &api).await;
        wizard
            .submit_step(CREDENTIALS_STEP, credentials(PASSWORD))
            .await
            .unwrap();
        solve(&mut wizard, &config.challenge.items);
        wizard
            .submit_step(CHALLENGE_STEP, StepAnswer::SubmitOrder)
            .await
            .unwrap();

        let err = wizard
            .submit_step(CODE_STEP, StepAnswer::Code("12ab".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(wizard.status(), WizardStatus::InProgress);
        assert_eq!(wizard.current_step(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clinician_terminal_rejects_patient_account() {
        let config = Config::default();
        let api = api(Role::Patient);
        let mut wizard = start(clinician_terminal(&config), &api).await;

        wizard
            .submit_step(CREDENTIALS_STEP, credentials(PASSWORD))
            .await
            .unwrap();
        solve(&mut wizard, &config.challenge.items);
        wizard
            .submit_step(CHALLENGE_STEP, StepAnswer::SubmitOrder)
            .await
            .unwrap();
        let code = api.issued_code().unwrap();

        let err = wizard
            .submit_step(CODE_STEP, StepAnswer::Code(code))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthenticationRejected(_)));
        assert_eq!(wizard.status(), WizardStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clinician_terminal_accepts_clinician() {
        let config = Config::default();
        let api = api(Role::Clinician);
        let mut wizard = start(clinician_terminal(&config), &api).await;

        wizard
            .submit_step(CREDENTIALS_STEP, credentials(PASSWORD))
            .await
            .unwrap();
        solve(&mut wizard, &config.challenge.items);
        wizard
            .submit_step(CHALLENGE_STEP, StepAnswer::SubmitOrder)
            .await
            .unwrap();
        let code = api.issued_code().unwrap();
        let outcome = wizard
            .submit_step(CODE_STEP, StepAnswer::Code(code))
            .await
            .unwrap();
        assert!(matches!(outcome, StepOutcome::Succeeded(s) if s.role == Role::Clinician));
    }

    #[tokio::test(start_paused = true)]
    async fn test_registration_flow() {
        let config = Config::default();
        let api = Arc::new(MockPortalApi::new());
        let mut wizard = start(registration(&config), &api).await;
        assert_eq!(wizard.current_step_name(), ACCOUNT_STEP);

        let err = wizard
            .submit_step(
                ACCOUNT_STEP,
                StepAnswer::NewAccount {
                    email: "new@example.com".into(),
                    password: "weak".into(),
                    confirmation: "weaker".into(),
                },
            )
            .await
            .unwrap_err();
        match err {
            Error::Validation(problems) => assert!(problems.len() >= 3, "{:?}", problems),
            other => panic!("expected validation error, got {:?}", other),
        }

        wizard
            .submit_step(
                ACCOUNT_STEP,
                StepAnswer::NewAccount {
                    email: "new@example.com".into(),
                    password: PASSWORD.into(),
                    confirmation: PASSWORD.into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(api.code_requests(), 1);
        let first_code = api.issued_code().unwrap();

        // Resend is rate limited
        assert!(matches!(
            wizard.reset_step(CODE_STEP).await,
            Err(Error::ResendCooldown { .. })
        ));
        tokio::time::advance(config.verification.resend_cooldown()).await;
        wizard.reset_step(CODE_STEP).await.unwrap();
        assert_eq!(api.code_requests(), 2);

        // The superseded code is refused and the step is kept
        let err = wizard
            .submit_step(CODE_STEP, StepAnswer::Code(first_code))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthenticationRejected(_)));
        assert_eq!(wizard.current_step(), 2);
        assert!(wizard.lockout_remaining().is_none());

        let code = api.issued_code().unwrap();
        wizard
            .submit_step(CODE_STEP, StepAnswer::Code(code))
            .await
            .unwrap();

        let outcome = wizard
            .submit_step(
                PROFILE_STEP,
                StepAnswer::Profile {
                    condition_id: 2,
                    height_cm: 170,
                    weight_kg: 72,
                },
            )
            .await
            .unwrap();
        assert!(matches!(outcome, StepOutcome::Succeeded(s) if s.profile.email == "new@example.com"));

        // The new account can now log in
        assert!(api.authenticate("new@example.com", PASSWORD).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_answer_kind_is_rejected() {
        let api = api(Role::Patient);
        let mut wizard = start(login(&Config::default()), &api).await;
        let err = wizard
            .submit_step(CREDENTIALS_STEP, StepAnswer::Code("123456".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(api.authenticate_calls(), 0);
    }
}
