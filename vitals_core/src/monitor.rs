//! Session monitor: activity tracking, background token renewal and idle expiry.
//!
//! `start` moves the session into a spawned task and returns a
//! [`MonitorHandle`] that owns everything the task needs to be stopped:
//! the join handle, the cancellation token and both channel ends. The task
//! is the only writer of the session store and of the token watch channel.
//!
//! The task loop selects over:
//! - cancellation (`stop`, or the handle being dropped)
//! - activity and logout signals from the handle
//! - the idle deadline (first instant past `last_activity_at + idle_timeout`)
//! - the poll interval, which triggers a token renewal
//!
//! A renewal in flight is raced against cancellation and the idle deadline.
//! Whichever fires first wins; a losing renewal future is dropped and its
//! result is never applied.

use crate::api::PortalApi;
use crate::config::SessionTimers;
use crate::error::ExpiryReason;
use crate::store::{PersistedSession, SessionStore};
use crate::{Error, Profile, Result, Role, Session, TokenPair};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Notifications raised by the monitor
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// Access token replaced
    Renewed,
    /// No activity within the idle threshold; the session is gone
    IdleExpired,
    /// Renewal was rejected or the service was unreachable; the session is gone
    Expired,
}

/// Token state published to API consumers
#[derive(Clone, Debug, PartialEq)]
pub enum TokenState {
    Active(TokenPair),
    Ended(ExpiryReason),
}

enum Signal {
    Activity(Instant),
    Logout,
}

enum Flow {
    Continue,
    Stop,
}

/// Owned resources of a running monitor. Dropping the handle cancels the task.
pub struct MonitorHandle {
    session_id: Uuid,
    role: Role,
    profile: Profile,
    task: Option<JoinHandle<()>>,
    signals: mpsc::UnboundedSender<Signal>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    cancel: CancellationToken,
    tokens: watch::Receiver<TokenState>,
}

/// Take ownership of `session` and start monitoring it.
///
/// The session is persisted to `store` before the task starts. Must be
/// called from within a tokio runtime.
pub fn start(
    session: Session,
    timers: SessionTimers,
    api: Arc<dyn PortalApi>,
    mut store: Box<dyn SessionStore>,
) -> Result<MonitorHandle> {
    store.save(&PersistedSession::from_session(&session))?;

    let session_id = session.id;
    let role = session.role;
    let profile = session.profile.clone();
    let (signal_tx, signal_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (token_tx, token_rx) = watch::channel(TokenState::Active(session.tokens.clone()));
    let cancel = CancellationToken::new();

    let task = MonitorTask {
        session: Some(session),
        timers,
        api,
        store,
        signals: signal_rx,
        events: event_tx,
        tokens: token_tx,
        cancel: cancel.clone(),
    };

    tracing::info!(
        session_id = %session_id,
        role = %role,
        idle_timeout_ms = timers.idle_timeout_ms,
        poll_interval_ms = timers.poll_interval_ms,
        "Session monitor started"
    );

    Ok(MonitorHandle {
        session_id,
        role,
        profile,
        task: Some(tokio::spawn(task.run())),
        signals: signal_tx,
        events: event_rx,
        cancel,
        tokens: token_rx,
    })
}

impl MonitorHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Record user activity now
    pub fn touch(&self) {
        // A closed channel means the session already ended
        let _ = self.signals.send(Signal::Activity(Instant::now()));
    }

    /// Next event, or None once the monitor has ended and all events are read
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Next already-raised event without waiting
    pub fn try_event(&mut self) -> Option<SessionEvent> {
        self.events.try_recv().ok()
    }

    /// Receiver for the current token state
    pub fn tokens(&self) -> watch::Receiver<TokenState> {
        self.tokens.clone()
    }

    /// Current access token, or why there is none
    pub fn access_token(&self) -> Result<String> {
        match &*self.tokens.borrow() {
            TokenState::Active(pair) => Ok(pair.access_token.clone()),
            TokenState::Ended(reason) => Err(Error::SessionExpired(*reason)),
        }
    }

    /// Why the session ended, once it has
    pub fn end_reason(&self) -> Option<ExpiryReason> {
        match &*self.tokens.borrow() {
            TokenState::Active(_) => None,
            TokenState::Ended(reason) => Some(*reason),
        }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn is_active(&self) -> bool {
        matches!(*self.tokens.borrow(), TokenState::Active(_))
    }

    /// Cancel the task and wait for it to finish. The persisted session is
    /// left in place; the published token state becomes `Ended(Stopped)`.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        self.join().await;
    }

    /// End the session: stop monitoring, destroy it and clear the store
    pub async fn logout(&mut self) {
        if self.signals.send(Signal::Logout).is_err() {
            tracing::debug!(session_id = %self.session_id, "Logout after monitor ended");
        }
        self.join().await;
    }

    async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(session_id = %self.session_id, "Session monitor task failed: {}", e);
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct MonitorTask {
    /// None once destroyed
    session: Option<Session>,
    timers: SessionTimers,
    api: Arc<dyn PortalApi>,
    store: Box<dyn SessionStore>,
    signals: mpsc::UnboundedReceiver<Signal>,
    events: mpsc::UnboundedSender<SessionEvent>,
    tokens: watch::Sender<TokenState>,
    cancel: CancellationToken,
}

impl MonitorTask {
    async fn run(mut self) {
        let period = self
            .timers
            .poll_interval()
            .max(std::time::Duration::from_millis(1));
        let mut poll = tokio::time::interval_at(Instant::now() + period, period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let Some(deadline) = self.idle_deadline() else {
                break;
            };

            let flow = tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    tracing::debug!("Session monitor cancelled");
                    Flow::Stop
                }

                signal = self.signals.recv() => self.on_signal(signal),

                _ = tokio::time::sleep_until(deadline) => {
                    self.destroy(ExpiryReason::Idle, Some(SessionEvent::IdleExpired));
                    Flow::Stop
                }

                _ = poll.tick() => self.on_poll().await,
            };

            if let Flow::Stop = flow {
                break;
            }
        }

        // Stopped without being destroyed: the token is no longer renewed
        if let Some(session) = self.session.take() {
            self.tokens.send_replace(TokenState::Ended(ExpiryReason::Stopped));
            tracing::debug!(session_id = %session.id, "Session monitor stopped; persisted session kept");
        }

        tracing::debug!("Session monitor finished");
    }

    /// First instant at which idle time exceeds the threshold
    fn idle_deadline(&self) -> Option<Instant> {
        self.session.as_ref().map(|s| {
            s.last_activity_at + self.timers.idle_timeout() + std::time::Duration::from_millis(1)
        })
    }

    fn on_signal(&mut self, signal: Option<Signal>) -> Flow {
        match signal {
            Some(Signal::Activity(at)) => {
                if let Some(session) = self.session.as_mut() {
                    session.touch(at);
                }
                Flow::Continue
            }
            Some(Signal::Logout) => {
                self.destroy(ExpiryReason::Logout, None);
                Flow::Stop
            }
            // Handle dropped
            None => Flow::Stop,
        }
    }

    async fn on_poll(&mut self) -> Flow {
        let Some(session) = self.session.as_ref() else {
            return Flow::Stop;
        };

        if session.idle_for(Instant::now()) > self.timers.idle_timeout() {
            self.destroy(ExpiryReason::Idle, Some(SessionEvent::IdleExpired));
            return Flow::Stop;
        }

        if !session.can_renew() {
            tracing::warn!(session_id = %session.id, "No refresh token; session cannot be renewed");
            self.destroy(ExpiryReason::RenewalFailed, Some(SessionEvent::Expired));
            return Flow::Stop;
        }

        self.renew().await
    }

    async fn renew(&mut self) -> Flow {
        let Some(refresh_token) = self
            .session
            .as_ref()
            .map(|s| s.tokens.refresh_token.clone())
        else {
            return Flow::Stop;
        };

        let api = Arc::clone(&self.api);
        let renewal = async move { api.renew_token(&refresh_token).await };
        tokio::pin!(renewal);
        tracing::debug!("Token renewal started");

        loop {
            let Some(deadline) = self.idle_deadline() else {
                return Flow::Stop;
            };

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    tracing::debug!("Token renewal abandoned: monitor stopped");
                    return Flow::Stop;
                }

                signal = self.signals.recv() => {
                    if let Flow::Stop = self.on_signal(signal) {
                        return Flow::Stop;
                    }
                }

                _ = tokio::time::sleep_until(deadline) => {
                    tracing::info!("Idle deadline reached during renewal; discarding renewal");
                    self.destroy(ExpiryReason::Idle, Some(SessionEvent::IdleExpired));
                    return Flow::Stop;
                }

                result = &mut renewal => {
                    return match result {
                        Ok(access_token) => {
                            self.apply_renewal(access_token);
                            Flow::Continue
                        }
                        Err(e) => {
                            tracing::warn!("Token renewal failed: {}", e);
                            self.destroy(ExpiryReason::RenewalFailed, Some(SessionEvent::Expired));
                            Flow::Stop
                        }
                    };
                }
            }
        }
    }

    fn apply_renewal(&mut self, access_token: String) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.tokens.access_token = access_token;

        if let Err(e) = self.store.save(&PersistedSession::from_session(session)) {
            tracing::warn!(session_id = %session.id, "Failed to persist renewed token: {}", e);
        }
        self.tokens
            .send_replace(TokenState::Active(session.tokens.clone()));
        tracing::info!(session_id = %session.id, "Access token renewed");
        let _ = self.events.send(SessionEvent::Renewed);
    }

    /// Drop the session, clear the store and publish the end state
    fn destroy(&mut self, reason: ExpiryReason, event: Option<SessionEvent>) {
        let Some(session) = self.session.take() else {
            return;
        };

        if let Err(e) = self.store.clear() {
            tracing::error!(session_id = %session.id, "Failed to clear session store: {}", e);
        }
        self.tokens.send_replace(TokenState::Ended(reason));
        tracing::info!(session_id = %session.id, role = %session.role, reason = %reason, "Session ended");

        if let Some(event) = event {
            let _ = self.events.send(event);
        }
    }
}
