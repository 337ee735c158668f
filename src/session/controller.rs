use chrono::Utc;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex};

use crate::cache::ResponseCache;
use crate::error::{ApiError, ErrorInfo};
use crate::gateway::{InvalidationReceiver, RequestGateway, TokenCell};
use crate::guard;

use super::scheduler::{refresh_delay, RefreshScheduler};
use super::store::CredentialStore;
use super::types::{Credential, LoginOutcome, Session, SessionStatus};

/// Retry delay after a transient server failure during refresh
const REFRESH_RETRY_SECS: u64 = 60;

/// Session controller
/// Owns the authoritative session state machine and is the only writer of
/// the credential store and the token cell.
pub struct SessionController {
    /// Authoritative state, mutated under one lock so observers never see a
    /// half-applied transition
    state: Mutex<ControllerState>,

    /// Publishes every committed state change; the route guard and tests
    /// subscribe here
    events: watch::Sender<Session>,

    store: CredentialStore,
    gateway: Arc<RequestGateway>,
    token: TokenCell,
    response_cache: ResponseCache,
    scheduler: RefreshScheduler,

    /// Assumed token validity window in seconds. The backend communicates
    /// no explicit expiry, so this is operator-configured.
    session_ttl_secs: i64,

    /// Safety threshold: renewal fires this many seconds before assumed expiry
    refresh_threshold_secs: i64,

    /// Weak self-reference handed to spawned timers and listeners, so a
    /// torn-down controller is never resurrected by a late callback
    self_weak: Weak<SessionController>,
}

struct ControllerState {
    session: Session,

    /// Bumped on every login and logout. An asynchronous operation captures
    /// the generation at start and discards its result if the counter moved.
    generation: u64,

    /// At most one refresh in flight
    refresh_in_flight: bool,
}

impl SessionController {
    pub fn new(
        store: CredentialStore,
        gateway: Arc<RequestGateway>,
        token: TokenCell,
        response_cache: ResponseCache,
        session_ttl_secs: u64,
        refresh_threshold_secs: u64,
    ) -> Arc<Self> {
        let (events, _) = watch::channel(Session::default());

        Arc::new_cyclic(|self_weak| Self {
            state: Mutex::new(ControllerState {
                session: Session::default(),
                generation: 0,
                refresh_in_flight: false,
            }),
            events,
            store,
            gateway,
            token,
            response_cache,
            scheduler: RefreshScheduler::new(),
            session_ttl_secs: session_ttl_secs as i64,
            refresh_threshold_secs: refresh_threshold_secs as i64,
            self_weak: self_weak.clone(),
        })
    }

    /// Subscribe to committed session snapshots
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.events.subscribe()
    }

    /// Most recently committed session snapshot
    pub fn current(&self) -> Session {
        self.events.borrow().clone()
    }

    /// Drain the gateway's forced-invalidation channel in a background task.
    /// A 401 on any non-login call lands here and routes through `logout()`.
    pub fn listen_for_invalidation(&self, mut rx: InvalidationReceiver) {
        let weak = self.self_weak.clone();
        tokio::spawn(async move {
            while let Some(signal) = rx.recv().await {
                let Some(controller) = weak.upgrade() else {
                    break;
                };
                tracing::warn!(message = %signal.message, "Forced session invalidation");
                controller.do_logout(Some(ErrorInfo {
                    kind: crate::error::ErrorKind::SessionInvalid,
                    message: signal.message,
                }))
                .await;
            }
        });
    }

    /// Restore the session from persistent storage.
    ///
    /// Absorbs every failure into the returned state: an unreadable store
    /// or a rejected token ends in `Anonymous`, never in an error.
    pub async fn bootstrap(&self) -> Session {
        let credential = self.store.load_credential().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Unreadable credential store, treating as signed out");
            None
        });

        let Some(credential) = credential else {
            let mut state = self.state.lock().await;
            self.transition(&mut state, Session::default());
            return state.session.clone();
        };

        // Display-only snapshot so the UI is not blank while validating
        let cached_profile = self.store.load_profile().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Unreadable profile snapshot");
            None
        });

        {
            let mut state = self.state.lock().await;
            self.token.set(credential.token.clone());
            self.transition(
                &mut state,
                Session {
                    status: SessionStatus::Validating,
                    user: cached_profile.clone(),
                    last_error: None,
                },
            );
        }

        match self.gateway.fetch_profile().await {
            Ok(user) => {
                let mut state = self.state.lock().await;
                let renewed = Credential::new(credential.token);
                self.persist(&renewed, &user);
                self.arm_refresh_timer(&renewed);
                self.transition(
                    &mut state,
                    Session {
                        status: SessionStatus::Authenticated,
                        user: Some(user),
                        last_error: None,
                    },
                );
                state.session.clone()
            }
            Err(err @ ApiError::Server { .. }) => {
                // Fail closed on the credential, but keep the snapshot on
                // screen: the outage is the server's fault, not the user's
                tracing::warn!(error = %err, "Bootstrap validation hit a server error");
                self.scheduler.cancel();
                let mut state = self.state.lock().await;
                self.token.clear();
                self.clear_persistence();
                self.transition(
                    &mut state,
                    Session {
                        status: SessionStatus::Anonymous,
                        user: cached_profile,
                        last_error: Some((&err).into()),
                    },
                );
                state.session.clone()
            }
            Err(err) => {
                // 401, unreachable, anything else: full logout cleanup
                tracing::info!(error = %err, "Stored credential rejected, signing out");
                self.do_logout(Some((&err).into())).await
            }
        }
    }

    /// Exchange credentials for a session.
    ///
    /// On failure the current state is left untouched and the error is the
    /// caller's to surface; the forced-logout machinery never runs here.
    pub async fn login(
        &self,
        identifier: &str,
        secret: &str,
        return_to: Option<&str>,
    ) -> Result<LoginOutcome, ApiError> {
        let response = self.gateway.login(identifier, secret).await?;

        let mut state = self.state.lock().await;
        state.generation = state.generation.wrapping_add(1);
        state.refresh_in_flight = false;

        let credential = Credential::new(response.token);
        self.persist(&credential, &response.user);
        self.token.set(credential.token.clone());
        self.arm_refresh_timer(&credential);
        self.transition(
            &mut state,
            Session {
                status: SessionStatus::Authenticated,
                user: Some(response.user),
                last_error: None,
            },
        );
        let session = state.session.clone();
        drop(state);

        let redirect_to = return_to
            .filter(|path| *path != guard::LOGIN_PATH)
            .unwrap_or(guard::DEFAULT_AUTHENTICATED_PATH)
            .to_string();

        Ok(LoginOutcome {
            session,
            redirect_to,
        })
    }

    /// Proactively revalidate the session before its assumed expiry.
    ///
    /// No-op when a refresh is already in flight or nobody is signed in.
    /// A result arriving after logout superseded this attempt is discarded.
    pub async fn refresh(&self) {
        let generation = {
            let mut state = self.state.lock().await;
            if state.refresh_in_flight {
                tracing::debug!("Refresh already in flight, skipping");
                return;
            }
            if !state.session.status.is_signed_in() {
                tracing::debug!("Refresh without an active session, skipping");
                return;
            }
            state.refresh_in_flight = true;
            let mut session = state.session.clone();
            session.status = SessionStatus::Refreshing;
            self.transition(&mut state, session);
            state.generation
        };

        let result = self.gateway.fetch_profile().await;

        let fatal = {
            let mut state = self.state.lock().await;
            if state.generation != generation {
                // Logout (or a new login) won the race; this result belongs
                // to a session that no longer exists
                tracing::debug!("Discarding stale refresh result");
                return;
            }
            state.refresh_in_flight = false;

            match result {
                Ok(user) => {
                    let Some(token) = self.token.current() else {
                        tracing::warn!("Refresh completed without a token, ignoring");
                        return;
                    };
                    let credential = Credential::new(token);
                    self.persist(&credential, &user);
                    self.arm_refresh_timer(&credential);
                    self.transition(
                        &mut state,
                        Session {
                            status: SessionStatus::Authenticated,
                            user: Some(user),
                            last_error: None,
                        },
                    );
                    return;
                }
                Err(err @ ApiError::Server { .. }) => {
                    // Transient server failure: stay signed in, retry soon
                    tracing::warn!(error = %err, "Refresh hit a server error, will retry");
                    let mut session = state.session.clone();
                    session.status = SessionStatus::Authenticated;
                    session.last_error = Some((&err).into());
                    self.transition(&mut state, session);
                    self.scheduler.arm(
                        Duration::from_secs(REFRESH_RETRY_SECS),
                        self.self_weak.clone(),
                    );
                    return;
                }
                Err(err) => err,
            }
        };

        tracing::info!(error = %fatal, "Refresh failed, signing out");
        self.do_logout(Some((&fatal).into())).await;
    }

    /// End the session. Idempotent.
    ///
    /// Returns the login redirect target built from `current_path`, or
    /// `None` when no path was given or it already is the login surface.
    pub async fn logout(&self, current_path: Option<&str>) -> Option<String> {
        self.do_logout(None).await;
        current_path.and_then(guard::login_redirect)
    }

    /// Shared cleanup path for explicit and forced logout.
    ///
    /// Scheduler cancel, generation bump and credential clearing happen
    /// before the best-effort server invalidation is even spawned, so an
    /// in-flight refresh can only ever observe the bumped generation.
    async fn do_logout(&self, error: Option<ErrorInfo>) -> Session {
        self.scheduler.cancel();

        let token = self.token.current();
        let mut state = self.state.lock().await;
        state.generation = state.generation.wrapping_add(1);
        state.refresh_in_flight = false;
        self.token.clear();
        self.clear_persistence();
        self.transition(
            &mut state,
            Session {
                status: SessionStatus::Anonymous,
                user: None,
                last_error: error,
            },
        );
        let session = state.session.clone();
        drop(state);

        // Best-effort: the server is told, but local cleanup is already done
        // and does not wait on the outcome
        if let Some(token) = token {
            let gateway = Arc::clone(&self.gateway);
            tokio::spawn(async move {
                gateway.invalidate_session(token).await;
            });
        }

        session
    }

    fn persist(&self, credential: &Credential, user: &super::types::UserIdentity) {
        if let Err(e) = self.store.save(credential, user) {
            // The in-memory session proceeds; it just won't survive a restart
            tracing::warn!(error = %e, "Failed to persist session");
        }
    }

    fn clear_persistence(&self) {
        if let Err(e) = self.store.clear() {
            tracing::warn!(error = %e, "Failed to clear credential store");
        }
        self.response_cache.clear();
    }

    fn arm_refresh_timer(&self, credential: &Credential) {
        let delay = refresh_delay(
            credential.issued_at,
            Utc::now(),
            self.session_ttl_secs,
            self.refresh_threshold_secs,
        );
        self.scheduler.arm(delay, self.self_weak.clone());
    }

    /// Commit a new snapshot and publish it. The only place session state
    /// is written.
    fn transition(&self, state: &mut ControllerState, session: Session) {
        if state.session.status != session.status {
            tracing::info!(
                from = ?state.session.status,
                to = ?session.status,
                "Session state changed"
            );
        }
        state.session = session;
        self.events.send_replace(state.session.clone());
    }

    /// True while a renewal check is scheduled
    pub fn refresh_timer_armed(&self) -> bool {
        self.scheduler.is_armed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ForcedInvalidation, TokenCell};
    use tokio::sync::mpsc;

    fn test_controller(base_url: &str) -> (Arc<SessionController>, TokenCell) {
        let (tx, _rx) = mpsc::unbounded_channel::<ForcedInvalidation>();
        let token = TokenCell::new();
        let cache = ResponseCache::new(60);
        let gateway = Arc::new(
            RequestGateway::new(base_url, token.clone(), tx, cache.clone(), 5, 5).unwrap(),
        );
        let store = CredentialStore::new(std::env::temp_dir().join(format!(
            "backoffice-controller-test-{}.sqlite3",
            uuid::Uuid::new_v4()
        )));
        let controller =
            SessionController::new(store, gateway, token.clone(), cache, 3600, 300);
        (controller, token)
    }

    #[tokio::test]
    async fn test_bootstrap_without_credential_is_anonymous() {
        let (controller, _token) = test_controller("http://127.0.0.1:1");
        let session = controller.bootstrap().await;
        assert_eq!(session.status, SessionStatus::Anonymous);
        assert!(session.user.is_none());
        assert!(!controller.refresh_timer_armed());
    }

    #[tokio::test]
    async fn test_refresh_without_session_is_noop() {
        let (controller, token) = test_controller("http://127.0.0.1:1");
        controller.refresh().await;
        assert_eq!(controller.current().status, SessionStatus::Anonymous);
        assert!(token.current().is_none());
    }

    #[tokio::test]
    async fn test_logout_is_idempotent_when_signed_out() {
        let (controller, _token) = test_controller("http://127.0.0.1:1");
        assert!(controller.logout(Some("/admin/portfolio")).await.is_some());
        assert!(controller.logout(Some("/admin/login")).await.is_none());
        assert_eq!(controller.current().status, SessionStatus::Anonymous);
    }

    #[tokio::test]
    async fn test_subscribe_sees_committed_snapshots() {
        let (controller, _token) = test_controller("http://127.0.0.1:1");
        let rx = controller.subscribe();
        controller.bootstrap().await;
        assert_eq!(rx.borrow().status, SessionStatus::Anonymous);
    }
}
