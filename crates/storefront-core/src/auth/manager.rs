//! The session manager: sole owner of the credential pair and the cached
//! profile, and the only path by which protected requests are sent.
//!
//! State machine:
//!
//! ```text
//! Uninitialized -> Initializing -> Authenticated <-> Unauthenticated
//! ```
//!
//! Protected requests go through [`SessionManager::with_auth_retry`],
//! which reads the access token at dispatch time and, on a 401, renews
//! the pair once and re-sends the request once. Renewal is single-flight:
//! concurrent 401s wait on one refresh call instead of racing their own.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Result;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info, warn};

use super::{
    AuthError, CredentialPair, ExpiryPolicy, PersistedSession, SessionEvent, SessionSnapshot,
    SessionState, SessionStore, StoredCredentials,
};
use crate::api::{ApiClient, ApiRequest, Envelope};
use crate::models::{AuthPayload, LoginCredentials, RegisterRequest, User, UserPayload};
use crate::validation;

// ============================================================================
// Constants
// ============================================================================

/// Capacity of the session event channel.
/// Events are rare (sign-in, sign-out, expiry); slow subscribers just lag.
const EVENT_CHANNEL_CAPACITY: usize = 16;

const LOGIN_FAILED: &str = "Login failed";
const REGISTRATION_FAILED: &str = "Registration failed";
const VERIFICATION_FAILED: &str = "Email verification failed";
const RESEND_FAILED: &str = "Failed to resend verification email";
const FORGOT_PASSWORD_FAILED: &str = "Failed to send reset email";
const RESET_PASSWORD_FAILED: &str = "Password reset failed";
const CHANGE_PASSWORD_FAILED: &str = "Password change failed";
const FETCH_USER_FAILED: &str = "Failed to get user";
const REFRESH_FAILED: &str = "Token refresh failed";
const SESSION_EXPIRED: &str = "Session expired. Please log in again.";
const SESSION_CHANGED: &str = "Session changed while the token was being refreshed";
const MISSING_TOKEN: &str =
    "Email verification token is missing. Please click the verification link in your email again.";

pub struct SessionManager {
    api: ApiClient,
    store: Box<dyn SessionStore>,
    policy: ExpiryPolicy,
    /// In-memory mirror of the persisted record; what dispatch reads
    persisted: RwLock<PersistedSession>,
    /// Held for the duration of a refresh call
    refresh_lock: Mutex<()>,
    snapshot: watch::Sender<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    pub fn new(api: ApiClient, store: Box<dyn SessionStore>) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot::default());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            api,
            store,
            policy: ExpiryPolicy::default(),
            persisted: RwLock::new(PersistedSession::default()),
            refresh_lock: Mutex::new(()),
            snapshot,
            events,
        }
    }

    /// Override the local token expiration policy
    pub fn with_policy(mut self, policy: ExpiryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Current session snapshot
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that observes every snapshot change
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    /// Receiver for sign-in, sign-out and expiry events
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Holds a usable credential pair and a cached profile. Never touches
    /// the network.
    pub fn is_authenticated(&self) -> bool {
        self.read_persisted().is_authenticated()
    }

    /// The locally cached profile, if any
    pub fn cached_user(&self) -> Option<User> {
        self.read_persisted().user.clone()
    }

    /// The stored credential pair, if one is held and still usable
    pub fn credentials(&self) -> Option<CredentialPair> {
        self.live_credentials().map(|c| c.pair)
    }

    /// Minutes left before the refresh token lapses and a new login is
    /// needed, when a session is held
    pub fn minutes_until_expiry(&self) -> Option<i64> {
        self.live_credentials().map(|c| c.minutes_until_expiry())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Rehydrate from persisted storage.
    ///
    /// With stored credentials the profile is re-fetched; if that fails the
    /// cached profile is used so a flaky network at start-up does not sign
    /// the user out. Without credentials the session is unauthenticated.
    pub async fn initialize(&self) -> SessionState {
        self.snapshot.send_modify(|s| {
            s.state = SessionState::Initializing;
            s.is_loading = true;
            s.error = None;
        });

        if !self.load_persisted() {
            debug!("No stored credentials");
            self.finish_initialize(None, None);
            return SessionState::Unauthenticated;
        }

        match self.get_current_user().await {
            Ok(user) => {
                self.finish_initialize(Some(user), None);
                SessionState::Authenticated
            }
            Err(e) => {
                warn!(error = %e, "Could not fetch current user during start-up");
                match self.cached_user().filter(|_| self.live_credentials().is_some()) {
                    Some(user) => {
                        info!("Using cached profile");
                        self.finish_initialize(Some(user), None);
                        SessionState::Authenticated
                    }
                    None => {
                        let error = if e.is_session_expired() {
                            SESSION_EXPIRED.to_string()
                        } else {
                            e.to_string()
                        };
                        self.finish_initialize(None, Some(error));
                        SessionState::Unauthenticated
                    }
                }
            }
        }
    }

    /// Rehydrate from persisted storage without contacting the server.
    ///
    /// The session counts as authenticated when usable credentials and a
    /// cached profile are both on disk.
    pub fn restore(&self) -> SessionState {
        self.load_persisted();
        let user = self
            .cached_user()
            .filter(|_| self.live_credentials().is_some());
        let state = if user.is_some() {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        };
        self.finish_initialize(user, None);
        state
    }

    /// Load the stored record into memory, dropping expired credentials.
    /// Returns whether credentials remain.
    fn load_persisted(&self) -> bool {
        let mut persisted = self.store.load().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load persisted session");
            PersistedSession::default()
        });

        if persisted.credentials.as_ref().is_some_and(|c| c.is_expired()) {
            info!("Stored credentials have expired");
            persisted.credentials = None;
            if let Err(e) = self.store.save(&persisted) {
                warn!(error = %e, "Failed to drop expired credentials");
            }
        }

        let has_credentials = persisted.credentials.is_some();
        *self.write_persisted() = persisted;
        has_credentials
    }

    fn finish_initialize(&self, user: Option<User>, error: Option<String>) {
        let state = if user.is_some() {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        };
        info!(?state, "Session initialized");
        self.snapshot.send_modify(|s| {
            s.state = state;
            s.user = user;
            s.is_loading = false;
            s.error = error;
        });
    }

    pub async fn login(&self, credentials: &LoginCredentials) -> Result<User, AuthError> {
        self.begin_loading();

        match self.login_inner(credentials).await {
            Ok(user) => {
                info!(user = %user.display_name(), "Login successful");
                self.snapshot.send_modify(|s| {
                    s.state = SessionState::Authenticated;
                    s.user = Some(user.clone());
                    s.is_loading = false;
                    s.error = None;
                });
                let _ = self.events.send(SessionEvent::SignedIn);
                Ok(user)
            }
            Err(e) => {
                warn!(error = %e, "Login failed");
                Err(self.record_failure(e))
            }
        }
    }

    async fn login_inner(&self, credentials: &LoginCredentials) -> Result<User, AuthError> {
        validation::validate_login(credentials)
            .map_err(|e| AuthError::InvalidCredentials(e.to_string()))?;

        let request = ApiRequest::post(["auth", "login"])
            .with_body(credentials)
            .map_err(|e| AuthError::from_api(e, AuthError::InvalidCredentials, LOGIN_FAILED))?;
        let payload: AuthPayload = self
            .api
            .send(&request, None)
            .await
            .and_then(Envelope::into_data)
            .map_err(|e| AuthError::from_api(e, AuthError::InvalidCredentials, LOGIN_FAILED))?;

        let (user, pair) = payload.into_parts();
        let session = PersistedSession {
            credentials: Some(self.policy.issue(pair, Utc::now())),
            user: Some(user.clone()),
        };
        self.persist(session).map_err(AuthError::Storage)?;
        Ok(user)
    }

    /// Create an account. The caller is not signed in: the account must be
    /// verified by email first.
    pub async fn register(&self, request: &RegisterRequest) -> Result<Option<User>, AuthError> {
        self.begin_loading();

        let result = self.register_inner(request).await;

        match result {
            Ok(user) => {
                info!(username = %request.username, "Account created; awaiting email verification");
                self.snapshot.send_modify(|s| {
                    s.is_loading = false;
                    s.error = None;
                });
                Ok(user)
            }
            Err(e) => Err(self.record_failure(e)),
        }
    }

    async fn register_inner(&self, request: &RegisterRequest) -> Result<Option<User>, AuthError> {
        validation::validate_registration(request, None)
            .map_err(|e| AuthError::RegistrationFailed(e.to_string()))?;

        let call = ApiRequest::post(["auth", "register"])
            .with_body(request)
            .map_err(|e| AuthError::from_api(e, AuthError::RegistrationFailed, REGISTRATION_FAILED))?;
        let envelope: Envelope<UserPayload> = self
            .api
            .send(&call, None)
            .await
            .map_err(|e| AuthError::from_api(e, AuthError::RegistrationFailed, REGISTRATION_FAILED))?;

        Ok(envelope.data.map(|p| p.user))
    }

    /// Sign out. The server is told on a best-effort basis; local state is
    /// cleared no matter what it says.
    pub async fn logout(&self) {
        match self.live_credentials() {
            Some(creds) => {
                let request = ApiRequest::post(["auth", "logout"]).authorized();
                if let Err(e) = self
                    .api
                    .send::<Value>(&request, Some(creds.access_token()))
                    .await
                {
                    warn!(error = %e, "Logout request failed; clearing local session anyway");
                }
            }
            None => debug!("No credentials held; skipping remote logout"),
        }

        self.wipe();
        self.snapshot.send_modify(|s| {
            s.state = SessionState::Unauthenticated;
            s.user = None;
            s.is_loading = false;
            s.error = None;
        });
        info!("Logged out");
        let _ = self.events.send(SessionEvent::SignedOut);
    }

    // =========================================================================
    // Account operations
    // =========================================================================

    /// Fetch the profile from the server and refresh the local cache
    pub async fn get_current_user(&self) -> Result<User, AuthError> {
        let request = ApiRequest::get(["auth", "me"]).authorized();
        let user = self
            .with_auth_retry::<UserPayload>(&request)
            .await
            .and_then(|envelope| envelope.into_data().map(|p| p.user).map_err(AuthError::from))
            .map_err(|e| self.record_failure(e.classify(AuthError::FetchFailed, FETCH_USER_FAILED)))?;

        self.cache_user(&user);
        self.snapshot.send_if_modified(|s| {
            if s.state == SessionState::Authenticated {
                s.user = Some(user.clone());
                true
            } else {
                false
            }
        });
        Ok(user)
    }

    /// Replace the cached profile, e.g. after the presentation layer edited it
    pub fn update_user(&self, user: User) {
        self.cache_user(&user);
        self.snapshot.send_modify(|s| s.user = Some(user));
    }

    pub fn clear_error(&self) {
        self.snapshot.send_if_modified(|s| s.error.take().is_some());
    }

    pub async fn verify_email(&self, token: &str) -> Result<String, AuthError> {
        if token.trim().is_empty() {
            return Err(self.record_failure(AuthError::VerificationFailed(MISSING_TOKEN.to_string())));
        }

        let request = ApiRequest::get(["auth", "verify-email", token]);
        let envelope = self
            .with_auth_retry::<Value>(&request)
            .await
            .map_err(|e| {
                self.record_failure(e.classify(AuthError::VerificationFailed, VERIFICATION_FAILED))
            })?;

        info!("Email verified");
        Ok(envelope
            .message
            .unwrap_or_else(|| "Email verified successfully".to_string()))
    }

    /// Resend the verification email to the signed-in user
    pub async fn resend_verification(&self) -> Result<String, AuthError> {
        let request = ApiRequest::post(["auth", "resend-verification"]).authorized();
        self.acknowledge(&request, AuthError::ResendFailed, RESEND_FAILED, "Verification email sent")
            .await
    }

    /// Resend the verification email before signing in
    pub async fn resend_verification_to(&self, email: &str) -> Result<String, AuthError> {
        if !validation::is_valid_email(email) {
            let message = validation::ValidationError::InvalidEmail.to_string();
            return Err(self.record_failure(AuthError::ResendFailed(message)));
        }
        let request = ApiRequest::post(["auth", "resend-verification"])
            .with_body(&json!({ "email": email }))
            .map_err(|e| AuthError::from_api(e, AuthError::ResendFailed, RESEND_FAILED))?;
        self.acknowledge(&request, AuthError::ResendFailed, RESEND_FAILED, "Verification email sent")
            .await
    }

    pub async fn forgot_password(&self, email: &str) -> Result<String, AuthError> {
        if !validation::is_valid_email(email) {
            let message = validation::ValidationError::InvalidEmail.to_string();
            return Err(self.record_failure(AuthError::PasswordOperationFailed(message)));
        }
        let request = ApiRequest::post(["auth", "forgot-password"])
            .with_body(&json!({ "email": email }))
            .map_err(|e| {
                AuthError::from_api(e, AuthError::PasswordOperationFailed, FORGOT_PASSWORD_FAILED)
            })?;
        self.acknowledge(
            &request,
            AuthError::PasswordOperationFailed,
            FORGOT_PASSWORD_FAILED,
            "Password reset email sent",
        )
        .await
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<String, AuthError> {
        if let Err(e) = validation::validate_password(new_password) {
            return Err(self.record_failure(AuthError::PasswordOperationFailed(e.to_string())));
        }
        let request = ApiRequest::post(["auth", "reset-password", token])
            .with_body(&json!({ "newPassword": new_password }))
            .map_err(|e| {
                AuthError::from_api(e, AuthError::PasswordOperationFailed, RESET_PASSWORD_FAILED)
            })?;
        self.acknowledge(
            &request,
            AuthError::PasswordOperationFailed,
            RESET_PASSWORD_FAILED,
            "Password has been reset",
        )
        .await
    }

    pub async fn change_password(
        &self,
        old_password: &str,
        new_password: &str,
    ) -> Result<String, AuthError> {
        if let Err(e) = validation::validate_password(new_password) {
            return Err(self.record_failure(AuthError::PasswordOperationFailed(e.to_string())));
        }
        let request = ApiRequest::post(["auth", "change-password"])
            .with_body(&json!({ "oldPassword": old_password, "newPassword": new_password }))
            .map_err(|e| {
                AuthError::from_api(e, AuthError::PasswordOperationFailed, CHANGE_PASSWORD_FAILED)
            })?
            .authorized();
        self.acknowledge(
            &request,
            AuthError::PasswordOperationFailed,
            CHANGE_PASSWORD_FAILED,
            "Password changed",
        )
        .await
    }

    /// Send a request whose only interesting output is the server's message
    async fn acknowledge(
        &self,
        request: &ApiRequest,
        kind: fn(String) -> AuthError,
        default_error: &str,
        default_message: &str,
    ) -> Result<String, AuthError> {
        let envelope = self
            .with_auth_retry::<Value>(request)
            .await
            .map_err(|e| self.record_failure(e.classify(kind, default_error)))?;
        debug!(request = %request, "Request acknowledged");
        Ok(envelope
            .message
            .unwrap_or_else(|| default_message.to_string()))
    }

    // =========================================================================
    // Protected dispatch and renewal
    // =========================================================================

    /// Send `request`, attaching the current access token when the request
    /// is part of the protected surface.
    ///
    /// A 401 triggers one renewal and one re-dispatch with the new token.
    /// A second 401 is returned as-is. If renewal fails the session is
    /// signed out and `AuthError::RefreshFailed` is returned.
    pub async fn with_auth_retry<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
    ) -> Result<Envelope<T>, AuthError> {
        if !request.is_authorized() {
            return Ok(self.api.send(request, None).await?);
        }

        let (token, renewed) = match self.live_credentials() {
            Some(creds) if creds.needs_refresh() => {
                debug!("Access token past local expiry; renewing before dispatch");
                (self.renew(Some(creds.access_token())).await?, true)
            }
            Some(creds) => (Some(creds.pair.access_token), false),
            None => (None, false),
        };

        match self.api.send(request, token.as_deref()).await {
            Err(err) if err.is_unauthorized() && !renewed => {
                debug!(request = %request, "Rejected as unauthorized; renewing session");
                match self.renew(token.as_deref()).await? {
                    Some(fresh) => Ok(self.api.send(request, Some(&fresh)).await?),
                    None => Err(err.into()),
                }
            }
            other => Ok(other?),
        }
    }

    /// Force a renewal of the credential pair
    pub async fn refresh_session(&self) -> Result<(), AuthError> {
        let _guard = self.refresh_lock.lock().await;
        let creds = self
            .live_credentials()
            .ok_or_else(|| AuthError::RefreshFailed("No refresh token available".to_string()))?;
        self.refresh_with(creds.refresh_token()).await.map(|_| ())
    }

    /// Obtain a usable access token after `rejected` was refused.
    ///
    /// Returns `Ok(None)` when there is no refresh token to use; the session
    /// is then signed out locally and the caller reports its original error.
    async fn renew(&self, rejected: Option<&str>) -> Result<Option<String>, AuthError> {
        let _guard = self.refresh_lock.lock().await;

        let Some(current) = self.live_credentials() else {
            info!("No refresh token available; session is unauthenticated");
            let cleared = self.modify_persisted(|session| {
                if session.live_credentials().is_some() {
                    return false;
                }
                *session = PersistedSession::default();
                true
            });
            if let Err(e) = cleared {
                warn!(error = %e, "Failed to clear persisted session");
            }
            self.snapshot.send_modify(|s| {
                s.state = SessionState::Unauthenticated;
                s.user = None;
            });
            return Ok(None);
        };

        // Someone else renewed while we waited for the lock
        if rejected != Some(current.access_token()) && !current.needs_refresh() {
            debug!("Session already renewed by a concurrent request");
            return Ok(Some(current.pair.access_token));
        }

        self.refresh_with(current.refresh_token()).await.map(Some)
    }

    /// Call the refresh endpoint. Must be called with `refresh_lock` held.
    async fn refresh_with(&self, refresh_token: &str) -> Result<String, AuthError> {
        let request = ApiRequest::post(["auth", "refresh-token"])
            .with_body(&json!({ "refreshToken": refresh_token }))?;
        let result = self
            .api
            .send::<CredentialPair>(&request, None)
            .await
            .and_then(Envelope::into_data);

        // A logout or login may have replaced the session while the call
        // was in flight; only the session that sent `refresh_token` is
        // touched below.
        match result {
            Ok(pair) => {
                let access_token = pair.access_token.clone();
                let issued = self.policy.issue(pair, Utc::now());
                let installed = self.modify_persisted(|session| {
                    if !holds_refresh_token(session, refresh_token) {
                        return false;
                    }
                    session.credentials = Some(issued);
                    true
                });
                match installed {
                    Ok(true) => info!("Session renewed"),
                    Ok(false) => {
                        info!("Session replaced during renewal; discarding renewed pair");
                        return Err(AuthError::RefreshFailed(SESSION_CHANGED.to_string()));
                    }
                    Err(e) => warn!(error = %e, "Failed to persist renewed credentials"),
                }
                Ok(access_token)
            }
            Err(e) => {
                let message = e.server_message().unwrap_or(REFRESH_FAILED).to_string();
                let wiped = self
                    .modify_persisted(|session| {
                        if !holds_refresh_token(session, refresh_token) {
                            return false;
                        }
                        *session = PersistedSession::default();
                        true
                    })
                    .unwrap_or_else(|e| {
                        warn!(error = %e, "Failed to clear persisted session");
                        true
                    });
                if !wiped {
                    info!(error = %e, "Renewal failed for a session that has since been replaced");
                    return Err(AuthError::RefreshFailed(message));
                }

                warn!(error = %e, "Session renewal failed; signing out");
                self.snapshot.send_modify(|s| {
                    s.state = SessionState::Unauthenticated;
                    s.user = None;
                    s.is_loading = false;
                    s.error = Some(SESSION_EXPIRED.to_string());
                });
                let _ = self.events.send(SessionEvent::Expired);
                Err(AuthError::RefreshFailed(message))
            }
        }
    }

    // =========================================================================
    // Persistence helpers
    // =========================================================================

    fn read_persisted(&self) -> RwLockReadGuard<'_, PersistedSession> {
        self.persisted.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_persisted(&self) -> RwLockWriteGuard<'_, PersistedSession> {
        self.persisted.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn live_credentials(&self) -> Option<StoredCredentials> {
        self.read_persisted().live_credentials().cloned()
    }

    /// Apply `change` to the record and write it through to the store,
    /// all under the write lock so no other update interleaves. `change`
    /// returns false to leave both untouched.
    ///
    /// The in-memory record is updated even when the store write fails.
    fn modify_persisted(
        &self,
        change: impl FnOnce(&mut PersistedSession) -> bool,
    ) -> Result<bool> {
        let mut session = self.write_persisted();
        if !change(&mut *session) {
            return Ok(false);
        }
        if session.is_empty() {
            self.store.clear()?;
        } else {
            self.store.save(&session)?;
        }
        Ok(true)
    }

    /// Replace the whole record, in memory first so dispatch sees it at once
    fn persist(&self, replacement: PersistedSession) -> Result<()> {
        self.modify_persisted(|session| {
            *session = replacement;
            true
        })
        .map(|_| ())
    }

    /// Cache the profile for the session currently held. Without
    /// credentials (e.g. a logout landed mid-fetch) nothing is written.
    fn cache_user(&self, user: &User) {
        let cached = self.modify_persisted(|session| {
            if session.credentials.is_none() {
                return false;
            }
            session.user = Some(user.clone());
            true
        });
        match cached {
            Ok(true) => {}
            Ok(false) => debug!("No session held; profile not cached"),
            Err(e) => warn!(error = %e, "Failed to cache user profile"),
        }
    }

    /// Drop credentials and profile. Never fails; storage errors are logged.
    fn wipe(&self) {
        if let Err(e) = self.persist(PersistedSession::default()) {
            warn!(error = %e, "Failed to clear persisted session");
        }
    }

    fn begin_loading(&self) {
        self.snapshot.send_modify(|s| {
            s.is_loading = true;
            s.error = None;
        });
    }

    /// Note a failed operation in the snapshot and hand the error back
    fn record_failure(&self, error: AuthError) -> AuthError {
        let message = error.to_string();
        self.snapshot.send_modify(|s| {
            s.is_loading = false;
            if !error.is_session_expired() {
                s.error = Some(message);
            }
        });
        error
    }
}

fn holds_refresh_token(session: &PersistedSession, refresh_token: &str) -> bool {
    session
        .credentials
        .as_ref()
        .is_some_and(|c| c.refresh_token() == refresh_token)
}
