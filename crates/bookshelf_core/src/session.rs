//! crates/bookshelf_core/src/session.rs
//!
//! The session manager owns the current user identity. It establishes it
//! through the authenticator, persists it locally (write-through), restores it
//! at startup and mirrors profile edits to the backend in the background.

use futures::StreamExt;
use std::sync::{Arc, OnceLock};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tracing::{debug, error, info, warn};

use crate::domain::{NewProfile, ProfilePatch, Session, SessionPatch, UserProfile};
use crate::error::{AuthReason, CoreError, CoreResult};
use crate::ports::{AuthenticatorService, KeyValueStore, PortError, ProfileStore};
use crate::subscription::SubscriptionHandle;
use crate::validation;

/// Key under which the serialized session is kept in local storage.
pub const SESSION_STORAGE_KEY: &str = "@bookshelf:session";

const MIRROR_FAILURE_CAPACITY: usize = 16;

/// A profile edit that was committed locally but could not be written to the backend.
#[derive(Debug, Clone)]
pub struct MirrorFailure {
    pub user_id: String,
    pub error: CoreError,
}

/// Identity-provider failures are always reported as `AuthError`; transport
/// problems become `ProviderError`.
fn auth_failure(err: PortError) -> CoreError {
    match err {
        PortError::Auth { .. } => err.into(),
        other => CoreError::Auth {
            reason: AuthReason::ProviderError,
            message: other.to_string(),
        },
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

enum MirrorJob {
    Update { user_id: String, patch: ProfilePatch },
    /// Answered once every job queued before it has been applied.
    Flush(oneshot::Sender<()>),
}

/// Applies profile mirrors one at a time, in the order they were queued.
/// Stops when the owning `SessionManager` is dropped.
async fn run_mirror_worker(
    profiles: Arc<dyn ProfileStore>,
    failures: broadcast::Sender<MirrorFailure>,
    mut jobs: mpsc::UnboundedReceiver<MirrorJob>,
) {
    while let Some(job) = jobs.recv().await {
        match job {
            MirrorJob::Update { user_id, patch } => match profiles.update_profile(&user_id, &patch).await {
                Ok(()) => debug!(user_id = %user_id, "Profile mirrored."),
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Profile mirror failed; backend is behind the local session.");
                    // No receivers is fine: the failure has been logged.
                    let _ = failures.send(MirrorFailure {
                        user_id,
                        error: e.into(),
                    });
                }
            },
            MirrorJob::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Profile mirror worker stopped.");
}

pub struct SessionManager {
    authenticator: Arc<dyn AuthenticatorService>,
    profiles: Arc<dyn ProfileStore>,
    storage: Arc<dyn KeyValueStore>,
    current: RwLock<Option<Session>>,
    // Started on the first mirror, so building a manager needs no runtime.
    mirror_jobs: OnceLock<mpsc::UnboundedSender<MirrorJob>>,
    mirror_failures: broadcast::Sender<MirrorFailure>,
}

impl SessionManager {
    pub fn new(
        authenticator: Arc<dyn AuthenticatorService>,
        profiles: Arc<dyn ProfileStore>,
        storage: Arc<dyn KeyValueStore>,
    ) -> Self {
        let (mirror_failures, _) = broadcast::channel(MIRROR_FAILURE_CAPACITY);
        Self {
            authenticator,
            profiles,
            storage,
            current: RwLock::new(None),
            mirror_jobs: OnceLock::new(),
            mirror_failures,
        }
    }

    pub async fn current(&self) -> Option<Session> {
        self.current.read().await.clone()
    }

    pub async fn is_logged_in(&self) -> bool {
        self.current.read().await.is_some()
    }

    /// Reads the persisted session, if any, and makes it current.
    /// Absent, unreadable or incomplete entries yield `None`; this never fails.
    pub async fn restore_session(&self) -> Option<Session> {
        let raw = match self.storage.get(SESSION_STORAGE_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("No persisted session found.");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Could not read persisted session.");
                return None;
            }
        };

        let session = match serde_json::from_str::<Session>(&raw) {
            Ok(session) if session.is_well_formed() => session,
            Ok(_) => {
                warn!("Persisted session is incomplete; ignoring it.");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Persisted session is corrupt; ignoring it.");
                return None;
            }
        };

        info!(user_id = %session.user_id, "Session restored.");
        *self.current.write().await = Some(session.clone());
        Some(session)
    }

    pub async fn login(&self, email: &str, password: &str) -> CoreResult<Session> {
        validation::require_credentials(email, password)?;

        let identity = self.authenticator.sign_in(email, password).await.map_err(|e| {
            warn!(error = %e, "Sign-in rejected.");
            auth_failure(e)
        })?;

        let session = Session {
            user_id: identity.uid,
            display_name: non_blank(identity.display_name),
            email: if identity.email.is_empty() { email.to_string() } else { identity.email },
            session_token: identity.id_token,
        };
        self.commit(session.clone()).await?;
        info!(user_id = %session.user_id, "Logged in.");
        Ok(session)
    }

    /// Creates the identity, persists the session, then writes the profile
    /// record. A profile failure is returned to the caller but the identity and
    /// the local session stay in place; nothing is rolled back.
    pub async fn register(&self, email: &str, password: &str, name: Option<&str>) -> CoreResult<Session> {
        validation::validate_registration(email, password)?;

        let identity = self.authenticator.sign_up(email, password).await.map_err(|e| {
            warn!(error = %e, "Sign-up rejected.");
            auth_failure(e)
        })?;

        let session = Session {
            user_id: identity.uid,
            display_name: non_blank(name.map(str::to_string)).or_else(|| non_blank(identity.display_name)),
            email: if identity.email.is_empty() { email.to_string() } else { identity.email },
            session_token: identity.id_token,
        };
        self.commit(session.clone()).await?;
        info!(user_id = %session.user_id, "Registered.");

        let profile = NewProfile {
            email: session.email.clone(),
            name: session.display_name.clone(),
        };
        self.profiles
            .create_profile(&session.user_id, &profile)
            .await
            .map_err(|e| {
                error!(user_id = %session.user_id, error = %e, "Identity created but profile record was not.");
                CoreError::from(e)
            })?;

        Ok(session)
    }

    /// Clears the local session unconditionally, then signs out remotely on a
    /// best-effort basis.
    pub async fn logout(&self) {
        let previous = self.current.write().await.take();

        if let Err(e) = self.storage.remove(SESSION_STORAGE_KEY).await {
            warn!(error = %e, "Could not clear persisted session.");
        }

        match previous {
            Some(session) => {
                if let Err(e) = self.authenticator.sign_out(&session.session_token).await {
                    warn!(user_id = %session.user_id, error = %e, "Remote sign-out failed; local session cleared anyway.");
                }
                info!(user_id = %session.user_id, "Logged out.");
            }
            None => debug!("Logout requested without an active session."),
        }
    }

    /// Merges `patch` into the active session and persists it before returning.
    /// The profile record is updated by a background worker that applies edits
    /// in call order; a failure there is published on `mirror_failures` and
    /// never affects this call.
    ///
    /// Returns `Ok(None)` when nobody is signed in.
    pub async fn update_user(&self, patch: SessionPatch) -> CoreResult<Option<Session>> {
        let mut current = self.current.write().await;
        let Some(existing) = current.as_ref() else {
            return Ok(None);
        };
        validation::validate_session_patch(&patch)?;

        let mut updated = existing.clone();
        if let Some(name) = &patch.display_name {
            updated.display_name = Some(name.clone());
        }
        if let Some(email) = &patch.email {
            updated.email = email.clone();
        }
        self.persist(&updated).await?;
        *current = Some(updated.clone());
        drop(current);

        if !patch.is_empty() {
            self.queue_mirror(updated.user_id.clone(), ProfilePatch::from(&patch));
        }
        Ok(Some(updated))
    }

    pub async fn send_password_reset(&self, email: &str) -> CoreResult<()> {
        validation::validate_email(email)?;
        self.authenticator.send_password_reset(email).await.map_err(auth_failure)?;
        info!("Password reset requested.");
        Ok(())
    }

    /// Side channel for background profile mirror failures.
    pub fn mirror_failures(&self) -> broadcast::Receiver<MirrorFailure> {
        self.mirror_failures.subscribe()
    }

    /// Waits until every profile mirror queued so far has been applied.
    pub async fn flush_mirrors(&self) {
        let Some(jobs) = self.mirror_jobs.get() else {
            return;
        };
        let (done, applied) = oneshot::channel();
        if jobs.send(MirrorJob::Flush(done)).is_ok() {
            let _ = applied.await;
        }
    }

    /// Follows the active user's profile record. `Ok(None)` when nobody is signed in.
    pub async fn subscribe_profile<F>(&self, on_change: F) -> CoreResult<Option<SubscriptionHandle>>
    where
        F: FnMut(UserProfile) + Send + 'static,
    {
        let Some(session) = self.current().await else {
            return Ok(None);
        };
        let feed = self.profiles.watch_profile(&session.user_id).await?;
        let feed = feed
            .filter_map(|snapshot| async move { snapshot.transpose() })
            .boxed();
        Ok(Some(SubscriptionHandle::spawn(
            format!("profile:{}", session.user_id),
            feed,
            on_change,
        )))
    }

    // --- internals ---

    async fn persist(&self, session: &Session) -> CoreResult<()> {
        let raw = serde_json::to_string(session).map_err(|e| CoreError::Backend(e.to_string()))?;
        self.storage.set(SESSION_STORAGE_KEY, &raw).await?;
        Ok(())
    }

    /// Persists first so that in-memory state never runs ahead of storage.
    async fn commit(&self, session: Session) -> CoreResult<()> {
        self.persist(&session).await?;
        *self.current.write().await = Some(session);
        Ok(())
    }

    fn queue_mirror(&self, user_id: String, patch: ProfilePatch) {
        let jobs = self.mirror_jobs.get_or_init(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_mirror_worker(
                Arc::clone(&self.profiles),
                self.mirror_failures.clone(),
                rx,
            ));
            tx
        });
        if jobs.send(MirrorJob::Update { user_id, patch }).is_err() {
            error!("Profile mirror worker is gone; edit not mirrored.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AuthIdentity;
    use crate::error::ValidationError;
    use crate::memory::{InMemoryAuthenticator, InMemoryKeyValueStore, InMemoryProfileStore};
    use crate::ports::{ChangeFeed, PortResult};
    use async_trait::async_trait;
    use std::time::Duration;

    const EMAIL: &str = "ana@example.com";
    const PASSWORD: &str = "segredo1";

    struct Harness {
        auth: InMemoryAuthenticator,
        profiles: InMemoryProfileStore,
        storage: InMemoryKeyValueStore,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                auth: InMemoryAuthenticator::new().with_account(EMAIL, PASSWORD, Some("Ana")),
                profiles: InMemoryProfileStore::new(),
                storage: InMemoryKeyValueStore::new(),
            }
        }

        /// A fresh manager over the same backends, as after a process restart.
        fn manager(&self) -> SessionManager {
            SessionManager::new(
                Arc::new(self.auth.clone()),
                Arc::new(self.profiles.clone()),
                Arc::new(self.storage.clone()),
            )
        }
    }

    /// Profile store whose writes always fail.
    struct BrokenProfiles;

    #[async_trait]
    impl ProfileStore for BrokenProfiles {
        async fn create_profile(&self, _: &str, _: &NewProfile) -> PortResult<()> {
            Err(PortError::Unexpected("permission denied".to_string()))
        }
        async fn update_profile(&self, _: &str, _: &ProfilePatch) -> PortResult<()> {
            Err(PortError::Unexpected("permission denied".to_string()))
        }
        async fn get_profile(&self, user_id: &str) -> PortResult<UserProfile> {
            Err(PortError::NotFound(user_id.to_string()))
        }
        async fn watch_profile(&self, _: &str) -> PortResult<ChangeFeed<Option<UserProfile>>> {
            Err(PortError::Unauthorized)
        }
    }

    /// Authenticator that accepts everything, with an empty email in its answer.
    struct TerseAuthenticator;

    #[async_trait]
    impl AuthenticatorService for TerseAuthenticator {
        async fn sign_in(&self, _: &str, _: &str) -> PortResult<AuthIdentity> {
            Ok(AuthIdentity {
                uid: "uid-7".to_string(),
                email: String::new(),
                display_name: Some(String::new()),
                id_token: "token-7".to_string(),
            })
        }
        async fn sign_up(&self, email: &str, password: &str) -> PortResult<AuthIdentity> {
            self.sign_in(email, password).await
        }
        async fn sign_out(&self, _: &str) -> PortResult<()> {
            Ok(())
        }
        async fn send_password_reset(&self, _: &str) -> PortResult<()> {
            Ok(())
        }
    }

    /// Profile store whose first update is held back before reaching the records.
    struct SlowFirstWrite {
        inner: InMemoryProfileStore,
        delayed: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl ProfileStore for SlowFirstWrite {
        async fn create_profile(&self, user_id: &str, profile: &NewProfile) -> PortResult<()> {
            self.inner.create_profile(user_id, profile).await
        }
        async fn update_profile(&self, user_id: &str, patch: &ProfilePatch) -> PortResult<()> {
            if !self.delayed.swap(true, std::sync::atomic::Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            self.inner.update_profile(user_id, patch).await
        }
        async fn get_profile(&self, user_id: &str) -> PortResult<UserProfile> {
            self.inner.get_profile(user_id).await
        }
        async fn watch_profile(&self, user_id: &str) -> PortResult<ChangeFeed<Option<UserProfile>>> {
            self.inner.watch_profile(user_id).await
        }
    }

    async fn recv<T>(rx: &mut tokio::sync::mpsc::UnboundedReceiver<T>) -> Option<T> {
        tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.ok().flatten()
    }

    #[tokio::test]
    async fn login_survives_a_restart() {
        let harness = Harness::new();
        let session = harness.manager().login(EMAIL, PASSWORD).await.unwrap();
        assert_eq!(session.email, EMAIL);
        assert_eq!(session.display_name.as_deref(), Some("Ana"));
        assert!(!session.session_token.is_empty());

        let restarted = harness.manager();
        assert_eq!(restarted.restore_session().await, Some(session.clone()));
        assert_eq!(restarted.current().await, Some(session));
    }

    #[tokio::test]
    async fn login_overwrites_the_persisted_session() {
        let harness = Harness::new();
        let manager = harness.manager();
        let first = manager.login(EMAIL, PASSWORD).await.unwrap();
        let second = manager.login(EMAIL, PASSWORD).await.unwrap();
        assert_ne!(first.session_token, second.session_token);

        let restored = harness.manager().restore_session().await.unwrap();
        assert_eq!(restored.session_token, second.session_token);
    }

    #[tokio::test]
    async fn empty_credentials_fail_before_the_provider_is_called() {
        let harness = Harness::new();
        let manager = harness.manager();

        let err = manager.login("", PASSWORD).await.unwrap_err();
        assert_eq!(err, CoreError::Validation(ValidationError::Required("email")));
        let err = manager.login(EMAIL, "").await.unwrap_err();
        assert_eq!(err, CoreError::Validation(ValidationError::Required("password")));

        assert_eq!(harness.auth.sign_in_attempts(), 0);
        assert!(!manager.is_logged_in().await);
    }

    #[tokio::test]
    async fn provider_rejections_carry_a_reason() {
        let harness = Harness::new();
        let manager = harness.manager();

        let err = manager.login("bia@example.com", PASSWORD).await.unwrap_err();
        assert_eq!(err.auth_reason(), Some(AuthReason::NotFound));

        let err = manager.login(EMAIL, "errada").await.unwrap_err();
        assert_eq!(err.auth_reason(), Some(AuthReason::WrongCredentials));

        harness.auth.set_unreachable(true);
        let err = manager.login(EMAIL, PASSWORD).await.unwrap_err();
        assert_eq!(err.auth_reason(), Some(AuthReason::ProviderError));

        assert_eq!(harness.storage.get(SESSION_STORAGE_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_provider_fields_fall_back_to_the_input() {
        let manager = SessionManager::new(
            Arc::new(TerseAuthenticator),
            Arc::new(InMemoryProfileStore::new()),
            Arc::new(InMemoryKeyValueStore::new()),
        );
        let session = manager.login("caio@example.com", "x").await.unwrap();
        assert_eq!(session.email, "caio@example.com");
        assert_eq!(session.display_name, None);
    }

    #[tokio::test]
    async fn register_creates_identity_session_and_profile() {
        let harness = Harness::new();
        let manager = harness.manager();

        let session = manager.register("bia@example.com", "senha123", Some("Bia")).await.unwrap();
        assert_eq!(session.display_name.as_deref(), Some("Bia"));

        let profile = harness.profiles.get_profile(&session.user_id).await.unwrap();
        assert_eq!(profile.email, "bia@example.com");
        assert_eq!(profile.name.as_deref(), Some("Bia"));
        assert!(profile.active);

        assert_eq!(harness.manager().restore_session().await, Some(session));
    }

    #[tokio::test]
    async fn register_with_a_taken_email_is_rejected() {
        let harness = Harness::new();
        let err = harness.manager().register(EMAIL, "outra123", None).await.unwrap_err();
        assert_eq!(err.auth_reason(), Some(AuthReason::EmailInUse));
    }

    #[tokio::test]
    async fn register_validates_before_signing_up() {
        let harness = Harness::new();
        let manager = harness.manager();
        assert_eq!(
            manager.register("bia", "senha123", None).await.unwrap_err(),
            CoreError::Validation(ValidationError::InvalidEmail)
        );
        assert!(matches!(
            manager.register("bia@example.com", "123", None).await,
            Err(CoreError::Validation(ValidationError::PasswordTooShort(_)))
        ));
    }

    #[tokio::test]
    async fn profile_failure_after_sign_up_leaves_the_session_in_place() {
        let storage = InMemoryKeyValueStore::new();
        let manager = SessionManager::new(
            Arc::new(InMemoryAuthenticator::new()),
            Arc::new(BrokenProfiles),
            Arc::new(storage.clone()),
        );

        let err = manager.register("bia@example.com", "senha123", None).await.unwrap_err();
        assert!(matches!(err, CoreError::Backend(_)));

        assert!(manager.is_logged_in().await);
        assert!(storage.get(SESSION_STORAGE_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn logout_clears_local_state_even_when_the_provider_is_unreachable() {
        let harness = Harness::new();
        let manager = harness.manager();
        manager.login(EMAIL, PASSWORD).await.unwrap();

        harness.auth.set_unreachable(true);
        manager.logout().await;

        assert_eq!(manager.current().await, None);
        assert_eq!(harness.storage.get(SESSION_STORAGE_KEY).await.unwrap(), None);
        assert_eq!(harness.manager().restore_session().await, None);
    }

    #[tokio::test]
    async fn logout_invalidates_the_provider_token() {
        let harness = Harness::new();
        let manager = harness.manager();
        manager.login(EMAIL, PASSWORD).await.unwrap();
        assert_eq!(harness.auth.live_tokens(), 1);

        manager.logout().await;
        assert_eq!(harness.auth.live_tokens(), 0);
    }

    #[tokio::test]
    async fn restore_ignores_corrupt_and_incomplete_entries() {
        let harness = Harness::new();

        harness.storage.set(SESSION_STORAGE_KEY, "{not json").await.unwrap();
        assert_eq!(harness.manager().restore_session().await, None);

        let tokenless = r#"{"user_id":"u1","email":"a@b.co","session_token":""}"#;
        harness.storage.set(SESSION_STORAGE_KEY, tokenless).await.unwrap();
        assert_eq!(harness.manager().restore_session().await, None);

        harness.storage.remove(SESSION_STORAGE_KEY).await.unwrap();
        assert_eq!(harness.manager().restore_session().await, None);
    }

    #[tokio::test]
    async fn update_user_without_a_session_is_a_no_op() {
        let harness = Harness::new();
        let manager = harness.manager();
        let patch = SessionPatch {
            display_name: Some("Ana Maria".to_string()),
            email: None,
        };
        assert_eq!(manager.update_user(patch).await.unwrap(), None);
        assert_eq!(harness.storage.get(SESSION_STORAGE_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn update_user_without_a_session_skips_validation() {
        let manager = Harness::new().manager();
        let patch = SessionPatch {
            display_name: Some("   ".to_string()),
            email: None,
        };
        assert_eq!(manager.update_user(patch).await, Ok(None));
    }

    #[tokio::test]
    async fn blank_name_is_rejected_for_an_active_session() {
        let harness = Harness::new();
        let manager = harness.manager();
        manager.login(EMAIL, PASSWORD).await.unwrap();
        let patch = SessionPatch {
            display_name: Some(String::new()),
            email: None,
        };
        assert_eq!(
            manager.update_user(patch).await,
            Err(CoreError::Validation(ValidationError::Required("name")))
        );
    }

    #[tokio::test]
    async fn mirrors_reach_the_backend_in_edit_order() {
        let profiles = InMemoryProfileStore::new();
        let manager = SessionManager::new(
            Arc::new(InMemoryAuthenticator::new()),
            Arc::new(SlowFirstWrite {
                inner: profiles.clone(),
                delayed: Default::default(),
            }),
            Arc::new(InMemoryKeyValueStore::new()),
        );
        let session = manager.register("bia@example.com", "senha123", Some("Bia")).await.unwrap();

        for name in ["A", "B"] {
            manager
                .update_user(SessionPatch {
                    display_name: Some(name.to_string()),
                    email: None,
                })
                .await
                .unwrap();
        }
        manager.flush_mirrors().await;

        let local = manager.current().await.and_then(|s| s.display_name);
        let remote = profiles.get_profile(&session.user_id).await.unwrap().name;
        assert_eq!(local.as_deref(), Some("B"));
        assert_eq!(remote, local);
    }

    #[tokio::test]
    async fn flush_without_any_edit_returns_immediately() {
        let manager = Harness::new().manager();
        tokio::time::timeout(Duration::from_secs(1), manager.flush_mirrors())
            .await
            .expect("nothing to wait for");
    }

    #[tokio::test]
    async fn update_user_persists_locally_and_mirrors_remotely() {
        let harness = Harness::new();
        let manager = harness.manager();
        let session = manager.register("bia@example.com", "senha123", Some("Bia")).await.unwrap();

        let updated = manager
            .update_user(SessionPatch {
                display_name: Some("Beatriz".to_string()),
                email: None,
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.display_name.as_deref(), Some("Beatriz"));
        assert_eq!(updated.session_token, session.session_token);

        let restored = harness.manager().restore_session().await.unwrap();
        assert_eq!(restored.display_name.as_deref(), Some("Beatriz"));

        manager.flush_mirrors().await;
        let profile = harness.profiles.get_profile(&session.user_id).await.unwrap();
        assert_eq!(profile.name.as_deref(), Some("Beatriz"));
        assert_eq!(profile.email, "bia@example.com");
    }

    #[tokio::test]
    async fn mirror_failures_are_reported_on_the_side_channel() {
        let harness = Harness::new();
        let manager = harness.manager();
        // Logged in without ever registering, so there is no profile record to update.
        let session = manager.login(EMAIL, PASSWORD).await.unwrap();
        let mut failures = manager.mirror_failures();

        let updated = manager
            .update_user(SessionPatch {
                display_name: None,
                email: Some("ana.maria@example.com".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(updated.map(|s| s.email), Some("ana.maria@example.com".to_string()));

        let failure = tokio::time::timeout(Duration::from_secs(1), failures.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failure.user_id, session.user_id);
        assert!(matches!(failure.error, CoreError::NotFound(_)));
        assert_eq!(
            manager.current().await.map(|s| s.email),
            Some("ana.maria@example.com".to_string())
        );
    }

    #[tokio::test]
    async fn password_reset_is_validated_and_forwarded() {
        let harness = Harness::new();
        let manager = harness.manager();

        assert_eq!(
            manager.send_password_reset("").await.unwrap_err(),
            CoreError::Validation(ValidationError::Required("email"))
        );
        assert_eq!(
            manager.send_password_reset("ana").await.unwrap_err(),
            CoreError::Validation(ValidationError::InvalidEmail)
        );
        let err = manager.send_password_reset("bia@example.com").await.unwrap_err();
        assert_eq!(err.auth_reason(), Some(AuthReason::NotFound));

        manager.send_password_reset(EMAIL).await.unwrap();
        assert_eq!(harness.auth.password_resets(), vec![EMAIL.to_string()]);
    }

    #[tokio::test]
    async fn profile_subscription_sees_mirrored_edits() {
        let harness = Harness::new();
        let manager = harness.manager();
        assert!(manager.subscribe_profile(|_| {}).await.unwrap().is_none());

        manager.register("bia@example.com", "senha123", Some("Bia")).await.unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = manager
            .subscribe_profile(move |profile| {
                let _ = tx.send(profile.name);
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(recv(&mut rx).await, Some(Some("Bia".to_string())));

        manager
            .update_user(SessionPatch {
                display_name: Some("Beatriz".to_string()),
                email: None,
            })
            .await
            .unwrap();
        manager.flush_mirrors().await;
        assert_eq!(recv(&mut rx).await, Some(Some("Beatriz".to_string())));

        handle.release().await;
    }
}
