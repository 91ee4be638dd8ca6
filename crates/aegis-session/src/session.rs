//! The session reconciler.
//!
//! [`SessionStore`] resolves the authoritative `(User, Profile)` pair across
//! three tiers, in fixed precedence order: in-memory state, the local
//! durable cache, the remote identity/profile services.  Any successful
//! remote read is written through to the faster tiers; remote failures
//! degrade to cached data so the UI keeps rendering stale-but-real records
//! instead of clearing.
//!
//! Cache failures are logged and swallowed throughout: the cache is an
//! optimization, never a dependency.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use aegis_remote::{AuthChange, AuthEvent, IdentityService, ProfileStore, RemoteError, Session};
use aegis_shared::{Profile, ProfileUpdate, Theme, User};
use aegis_store::Cache;

use crate::error::{Result, SessionError};
use crate::events::{AuthState, SessionEvent};

/// Capacity of the session-event fanout.
const EVENT_CAPACITY: usize = 32;

type SharedFetch = Shared<BoxFuture<'static, Option<Profile>>>;

/// Outcome of [`SessionStore::sign_up`].
///
/// Identity creation and profile creation are two independent remote calls;
/// a failed profile insert leaves a usable account with profile completion
/// deferred, so it is reported here rather than raised.
#[derive(Debug, Clone)]
pub struct SignUpOutcome {
    pub user: User,
    pub profile_created: bool,
}

#[derive(Default)]
struct State {
    user: Option<User>,
    profile: Option<Profile>,
    session: Option<Session>,
    auth: AuthState,
}

struct Inner {
    cache: Arc<Cache>,
    identity: Arc<dyn IdentityService>,
    profiles: Arc<dyn ProfileStore>,
    state: Mutex<State>,
    events: broadcast::Sender<SessionEvent>,
    /// One outstanding remote profile fetch per user id; concurrent callers
    /// await the same shared future instead of issuing duplicate requests.
    inflight: Mutex<HashMap<String, SharedFetch>>,
    /// Single writer for the profile record: `update_profile` and the
    /// fetch write-through both take this, so a background refresh cannot
    /// clobber an update mid-commit.
    profile_write: tokio::sync::Mutex<()>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

/// The session reconciler, owned by the application root and handed to UI
/// components by reference or clone.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

impl SessionStore {
    pub fn new(
        cache: Arc<Cache>,
        identity: Arc<dyn IdentityService>,
        profiles: Arc<dyn ProfileStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                cache,
                identity,
                profiles,
                state: Mutex::new(State::default()),
                events,
                inflight: Mutex::new(HashMap::new()),
                profile_write: tokio::sync::Mutex::new(()),
                listener: Mutex::new(None),
            }),
        }
    }

    /// Subscribe to session notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn auth_state(&self) -> AuthState {
        self.inner.state().auth
    }

    pub fn current_user(&self) -> Option<User> {
        self.inner.state().user.clone()
    }

    pub fn current_profile(&self) -> Option<Profile> {
        self.inner.state().profile.clone()
    }

    pub fn current_session(&self) -> Option<Session> {
        self.inner.state().session.clone()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// First resolution pass, called once at process start.
    ///
    /// Warms the in-memory tier from the cache so the UI has something to
    /// render without a network wait, then reconciles against the identity
    /// service.  When the service reports no session but a cached identity
    /// exists, the user is kept signed in on cached data and a best-effort
    /// session refresh runs in the background; the UI never blocks on it.
    pub async fn initialize(&self) {
        let inner = &self.inner;

        match inner.cache.user() {
            Ok(Some(user)) => inner.state().user = Some(user),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "could not read cached user"),
        }
        match inner.cache.profile() {
            Ok(Some(profile)) => {
                inner.state().profile = Some(profile.clone());
                let _ = inner.events.send(SessionEvent::ProfileChanged(profile));
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "could not read cached profile"),
        }

        match inner.identity.get_session().await {
            Ok(Some(session)) => {
                let user = session.user.clone();
                {
                    let mut state = inner.state();
                    state.user = Some(user.clone());
                    state.session = Some(session);
                }
                if let Err(e) = inner.cache.put_user(&user) {
                    warn!(error = %e, "could not cache user record");
                }
                inner.set_auth(AuthState::Authenticated);
                self.fetch_profile(&user.id).await;
            }
            Ok(None) => self.fall_back_to_cached(),
            Err(e) => {
                warn!(error = %e, "session lookup failed, falling back to cached identity");
                self.fall_back_to_cached();
            }
        }

        self.spawn_auth_listener();
    }

    /// No remote session: keep any cached identity (the cache outlives the
    /// token) and try to re-establish the session off the critical path.
    fn fall_back_to_cached(&self) {
        let inner = &self.inner;
        if inner.state().user.is_none() {
            inner.set_auth(AuthState::Anonymous);
            return;
        }

        inner.set_auth(AuthState::Authenticated);

        let weak = Arc::downgrade(inner);
        tokio::spawn(async move {
            let Some(inner) = weak.upgrade() else { return };
            match inner.identity.refresh_session().await {
                Ok(session) => {
                    debug!(user = %session.user.id, "background session refresh succeeded");
                    let user = session.user.clone();
                    let mut state = inner.state();
                    state.user = Some(user);
                    state.session = Some(session);
                }
                Err(e) => debug!(error = %e, "background session refresh failed"),
            }
        });
    }

    fn spawn_auth_listener(&self) {
        let mut slot = self.inner.listener.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return;
        }

        let mut rx = self.inner.identity.on_auth_state_change();
        let weak = Arc::downgrade(&self.inner);
        *slot = Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(change) => {
                        let Some(inner) = weak.upgrade() else { break };
                        SessionStore { inner }.apply_auth_change(change).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "auth event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    /// React to an event on the identity service's auth-change stream.
    ///
    /// Changes originated by this store's own calls arrive here too; the
    /// handlers are written to be no-ops when state already matches.
    async fn apply_auth_change(&self, change: AuthChange) {
        let inner = &self.inner;
        match change.event {
            AuthEvent::SignedIn => {
                let Some(session) = change.session else { return };
                let user = session.user.clone();

                let already_current = {
                    let mut state = inner.state();
                    let same = state.auth == AuthState::Authenticated
                        && state.user.as_ref().is_some_and(|u| u.id == user.id);
                    state.user = Some(user.clone());
                    state.session = Some(session);
                    same
                };
                if already_current {
                    return;
                }

                if let Err(e) = inner.cache.put_user(&user) {
                    warn!(error = %e, "could not cache user record");
                }
                inner.set_auth(AuthState::Authenticated);
                self.fetch_profile(&user.id).await;
            }
            AuthEvent::TokenRefreshed => {
                if let Some(session) = change.session {
                    inner.state().session = Some(session);
                }
            }
            AuthEvent::SignedOut | AuthEvent::UserDeleted => {
                if inner.state().auth == AuthState::Anonymous {
                    return;
                }
                debug!(event = ?change.event, "identity service reported sign-out");
                inner.clear_local_identity();
            }
        }
    }

    // ------------------------------------------------------------------
    // Profile reconciliation
    // ------------------------------------------------------------------

    /// Resolve the profile for `user_id` across the three tiers.
    ///
    /// The fastest tier holding a record is surfaced immediately; the
    /// remote store is then queried and, on success, overwrites the faster
    /// tiers (write-through).  On remote failure the cached value is
    /// returned instead.  Never raises: `None` means no tier had a record.
    pub async fn fetch_profile(&self, user_id: &str) -> Option<Profile> {
        let inner = &self.inner;

        // Fast path: surface the fastest tier before any network round-trip.
        let have_memory = inner
            .state()
            .profile
            .as_ref()
            .is_some_and(|p| p.id == user_id);
        if !have_memory {
            match inner.cache.profile() {
                Ok(Some(profile)) if profile.id == user_id => {
                    inner.state().profile = Some(profile.clone());
                    let _ = inner.events.send(SessionEvent::ProfileChanged(profile));
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "could not read cached profile"),
            }
        }

        // De-duplicate concurrent fetches for the same id.
        let fetch = {
            let mut inflight = inner.inflight.lock().unwrap_or_else(|e| e.into_inner());
            match inflight.get(user_id) {
                Some(fetch) => fetch.clone(),
                None => {
                    let fetch = remote_fetch(Arc::clone(inner), user_id.to_string())
                        .boxed()
                        .shared();
                    inflight.insert(user_id.to_string(), fetch.clone());
                    fetch
                }
            }
        };

        let result = fetch.clone().await;

        {
            let mut inflight = inner.inflight.lock().unwrap_or_else(|e| e.into_inner());
            if inflight.get(user_id).is_some_and(|f| f.ptr_eq(&fetch)) {
                inflight.remove(user_id);
            }
        }

        result
    }

    /// Resolve the current user id, then [`fetch_profile`](Self::fetch_profile).
    ///
    /// Safe to call repeatedly (pull-to-refresh); concurrent calls share
    /// one remote request.
    pub async fn refresh_profile(&self) -> Option<Profile> {
        let user_id = self.resolve_user_id().await?;
        self.fetch_profile(&user_id).await
    }

    /// Alias of [`refresh_profile`](Self::refresh_profile) kept for call
    /// sites that refresh after mutating related records.
    pub async fn refresh_user_data(&self) -> Option<Profile> {
        self.refresh_profile().await
    }

    /// The current user id from the first tier that knows it: in-memory
    /// state, then the identity service's session, then the cache.
    pub async fn resolve_user_id(&self) -> Option<String> {
        let inner = &self.inner;

        if let Some(user) = inner.state().user.clone() {
            return Some(user.id);
        }

        match inner.identity.get_session().await {
            Ok(Some(session)) => {
                let user = session.user.clone();
                let mut state = inner.state();
                state.user = Some(user.clone());
                state.session = Some(session);
                return Some(user.id);
            }
            Ok(None) => {}
            Err(e) => debug!(error = %e, "session lookup during id resolution failed"),
        }

        match inner.cache.user() {
            Ok(Some(user)) => Some(user.id),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "could not read cached user");
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Credentials
    // ------------------------------------------------------------------

    /// Authenticate with email and password.
    ///
    /// On success the user record is cached, in-memory state is set and the
    /// profile fetched; on failure nothing is committed anywhere.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<User> {
        let inner = &self.inner;

        let session = inner
            .identity
            .sign_in_with_password(email, password)
            .await
            .map_err(|e| SessionError::Auth(auth_message(e)))?;

        let user = session.user.clone();
        if let Err(e) = inner.cache.put_user(&user) {
            warn!(error = %e, "could not cache user record");
        }
        {
            let mut state = inner.state();
            state.user = Some(user.clone());
            state.session = Some(session);
        }
        inner.set_auth(AuthState::Authenticated);
        self.fetch_profile(&user.id).await;

        info!(user = %user.id, "signed in");
        Ok(user)
    }

    /// Create an identity, then materialize its profile row.
    ///
    /// The two calls are not transactional: a failed profile insert leaves
    /// the account usable and is reported via
    /// [`SignUpOutcome::profile_created`].  No session is established; the
    /// account may still need email confirmation.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        fields: ProfileUpdate,
    ) -> Result<SignUpOutcome> {
        let inner = &self.inner;

        let metadata = serde_json::to_value(&fields).unwrap_or(serde_json::Value::Null);
        let user = inner
            .identity
            .sign_up(email, password, metadata)
            .await
            .map_err(|e| SessionError::Auth(auth_message(e)))?;

        let mut profile = Profile::for_user(&user.id, &user.email);
        merge_updates(&mut profile, &fields);
        profile.updated_at = Utc::now();

        let profile_created = match inner.profiles.insert(&profile).await {
            Ok(_) => true,
            Err(e) => {
                warn!(user = %user.id, error = %e, "profile creation after sign-up failed");
                false
            }
        };

        info!(user = %user.id, profile_created, "account created");
        Ok(SignUpOutcome {
            user,
            profile_created,
        })
    }

    /// Sign out.  The remote call is best-effort; local state and the
    /// cached identity are cleared unconditionally so the client can never
    /// remain in a signed-in position after the user asked to leave.
    pub async fn sign_out(&self) {
        if let Err(e) = self.inner.identity.sign_out().await {
            warn!(error = %e, "remote sign-out failed, clearing local state anyway");
        }
        self.inner.clear_local_identity();
        info!("signed out");
    }

    /// Request a password-recovery email.
    pub async fn reset_password(&self, email: &str) -> Result<()> {
        self.inner
            .identity
            .reset_password_for_email(email, None)
            .await
            .map_err(|e| SessionError::Auth(auth_message(e)))
    }

    /// Change the signed-in user's password.
    pub async fn change_password(&self, new_password: &str) -> Result<()> {
        self.inner
            .identity
            .update_password(new_password)
            .await
            .map_err(|e| SessionError::Auth(auth_message(e)))
    }

    // ------------------------------------------------------------------
    // Profile mutation
    // ------------------------------------------------------------------

    /// Merge `updates` onto the current profile and push the result to the
    /// remote store.
    ///
    /// `matric_no` and `email` are protected: once set, values supplied for
    /// them are ignored by the merge.  On remote failure nothing is
    /// committed locally and the caller must not assume persistence.
    pub async fn update_profile(&self, updates: ProfileUpdate) -> Result<Profile> {
        let inner = &self.inner;

        let user_id = self
            .resolve_user_id()
            .await
            .ok_or(SessionError::NoIdentity)?;

        let _write = inner.profile_write.lock().await;

        let mut merged = inner
            .local_profile(&user_id)
            .unwrap_or_else(|| Profile::for_user(&user_id, self.known_email(&updates)));
        merge_updates(&mut merged, &updates);
        merged.updated_at = Utc::now();

        let committed = match inner.profiles.update(&user_id, &merged).await {
            Ok(profile) => profile,
            // First write for this identity: the row does not exist yet.
            Err(RemoteError::NotFound) => inner
                .profiles
                .insert(&merged)
                .await
                .map_err(|e| SessionError::ProfileUpdate(e.to_string()))?,
            Err(e) => return Err(SessionError::ProfileUpdate(e.to_string())),
        };

        if let Err(e) = inner.cache.put_profile(&committed) {
            warn!(error = %e, "could not cache updated profile");
        }
        inner.state().profile = Some(committed.clone());
        let _ = inner
            .events
            .send(SessionEvent::ProfileChanged(committed.clone()));

        info!(user = %user_id, "profile updated");
        Ok(committed)
    }

    fn known_email(&self, updates: &ProfileUpdate) -> String {
        self.inner
            .state()
            .user
            .as_ref()
            .map(|u| u.email.clone())
            .or_else(|| updates.email.clone())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Preferences
    // ------------------------------------------------------------------

    pub fn theme(&self) -> Theme {
        match self.inner.cache.theme() {
            Ok(Some(theme)) => theme,
            Ok(None) => Theme::default(),
            Err(e) => {
                warn!(error = %e, "could not read theme preference");
                Theme::default()
            }
        }
    }

    pub fn set_theme(&self, theme: Theme) -> Result<()> {
        self.inner.cache.put_theme(theme)?;
        Ok(())
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_auth(&self, next: AuthState) {
        let changed = {
            let mut state = self.state();
            if state.auth == next {
                false
            } else {
                state.auth = next;
                true
            }
        };
        if changed {
            let _ = self.events.send(SessionEvent::AuthChanged(next));
        }
    }

    fn clear_local_identity(&self) {
        {
            let mut state = self.state();
            state.user = None;
            state.profile = None;
            state.session = None;
        }
        if let Err(e) = self.cache.clear_identity() {
            warn!(error = %e, "could not clear cached identity");
        }
        self.set_auth(AuthState::Anonymous);
    }

    /// In-memory profile for `user_id`, falling back to the cache.
    fn local_profile(&self, user_id: &str) -> Option<Profile> {
        if let Some(profile) = self.state().profile.clone() {
            if profile.id == user_id {
                return Some(profile);
            }
        }
        match self.cache.profile() {
            Ok(Some(profile)) if profile.id == user_id => Some(profile),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "could not read cached profile");
                None
            }
        }
    }

    /// Whatever the local tiers currently hold for `user_id`.
    fn stale_profile(&self, user_id: &str) -> Option<Profile> {
        self.state()
            .profile
            .clone()
            .filter(|p| p.id == user_id)
    }

}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

/// Remote leg of the reconciliation, shared between concurrent callers.
async fn remote_fetch(inner: Arc<Inner>, user_id: String) -> Option<Profile> {
    match inner.profiles.fetch(&user_id).await {
        Ok(Some(fresh)) => {
            // Write-through under the profile write lock so a racing
            // update cannot be interleaved with this commit.
            let _write = inner.profile_write.lock().await;
            if let Err(e) = inner.cache.put_profile(&fresh) {
                warn!(error = %e, "could not cache fetched profile");
            }
            inner.state().profile = Some(fresh.clone());
            let _ = inner.events.send(SessionEvent::ProfileChanged(fresh.clone()));
            Some(fresh)
        }
        Ok(None) => {
            debug!(user = %user_id, "no remote profile row");
            inner.stale_profile(&user_id)
        }
        Err(e) => {
            warn!(user = %user_id, error = %e, "profile fetch failed, serving cached data");
            inner.stale_profile(&user_id)
        }
    }
}

/// Human-readable message for an auth failure, per the provider.
fn auth_message(e: RemoteError) -> String {
    match e {
        RemoteError::Api { message, .. } => message,
        other => other.to_string(),
    }
}

/// Merge a partial update onto an existing profile.
///
/// `matric_no` and `email` are only writable while still unset; all other
/// fields replace the existing value when present in `updates`.
fn merge_updates(profile: &mut Profile, updates: &ProfileUpdate) {
    if let Some(v) = &updates.full_name {
        profile.full_name = v.clone();
    }
    if profile.matric_no.is_empty() {
        if let Some(v) = &updates.matric_no {
            profile.matric_no = v.clone();
        }
    }
    if profile.email.is_empty() {
        if let Some(v) = &updates.email {
            profile.email = v.clone();
        }
    }
    if updates.phone_number.is_some() {
        profile.phone_number = updates.phone_number.clone();
    }
    if updates.course.is_some() {
        profile.course = updates.course.clone();
    }
    if updates.department.is_some() {
        profile.department = updates.department.clone();
    }
    if updates.level.is_some() {
        profile.level = updates.level.clone();
    }
    if updates.hall.is_some() {
        profile.hall = updates.hall.clone();
    }
    if updates.profile_image_url.is_some() {
        profile.profile_image_url = updates.profile_image_url.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    type RemoteResult<T> = std::result::Result<T, RemoteError>;

    // ------------------------------------------------------------------
    // Fakes
    // ------------------------------------------------------------------

    fn user() -> User {
        User {
            id: "u-1".into(),
            email: "a@b.edu.ng".into(),
        }
    }

    fn session_for(user: User) -> Session {
        Session {
            user,
            access_token: "at".into(),
            refresh_token: "rt".into(),
            expires_at: Utc::now() + ChronoDuration::hours(1),
        }
    }

    struct FakeIdentity {
        session: Mutex<Option<Session>>,
        fail_sign_out: bool,
        events: broadcast::Sender<AuthChange>,
    }

    impl FakeIdentity {
        fn new(session: Option<Session>) -> Self {
            let (events, _) = broadcast::channel(8);
            Self {
                session: Mutex::new(session),
                fail_sign_out: false,
                events,
            }
        }

        fn failing_sign_out(session: Option<Session>) -> Self {
            Self {
                fail_sign_out: true,
                ..Self::new(session)
            }
        }
    }

    #[async_trait]
    impl IdentityService for FakeIdentity {
        async fn get_session(&self) -> RemoteResult<Option<Session>> {
            Ok(self.session.lock().unwrap().clone())
        }

        async fn sign_in_with_password(
            &self,
            email: &str,
            _password: &str,
        ) -> RemoteResult<Session> {
            let session = session_for(User {
                id: "u-1".into(),
                email: email.into(),
            });
            *self.session.lock().unwrap() = Some(session.clone());
            Ok(session)
        }

        async fn sign_up(
            &self,
            email: &str,
            _password: &str,
            _metadata: serde_json::Value,
        ) -> RemoteResult<User> {
            Ok(User {
                id: "u-new".into(),
                email: email.into(),
            })
        }

        async fn sign_out(&self) -> RemoteResult<()> {
            *self.session.lock().unwrap() = None;
            if self.fail_sign_out {
                return Err(RemoteError::Api {
                    status: 500,
                    message: "logout endpoint unavailable".into(),
                });
            }
            Ok(())
        }

        async fn refresh_session(&self) -> RemoteResult<Session> {
            self.session
                .lock()
                .unwrap()
                .clone()
                .ok_or(RemoteError::NoSession)
        }

        async fn reset_password_for_email(
            &self,
            _email: &str,
            _redirect_to: Option<&str>,
        ) -> RemoteResult<()> {
            Ok(())
        }

        async fn update_password(
            &self,
            _new_password: &str,
        ) -> RemoteResult<()> {
            Ok(())
        }

        fn on_auth_state_change(&self) -> broadcast::Receiver<AuthChange> {
            self.events.subscribe()
        }
    }

    struct FakeProfiles {
        remote: Mutex<Option<Profile>>,
        fail_fetch: AtomicBool,
        fail_update: AtomicBool,
        fetch_calls: AtomicUsize,
        fetch_delay: Option<Duration>,
    }

    impl FakeProfiles {
        fn new(remote: Option<Profile>) -> Self {
            Self {
                remote: Mutex::new(remote),
                fail_fetch: AtomicBool::new(false),
                fail_update: AtomicBool::new(false),
                fetch_calls: AtomicUsize::new(0),
                fetch_delay: None,
            }
        }
    }

    #[async_trait]
    impl ProfileStore for FakeProfiles {
        async fn fetch(&self, id: &str) -> RemoteResult<Option<Profile>> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.fetch_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_fetch.load(Ordering::SeqCst) {
                return Err(RemoteError::Api {
                    status: 503,
                    message: "profiles unavailable".into(),
                });
            }
            Ok(self
                .remote
                .lock()
                .unwrap()
                .clone()
                .filter(|p| p.id == id))
        }

        async fn insert(&self, profile: &Profile) -> RemoteResult<Profile> {
            *self.remote.lock().unwrap() = Some(profile.clone());
            Ok(profile.clone())
        }

        async fn update(
            &self,
            id: &str,
            profile: &Profile,
        ) -> RemoteResult<Profile> {
            if self.fail_update.load(Ordering::SeqCst) {
                return Err(RemoteError::Api {
                    status: 500,
                    message: "update rejected".into(),
                });
            }
            let mut remote = self.remote.lock().unwrap();
            if remote.as_ref().map(|p| p.id != id).unwrap_or(true) {
                return Err(RemoteError::NotFound);
            }
            *remote = Some(profile.clone());
            Ok(profile.clone())
        }
    }

    fn store_with(
        cache: Arc<Cache>,
        identity: FakeIdentity,
        profiles: FakeProfiles,
    ) -> (SessionStore, Arc<FakeIdentity>, Arc<FakeProfiles>) {
        let identity = Arc::new(identity);
        let profiles = Arc::new(profiles);
        let store = SessionStore::new(
            cache,
            Arc::clone(&identity) as Arc<dyn IdentityService>,
            Arc::clone(&profiles) as Arc<dyn ProfileStore>,
        );
        (store, identity, profiles)
    }

    fn existing_profile() -> Profile {
        let mut p = Profile::for_user("u-1", "a@b.edu.ng");
        p.full_name = "Ada Obi".into();
        p.matric_no = "A123".into();
        p
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn fetch_serves_cached_profile_when_remote_fails() {
        let cache = Arc::new(Cache::open_in_memory().unwrap());
        cache.put_user(&user()).unwrap();
        cache.put_profile(&existing_profile()).unwrap();

        let profiles = FakeProfiles::new(None);
        profiles.fail_fetch.store(true, Ordering::SeqCst);
        let (store, _, _) = store_with(cache, FakeIdentity::new(None), profiles);

        store.initialize().await;

        let fetched = store.fetch_profile("u-1").await;
        assert_eq!(fetched.unwrap().full_name, "Ada Obi");
        assert_eq!(store.current_profile().unwrap().full_name, "Ada Obi");
    }

    #[tokio::test]
    async fn successful_remote_fetch_writes_through() {
        let cache = Arc::new(Cache::open_in_memory().unwrap());
        cache.put_user(&user()).unwrap();
        cache.put_profile(&existing_profile()).unwrap();

        let mut fresh = existing_profile();
        fresh.full_name = "Ada Obi-Nwosu".into();
        let (store, _, _) = store_with(
            Arc::clone(&cache),
            FakeIdentity::new(None),
            FakeProfiles::new(Some(fresh.clone())),
        );
        store.initialize().await;

        let fetched = store.refresh_profile().await.unwrap();
        assert_eq!(fetched.full_name, "Ada Obi-Nwosu");
        // Both faster tiers now hold the remote record.
        assert_eq!(store.current_profile().unwrap(), fetched);
        assert_eq!(cache.profile().unwrap().unwrap(), fetched);
    }

    #[tokio::test]
    async fn no_session_fallback_keeps_user_signed_in() {
        let cache = Arc::new(Cache::open_in_memory().unwrap());
        cache.put_user(&user()).unwrap();
        cache.put_profile(&existing_profile()).unwrap();

        let (store, _, _) = store_with(
            cache,
            FakeIdentity::new(None),
            FakeProfiles::new(None),
        );
        store.initialize().await;

        assert_eq!(store.auth_state(), AuthState::Authenticated);
        assert_eq!(store.current_user(), Some(user()));
    }

    #[tokio::test]
    async fn initialize_without_any_identity_is_anonymous() {
        let cache = Arc::new(Cache::open_in_memory().unwrap());
        let (store, _, _) = store_with(
            cache,
            FakeIdentity::new(None),
            FakeProfiles::new(None),
        );
        store.initialize().await;

        assert_eq!(store.auth_state(), AuthState::Anonymous);
        assert!(store.current_user().is_none());
    }

    #[tokio::test]
    async fn auth_transitions_notify_once() {
        let cache = Arc::new(Cache::open_in_memory().unwrap());
        cache.put_user(&user()).unwrap();

        let (store, _, _) = store_with(
            cache,
            FakeIdentity::new(Some(session_for(user()))),
            FakeProfiles::new(Some(existing_profile())),
        );
        let mut rx = store.subscribe();

        store.initialize().await;

        let mut auth_changes = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, SessionEvent::AuthChanged(_)) {
                auth_changes += 1;
            }
        }
        assert_eq!(auth_changes, 1);
    }

    #[tokio::test]
    async fn concurrent_refreshes_share_one_remote_call() {
        let cache = Arc::new(Cache::open_in_memory().unwrap());
        cache.put_user(&user()).unwrap();

        let mut profiles = FakeProfiles::new(Some(existing_profile()));
        profiles.fetch_delay = Some(Duration::from_millis(50));
        let (store, _, profiles) = store_with(cache, FakeIdentity::new(None), profiles);
        store.initialize().await;
        let baseline = profiles.fetch_calls.load(Ordering::SeqCst);

        let (a, b) = tokio::join!(store.fetch_profile("u-1"), store.fetch_profile("u-1"));
        assert_eq!(a, b);
        assert_eq!(profiles.fetch_calls.load(Ordering::SeqCst), baseline + 1);
    }

    // ------------------------------------------------------------------
    // Credentials
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn sign_in_populates_every_tier() {
        let cache = Arc::new(Cache::open_in_memory().unwrap());
        let (store, _, _) = store_with(
            Arc::clone(&cache),
            FakeIdentity::new(None),
            FakeProfiles::new(Some(existing_profile())),
        );

        let signed_in = store.sign_in("a@b.edu.ng", "hunter2").await.unwrap();

        assert_eq!(signed_in.id, "u-1");
        assert_eq!(store.auth_state(), AuthState::Authenticated);
        assert_eq!(cache.user().unwrap().unwrap().id, "u-1");
        assert_eq!(store.current_profile().unwrap().matric_no, "A123");
    }

    #[tokio::test]
    async fn sign_out_clears_everything_even_when_remote_fails() {
        let cache = Arc::new(Cache::open_in_memory().unwrap());
        let (store, _, _) = store_with(
            Arc::clone(&cache),
            FakeIdentity::failing_sign_out(Some(session_for(user()))),
            FakeProfiles::new(Some(existing_profile())),
        );
        store.initialize().await;
        assert_eq!(store.auth_state(), AuthState::Authenticated);

        store.sign_out().await;

        assert_eq!(store.auth_state(), AuthState::Anonymous);
        assert!(store.current_user().is_none());
        assert!(store.current_profile().is_none());
        assert!(store.current_session().is_none());
        assert!(cache.get_item("user").unwrap().is_none());
        assert!(cache.get_item("userProfile").unwrap().is_none());
    }

    #[tokio::test]
    async fn sign_up_survives_profile_insert_failure() {
        struct InsertFails;
        #[async_trait]
        impl ProfileStore for InsertFails {
            async fn fetch(
                &self,
                _id: &str,
            ) -> RemoteResult<Option<Profile>> {
                Ok(None)
            }
            async fn insert(
                &self,
                _profile: &Profile,
            ) -> RemoteResult<Profile> {
                Err(RemoteError::Api {
                    status: 500,
                    message: "insert rejected".into(),
                })
            }
            async fn update(
                &self,
                _id: &str,
                _profile: &Profile,
            ) -> RemoteResult<Profile> {
                Err(RemoteError::NotFound)
            }
        }

        let cache = Arc::new(Cache::open_in_memory().unwrap());
        let store = SessionStore::new(
            cache,
            Arc::new(FakeIdentity::new(None)) as Arc<dyn IdentityService>,
            Arc::new(InsertFails) as Arc<dyn ProfileStore>,
        );

        let outcome = store
            .sign_up("new@b.edu.ng", "hunter2", ProfileUpdate::default())
            .await
            .unwrap();

        assert_eq!(outcome.user.id, "u-new");
        assert!(!outcome.profile_created);
    }

    // ------------------------------------------------------------------
    // Updates
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn update_preserves_protected_fields() {
        let cache = Arc::new(Cache::open_in_memory().unwrap());
        cache.put_user(&user()).unwrap();
        cache.put_profile(&existing_profile()).unwrap();

        let (store, _, _) = store_with(
            Arc::clone(&cache),
            FakeIdentity::new(None),
            FakeProfiles::new(Some(existing_profile())),
        );
        store.initialize().await;

        let committed = store
            .update_profile(ProfileUpdate {
                matric_no: Some("X999".into()),
                email: Some("y@z".into()),
                full_name: Some("New Name".into()),
                hall: Some("Unity Hall".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(committed.matric_no, "A123");
        assert_eq!(committed.email, "a@b.edu.ng");
        assert_eq!(committed.full_name, "New Name");
        assert_eq!(committed.hall.as_deref(), Some("Unity Hall"));
        assert_eq!(cache.profile().unwrap().unwrap(), committed);
    }

    #[tokio::test]
    async fn failed_update_leaves_local_state_untouched() {
        let cache = Arc::new(Cache::open_in_memory().unwrap());
        cache.put_user(&user()).unwrap();
        cache.put_profile(&existing_profile()).unwrap();

        let profiles = FakeProfiles::new(Some(existing_profile()));
        profiles.fail_update.store(true, Ordering::SeqCst);
        let (store, _, _) = store_with(Arc::clone(&cache), FakeIdentity::new(None), profiles);
        store.initialize().await;
        let before = store.current_profile().unwrap();

        let err = store
            .update_profile(ProfileUpdate {
                full_name: Some("Never Committed".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::ProfileUpdate(_)));
        assert_eq!(store.current_profile().unwrap(), before);
        assert_eq!(cache.profile().unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn update_without_any_identity_is_rejected() {
        let cache = Arc::new(Cache::open_in_memory().unwrap());
        let (store, _, _) = store_with(
            cache,
            FakeIdentity::new(None),
            FakeProfiles::new(None),
        );
        store.initialize().await;

        let err = store
            .update_profile(ProfileUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NoIdentity));
    }

    // ------------------------------------------------------------------
    // Auth event stream
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn provider_reported_sign_out_clears_state() {
        let cache = Arc::new(Cache::open_in_memory().unwrap());
        let (store, identity, _) = store_with(
            Arc::clone(&cache),
            FakeIdentity::new(Some(session_for(user()))),
            FakeProfiles::new(Some(existing_profile())),
        );
        store.initialize().await;
        assert_eq!(store.auth_state(), AuthState::Authenticated);

        identity
            .events
            .send(AuthChange {
                event: AuthEvent::SignedOut,
                session: None,
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(store.auth_state(), AuthState::Anonymous);
        assert!(store.current_user().is_none());
        assert!(cache.user().unwrap().is_none());
    }

    #[tokio::test]
    async fn token_refresh_updates_session_without_transition() {
        let cache = Arc::new(Cache::open_in_memory().unwrap());
        let (store, identity, _) = store_with(
            cache,
            FakeIdentity::new(Some(session_for(user()))),
            FakeProfiles::new(Some(existing_profile())),
        );
        store.initialize().await;
        let mut rx = store.subscribe();

        let mut refreshed = session_for(user());
        refreshed.access_token = "at-2".into();
        identity
            .events
            .send(AuthChange {
                event: AuthEvent::TokenRefreshed,
                session: Some(refreshed),
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(store.current_session().unwrap().access_token, "at-2");
        assert_eq!(store.auth_state(), AuthState::Authenticated);
        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event, SessionEvent::AuthChanged(_)));
        }
    }

    // ------------------------------------------------------------------
    // Preferences
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn theme_round_trip_with_dark_default() {
        let cache = Arc::new(Cache::open_in_memory().unwrap());
        let (store, _, _) = store_with(
            cache,
            FakeIdentity::new(None),
            FakeProfiles::new(None),
        );

        assert_eq!(store.theme(), Theme::Dark);
        store.set_theme(Theme::Light).unwrap();
        assert_eq!(store.theme(), Theme::Light);
    }
}
