//! HTTP implementation of the backend capabilities.
//!
//! Speaks the hosted platform's REST API: token-based auth endpoints under
//! `/auth/v1/` and the relational `profiles` table under `/rest/v1/`.
//! The current session is held in memory and handed out via
//! [`IdentityService::get_session`]; auth lifecycle changes are fanned out
//! on a broadcast channel so the session layer can observe them.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use aegis_shared::{Profile, User};

use crate::config::RemoteConfig;
use crate::error::{RemoteError, Result};
use crate::identity::IdentityService;
use crate::profiles::ProfileStore;
use crate::types::{AuthChange, AuthEvent, Session};

/// Capacity of the auth-change fanout.  Slow subscribers lag rather than
/// block the auth path.
const AUTH_EVENT_CAPACITY: usize = 16;

// ---------------------------------------------------------------------------
// Wire payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct UserPayload {
    id: String,
    #[serde(default)]
    email: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    user: UserPayload,
}

/// Sign-up responses carry either the bare user record (confirmation
/// pending) or a nested `user` object alongside tokens.
#[derive(Debug, Deserialize)]
struct SignUpResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user: Option<UserPayload>,
}

/// Provider error bodies are not uniform across endpoints.
#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl ApiErrorBody {
    fn into_message(self) -> Option<String> {
        self.error_description
            .or(self.msg)
            .or(self.message)
            .or(self.error)
    }
}

// ---------------------------------------------------------------------------
// Backend client
// ---------------------------------------------------------------------------

/// `reqwest`-backed implementation of [`IdentityService`] and
/// [`ProfileStore`].
pub struct RestBackend {
    http: reqwest::Client,
    config: RemoteConfig,
    session: Mutex<Option<Session>>,
    auth_events: broadcast::Sender<AuthChange>,
}

impl RestBackend {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        let (auth_events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);

        Ok(Self {
            http,
            config,
            session: Mutex::new(None),
            auth_events,
        })
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn held_session(&self) -> Option<Session> {
        self.lock_session().clone()
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Bearer token for data requests: the user's access token when signed
    /// in, the anonymous key otherwise.
    fn bearer(&self) -> String {
        self.held_session()
            .map(|s| s.access_token)
            .unwrap_or_else(|| self.config.anon_key.clone())
    }

    fn store_session(&self, session: Session, event: AuthEvent) {
        *self.lock_session() = Some(session.clone());
        let _ = self.auth_events.send(AuthChange {
            event,
            session: Some(session),
        });
    }

    fn drop_session(&self, event: AuthEvent) {
        *self.lock_session() = None;
        let _ = self.auth_events.send(AuthChange {
            event,
            session: None,
        });
    }

    fn session_from_tokens(&self, tokens: TokenResponse) -> Session {
        Session {
            user: User {
                id: tokens.user.id,
                email: tokens.user.email,
            },
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at: Utc::now() + Duration::seconds(tokens.expires_in),
        }
    }

    /// Convert a non-success response into [`RemoteError::Api`], pulling a
    /// human-readable message out of the body when one is present.
    async fn api_error(resp: reqwest::Response) -> RemoteError {
        let status = resp.status().as_u16();
        let message = match resp.json::<ApiErrorBody>().await {
            Ok(body) => body
                .into_message()
                .unwrap_or_else(|| "request failed".to_string()),
            Err(_) => "request failed".to_string(),
        };
        RemoteError::Api { status, message }
    }

    async fn exchange_tokens(&self, grant_type: &str, body: serde_json::Value) -> Result<Session> {
        let url = format!("{}?grant_type={grant_type}", self.auth_url("token"));
        let resp = self
            .http
            .post(&url)
            .header("apikey", &self.config.anon_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::api_error(resp).await);
        }

        let tokens: TokenResponse = resp.json().await?;
        Ok(self.session_from_tokens(tokens))
    }
}

// ---------------------------------------------------------------------------
// IdentityService
// ---------------------------------------------------------------------------

#[async_trait]
impl IdentityService for RestBackend {
    async fn get_session(&self) -> Result<Option<Session>> {
        let held = match self.held_session() {
            Some(s) => s,
            None => return Ok(None),
        };

        if !held.is_expired() {
            return Ok(Some(held));
        }

        debug!("held session is stale, attempting refresh");
        match self.refresh_session().await {
            Ok(fresh) => Ok(Some(fresh)),
            Err(e) => {
                warn!(error = %e, "session refresh failed, treating as signed out");
                *self.lock_session() = None;
                Ok(None)
            }
        }
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        let session = self
            .exchange_tokens(
                "password",
                serde_json::json!({ "email": email, "password": password }),
            )
            .await?;

        info!(user = %session.user.id, "signed in");
        self.store_session(session.clone(), AuthEvent::SignedIn);
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: serde_json::Value,
    ) -> Result<User> {
        let resp = self
            .http
            .post(self.auth_url("signup"))
            .header("apikey", &self.config.anon_key)
            .json(&serde_json::json!({
                "email": email,
                "password": password,
                "data": metadata,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::api_error(resp).await);
        }

        let body: SignUpResponse = resp.json().await?;
        let user = match (body.user, body.id) {
            (Some(u), _) => User {
                id: u.id,
                email: if u.email.is_empty() {
                    email.to_string()
                } else {
                    u.email
                },
            },
            (None, Some(id)) => User {
                id,
                email: body.email.unwrap_or_else(|| email.to_string()),
            },
            (None, None) => {
                return Err(RemoteError::Api {
                    status: 200,
                    message: "sign-up response carried no user record".to_string(),
                })
            }
        };

        info!(user = %user.id, "identity created");
        Ok(user)
    }

    async fn sign_out(&self) -> Result<()> {
        let held = self.held_session();

        // Local state is dropped regardless of the remote outcome; the
        // reconciler must never observe a half-signed-out client.
        self.drop_session(AuthEvent::SignedOut);

        let Some(session) = held else {
            return Ok(());
        };

        let resp = self
            .http
            .post(self.auth_url("logout"))
            .header("apikey", &self.config.anon_key)
            .bearer_auth(&session.access_token)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::api_error(resp).await);
        }
        Ok(())
    }

    async fn refresh_session(&self) -> Result<Session> {
        let refresh_token = self
            .held_session()
            .map(|s| s.refresh_token)
            .ok_or(RemoteError::NoSession)?;

        let session = self
            .exchange_tokens(
                "refresh_token",
                serde_json::json!({ "refresh_token": refresh_token }),
            )
            .await?;

        debug!(user = %session.user.id, "session refreshed");
        self.store_session(session.clone(), AuthEvent::TokenRefreshed);
        Ok(session)
    }

    async fn reset_password_for_email(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> Result<()> {
        let mut req = self
            .http
            .post(self.auth_url("recover"))
            .header("apikey", &self.config.anon_key)
            .json(&serde_json::json!({ "email": email }));

        if let Some(redirect) = redirect_to {
            req = req.query(&[("redirect_to", redirect)]);
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(Self::api_error(resp).await);
        }

        info!("password recovery email requested");
        Ok(())
    }

    async fn update_password(&self, new_password: &str) -> Result<()> {
        let session = self.held_session().ok_or(RemoteError::NoSession)?;

        let resp = self
            .http
            .put(self.auth_url("user"))
            .header("apikey", &self.config.anon_key)
            .bearer_auth(&session.access_token)
            .json(&serde_json::json!({ "password": new_password }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::api_error(resp).await);
        }

        info!("password updated");
        Ok(())
    }

    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthChange> {
        self.auth_events.subscribe()
    }
}

// ---------------------------------------------------------------------------
// ProfileStore
// ---------------------------------------------------------------------------

#[async_trait]
impl ProfileStore for RestBackend {
    async fn fetch(&self, id: &str) -> Result<Option<Profile>> {
        let resp = self
            .http
            .get(self.rest_url("profiles"))
            .header("apikey", &self.config.anon_key)
            .bearer_auth(self.bearer())
            .query(&[("id", format!("eq.{id}")), ("select", "*".to_string())])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::api_error(resp).await);
        }

        let mut rows: Vec<Profile> = resp.json().await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }

    async fn insert(&self, profile: &Profile) -> Result<Profile> {
        let resp = self
            .http
            .post(self.rest_url("profiles"))
            .header("apikey", &self.config.anon_key)
            .header("Prefer", "return=representation")
            .bearer_auth(self.bearer())
            .json(profile)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::api_error(resp).await);
        }

        let mut rows: Vec<Profile> = resp.json().await?;
        if rows.is_empty() {
            // The backend accepted the row but returned no representation.
            return Ok(profile.clone());
        }
        Ok(rows.swap_remove(0))
    }

    async fn update(&self, id: &str, profile: &Profile) -> Result<Profile> {
        let resp = self
            .http
            .patch(self.rest_url("profiles"))
            .header("apikey", &self.config.anon_key)
            .header("Prefer", "return=representation")
            .bearer_auth(self.bearer())
            .query(&[("id", format!("eq.{id}"))])
            .json(profile)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::api_error(resp).await);
        }

        let mut rows: Vec<Profile> = resp.json().await?;
        if rows.is_empty() {
            return Err(RemoteError::NotFound);
        }
        Ok(rows.swap_remove(0))
    }
}
