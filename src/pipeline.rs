//! Bearer attachment, token refresh and 401 recovery for every backend call.
//!
//! ```text
//! before_send: no token ─────────────────────────────▶ send as-is
//!              valid token ──────────────────────────▶ attach ─▶ send
//!              expired token ─▶ refresh ─┬─ ok ──────▶ attach ─▶ send
//!                                        └─ failed ──▶ abort, log out
//! on_error:    401, not retried ─▶ refresh ─▶ resend once
//!              401, retried ─────────────────────────▶ fail, log out
//! ```

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::{AuthClient, ensure_success};
use crate::claims;
use crate::config::ClientConfig;
use crate::error::Error;
use crate::listener::{LogoutReason, SessionListener};
use crate::request::OutgoingRequest;
use crate::session::{Session, SessionStore};
use crate::storage::SessionStorage;
use crate::types::{Profile, UserId};

/// Authenticated client for the TripMate backend.
///
/// Cheap to clone; clones share the session, the HTTP connection pool and
/// the refresh lock.
pub struct AuthenticatedRequestPipeline<S> {
    inner: Arc<Inner<S>>,
}

struct Inner<S> {
    auth: AuthClient,
    store: SessionStore<S>,
    listener: Arc<dyn SessionListener>,
    // Held for the whole refresh round-trip so concurrent callers share one.
    refresh_lock: Mutex<()>,
}

// Manual Clone: avoid derive adding an `S: Clone` bound.
impl<S> Clone for AuthenticatedRequestPipeline<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: SessionStorage> AuthenticatedRequestPipeline<S> {
    /// Create a pipeline persisting its session in `storage`.
    ///
    /// `listener` is told whenever the session ends.
    pub fn new(config: ClientConfig, storage: S, listener: impl SessionListener) -> Self {
        Self::from_auth_client(AuthClient::new(config), Arc::new(storage), listener)
    }

    /// Create a pipeline around an existing auth client and shared storage.
    pub fn from_auth_client(
        auth: AuthClient,
        storage: Arc<S>,
        listener: impl SessionListener,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                auth,
                store: SessionStore::new(storage),
                listener: Arc::new(listener),
                refresh_lock: Mutex::new(()),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        self.inner.auth.config()
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<S> {
        self.inner.store.storage()
    }

    // ── Interceptors ───────────────────────────────────────────────

    /// Attach credentials to `request`, refreshing an expired token first.
    ///
    /// A missing token leaves the request untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RefreshFailed`] if the token was expired and could not
    /// be refreshed; the request must not be sent.
    pub async fn before_send(&self, request: &mut OutgoingRequest) -> Result<(), Error> {
        let Some(token) = self.inner.store.access_token().await? else {
            debug!(path = %request.path, "No access token; sending unauthenticated");
            return Ok(());
        };

        let token = if self.is_expired(&token) {
            debug!(path = %request.path, "Access token expired; refreshing before send");
            self.refresh_from(Some(&token)).await?
        } else {
            token
        };

        request.set_bearer(&token)
    }

    /// Pass successful responses through; turn anything else into [`Error::Status`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Status`] for non-2xx responses.
    pub async fn on_response(&self, response: reqwest::Response) -> Result<reqwest::Response, Error> {
        ensure_success(response, "request").await
    }

    /// Recover from a `401` by refreshing and re-issuing `request` once.
    ///
    /// Errors other than `401` are returned unchanged. A `401` on a request
    /// that was already retried, or on its retry, ends the session.
    ///
    /// # Errors
    ///
    /// Returns the original error when no recovery applies,
    /// [`Error::RefreshFailed`] if the refresh fails, or the retry's error.
    pub async fn on_error(
        &self,
        request: &mut OutgoingRequest,
        error: Error,
    ) -> Result<reqwest::Response, Error> {
        if !error.is_unauthorized() {
            return Err(error);
        }

        if request.is_retried() {
            warn!(method = %request.method, path = %request.path, "Request rejected after retry; ending session");
            self.invalidate(LogoutReason::Unauthorized).await;
            return Err(error);
        }

        request.mark_retried();
        let used = request.bearer().map(str::to_owned);
        debug!(method = %request.method, path = %request.path, "401 received; refreshing and retrying once");

        let token = self.refresh_from(used.as_deref()).await?;
        request.set_bearer(&token)?;

        match self.dispatch(request).await {
            Ok(response) => Ok(response),
            Err(e) if e.is_unauthorized() => {
                warn!(method = %request.method, path = %request.path, "Retry rejected; ending session");
                self.invalidate(LogoutReason::Unauthorized).await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Run `request` through the full pipeline.
    ///
    /// # Errors
    ///
    /// See [`before_send`](Self::before_send) and [`on_error`](Self::on_error).
    pub async fn execute(&self, mut request: OutgoingRequest) -> Result<reqwest::Response, Error> {
        self.before_send(&mut request).await?;
        match self.dispatch(&request).await {
            Ok(response) => Ok(response),
            Err(error) => self.on_error(&mut request, error).await,
        }
    }

    async fn dispatch(&self, request: &OutgoingRequest) -> Result<reqwest::Response, Error> {
        let url = self.config().endpoint(&request.path)?;
        let mut builder = self
            .inner
            .auth
            .http()
            .request(request.method.clone(), url)
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let response = builder.send().await?;
        self.on_response(response).await
    }

    // ── JSON helpers ───────────────────────────────────────────────

    /// `GET path` and decode the JSON body.
    ///
    /// # Errors
    ///
    /// Any pipeline error, or [`Error::Http`] if the body does not decode.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let response = self.execute(OutgoingRequest::get(path)).await?;
        response.json::<T>().await.map_err(Into::into)
    }

    /// `POST path` with a JSON body and decode the JSON response.
    ///
    /// # Errors
    ///
    /// Any pipeline error, or a serialization error for `body`.
    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, Error> {
        let request = OutgoingRequest::post(path).with_json(serde_json::to_value(body)?);
        let response = self.execute(request).await?;
        response.json::<T>().await.map_err(Into::into)
    }

    /// `PUT path` with a JSON body and decode the JSON response.
    ///
    /// # Errors
    ///
    /// Any pipeline error, or a serialization error for `body`.
    pub async fn put_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, Error> {
        let request = OutgoingRequest::put(path).with_json(serde_json::to_value(body)?);
        let response = self.execute(request).await?;
        response.json::<T>().await.map_err(Into::into)
    }

    /// `DELETE path`, discarding the body.
    ///
    /// # Errors
    ///
    /// Any pipeline error.
    pub async fn delete(&self, path: &str) -> Result<(), Error> {
        self.execute(OutgoingRequest::delete(path)).await?;
        Ok(())
    }

    // ── Refresh ────────────────────────────────────────────────────

    /// Trade the stored refresh token for a new access token.
    ///
    /// On success the new access token (and rotated refresh token, if any)
    /// is persisted and returned. On any failure the session is cleared and
    /// the listener notified before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RefreshFailed`] wrapping the cause.
    pub async fn refresh(&self) -> Result<String, Error> {
        self.refresh_from(None).await
    }

    /// Single-flight refresh.
    ///
    /// `stale` is the token the caller found unusable. If another caller
    /// already replaced it while this one waited for the lock, the newer
    /// token is reused; if the session was cleared meanwhile, this fails
    /// without clearing or notifying again.
    async fn refresh_from(&self, stale: Option<&str>) -> Result<String, Error> {
        let guard = self.inner.refresh_lock.lock().await;

        if let Some(stale) = stale {
            let current = self
                .inner
                .store
                .access_token()
                .await
                .map_err(Error::refresh_failed)?;
            match current {
                None => return Err(Error::refresh_failed(Error::SessionInvalidated)),
                Some(current) if current != stale && !self.is_expired(&current) => {
                    debug!("Access token already refreshed by a concurrent request");
                    return Ok(current);
                }
                Some(_) => {}
            }
        }

        match self.request_new_token().await {
            Ok(token) => {
                info!("Access token refreshed");
                Ok(token)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed; ending session");
                self.clear_session().await;
                drop(guard);
                self.inner.listener.on_logout(LogoutReason::RefreshFailed);
                Err(Error::refresh_failed(e))
            }
        }
    }

    async fn request_new_token(&self) -> Result<String, Error> {
        let refresh_token = self
            .inner
            .store
            .refresh_token()
            .await?
            .ok_or(Error::MissingRefreshToken)?;
        let response = self.inner.auth.refresh(&refresh_token).await?;
        self.inner
            .store
            .save_tokens(&response.access_token, response.refresh_token.as_deref())
            .await?;
        Ok(response.access_token)
    }

    // ── Session lifecycle ──────────────────────────────────────────

    /// Sign in with TripMate credentials and persist the session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Status`] if the backend rejects the credentials, or
    /// [`Error::Token`] if it returns a malformed token (nothing is persisted).
    pub async fn login(&self, user_id: &UserId, password: &str) -> Result<Session, Error> {
        let response = self.inner.auth.login(user_id, password).await?;
        let session = self
            .establish(response.token, response.user, response.refresh_token)
            .await?;
        info!(user_id = %user_id, "Signed in");
        Ok(session)
    }

    /// Persist a session obtained outside [`login`](Self::login).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Token`] if `access_token` is malformed; nothing is
    /// persisted in that case.
    pub async fn establish(
        &self,
        access_token: String,
        profile: Profile,
        refresh_token: Option<String>,
    ) -> Result<Session, Error> {
        let session = Session::new(access_token, refresh_token, profile)?;
        let _guard = self.inner.refresh_lock.lock().await;
        self.inner.store.save(&session).await?;
        Ok(session)
    }

    /// Restore the persisted session at startup.
    ///
    /// An expired token is refreshed when possible; if that fails the
    /// session is cleared and `None` returned. A token or profile that cannot
    /// be decoded ends the session without contacting the backend. A token
    /// stored without a profile has the profile fetched from the backend.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the storage backend fails; the session is
    /// left in place in that case.
    pub async fn restore(&self) -> Result<Option<Session>, Error> {
        let Some(token) = self.inner.store.access_token().await? else {
            return Ok(None);
        };

        let decoded = match claims::decode_claims(&token) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(error = %e, "Stored access token unreadable; ending session");
                self.invalidate(LogoutReason::InvalidSession).await;
                return Ok(None);
            }
        };

        let profile = match self.inner.store.profile().await {
            Ok(Some(profile)) => profile,
            Ok(None) => return self.restore_profile().await,
            Err(e @ Error::Json(_)) => {
                warn!(error = %e, "Stored profile unreadable; ending session");
                self.invalidate(LogoutReason::InvalidSession).await;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let token = if decoded.is_expired_at(claims::now_unix(), self.leeway_secs()) {
            debug!("Stored access token expired; refreshing");
            match self.refresh_from(Some(&token)).await {
                Ok(token) => token,
                Err(e) if e.is_refresh_failure() => return Ok(None),
                Err(e) => return Err(e),
            }
        } else {
            token
        };

        let refresh_token = self.inner.store.refresh_token().await?;
        match Session::new(token, refresh_token, profile) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                warn!(error = %e, "Refreshed token unreadable; ending session");
                self.invalidate(LogoutReason::InvalidSession).await;
                Ok(None)
            }
        }
    }

    async fn restore_profile(&self) -> Result<Option<Session>, Error> {
        let path = self.config().profile_path().to_owned();
        let profile: Profile = match self.get_json(&path).await {
            Ok(profile) => profile,
            Err(e) if e.is_refresh_failure() => return Ok(None),
            Err(e) => {
                warn!(error = %e, "Could not load profile; ending session");
                self.invalidate(LogoutReason::InvalidSession).await;
                return Ok(None);
            }
        };
        self.inner.store.save_profile(&profile).await?;
        self.current_session().await
    }

    /// The persisted session, if any, without contacting the backend.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on storage failure or [`Error::Token`] if the
    /// stored token is malformed.
    pub async fn current_session(&self) -> Result<Option<Session>, Error> {
        let Some(token) = self.inner.store.access_token().await? else {
            return Ok(None);
        };
        let refresh_token = self.inner.store.refresh_token().await?;
        let profile = self.inner.store.profile().await?.unwrap_or_default();
        Session::new(token, refresh_token, profile).map(Some)
    }

    /// Clear the session and notify the listener.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the keys could not be removed; the
    /// listener is not notified in that case.
    pub async fn logout(&self) -> Result<(), Error> {
        let guard = self.inner.refresh_lock.lock().await;
        self.inner.store.clear().await?;
        drop(guard);
        info!("Signed out");
        self.inner.listener.on_logout(LogoutReason::UserRequested);
        Ok(())
    }

    /// True when there is no token, it is malformed, or it is past expiry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on storage failure.
    pub async fn is_token_expired(&self) -> Result<bool, Error> {
        Ok(match self.inner.store.access_token().await? {
            Some(token) => self.is_expired(&token),
            None => true,
        })
    }

    /// Whole minutes until the stored token expires; `0` without a usable token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on storage failure.
    pub async fn token_expiry_minutes(&self) -> Result<u64, Error> {
        let Some(token) = self.inner.store.access_token().await? else {
            return Ok(0);
        };
        Ok(claims::decode_claims(&token)
            .map(|c| c.minutes_until_expiry(claims::now_unix()))
            .unwrap_or(0))
    }

    // ── Internals ──────────────────────────────────────────────────

    fn leeway_secs(&self) -> i64 {
        i64::try_from(self.config().expiry_leeway().as_secs()).unwrap_or(i64::MAX)
    }

    fn is_expired(&self, token: &str) -> bool {
        claims::is_expired(token, claims::now_unix(), self.leeway_secs())
    }

    /// End the session unless it already ended.
    async fn invalidate(&self, reason: LogoutReason) {
        let guard = self.inner.refresh_lock.lock().await;
        if let Ok(None) = self.inner.store.access_token().await {
            debug!(?reason, "Session already cleared");
            return;
        }
        self.clear_session().await;
        drop(guard);
        self.inner.listener.on_logout(reason);
    }

    /// Caller must hold the refresh lock. The listener is notified by the
    /// caller once the lock is released.
    async fn clear_session(&self) {
        if let Err(e) = self.inner.store.clear().await {
            warn!(error = %e, "Failed to clear session storage");
        }
    }
}
