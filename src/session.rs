use std::sync::Arc;

use crate::claims::{self, Claims};
use crate::error::Error;
use crate::storage::SessionStorage;
use crate::types::Profile;

pub const TOKEN_KEY: &str = "token";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
pub const USER_KEY: &str = "user";

/// Every key a session occupies; cleared together.
pub const SESSION_KEYS: [&str; 3] = [TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY];

/// An authenticated session.
///
/// Created on login, replaced on refresh, destroyed on logout or when a
/// refresh fails.
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub claims: Claims,
    pub profile: Profile,
}

impl Session {
    /// Build a session, decoding the access token's claims.
    ///
    /// # Errors
    ///
    /// Returns `Error::Token` if the access token is malformed.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        profile: Profile,
    ) -> Result<Self, Error> {
        let access_token = access_token.into();
        let claims = claims::decode_claims(&access_token)?;
        Ok(Self {
            access_token,
            refresh_token,
            claims,
            profile,
        })
    }

    #[must_use]
    pub fn is_expired_at(&self, now: i64, leeway_secs: i64) -> bool {
        self.claims.is_expired_at(now, leeway_secs)
    }
}

/// Typed access to the persisted session keys.
pub(crate) struct SessionStore<S> {
    storage: Arc<S>,
}

impl<S> Clone for SessionStore<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
        }
    }
}

impl<S: SessionStorage> SessionStore<S> {
    pub(crate) fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    pub(crate) fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    async fn read(&self, key: &str) -> Result<Option<String>, Error> {
        self.storage
            .get(key)
            .await
            .map_err(|e| Error::Storage(e.to_string()))
    }

    pub(crate) async fn access_token(&self) -> Result<Option<String>, Error> {
        self.read(TOKEN_KEY).await
    }

    pub(crate) async fn refresh_token(&self) -> Result<Option<String>, Error> {
        self.read(REFRESH_TOKEN_KEY).await
    }

    pub(crate) async fn profile(&self) -> Result<Option<Profile>, Error> {
        match self.read(USER_KEY).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Persist a full session, replacing whatever was stored before.
    pub(crate) async fn save(&self, session: &Session) -> Result<(), Error> {
        let profile = serde_json::to_string(&session.profile)?;
        let mut entries = vec![
            (TOKEN_KEY, session.access_token.as_str()),
            (USER_KEY, profile.as_str()),
        ];
        // a previous session's refresh token must not outlive it
        let stale: &[&str] = match &session.refresh_token {
            Some(refresh) => {
                entries.push((REFRESH_TOKEN_KEY, refresh.as_str()));
                &[]
            }
            None => &[REFRESH_TOKEN_KEY],
        };
        self.storage
            .update(&entries, stale)
            .await
            .map_err(|e| Error::Storage(e.to_string()))
    }

    /// Persist a refreshed access token and, when rotated, the new refresh token.
    pub(crate) async fn save_tokens(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<(), Error> {
        let mut entries = vec![(TOKEN_KEY, access_token)];
        if let Some(refresh) = refresh_token {
            entries.push((REFRESH_TOKEN_KEY, refresh));
        }
        self.storage
            .set_many(&entries)
            .await
            .map_err(|e| Error::Storage(e.to_string()))
    }

    pub(crate) async fn save_profile(&self, profile: &Profile) -> Result<(), Error> {
        let raw = serde_json::to_string(profile)?;
        self.storage
            .set_many(&[(USER_KEY, raw.as_str())])
            .await
            .map_err(|e| Error::Storage(e.to_string()))
    }

    /// Remove every session key in one storage operation.
    pub(crate) async fn clear(&self) -> Result<(), Error> {
        self.storage
            .remove_many(&SESSION_KEYS)
            .await
            .map_err(|e| Error::Storage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::claims::test_token;
    use crate::storage::{MemoryStorage, StorageError};

    #[derive(Default)]
    struct CountingStorage {
        inner: MemoryStorage,
        updates: AtomicUsize,
    }

    impl SessionStorage for CountingStorage {
        async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.inner.get(key).await
        }

        async fn update(&self, set: &[(&str, &str)], remove: &[&str]) -> Result<(), StorageError> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            self.inner.update(set, remove).await
        }
    }

    fn profile() -> Profile {
        let mut p = Profile::new();
        p.insert("nickname".into(), "kim".into());
        p
    }

    #[test]
    fn session_rejects_malformed_token() {
        assert!(Session::new("not-a-jwt", None, Profile::new()).is_err());
    }

    #[tokio::test]
    async fn save_and_clear_round_trip() {
        let storage = Arc::new(MemoryStorage::new());
        let store = SessionStore::new(storage.clone());
        let session = Session::new(test_token(i64::MAX / 2), Some("r1".into()), profile()).unwrap();

        store.save(&session).await.unwrap();
        assert_eq!(store.access_token().await.unwrap(), Some(session.access_token.clone()));
        assert_eq!(store.refresh_token().await.unwrap().as_deref(), Some("r1"));
        assert_eq!(store.profile().await.unwrap(), Some(profile()));

        store.clear().await.unwrap();
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn save_tokens_keeps_refresh_token_when_not_rotated() {
        let storage = Arc::new(MemoryStorage::new());
        let store = SessionStore::new(storage);
        store.save_tokens("a1", Some("r1")).await.unwrap();
        store.save_tokens("a2", None).await.unwrap();

        assert_eq!(store.access_token().await.unwrap().as_deref(), Some("a2"));
        assert_eq!(store.refresh_token().await.unwrap().as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn save_without_refresh_token_replaces_session_in_one_update() {
        let storage = Arc::new(CountingStorage::default());
        let store = SessionStore::new(storage.clone());
        store.save_tokens("old", Some("old-refresh")).await.unwrap();
        storage.updates.store(0, Ordering::SeqCst);

        let session = Session::new(test_token(i64::MAX / 2), None, profile()).unwrap();
        store.save(&session).await.unwrap();

        assert_eq!(storage.updates.load(Ordering::SeqCst), 1);
        assert_eq!(store.access_token().await.unwrap(), Some(session.access_token.clone()));
        assert!(store.refresh_token().await.unwrap().is_none());
        assert_eq!(store.profile().await.unwrap(), Some(profile()));
    }
}
