//! Login sessions.
//!
//! A session lives in two places at once: the signed `currentUser` cookie,
//! which the route guard reads on every request, and a durable
//! `session.<token>` record, which lets a client whose cookie was cleared
//! resume with the `X-Session-Token` header. Either copy may fail to be
//! written without failing the login. Expired sessions count as absent.
//!
//! The header only reaches handlers that ask the session store directly
//! (`/auth/session`, `/auth/logout` and the GraphQL context). The `/admin`
//! route guard reads the cookie alone, so a header-only client is sent to
//! the login page there.
//!
//! Durable records are listed in a `sessions` index of token to expiry, so
//! that records whose cookie simply expired can be pruned without a scan.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::http::HeaderMap;
use axum_extra::extract::cookie::{Cookie, SameSite, SignedCookieJar};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::permissions::{Grantee, Permission};
use crate::models::user::{User, UserStatus};
use crate::store::{StorageError, Store};
use crate::util::current_time;

pub const SESSION_COOKIE: &str = "currentUser";
pub const SESSION_HEADER: &str = "x-session-token";

/// The user as remembered by a session: the account minus its password hash.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub permissions: Vec<Permission>,
    pub position: Option<String>,
    pub status: UserStatus,
    pub profile_image: Option<String>,
}

impl From<&User> for SessionUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role.clone(),
            permissions: user.permissions.clone(),
            position: user.position.clone(),
            status: user.status,
            profile_image: user.profile_image.clone(),
        }
    }
}

impl Grantee for SessionUser {
    fn role(&self) -> &str {
        &self.role
    }

    fn granted_permissions(&self) -> &[Permission] {
        &self.permissions
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: Uuid,
    pub user: SessionUser,
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl Session {
    pub fn is_live_at(&self, now: OffsetDateTime) -> bool {
        now < self.expires_at
    }

    fn storage_key(token: &Uuid) -> String {
        format!("session.{}", token)
    }

    fn encode(&self) -> Option<String> {
        match serde_json::to_vec(self) {
            Ok(json) => Some(URL_SAFE_NO_PAD.encode(json)),
            Err(err) => {
                warn!("failed to serialize session: {}", err);
                None
            }
        }
    }

    fn decode(value: &str) -> Option<Self> {
        let json = URL_SAFE_NO_PAD.decode(value).ok()?;
        serde_json::from_slice(&json).ok()
    }

    /// Reads the session from a signed cookie jar alone.
    ///
    /// Missing, tampered, corrupt and expired cookies all yield `None`.
    pub fn from_cookie(jar: &SignedCookieJar, now: OffsetDateTime) -> Option<Self> {
        let cookie = jar.get(SESSION_COOKIE)?;
        let session = Self::decode(cookie.value());
        if session.is_none() {
            debug!("ignoring unreadable session cookie");
        }

        session.filter(|session| session.is_live_at(now))
    }
}

/// Token to expiry (unix seconds) for every durable session record.
type SessionIndex = BTreeMap<Uuid, i64>;

#[derive(Clone)]
pub struct SessionStore {
    store: Store,
    ttl: Duration,
    secure_cookies: bool,
    index: Arc<Mutex<()>>,
}

impl SessionStore {
    pub fn new(store: Store, ttl: Duration, secure_cookies: bool) -> Self {
        Self {
            store,
            ttl,
            secure_cookies,
            index: Arc::new(Mutex::new(())),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn cookie(&self, value: String) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, value))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure_cookies)
            .max_age(self.ttl)
            .build()
    }

    /// Starts a new session for the user, writing both copies.
    pub async fn start(&self, user: &User, jar: SignedCookieJar) -> (SignedCookieJar, Session) {
        let issued_at = current_time();
        let session = Session {
            token: Uuid::new_v4(),
            user: SessionUser::from(user),
            issued_at,
            expires_at: issued_at + self.ttl,
        };

        let jar = match session.encode() {
            Some(value) => jar.add(self.cookie(value)),
            None => jar,
        };
        self.persist(&session).await;

        (jar, session)
    }

    async fn persist(&self, session: &Session) {
        let raw = match serde_json::to_string(session) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("failed to serialize session: {}", err);
                return;
            }
        };

        if let Err(err) = self
            .store
            .kv()
            .set(&Session::storage_key(&session.token), &raw)
            .await
        {
            warn!("failed to store session durably: {}", err);
            return;
        }

        let token = session.token;
        let expires_at = session.expires_at.unix_timestamp();
        let now = session.issued_at;
        if let Err(err) = self
            .edit_index(now, |index| {
                index.insert(token, expires_at);
            })
            .await
        {
            warn!("failed to index stored session: {}", err);
        }
    }

    /// Applies `change` to the session index, then drops every entry that
    /// has expired by `now` along with its record.
    ///
    /// Returns the number of records pruned.
    async fn edit_index<F>(&self, now: OffsetDateTime, change: F) -> Result<usize, StorageError>
    where
        F: FnOnce(&mut SessionIndex),
    {
        let _guard = self.index.lock().await;

        let mut index: SessionIndex = match self.store.kv().get(Store::SESSIONS).await? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                warn!("corrupt session index, starting over: {}", err);
                SessionIndex::new()
            }),
            None => SessionIndex::new(),
        };
        change(&mut index);

        let now = now.unix_timestamp();
        let expired = index
            .iter()
            .filter(|(_, expires_at)| **expires_at <= now)
            .map(|(token, _)| *token)
            .collect::<Vec<_>>();
        for token in &expired {
            index.remove(token);
        }

        self.store
            .kv()
            .set(Store::SESSIONS, &serde_json::to_string(&index)?)
            .await?;
        for token in &expired {
            if let Err(err) = self.store.kv().remove(&Session::storage_key(token)).await {
                warn!("failed to remove expired session: {}", err);
            }
        }

        Ok(expired.len())
    }

    /// Removes every durable session that expired by `now`.
    pub async fn prune_expired(&self, now: OffsetDateTime) -> Result<usize, StorageError> {
        let pruned = self.edit_index(now, |_| {}).await?;
        if pruned > 0 {
            info!(pruned, "pruned expired sessions");
        }

        Ok(pruned)
    }

    /// Looks up a durable session by token, dropping it if it has expired.
    pub async fn with_token(&self, token: &Uuid, now: OffsetDateTime) -> Option<Session> {
        let key = Session::storage_key(token);
        let raw = match self.store.kv().get(&key).await {
            Ok(raw) => raw?,
            Err(err) => {
                warn!("failed to read stored session: {}", err);
                return None;
            }
        };

        let session: Session = match serde_json::from_str(&raw) {
            Ok(session) => session,
            Err(err) => {
                warn!("corrupt stored session, ignoring: {}", err);
                return None;
            }
        };

        if session.is_live_at(now) {
            Some(session)
        } else {
            self.forget(token).await;
            None
        }
    }

    async fn forget(&self, token: &Uuid) {
        if let Err(err) = self.store.kv().remove(&Session::storage_key(token)).await {
            warn!("failed to remove stored session: {}", err);
        }

        let token = *token;
        if let Err(err) = self
            .edit_index(current_time(), |index| {
                index.remove(&token);
            })
            .await
        {
            warn!("failed to update session index: {}", err);
        }
    }

    fn header_token(headers: &HeaderMap) -> Option<Uuid> {
        headers
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Uuid::parse_str(value.trim()).ok())
    }

    /// The current session, preferring the cookie and falling back to the
    /// durable copy named by the session token header.
    pub async fn current(&self, jar: &SignedCookieJar, headers: &HeaderMap) -> Option<Session> {
        let now = current_time();
        if let Some(session) = Session::from_cookie(jar, now) {
            return Some(session);
        }

        let token = Self::header_token(headers)?;
        self.with_token(&token, now).await
    }

    pub async fn current_user(
        &self,
        jar: &SignedCookieJar,
        headers: &HeaderMap,
    ) -> Option<SessionUser> {
        self.current(jar, headers).await.map(|session| session.user)
    }

    pub async fn is_authenticated(&self, jar: &SignedCookieJar, headers: &HeaderMap) -> bool {
        self.current_user(jar, headers).await.is_some()
    }

    /// Clears both copies of the session.
    pub async fn end(&self, jar: SignedCookieJar, headers: &HeaderMap) -> SignedCookieJar {
        let cookie_token = jar
            .get(SESSION_COOKIE)
            .and_then(|cookie| Session::decode(cookie.value()))
            .map(|session| session.token);

        for token in cookie_token.into_iter().chain(Self::header_token(headers)) {
            self.forget(&token).await;
        }

        jar.remove(Cookie::build(SESSION_COOKIE).path("/"))
    }
}
