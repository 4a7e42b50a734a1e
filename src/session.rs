use crate::manager::Shared;
use crate::value::{FromValue, SessionType, Value};
use crate::{transport, Error, Result};
use chrono::{DateTime, Utc};
use futures::lock::Mutex as AsyncMutex;
use http::HeaderMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The key under which [`Session::remember_me`] stores its choice.
pub const REMEMBER_ME_KEY: &str = "__remember_me";

/// A session with a client, bound to one request.
///
/// Sessions are created by [`SessionManager::load`](crate::SessionManager::load).
/// The handle is cheap to clone, and all clones refer to the same session,
/// so it can be shared with tasks spawned by the request handler.
/// Every operation takes an internal lock, so operations on one session are applied in the order they are called.
/// Operations that reach the store ([`Session::commit`], [`Session::destroy`], [`Session::renew_token`]
/// and [`Session::renew`]) additionally hold a per-session async lock until the store answered,
/// so they never interleave with each other.
///
/// Reading and writing values only changes the in-memory state.
/// The store is written by [`Session::commit`] (or by the [`LoadAndSave`](crate::LoadAndSave) middleware),
/// and only if the session was modified.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    shared: Arc<Shared>,
    state: Mutex<SessionState>,
    /// Held across store calls.
    store_lock: AsyncMutex<()>,
    written: AtomicBool,
}

/// Whether a session needs to be written back.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Status {
    /// The session was not changed since it was loaded.
    Unmodified,
    /// The session was changed and must be committed.
    Modified,
    /// The session was destroyed, and the client must delete its cookie.
    Destroyed,
}

#[derive(Debug, Clone)]
pub(crate) struct SessionState {
    /// Empty if the session was never persisted.
    token: String,
    store_key: String,
    values: BTreeMap<String, Value>,
    deadline: DateTime<Utc>,
    status: Status,
}

/// The result of persisting a session with [`Session::commit`].
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Committed {
    /// The token identifying the session, to be sent to the client.
    pub token: String,
    /// When the stored session expires.
    pub expiry: DateTime<Utc>,
}

impl SessionState {
    pub(crate) fn new(deadline: DateTime<Utc>) -> Self {
        Self {
            token: String::new(),
            store_key: String::new(),
            values: BTreeMap::new(),
            deadline,
            status: Status::Unmodified,
        }
    }

    pub(crate) fn loaded(
        token: String,
        store_key: String,
        values: BTreeMap<String, Value>,
        deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            token,
            store_key,
            values,
            deadline,
            status: Status::Unmodified,
        }
    }

    /// Prepare the state for a change that adds data.
    /// A destroyed session is replaced by a new one first.
    fn modify(&mut self, shared: &Shared) -> &mut Self {
        if self.status == Status::Destroyed {
            *self = shared.new_state();
        }
        self.status = Status::Modified;
        self
    }

    fn set_token(&mut self, shared: &Shared, token: String) {
        self.store_key = shared.store_key(&token);
        self.token = token;
    }
}

impl Session {
    pub(crate) fn new(shared: Arc<Shared>, state: SessionState) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                shared,
                state: Mutex::new(state),
                store_lock: AsyncMutex::new(()),
                written: AtomicBool::new(false),
            }),
        }
    }

    /// The token of this session, or an empty string if it was never persisted.
    pub fn token(&self) -> String {
        self.inner.state.lock().token.clone()
    }

    /// The modification status of this session.
    pub fn status(&self) -> Status {
        self.inner.state.lock().status
    }

    /// The absolute deadline of this session.
    pub fn deadline(&self) -> DateTime<Utc> {
        self.inner.state.lock().deadline
    }

    /// Replace the absolute deadline of this session, and mark it as modified.
    pub fn set_deadline(&self, deadline: DateTime<Utc>) {
        self.with_modified(|state| state.deadline = deadline);
    }

    /// Returns the value stored under `key`, if any.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.state.lock().values.get(key).cloned()
    }

    /// Store `value` under `key`, replacing any previous value, and mark the session as modified.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use request_session::{MemoryStore, SessionManager, Status, Value};
    /// # fn main() -> request_session::Result {
    /// # async_std::task::block_on(async {
    /// let session = SessionManager::new(MemoryStore::new()).load("").await?;
    /// session.put("visits", 1);
    /// session.put("visits", 2);
    /// assert_eq!(session.get("visits"), Some(Value::Int(2)));
    /// assert_eq!(session.status(), Status::Modified);
    /// # Ok(()) }) }
    /// ```
    pub fn put(&self, key: impl Into<String>, value: impl Into<Value>) {
        let (key, value) = (key.into(), value.into());
        self.with_modified(|state| {
            state.values.insert(key, value);
        });
    }

    /// Remove the value stored under `key` and return it.
    /// The session is marked as modified if there was a value.
    pub fn pop(&self, key: &str) -> Option<Value> {
        let mut state = self.inner.state.lock();
        let value = state.values.remove(key)?;
        state.status = Status::Modified;
        Some(value)
    }

    /// Remove the value stored under `key`.
    /// The session is marked as modified only if there was a value.
    pub fn remove(&self, key: &str) {
        self.pop(key);
    }

    /// Remove all values and mark the session as modified.
    /// Clearing a destroyed session has no effect.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        if state.status != Status::Destroyed {
            state.values.clear();
            state.status = Status::Modified;
        }
    }

    /// Returns true if a value is stored under `key`.
    pub fn exists(&self, key: &str) -> bool {
        self.inner.state.lock().values.contains_key(key)
    }

    /// Returns all keys, sorted lexicographically.
    pub fn keys(&self) -> Vec<String> {
        self.inner.state.lock().values.keys().cloned().collect()
    }

    /// Returns the value stored under `key` as a `T`.
    ///
    /// A missing key yields `T::default()`.
    /// A value of another kind yields [`Error::TypeMismatch`]; use `unwrap_or_default` to treat it like a missing key.
    pub fn get_as<T: FromValue>(&self, key: &str) -> Result<T> {
        match self.get(key) {
            Some(value) => typed(key, value),
            None => Ok(T::default()),
        }
    }

    /// Like [`Session::get_as`], but also removes the value.
    /// A value of another kind is left in place.
    pub fn pop_as<T: FromValue>(&self, key: &str) -> Result<T> {
        let mut state = self.inner.state.lock();
        let Some(value) = state.values.get(key) else {
            return Ok(T::default());
        };
        if value.kind() != T::KIND {
            return Err(mismatch(key, T::KIND, value));
        }

        let value = state.values.remove(key);
        state.status = Status::Modified;
        match value {
            Some(value) => typed(key, value),
            None => Ok(T::default()),
        }
    }

    /// Returns the string stored under `key`. See [`Session::get_as`].
    pub fn get_string(&self, key: &str) -> Result<String> {
        self.get_as(key)
    }

    /// Returns the boolean stored under `key`. See [`Session::get_as`].
    pub fn get_bool(&self, key: &str) -> Result<bool> {
        self.get_as(key)
    }

    /// Returns the integer stored under `key`. See [`Session::get_as`].
    pub fn get_int(&self, key: &str) -> Result<i64> {
        self.get_as(key)
    }

    /// Returns the float stored under `key`. See [`Session::get_as`].
    pub fn get_float(&self, key: &str) -> Result<f64> {
        self.get_as(key)
    }

    /// Returns the bytes stored under `key`. See [`Session::get_as`].
    pub fn get_bytes(&self, key: &str) -> Result<Vec<u8>> {
        self.get_as(key)
    }

    /// Returns the time stored under `key`. See [`Session::get_as`].
    /// A missing key yields the Unix epoch.
    pub fn get_time(&self, key: &str) -> Result<DateTime<Utc>> {
        self.get_as(key)
    }

    /// Removes and returns the string stored under `key`. See [`Session::pop_as`].
    pub fn pop_string(&self, key: &str) -> Result<String> {
        self.pop_as(key)
    }

    /// Removes and returns the boolean stored under `key`. See [`Session::pop_as`].
    pub fn pop_bool(&self, key: &str) -> Result<bool> {
        self.pop_as(key)
    }

    /// Removes and returns the integer stored under `key`. See [`Session::pop_as`].
    pub fn pop_int(&self, key: &str) -> Result<i64> {
        self.pop_as(key)
    }

    /// Removes and returns the float stored under `key`. See [`Session::pop_as`].
    pub fn pop_float(&self, key: &str) -> Result<f64> {
        self.pop_as(key)
    }

    /// Removes and returns the bytes stored under `key`. See [`Session::pop_as`].
    pub fn pop_bytes(&self, key: &str) -> Result<Vec<u8>> {
        self.pop_as(key)
    }

    /// Removes and returns the time stored under `key`. See [`Session::pop_as`].
    pub fn pop_time(&self, key: &str) -> Result<DateTime<Utc>> {
        self.pop_as(key)
    }

    /// Store a value of a [`SessionType`] under `key`.
    /// The type must be registered with the codec, otherwise committing the session fails.
    pub fn put_structured<T: SessionType>(&self, key: impl Into<String>, value: &T) -> Result {
        self.put(key, Value::structured(value)?);
        Ok(())
    }

    /// Returns the value of type `T` stored under `key`, or `None` if the key is missing.
    /// A value of another kind or type yields [`Error::TypeMismatch`].
    pub fn get_structured<T: SessionType>(&self, key: &str) -> Result<Option<T>> {
        self.get(key)
            .map(|value| structured(key, &value))
            .transpose()
    }

    /// Like [`Session::get_structured`], but also removes the value.
    /// A value of another kind or type is left in place.
    pub fn pop_structured<T: SessionType>(&self, key: &str) -> Result<Option<T>> {
        let mut state = self.inner.state.lock();
        let Some(value) = state.values.get(key) else {
            return Ok(None);
        };
        let value = structured(key, value)?;
        state.values.remove(key);
        state.status = Status::Modified;
        Ok(Some(value))
    }

    /// Choose per session whether the cookie outlives the browser session,
    /// overriding [`SessionCookie::persist`](crate::SessionCookie::persist).
    /// Typically called on login, depending on a "remember me" checkbox.
    pub fn remember_me(&self, remember: bool) {
        self.put(REMEMBER_ME_KEY, remember);
    }

    /// Mark the session as modified if an idle timeout is configured,
    /// so the idle timeout restarts even if the request did not change any data.
    /// Does nothing without idle timeout, or if the session was destroyed.
    pub fn touch(&self) {
        if self.inner.shared.config.idle_timeout.is_none() {
            return;
        }
        let mut state = self.inner.state.lock();
        if state.status != Status::Destroyed {
            state.status = Status::Modified;
        }
    }

    /// Write the session to the store.
    ///
    /// Returns `None` if there was nothing to write:
    /// the session is unmodified (and either has no idle timeout to renew, or was never stored),
    /// or it was destroyed.
    /// Otherwise returns the token, generating one for new sessions, and the expiry of the stored record.
    /// The expiry is the deadline, or the end of the idle timeout if that comes first.
    ///
    /// If the store fails, the error is returned and a newly generated token is discarded again.
    pub async fn commit(&self) -> Result<Option<Committed>> {
        let _store_guard = self.inner.store_lock.lock().await;
        let shared = &self.inner.shared;
        let (store_key, token, blob, expiry, generated) = {
            let mut state = self.inner.state.lock();
            let nothing_to_write = match state.status {
                Status::Modified => false,
                Status::Unmodified => {
                    shared.config.idle_timeout.is_none() || state.token.is_empty()
                }
                Status::Destroyed => true,
            };
            if nothing_to_write {
                return Ok(None);
            }

            let expiry = shared.expiry(state.deadline, Utc::now());
            let blob = shared.codec.encode(state.deadline, &state.values)?;
            let generated = state.token.is_empty();
            if generated {
                let token = shared.generator.generate()?;
                state.set_token(shared, token);
            }
            (
                state.store_key.clone(),
                state.token.clone(),
                blob,
                expiry,
                generated,
            )
        };

        if let Err(error) = shared.store.commit(&store_key, &blob, expiry).await {
            if generated {
                let mut state = self.inner.state.lock();
                if state.store_key == store_key {
                    state.token.clear();
                    state.store_key.clear();
                }
            }
            return Err(Error::store(error));
        }

        log::debug!("Committed session expiring at {expiry}");
        Ok(Some(Committed { token, expiry }))
    }

    /// Delete the session from the store and clear its data.
    ///
    /// The status becomes [`Status::Destroyed`], which makes the middleware tell the client to delete its cookie.
    /// If the store fails, the error is returned and the session is left unchanged.
    ///
    /// Reads after destroying see an empty session.
    /// Storing new data (e.g. with [`Session::put`]) starts a new session with a new token.
    pub async fn destroy(&self) -> Result {
        let _store_guard = self.inner.store_lock.lock().await;
        let store_key = self.inner.state.lock().store_key.clone();
        if !store_key.is_empty() {
            self.inner
                .shared
                .store
                .delete(&store_key)
                .await
                .map_err(Error::store)?;
        }

        let mut state = self.inner.state.lock();
        state.values.clear();
        state.token.clear();
        state.store_key.clear();
        state.status = Status::Destroyed;
        log::debug!("Destroyed session");
        Ok(())
    }

    /// Give the session a new token and a new deadline, keeping its data.
    ///
    /// The record of the old token is deleted from the store, so the old token becomes useless.
    /// Call this whenever the privilege level of the session changes, e.g. on login and logout,
    /// to prevent session fixation attacks.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use request_session::{MemoryStore, SessionManager};
    /// # fn main() -> request_session::Result {
    /// # async_std::task::block_on(async {
    /// let manager = SessionManager::new(MemoryStore::new());
    /// let session = manager.load("").await?;
    /// session.put("cart", "apples");
    /// let old = session.commit().await?.unwrap().token;
    ///
    /// let session = manager.load(&old).await?;
    /// session.renew_token().await?;
    /// session.put("user", "alice");
    /// let new = session.commit().await?.unwrap().token;
    ///
    /// assert_ne!(old, new);
    /// assert_eq!(session.get_string("cart")?, "apples");
    /// assert!(!manager.load(&old).await?.exists("cart"));
    /// # Ok(()) }) }
    /// ```
    pub async fn renew_token(&self) -> Result {
        self.rotate(false).await
    }

    /// Give the session a new token and a new deadline, and remove all its data.
    ///
    /// Like [`Session::renew_token`] followed by [`Session::clear`],
    /// except that no other caller can observe the new token together with the old data.
    pub async fn renew(&self) -> Result {
        self.rotate(true).await
    }

    async fn rotate(&self, clear: bool) -> Result {
        let _store_guard = self.inner.store_lock.lock().await;
        let shared = &self.inner.shared;
        let token = shared.generator.generate()?;

        let old_store_key = self.inner.state.lock().store_key.clone();
        if !old_store_key.is_empty() {
            shared
                .store
                .delete(&old_store_key)
                .await
                .map_err(Error::store)?;
        }

        let mut state = self.inner.state.lock();
        let state = state.modify(shared);
        if clear {
            state.values.clear();
        }
        state.set_token(shared, token);
        state.deadline = shared.fresh_deadline();
        log::debug!("Renewed session token");
        Ok(())
    }

    /// Returns true if the session was already written to a response.
    pub fn is_written(&self) -> bool {
        self.inner.written.load(Ordering::SeqCst)
    }

    /// Commit or destroy the session as needed, and write the matching `Set-Cookie` header.
    ///
    /// The [`LoadAndSave`](crate::LoadAndSave) middleware does this after the handler returned.
    /// Call it yourself before streaming a response body; the middleware then leaves the session alone.
    /// A second call fails with [`Error::AlreadyWritten`].
    ///
    /// * A destroyed session gets a cookie that makes the client delete its session cookie.
    /// * A committed session gets a cookie with its token.
    /// * Otherwise no header is written.
    pub async fn write_response(&self, headers: &mut HeaderMap) -> Result {
        if self.inner.written.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyWritten);
        }

        let result = self.write_cookie(headers).await;
        if result.is_err() {
            self.inner.written.store(false, Ordering::SeqCst);
        }
        result
    }

    async fn write_cookie(&self, headers: &mut HeaderMap) -> Result {
        let config = &self.inner.shared.config.cookie;
        if self.status() == Status::Destroyed {
            return transport::append_set_cookie(headers, &transport::removal_cookie(config));
        }

        if let Some(Committed { token, expiry }) = self.commit().await? {
            let persist = match self.get(REMEMBER_ME_KEY) {
                Some(Value::Bool(remember)) => remember,
                _ => config.persist,
            };
            let cookie = transport::session_cookie(config, &token, expiry, persist, Utc::now());
            transport::append_set_cookie(headers, &cookie)?;
        }
        Ok(())
    }

    /// Apply `change` to a state marked as modified.
    fn with_modified(&self, change: impl FnOnce(&mut SessionState)) {
        let mut state = self.inner.state.lock();
        change(state.modify(&self.inner.shared));
    }
}

fn typed<T: FromValue>(key: &str, value: Value) -> Result<T> {
    let found = value.kind();
    T::from_value(value).ok_or_else(|| Error::TypeMismatch {
        key: key.to_owned(),
        expected: T::KIND,
        found,
    })
}

fn mismatch(key: &str, expected: &'static str, value: &Value) -> Error {
    Error::TypeMismatch {
        key: key.to_owned(),
        expected,
        found: value.kind(),
    }
}

fn structured<T: SessionType>(key: &str, value: &Value) -> Result<T> {
    match value {
        Value::Structured(structured) => structured
            .to_type()
            .unwrap_or_else(|| Err(mismatch(key, T::TYPE_TAG, value))),
        _ => Err(mismatch(key, T::TYPE_TAG, value)),
    }
}

impl Debug for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Session")
            .field("status", &state.status)
            .field("deadline", &state.deadline)
            .field("keys", &state.values.keys().collect::<Vec<_>>())
            .field("written", &self.is_written())
            .finish_non_exhaustive()
    }
}
