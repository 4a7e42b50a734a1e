use crate::session::SessionState;
use crate::session_store::token_generator::{DefaultTokenGenerator, TokenGenerator};
use crate::{transport, Codec, Error, JsonCodec, Result, Session, SessionConfig, Status, Store};
use chrono::{DateTime, Utc};
use http::HeaderMap;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Loads sessions from a [`Store`] and hands them out per request.
///
/// The manager holds the [`SessionConfig`], the store, the [`Codec`] and the [`TokenGenerator`].
/// It is cheap to clone, all clones share the same state.
/// Sessions are loaded with [`SessionManager::load`]; everything else happens on the returned [`Session`].
///
/// # Example
///
/// ```rust
/// use request_session::{MemoryStore, SessionConfig, SessionManager, Status};
/// use std::time::Duration;
///
/// # fn main() -> request_session::Result {
/// # async_std::task::block_on(async {
/// let manager = SessionManager::new(MemoryStore::new())
///     .with_config(SessionConfig::default().with_lifetime(Duration::from_secs(3600)));
///
/// // No cookie was presented, so this is a new, empty session.
/// let session = manager.load("").await?;
/// assert_eq!(session.status(), Status::Unmodified);
///
/// session.put("message", "hello");
/// let committed = session.commit().await?.expect("modified sessions are committed");
///
/// // The next request presents the token.
/// let session = manager.load(&committed.token).await?;
/// assert_eq!(session.get_string("message")?, "hello");
/// # Ok(()) }) }
/// ```
#[derive(Clone)]
pub struct SessionManager {
    shared: Arc<Shared>,
}

#[derive(Clone)]
pub(crate) struct Shared {
    pub(crate) config: SessionConfig,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) codec: Arc<dyn Codec>,
    pub(crate) generator: Arc<dyn TokenGenerator>,
}

impl SessionManager {
    /// Create a manager with the default configuration, [`JsonCodec`] and [`DefaultTokenGenerator`].
    pub fn new(store: impl Store + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                config: SessionConfig::default(),
                store: Arc::new(store),
                codec: Arc::new(JsonCodec::new()),
                generator: Arc::new(DefaultTokenGenerator),
            }),
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        Arc::make_mut(&mut self.shared).config = config;
        self
    }

    /// Replace the codec.
    pub fn with_codec(mut self, codec: impl Codec + 'static) -> Self {
        Arc::make_mut(&mut self.shared).codec = Arc::new(codec);
        self
    }

    /// Replace the token generator.
    pub fn with_token_generator(mut self, generator: impl TokenGenerator + 'static) -> Self {
        Arc::make_mut(&mut self.shared).generator = Arc::new(generator);
        self
    }

    /// The configuration of this manager.
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Read the session token from the `Cookie` headers of a request.
    pub fn token_from_headers(&self, headers: &HeaderMap) -> Option<String> {
        transport::read_token(headers, &self.shared.config.cookie.name)
    }

    /// Load the session identified by `token`.
    ///
    /// An empty token, or a token the store does not know (e.g. because it expired or was forged),
    /// yields a new empty session.
    /// Store failures and records that cannot be decoded are returned as errors;
    /// the request should then fail instead of guessing the session state.
    pub async fn load(&self, token: &str) -> Result<Session> {
        if token.is_empty() {
            log::debug!("No session token presented, starting a new session");
            return Ok(self.new_session());
        }

        let store_key = self.shared.store_key(token);
        let Some(blob) = self
            .shared
            .store
            .find(&store_key)
            .await
            .map_err(Error::store)?
        else {
            log::debug!("Session token is unknown, starting a new session");
            return Ok(self.new_session());
        };

        let (deadline, values) = self.shared.codec.decode(&blob)?;
        if deadline <= Utc::now() {
            log::debug!("Session passed its deadline, starting a new session");
            return Ok(self.new_session());
        }

        Ok(Session::new(
            self.shared.clone(),
            SessionState::loaded(token.to_owned(), store_key, values, deadline),
        ))
    }

    /// Run `callback` on every active session in the store.
    ///
    /// Sessions are visited one after another, in order of their store keys.
    /// A session modified by the callback is committed afterwards;
    /// a session destroyed by the callback is already gone from the store.
    /// The first error stops the iteration.
    ///
    /// If tokens are hashed in the store, [`Session::token`] returns the hash for visited sessions.
    ///
    /// Fails with [`Error::IterationUnsupported`] if the store cannot enumerate its records.
    pub async fn iterate<F, Fut>(&self, mut callback: F) -> Result
    where
        F: FnMut(Session) -> Fut,
        Fut: Future<Output = Result>,
    {
        let records = self
            .shared
            .store
            .all()
            .await
            .map_err(Error::store)?
            .ok_or(Error::IterationUnsupported)?;
        let mut records: Vec<_> = records.into_iter().collect();
        records.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));

        for (store_key, blob) in records {
            let (deadline, values) = self.shared.codec.decode(&blob)?;
            let session = Session::new(
                self.shared.clone(),
                SessionState::loaded(store_key.clone(), store_key, values, deadline),
            );
            callback(session.clone()).await?;
            if session.status() == Status::Modified {
                session.commit().await?;
            }
        }
        Ok(())
    }

    fn new_session(&self) -> Session {
        Session::new(self.shared.clone(), self.shared.new_state())
    }
}

impl Shared {
    /// The key of `token` in the store.
    pub(crate) fn store_key(&self, token: &str) -> String {
        if self.config.hash_token_in_store {
            blake3::hash(token.as_bytes()).to_hex().to_string()
        } else {
            token.to_owned()
        }
    }

    /// The state of a session that was never persisted.
    pub(crate) fn new_state(&self) -> SessionState {
        SessionState::new(self.fresh_deadline())
    }

    pub(crate) fn fresh_deadline(&self) -> DateTime<Utc> {
        add_duration(Utc::now(), self.config.lifetime)
    }

    /// The expiry of a session committed at `now`: its deadline, or the end of its idle timeout if that comes first.
    pub(crate) fn expiry(&self, deadline: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.config.idle_timeout {
            Some(idle_timeout) => deadline.min(add_duration(now, idle_timeout)),
            None => deadline,
        }
    }
}

fn add_duration(instant: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|duration| instant.checked_add_signed(duration))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl Debug for SessionManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.shared.config)
            .field("codec", &self.shared.codec)
            .field("generator", &self.shared.generator)
            .finish_non_exhaustive()
    }
}
