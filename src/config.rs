use serde::Deserialize;
use std::time::Duration;

/// Configuration of a [`SessionManager`](crate::SessionManager).
///
/// The configuration is fixed once the manager is created, and shared by all requests.
/// It can be deserialized, e.g. as part of an application's configuration file;
/// missing fields take their default values.
///
/// # Example
///
/// ```rust
/// use request_session::{SameSite, SessionConfig};
/// use std::time::Duration;
///
/// let config = SessionConfig::default()
///     .with_lifetime(Duration::from_secs(60 * 60))
///     .with_idle_timeout(Duration::from_secs(10 * 60));
/// assert_eq!(config.cookie.name, "session");
/// assert_eq!(config.cookie.same_site, SameSite::Lax);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// The absolute lifetime of a session.
    /// A session expires this long after it was created, regardless of activity.
    /// Defaults to 24 hours.
    pub lifetime: Duration,
    /// If set, a session also expires after being unused for this long.
    /// Every request that loads the session then renews its expiry.
    pub idle_timeout: Option<Duration>,
    /// How the session token is transported in a cookie.
    pub cookie: SessionCookie,
    /// If true, the store is keyed by a hash of the token instead of the token itself,
    /// so a leaked store does not leak usable tokens.
    pub hash_token_in_store: bool,
}

/// The attributes of the session cookie.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionCookie {
    /// The name of the cookie. Defaults to `session`.
    pub name: String,
    /// The `Domain` attribute. Defaults to unset, i.e. the issuing host.
    pub domain: Option<String>,
    /// The `Path` attribute. Defaults to `/`.
    pub path: String,
    /// The `HttpOnly` attribute. Defaults to true.
    pub http_only: bool,
    /// The `Secure` attribute. Defaults to false.
    pub secure: bool,
    /// The `SameSite` attribute. Defaults to [`SameSite::Lax`].
    pub same_site: SameSite,
    /// If true, the cookie carries `Expires` and `Max-Age` derived from the session expiry.
    /// Otherwise it is deleted when the browser closes.
    /// Can be overridden per session with [`Session::remember_me`](crate::Session::remember_me).
    /// Defaults to true.
    pub persist: bool,
    /// The `Partitioned` attribute. Defaults to false.
    pub partitioned: bool,
}

/// The `SameSite` cookie attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SameSite {
    /// The cookie is only sent with same-site requests.
    Strict,
    /// The cookie is also sent with top-level cross-site navigations.
    Lax,
    /// The cookie is sent with all requests. Browsers require `Secure` with this value.
    None,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lifetime: Duration::from_secs(60 * 60 * 24),
            idle_timeout: None,
            cookie: SessionCookie::default(),
            hash_token_in_store: false,
        }
    }
}

impl SessionConfig {
    /// Set the absolute lifetime of sessions.
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Set the idle timeout of sessions.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = Some(idle_timeout);
        self
    }

    /// Set the attributes of the session cookie.
    pub fn with_cookie(mut self, cookie: SessionCookie) -> Self {
        self.cookie = cookie;
        self
    }

    /// Key the store by a hash of the token.
    pub fn with_hashed_tokens(mut self, hash_token_in_store: bool) -> Self {
        self.hash_token_in_store = hash_token_in_store;
        self
    }
}

impl Default for SessionCookie {
    fn default() -> Self {
        Self {
            name: "session".to_owned(),
            domain: None,
            path: "/".to_owned(),
            http_only: true,
            secure: false,
            same_site: SameSite::Lax,
            persist: true,
            partitioned: false,
        }
    }
}

impl SessionCookie {
    /// Set the cookie name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the `Domain` attribute.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Set the `Path` attribute.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the `HttpOnly` attribute.
    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    /// Set the `Secure` attribute.
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Set the `SameSite` attribute.
    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = same_site;
        self
    }

    /// Set whether the cookie outlives the browser session.
    pub fn with_persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    /// Set the `Partitioned` attribute.
    pub fn with_partitioned(mut self, partitioned: bool) -> Self {
        self.partitioned = partitioned;
        self
    }
}

impl From<SameSite> for cookie::SameSite {
    fn from(same_site: SameSite) -> Self {
        match same_site {
            SameSite::Strict => cookie::SameSite::Strict,
            SameSite::Lax => cookie::SameSite::Lax,
            SameSite::None => cookie::SameSite::None,
        }
    }
}
