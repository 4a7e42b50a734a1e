//! Async server-side HTTP sessions.
//!
//! This crate keeps per-client key/value state across stateless HTTP requests.
//! The client only holds an opaque random token in a cookie, while the session data
//! lives in a pluggable [`Store`], encoded by a [`Codec`].
//!
//! # Lifecycle
//!
//! A [`SessionManager`] loads the [`Session`] of a request from the token presented by the client.
//! Unknown, expired or forged tokens silently yield a new empty session.
//! Handlers read and write values through the session; every change marks it as [`Status::Modified`].
//! Once the handler is done, modified sessions are committed to the store and the cookie is set,
//! destroyed sessions make the client delete its cookie, and unmodified sessions cost nothing.
//! The [`LoadAndSave`] middleware does all of this for a [`tower`] service.
//!
//! # Expiry
//!
//! Every session has an absolute deadline, set when it is created from [`SessionConfig::lifetime`].
//! Optionally, [`SessionConfig::idle_timeout`] additionally expires sessions that are not used for a while.
//!
//! # Security
//!
//! Tokens carry 256 bits from the operating system's random source.
//! Call [`Session::renew_token`] whenever the privilege level of a session changes, e.g. on login,
//! so a token planted by an attacker before login is worthless afterwards.
//! With [`SessionConfig::hash_token_in_store`], the store only ever sees hashes of tokens.
//!
//! # Example
//!
//! ```
//! use request_session::{MemoryStore, SessionManager, Status};
//!
//! # fn main() -> request_session::Result {
//! # async_std::task::block_on(async {
//! #
//! // Init a session manager that persists sessions to memory.
//! let manager = SessionManager::new(MemoryStore::new());
//!
//! // A client without cookie gets a new session.
//! let session = manager.load("").await?;
//! session.put("message", "hello");
//! assert_eq!(session.status(), Status::Modified);
//!
//! // Committing stores the session and yields the token for the cookie.
//! let committed = session.commit().await?.unwrap();
//! assert_eq!(committed.token.len(), 43);
//!
//! // Retrieve the session using the token.
//! let session = manager.load(&committed.token).await?;
//! assert_eq!(session.get_string("message")?, "hello");
//!
//! // Destroy it again.
//! session.destroy().await?;
//! assert!(!manager.load(&committed.token).await?.exists("message"));
//! #
//! # Ok(()) }) }
//! ```

#![forbid(unsafe_code)]
#![deny(
    future_incompatible,
    missing_debug_implementations,
    nonstandard_style,
    missing_docs,
    unreachable_pub,
    missing_copy_implementations,
    unused_qualifications
)]

/// A Result with this crate's [`Error`] and default return type of ()
pub type Result<T = ()> = std::result::Result<T, Error>;

mod codec;
mod config;
mod error;
mod manager;
mod memory_store;
mod middleware;
mod session;
mod session_store;
mod transport;
mod value;

pub use codec::{Codec, JsonCodec};
pub use config::{SameSite, SessionConfig, SessionCookie};
pub use error::Error;
pub use manager::SessionManager;
pub use memory_store::{MemoryStore, Operation};
pub use middleware::{ErrorHandler, LoadAndSave, LoadAndSaveLayer};
pub use session::{Committed, Session, Status, REMEMBER_ME_KEY};
pub use session_store::token_generator::{
    DebugTokenGenerator, DefaultTokenGenerator, TokenGenerator, TOKEN_BYTES, TOKEN_LENGTH,
};
pub use session_store::Store;
pub use value::{FromValue, SessionType, StructuredValue, TypeRegistry, Value};
