/// All errors that can occur in this crate.
///
/// A missing, expired or forged token is deliberately *not* an error:
/// stores report it as "not found" and the manager starts a fresh session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The session store failed. The error is passed through verbatim.
    #[error("session store error: {0}")]
    Store(#[source] anyhow::Error),

    /// The session could not be encoded for storage.
    #[error("failed to encode session: {0}")]
    Encode(#[source] serde_json::Error),

    /// A record was found for a token, but its content could not be decoded.
    /// This indicates a bug or a format mismatch, so the data is not silently dropped.
    #[error("failed to decode session: {0}")]
    Decode(#[source] serde_json::Error),

    /// A float that cannot be represented in the encoded session was stored.
    #[error("the value for key {key:?} is not a finite float")]
    NonFiniteFloat {
        /// The key holding the value.
        key: String,
    },

    /// A value was read with a typed accessor, but holds a different kind of value.
    #[error("type assertion failed for key {key:?}: expected {expected}, found {found}")]
    TypeMismatch {
        /// The key that was read.
        key: String,
        /// The kind of value the accessor expected.
        expected: &'static str,
        /// The kind of value that is actually stored.
        found: &'static str,
    },

    /// A structured value was encoded or decoded whose type tag is not registered with the codec.
    #[error("structured type {tag:?} is not registered")]
    UnregisteredType {
        /// The unknown type tag.
        tag: String,
    },

    /// A structured value could not be converted from or to its Rust type.
    #[error("structured value {tag:?} does not match its registered type: {source}")]
    Structured {
        /// The type tag of the value.
        tag: String,
        /// The underlying conversion error.
        #[source]
        source: serde_json::Error,
    },

    /// The random source failed while generating a token.
    #[error("failed to generate a session token: {0}")]
    Random(#[source] rand::Error),

    /// The session cookie could not be written as a header, e.g. because the configured name contains invalid characters.
    #[error("invalid session cookie: {0}")]
    InvalidCookie(#[source] http::header::InvalidHeaderValue),

    /// The session cookie was already written to the response.
    #[error("the session was already written to the response")]
    AlreadyWritten,

    /// The session store cannot enumerate its records.
    #[error("the session store does not support iteration")]
    IterationUnsupported,
}

impl Error {
    pub(crate) fn store(error: anyhow::Error) -> Self {
        Self::Store(error)
    }
}

mod expect_impl_error {
    trait ExpectImplError: std::error::Error + Send + Sync + 'static {}

    impl ExpectImplError for super::Error {}
}
