use crate::{Error, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};

/// The number of random bytes in a token generated by [`DefaultTokenGenerator`].
pub const TOKEN_BYTES: usize = 32;

/// The length in characters of a token generated by [`DefaultTokenGenerator`].
pub const TOKEN_LENGTH: usize = 43;

/// A type with the ability to generate session tokens.
pub trait TokenGenerator: Debug + Send + Sync {
    /// Generate a token, i.e. a string that is a valid HTTP cookie value.
    fn generate(&self) -> Result<String>;
}

/// The default token generator with focus on security.
///
/// It reads [`TOKEN_BYTES`] bytes from the operating system's random source ([`OsRng`]) and
/// encodes them with the URL-safe base64 alphabet without padding.
/// This gives 256 bits of entropy in [`TOKEN_LENGTH`] characters.
///
/// A failing random source is reported as [`Error::Random`] and never masked.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTokenGenerator;

impl TokenGenerator for DefaultTokenGenerator {
    fn generate(&self) -> Result<String> {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.try_fill_bytes(&mut bytes).map_err(Error::Random)?;
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }
}

/// A debug token generator that generates an ascending sequence of integers, formatted as strings padded with zeroes.
///
/// **Never use this outside of tests**, its tokens are trivially guessable.
#[derive(Debug, Default)]
pub struct DebugTokenGenerator {
    next_index: AtomicUsize,
}

impl DebugTokenGenerator {
    /// Create a generator whose first token is `0…0`.
    pub fn new() -> Self {
        Default::default()
    }

    /// The token that is returned by the `index`th call to [`TokenGenerator::generate`].
    pub fn token(index: usize) -> String {
        format!("{index:0width$}", width = TOKEN_LENGTH)
    }
}

impl TokenGenerator for DebugTokenGenerator {
    fn generate(&self) -> Result<String> {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        Ok(Self::token(index))
    }
}
