//! Bearer credential validation.

use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;

pub const CREDENTIAL_PREFIX: &str = "sk-";
pub const CREDENTIAL_ENV: &str = "OPENAI_API_KEY";

/// A validated service credential.
///
/// The secret is only reachable through [`Credential::expose`]; `Debug` prints a
/// redacted form.
pub struct Credential(SecretString);

impl Credential {
    /// Validate and normalize a raw credential string.
    ///
    /// Quote characters and surrounding whitespace are stripped before the prefix check.
    ///
    /// # Errors
    /// Returns `MissingCredential` for absent or blank input and `MalformedCredential`
    /// when the cleaned value lacks the `sk-` prefix.
    #[allow(clippy::result_large_err)]
    pub fn validate(raw: Option<&str>) -> Result<Self> {
        let raw = raw.ok_or(Error::MissingCredential)?;
        let cleaned: String = raw.chars().filter(|c| !matches!(c, '"' | '\'')).collect();
        let cleaned = cleaned.trim();
        if cleaned.is_empty() {
            return Err(Error::MissingCredential);
        }
        if !cleaned.starts_with(CREDENTIAL_PREFIX) || cleaned.len() == CREDENTIAL_PREFIX.len() {
            return Err(Error::MalformedCredential);
        }
        Ok(Self(SecretString::from(cleaned.to_owned())))
    }

    /// Read and validate a credential from the environment.
    ///
    /// # Errors
    /// Same as [`Credential::validate`].
    #[allow(clippy::result_large_err)]
    pub fn from_env(var: &str) -> Result<Self> {
        let raw = std::env::var(var).ok();
        Self::validate(raw.as_deref())
    }

    /// Startup check: logs why the credential is unusable and reports the outcome.
    #[must_use]
    pub fn verify_env(var: &str) -> bool {
        match Self::from_env(var) {
            Ok(credential) => {
                tracing::debug!(credential = ?credential, "credential verified");
                true
            }
            Err(err) => {
                tracing::error!(var, error = %err, "credential verification failed");
                false
            }
        }
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// A log-safe rendering: prefix plus the last four characters.
    #[must_use]
    pub fn redacted(&self) -> String {
        let secret = self.expose();
        let tail: String = secret
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("{CREDENTIAL_PREFIX}…{tail}")
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&self.redacted()).finish()
    }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Eq for Credential {}
