//! `${env:NAME}` and `${secret:NAME}` placeholders in credential documents.
//!
//! Placeholders are expanded in a single left-to-right pass; a substituted
//! value is never scanned again, so a secret that happens to contain
//! `${...}` text is used verbatim.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use thiserror::Error;
use tracing::debug;

/// Keychain service under which dsq stores its secrets.
const KEYCHAIN_SERVICE: &str = "dsq";
/// Set to `env` to read `${secret:NAME}` from the environment instead of the keychain.
pub const SECRETS_BACKEND_ENV_VAR: &str = "DSQ_SECRETS_BACKEND";

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{(env|secret):([\w.+-]*)\}").expect("placeholder pattern is valid"));

/// Where `${secret:NAME}` values come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretsBackend {
    Keychain,
    /// Used by CI and tests where no keychain is available.
    Environment,
}

pub fn secrets_backend() -> SecretsBackend {
    match std::env::var(SECRETS_BACKEND_ENV_VAR) {
        Ok(value) if value.trim().eq_ignore_ascii_case("env") => SecretsBackend::Environment,
        _ => SecretsBackend::Keychain,
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InterpolationError {
    #[error("environment variable {name} is not set")]
    MissingEnvVar { name: String },

    #[error("secret {name} is not available: {reason}")]
    MissingSecret { name: String, reason: String },

    #[error("keychain access for {name} failed: {reason}")]
    Keychain { name: String, reason: String },
}

/// Expands every placeholder in `value`.
pub fn interpolate_string(value: &str) -> Result<String, InterpolationError> {
    let mut expanded = String::with_capacity(value.len());
    let mut cursor = 0;
    for captures in PLACEHOLDER.captures_iter(value) {
        let Some(whole) = captures.get(0) else { continue };
        expanded.push_str(&value[cursor..whole.start()]);
        expanded.push_str(&expand(&captures)?);
        cursor = whole.end();
    }
    expanded.push_str(&value[cursor..]);
    Ok(expanded)
}

fn expand(captures: &Captures<'_>) -> Result<String, InterpolationError> {
    let name = &captures[2];
    if &captures[1] == "env" {
        debug!(variable = name, "expanded environment placeholder");
        return std::env::var(name).map_err(|_| InterpolationError::MissingEnvVar { name: name.to_string() });
    }
    debug!(secret = name, "expanded secret placeholder");
    resolve_secret(name)
}

/// Reads `name` from the configured [`SecretsBackend`].
pub fn resolve_secret(name: &str) -> Result<String, InterpolationError> {
    match secrets_backend() {
        SecretsBackend::Environment => std::env::var(name).map_err(|error| InterpolationError::MissingSecret {
            name: name.to_string(),
            reason: error.to_string(),
        }),
        SecretsBackend::Keychain => keychain_entry(name)?
            .get_password()
            .map_err(|error| InterpolationError::MissingSecret {
                name: name.to_string(),
                reason: error.to_string(),
            }),
    }
}

pub fn store_secret(name: &str, value: &str) -> Result<(), InterpolationError> {
    keychain_entry(name)?
        .set_password(value)
        .map_err(|error| keychain_error(name, error))?;
    debug!(secret = name, "stored secret in keychain");
    Ok(())
}

pub fn remove_secret(name: &str) -> Result<(), InterpolationError> {
    keychain_entry(name)?
        .delete_credential()
        .map_err(|error| keychain_error(name, error))?;
    debug!(secret = name, "removed secret from keychain");
    Ok(())
}

fn keychain_entry(name: &str) -> Result<keyring::Entry, InterpolationError> {
    keyring::Entry::new(KEYCHAIN_SERVICE, name).map_err(|error| keychain_error(name, error))
}

fn keychain_error(name: &str, error: keyring::Error) -> InterpolationError {
    InterpolationError::Keychain {
        name: name.to_string(),
        reason: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_selection_follows_environment() {
        temp_env::with_var(SECRETS_BACKEND_ENV_VAR, None::<&str>, || {
            assert_eq!(secrets_backend(), SecretsBackend::Keychain);
        });
        temp_env::with_var(SECRETS_BACKEND_ENV_VAR, Some(" ENV "), || {
            assert_eq!(secrets_backend(), SecretsBackend::Environment);
        });
    }

    #[test]
    fn expands_both_placeholder_kinds() {
        temp_env::with_vars(
            [
                (SECRETS_BACKEND_ENV_VAR, Some("env")),
                ("DSQ_TEST_API_USER", Some("svc-reader")),
                ("DSQ_TEST_API_PASS", Some("hunter2")),
            ],
            || {
                assert_eq!(interpolate_string("${env:DSQ_TEST_API_USER}@plant").unwrap(), "svc-reader@plant");
                assert_eq!(interpolate_string("${secret:DSQ_TEST_API_PASS}").unwrap(), "hunter2");
                assert_eq!(interpolate_string("no placeholders").unwrap(), "no placeholders");
            },
        );
    }

    #[test]
    fn substituted_values_are_not_expanded_again() {
        temp_env::with_vars(
            [("DSQ_TEST_NESTED", Some("${env:DSQ_TEST_INNER}")), ("DSQ_TEST_INNER", Some("leak"))],
            || {
                assert_eq!(interpolate_string("${env:DSQ_TEST_NESTED}").unwrap(), "${env:DSQ_TEST_INNER}");
            },
        );
    }

    #[test]
    fn missing_env_var_is_reported_by_name() {
        temp_env::with_var("DSQ_TEST_ABSENT", None::<&str>, || {
            let error = interpolate_string("${env:DSQ_TEST_ABSENT}").unwrap_err();
            assert_eq!(error, InterpolationError::MissingEnvVar { name: "DSQ_TEST_ABSENT".into() });
        });
    }
}
