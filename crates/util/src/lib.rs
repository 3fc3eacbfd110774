//! Utility helpers shared by the dsq crates.
//!
//! - secret redaction for anything that may reach a log line
//! - config path resolution with `~` expansion and env overrides
//! - strict JSON parsing of HTTP reply bodies
//! - `${env:NAME}` / `${secret:NAME}` interpolation backed by the OS keychain
//! - the file-backed tenant [`credentials::FileCredentialResolver`]

pub mod credentials;
pub mod http;
pub mod keystore;
mod paths;

pub use credentials::{CredentialError, CredentialResolver, FileCredentialResolver};
pub use paths::{config_file_path, expand_tilde};

use once_cell::sync::Lazy;
use regex::Regex;

static REDACTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(authorization: )([\w\-\.=:/+ ]+)",
        r"(?i)(x-plex-connect-api-key: )(\S+)",
        r#"(?i)("api_pass"\s*:\s*)("[^"]*")"#,
        r"(?i)([A-Z0-9_]*?(?:API_KEY|TOKEN|SECRET|PASSWORD)=)([^\s&]+)",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Redacts values that look like secrets in a string.
pub fn redact_sensitive(input: &str) -> String {
    let mut redacted = input.to_string();
    for pattern in REDACTION_PATTERNS.iter() {
        redacted = pattern
            .replace_all(&redacted, |caps: &regex::Captures| {
                let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                format!("{}<redacted>", prefix)
            })
            .to_string();
    }
    redacted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_authorization_and_api_key_headers() {
        let line = "authorization: Basic c3ZjOmh1bnRlcjI=\nX-Plex-Connect-Api-Key: abc123";
        let redacted = redact_sensitive(line);
        assert!(!redacted.contains("c3ZjOmh1bnRlcjI="));
        assert!(!redacted.contains("abc123"));
        assert!(redacted.contains("authorization: <redacted>"));
    }

    #[test]
    fn redacts_password_fields_in_json_text() {
        let redacted = redact_sensitive(r#"{"api_user": "svc", "api_pass": "hunter2"}"#);
        assert!(redacted.contains("svc"));
        assert!(!redacted.contains("hunter2"));
    }

    #[test]
    fn leaves_ordinary_text_alone() {
        assert_eq!(redact_sensitive("Part_No=278780-20"), "Part_No=278780-20");
    }
}
