use std::fmt;

use serde::{Deserialize, Serialize};

/// Authentication material resolved for a tenant.
///
/// Deserializes from either `{"api_user": "...", "api_pass": "..."}` or a bare
/// API key string, matching the layout of the credentials document.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Credential {
    Basic {
        #[serde(rename = "api_user")]
        username: String,
        #[serde(rename = "api_pass")]
        password: String,
    },
    ApiKey(String),
}

impl Credential {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credential::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn api_key(token: impl Into<String>) -> Self {
        Credential::ApiKey(token.into())
    }
}

// Secrets must never end up in logs through `{:?}`.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Credential::ApiKey(_) => f.debug_tuple("ApiKey").field(&"<redacted>").finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_both_document_shapes() {
        let basic: Credential = serde_json::from_str(r#"{"api_user":"svc","api_pass":"hunter2"}"#).unwrap();
        assert_eq!(basic, Credential::basic("svc", "hunter2"));

        let key: Credential = serde_json::from_str(r#""abc123""#).unwrap();
        assert_eq!(key, Credential::api_key("abc123"));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let rendered = format!("{:?} {:?}", Credential::basic("svc", "hunter2"), Credential::api_key("abc123"));
        assert!(rendered.contains("svc"));
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("abc123"));
    }
}
