use std::fmt;
use std::str::FromStr;

use dsq_types::DataSourceError;
use serde::{Deserialize, Serialize};
use url::Url;

/// Allowed hostnames or base domains for non-local endpoints. Subdomains of
/// these domains are also allowed.
const ALLOWED_DOMAINS: &[&str] = &["plex.com", "plexonline.com"];
/// Hostnames allowed for local development regardless of scheme.
const LOCALHOST_DOMAINS: &[&str] = &["localhost", "127.0.0.1"];

const MODERN_TEST_BASE: &str = "https://test.cloud.plex.com/api";
const MODERN_PRODUCTION_BASE: &str = "https://cloud.plex.com/api";
const LEGACY_TEST_ENDPOINT: &str = "https://testapi.plexonline.com/Datasource/service.asmx";
const LEGACY_PRODUCTION_ENDPOINT: &str = "https://api.plexonline.com/Datasource/service.asmx";

/// Which database a tenant call runs against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Test,
    Production,
}

impl Environment {
    pub fn modern_base_url(self) -> &'static str {
        match self {
            Environment::Test => MODERN_TEST_BASE,
            Environment::Production => MODERN_PRODUCTION_BASE,
        }
    }

    pub fn legacy_endpoint(self) -> &'static str {
        match self {
            Environment::Test => LEGACY_TEST_ENDPOINT,
            Environment::Production => LEGACY_PRODUCTION_ENDPOINT,
        }
    }
}

impl FromStr for Environment {
    type Err = DataSourceError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        // "test." was a common way of spelling the environment as a host prefix.
        match raw.trim().trim_end_matches('.').to_ascii_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "prod" | "production" => Ok(Environment::Production),
            other => Err(DataSourceError::configuration(format!(
                "environment must be one of [test, production]; received '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Test => f.write_str("test"),
            Environment::Production => f.write_str("production"),
        }
    }
}

/// Validate that a base URL is acceptable for use by the client.
///
/// Rules:
/// - `localhost` or `127.0.0.1`: any scheme is allowed
/// - otherwise: scheme must be HTTPS, and host must be one of the allowed
///   domains or a subdomain thereof
pub fn validate_base_url(base: &str) -> Result<(), DataSourceError> {
    let parsed_base_url =
        Url::parse(base).map_err(|e| DataSourceError::configuration(format!("Invalid base URL '{}': {}", base, e)))?;

    let host_name = parsed_base_url
        .host_str()
        .ok_or_else(|| DataSourceError::configuration(format!("Base URL '{}' must include a host", base)))?;

    if LOCALHOST_DOMAINS
        .iter()
        .any(|&allowed| host_name.eq_ignore_ascii_case(allowed))
    {
        return Ok(());
    }

    if parsed_base_url.scheme() != "https" {
        return Err(DataSourceError::configuration(format!(
            "Base URL must use https for non-localhost hosts; got '{}://'",
            parsed_base_url.scheme()
        )));
    }

    let is_allowed_domain = ALLOWED_DOMAINS.iter().any(|&allowed_domain| {
        host_name.eq_ignore_ascii_case(allowed_domain) || host_name.ends_with(&format!(".{}", allowed_domain))
    });
    if !is_allowed_domain {
        return Err(DataSourceError::configuration(format!(
            "Base URL host '{}' is not allowed; must be one of {:?} or a subdomain, or localhost",
            host_name, ALLOWED_DOMAINS
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_endpoints_pass_validation() {
        for environment in [Environment::Test, Environment::Production] {
            assert!(validate_base_url(environment.modern_base_url()).is_ok());
            assert!(validate_base_url(environment.legacy_endpoint()).is_ok());
        }
    }

    #[test]
    fn localhost_may_use_plain_http() {
        assert!(validate_base_url("http://127.0.0.1:8080/api").is_ok());
        assert!(validate_base_url("http://localhost/api").is_ok());
    }

    #[test]
    fn rejects_plain_http_and_foreign_hosts() {
        assert!(validate_base_url("http://cloud.plex.com/api").is_err());
        assert!(validate_base_url("https://plex.com.evil.example/api").is_err());
        assert!(validate_base_url("not a url").is_err());
    }

    #[test]
    fn environment_parses_legacy_spellings() {
        assert_eq!("test.".parse::<Environment>().unwrap(), Environment::Test);
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Production);
        assert!("staging".parse::<Environment>().is_err());
    }
}
