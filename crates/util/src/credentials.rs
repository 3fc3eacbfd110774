//! Tenant credential resolution.
//!
//! Credentials live in a JSON document keyed by tenant:
//!
//! ```json
//! {
//!   "Grand Haven": { "api_user": "svc-reader", "api_pass": "${secret:grand-haven-pass}" },
//!   "Connect": "${env:CONNECT_API_KEY}"
//! }
//! ```
//!
//! Every string is interpolated on first use and the result cached for the
//! lifetime of the resolver, so a tenant is resolved at most once.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use dsq_types::{Credential, DataSourceError};
use indexmap::IndexMap;
use thiserror::Error;
use tracing::debug;

use crate::config_file_path;
use crate::keystore::{InterpolationError, interpolate_string};

/// Environment variable overriding the credentials document location.
pub const CREDENTIALS_PATH_ENV: &str = "DSQ_CREDENTIALS_PATH";
/// Default filename of the credentials document.
pub const CREDENTIALS_FILE_NAME: &str = "credentials.json";

/// Resolves a tenant key to the credential used for its calls.
pub trait CredentialResolver: Send + Sync {
    /// Resolve `tenant`, failing with [`CredentialError::NotFound`] when it is not configured.
    fn resolve(&self, tenant: &str) -> Result<Credential, CredentialError>;

    /// Every configured tenant key, in document order.
    fn tenants(&self) -> Result<Vec<String>, CredentialError>;
}

/// Errors raised while loading or resolving credentials.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no credential configured for tenant '{tenant}'")]
    NotFound { tenant: String },

    #[error("could not read credentials file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("credentials file {path} is not valid: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("credential for tenant '{tenant}' could not be interpolated: {source}")]
    Interpolation {
        tenant: String,
        #[source]
        source: InterpolationError,
    },
}

impl From<CredentialError> for DataSourceError {
    fn from(error: CredentialError) -> Self {
        DataSourceError::configuration(error.to_string())
    }
}

#[derive(Debug, Default)]
struct ResolverState {
    document: Option<IndexMap<String, Credential>>,
    resolved: HashMap<String, Credential>,
}

/// [`CredentialResolver`] backed by a JSON document on disk.
///
/// Reads take a shared lock; the first resolution of a tenant takes the
/// exclusive lock, loads the document if needed and interpolates the entry.
#[derive(Debug)]
pub struct FileCredentialResolver {
    path: PathBuf,
    state: RwLock<ResolverState>,
}

impl FileCredentialResolver {
    /// Resolver reading `path` lazily on first use.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: RwLock::new(ResolverState::default()),
        }
    }

    /// Resolver for `$DSQ_CREDENTIALS_PATH` or `<config_dir>/dsq/credentials.json`.
    pub fn from_default_path() -> Self {
        Self::new(config_file_path(CREDENTIALS_PATH_ENV, CREDENTIALS_FILE_NAME))
    }

    /// Resolver over an already-parsed document; nothing is read from disk.
    pub fn from_document(document: IndexMap<String, Credential>) -> Self {
        Self {
            path: PathBuf::new(),
            state: RwLock::new(ResolverState {
                document: Some(document),
                resolved: HashMap::new(),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_document(&self) -> Result<IndexMap<String, Credential>, CredentialError> {
        let content = fs::read_to_string(&self.path).map_err(|source| CredentialError::Io {
            path: self.path.clone(),
            source,
        })?;
        let document = serde_json::from_str(&content).map_err(|source| CredentialError::Parse {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), "loaded credentials document");
        Ok(document)
    }

    fn ensure_document<'a>(&self, state: &'a mut ResolverState) -> Result<&'a IndexMap<String, Credential>, CredentialError> {
        if state.document.is_none() {
            state.document = Some(self.load_document()?);
        }
        Ok(state.document.get_or_insert_with(IndexMap::new))
    }
}

impl CredentialResolver for FileCredentialResolver {
    fn resolve(&self, tenant: &str) -> Result<Credential, CredentialError> {
        {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(credential) = state.resolved.get(tenant) {
                return Ok(credential.clone());
            }
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        // Another writer may have resolved the tenant while we waited.
        if let Some(credential) = state.resolved.get(tenant) {
            return Ok(credential.clone());
        }
        let raw = self
            .ensure_document(&mut state)?
            .get(tenant)
            .cloned()
            .ok_or_else(|| CredentialError::NotFound { tenant: tenant.to_string() })?;
        let credential = interpolate_credential(&raw).map_err(|source| CredentialError::Interpolation {
            tenant: tenant.to_string(),
            source,
        })?;
        debug!(tenant, "resolved tenant credential");
        state.resolved.insert(tenant.to_string(), credential.clone());
        Ok(credential)
    }

    fn tenants(&self) -> Result<Vec<String>, CredentialError> {
        {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(document) = &state.document {
                return Ok(document.keys().cloned().collect());
            }
        }
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        Ok(self.ensure_document(&mut state)?.keys().cloned().collect())
    }
}

fn interpolate_credential(raw: &Credential) -> Result<Credential, InterpolationError> {
    Ok(match raw {
        Credential::Basic { username, password } => Credential::Basic {
            username: interpolate_string(username)?,
            password: interpolate_string(password)?,
        },
        Credential::ApiKey(token) => Credential::ApiKey(interpolate_string(token)?),
    })
}
