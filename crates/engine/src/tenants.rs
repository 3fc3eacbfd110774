//! Credential lookups moved off the async runtime.
//!
//! Resolving a tenant may read the credentials document and the OS keychain,
//! so the clients run it on the blocking pool.

use std::sync::Arc;

use dsq_types::{Credential, DataSourceError};
use dsq_util::CredentialResolver;
use tokio::task;

pub(crate) async fn resolve_credential(
    resolver: &Arc<dyn CredentialResolver>,
    tenant: &str,
) -> Result<Credential, DataSourceError> {
    let resolver = Arc::clone(resolver);
    let tenant = tenant.to_string();
    let credential = task::spawn_blocking(move || resolver.resolve(&tenant))
        .await
        .map_err(|error| DataSourceError::configuration(format!("credential lookup did not complete: {error}")))??;
    Ok(credential)
}

pub(crate) async fn configured_tenants(resolver: &Arc<dyn CredentialResolver>) -> Result<Vec<String>, DataSourceError> {
    let resolver = Arc::clone(resolver);
    let tenants = task::spawn_blocking(move || resolver.tenants())
        .await
        .map_err(|error| DataSourceError::configuration(format!("tenant listing did not complete: {error}")))??;
    Ok(tenants)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsq_util::FileCredentialResolver;
    use std::io::Write;

    #[tokio::test(flavor = "current_thread")]
    async fn resolves_from_disk_without_blocking_the_runtime() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{"Grand Haven": {{"api_user": "user", "api_pass": "pass"}}}}"#).expect("write");
        let resolver: Arc<dyn CredentialResolver> = Arc::new(FileCredentialResolver::new(file.path()));

        let credential = resolve_credential(&resolver, "Grand Haven").await.unwrap();
        assert_eq!(credential, Credential::basic("user", "pass"));
        assert_eq!(configured_tenants(&resolver).await.unwrap(), vec!["Grand Haven".to_string()]);

        let missing = resolve_credential(&resolver, "Nowhere").await.unwrap_err();
        assert!(matches!(missing, DataSourceError::Configuration { .. }));
    }
}
