//! # dsq engine
//!
//! The typed query and response engine behind dsq. It infers field types
//! from first-seen sample values, keeps every later mutation consistent with
//! those types, composes request bodies for the two wire formats and turns
//! replies from either protocol into one [`Response`](dsq_types::Response)
//! shape.
//!
//! ## Usage
//!
//! ```rust
//! use dsq_engine::QueryInput;
//! use serde_json::json;
//!
//! let mut query = QueryInput::builder(8566)
//!     .call_format(2)
//!     .field("Part_No", "A-1")
//!     .field("Active", 1)
//!     .build()?;
//!
//! query.set("Active", "false");
//! query.reconcile()?;
//! assert_eq!(query.composed_body(), &json!({"Part_No": "A-1", "Active": false}));
//! # Ok::<(), dsq_types::DataSourceError>(())
//! ```
//!
//! ## Architecture
//!
//! - **`registry`**: Type inference and the per-query type registry
//! - **`query`**: Field storage, reconciliation, purge and body composition
//! - **`templates`**: Default field sets keyed by identifier
//! - **`classify`**: Modern reply classification
//! - **`legacy`**: Parallel-string encoding and the SOAP adapter
//! - **`client`**: Modern endpoint client and tenant access listing
//! - **`rest`**: Generic developer API calls fed by the same field maps

pub mod classify;
pub mod client;
pub mod legacy;
pub mod query;
pub mod registry;
pub mod rest;
mod tenants;
pub mod templates;

pub use classify::ResponseClassifier;
pub use client::{AccessReport, DataSourceClient, TenantFailure};
pub use legacy::{LegacyDataSourceClient, LegacyEncoding, LegacyTransport, SoapTransport};
pub use query::{QueryInput, QueryInputBuilder, RESERVED_NAMES, compose};
pub use registry::TypeRegistry;
pub use rest::{ApiCall, ApiClient, ApiPayload};
pub use templates::{DirectoryTemplateStore, MemoryTemplateStore, TemplateStore};
