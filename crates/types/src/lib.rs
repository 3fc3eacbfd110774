//! Shared type definitions for dsq.
//!
//! Everything that crosses a crate boundary lives here: the call formats and
//! field type tags used by the query engine, credentials, retry
//! configuration, the normalized [`Response`], and the [`DataSourceError`]
//! taxonomy returned by every fallible operation.

mod credential;
mod error;
mod format;
mod response;
mod retry;

pub use credential::Credential;
pub use error::{DataSourceError, RemoteErrorEntry};
pub use format::{CallFormat, FieldType, OtherKind};
pub use response::{Response, ResponseWarning};
pub use retry::RetryPolicy;

use indexmap::IndexMap;
use serde_json::Value;

/// Ordered field name to value mapping used for query inputs and templates.
pub type FieldMap = IndexMap<String, Value>;

/// One normalized result row, keyed by column name in column order.
pub type Row = IndexMap<String, Value>;

/// Convenience alias for results carrying a [`DataSourceError`].
pub type Result<T, E = DataSourceError> = std::result::Result<T, E>;
