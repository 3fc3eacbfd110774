//! Transport layer for dsq data source calls.
//!
//! This crate owns everything between a composed request and a raw reply:
//!
//! - Resolving and validating endpoint base URLs ([`Environment`],
//!   [`validate_base_url`])
//! - Loading [`ClientSettings`] from the config directory
//! - Executing requests with bounded retry and backoff ([`Transport`])
//! - Encoding and decoding the legacy SOAP call ([`soap`])
//!
//! # Example
//!
//! ```ignore
//! use dsq_api::{ClientSettings, HttpRequest};
//! use reqwest::Method;
//!
//! async fn ping() -> dsq_types::Result<()> {
//!     let settings = ClientSettings::load()?;
//!     let transport = settings.transport();
//!     let request = HttpRequest::new(Method::GET, format!("{}/datasources/search?name=", settings.modern_base_url()?));
//!     let reply = transport.execute(&request, &settings.retry).await?;
//!     println!("status: {}", reply.status);
//!     Ok(())
//! }
//! ```

mod endpoint;
mod settings;
pub mod soap;
mod transport;

pub use endpoint::{Environment, validate_base_url};
pub use settings::{CONFIG_PATH_ENV, ClientSettings, API_BASE_ENV};
pub use transport::{API_KEY_HEADER, HttpRequest, RawReply, RequestBody, Transport, TransportSettings};
