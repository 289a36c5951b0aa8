//! Item catalog service.
//!
//! [`CatalogService`] owns every mutation of catalog items. It validates
//! input, bounds each store call with a timeout, retries transient store
//! failures, and turns the store's tagged decrement results into
//! [`CatalogError`]s.

pub mod error;
pub mod policy;
pub mod service;

pub use error::{CatalogError, Result};
pub use policy::StorePolicy;
pub use service::CatalogService;
