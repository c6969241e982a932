//! # Render Store
//!
//! A two-tier artifact store for a document-rendering service: a local
//! filesystem cache in front of Azure Blob Storage, holding uploaded
//! templates and generated renders.
//!
//! - **Templates** are uploaded once and read many times; a local copy is
//!   a cache hit, a missing one is fetched from the templates container.
//! - **Renders** are single use; once served, the remote copy is deleted.
//! - Without a configured container an artifact class lives on local disk
//!   only and no remote call is made.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use render_store::{ArtifactStore, HeaderMap, StoreConfig};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StoreConfig::load();
//! let store = ArtifactStore::from_config(&config)?;
//!
//! // Persist an uploaded template
//! let id = store
//!     .write_template(&HeaderMap::new(), "invoice.odt", Path::new("/tmp/upload-1"))
//!     .await?;
//!
//! // Later: resolve it to a local file, fetching it if needed
//! let path = store.read_template(&id).await?;
//! println!("template at {}", path.display());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod storage;
pub mod store;

pub use cache::{LocalCache, Lookup};
pub use config::{ConfigProvider, RetryOptions, RetryPolicyType, StorageCredentials, StoreConfig};
pub use error::{ConfigError, RenderFailure, Result, StoreError};
pub use storage::{AzureClient, AzureContainer, BlobError, BlobStorage, MemoryStorage};
pub use store::{ArtifactStore, DEFAULT_CONTENT_TYPE, TEMPLATE_MIMETYPE_HEADER};

pub use reqwest::header::{HeaderMap, HeaderValue};

/// Get the library version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
