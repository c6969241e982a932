//! Azure Blob Storage implementation
//!
//! One [`AzureContainer`] per container, each backed by an
//! `object_store` [`MicrosoftAzure`] client. The SDK owns the wire protocol,
//! Shared Key signing and the retry loop; this module maps its results onto
//! [`BlobError`].

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use object_store::azure::{MicrosoftAzure, MicrosoftAzureBuilder};
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::retry::{client_options, retry_config};
use super::{BlobError, BlobStorage, PartialFile};
use crate::config::{RetryOptions, StorageCredentials, StoreConfig};

/// Connection settings for one storage account
///
/// Containers are opened from it with [`AzureClient::container`].
#[derive(Clone)]
pub struct AzureClient {
    credentials: StorageCredentials,
    retry: RetryOptions,
    endpoint: Option<String>,
}

impl AzureClient {
    /// Settings for the account in `credentials`.
    ///
    /// `endpoint` overrides `https://<account>.blob.core.windows.net`, e.g.
    /// for the Azurite emulator.
    pub fn new(
        credentials: &StorageCredentials,
        retry: RetryOptions,
        endpoint: Option<&str>,
    ) -> Result<Self, BlobError> {
        if credentials.account_name.is_empty() {
            return Err(BlobError::Configuration(
                "storage account name is empty".to_string(),
            ));
        }

        Ok(Self {
            credentials: credentials.clone(),
            retry,
            endpoint: endpoint.map(str::to_string),
        })
    }

    /// Build a client from the store configuration, if it carries credentials
    pub fn from_config(config: &StoreConfig) -> Result<Option<Self>, BlobError> {
        let Some(credentials) = &config.storage_credentials else {
            return Ok(None);
        };

        Self::new(
            credentials,
            config.storage_retry_options.unwrap_or_default(),
            config.storage_endpoint.as_deref(),
        )
        .map(Some)
    }

    /// Open one container. Fails when the account key or endpoint is invalid.
    pub fn container(&self, name: impl Into<String>) -> Result<AzureContainer, BlobError> {
        let name = name.into();
        let allow_http = self
            .endpoint
            .as_deref()
            .is_some_and(|endpoint| endpoint.starts_with("http://"));
        let mut builder = MicrosoftAzureBuilder::new()
            .with_account(&self.credentials.account_name)
            .with_access_key(&self.credentials.account_key)
            .with_container_name(&name)
            .with_retry(retry_config(&self.retry))
            .with_client_options(client_options(&self.retry, allow_http));
        if let Some(endpoint) = &self.endpoint {
            builder = builder.with_endpoint(endpoint.clone());
        }

        let store = builder.build().map_err(|e| {
            BlobError::Configuration(format!("Failed to open container '{}': {}", name, e))
        })?;

        Ok(AzureContainer {
            store: Arc::new(store),
            name,
        })
    }

    pub fn account(&self) -> &str {
        &self.credentials.account_name
    }

    /// Blob service base URL
    pub fn endpoint(&self) -> String {
        self.endpoint.clone().unwrap_or_else(|| {
            format!("https://{}.blob.core.windows.net", self.credentials.account_name)
        })
    }

    pub fn retry_options(&self) -> &RetryOptions {
        &self.retry
    }
}

impl std::fmt::Debug for AzureClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureClient")
            .field("account", &self.credentials.account_name)
            .field("endpoint", &self.endpoint())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// One container of an [`AzureClient`] account
#[derive(Debug, Clone)]
pub struct AzureContainer {
    store: Arc<MicrosoftAzure>,
    name: String,
}

impl AzureContainer {
    /// Validate blob key format
    fn validate_key(&self, key: &str) -> Result<(), BlobError> {
        if key.is_empty() || key.len() > 1024 {
            return Err(BlobError::InvalidKey(
                "Key must be between 1 and 1024 characters".into(),
            ));
        }

        if key.starts_with('/') || key.ends_with('/') {
            return Err(BlobError::InvalidKey(
                "Key cannot start or end with '/'".into(),
            ));
        }

        Ok(())
    }

    fn object_path(&self, key: &str) -> Result<ObjectPath, BlobError> {
        self.validate_key(key)?;
        Ok(ObjectPath::from(key))
    }
}

#[async_trait]
impl BlobStorage for AzureContainer {
    fn container(&self) -> &str {
        &self.name
    }

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), BlobError> {
        let path = self.object_path(key)?;
        debug!("PUT {}/{} ({} bytes)", self.name, key, data.len());

        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        let mut options = PutOptions::default();
        options.attributes = attributes;

        self.store
            .put_opts(&path, PutPayload::from(data), options)
            .await
            .map_err(|e| classify(e, key))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, BlobError> {
        let path = self.object_path(key)?;
        debug!("GET {}/{}", self.name, key);

        let result = self.store.get(&path).await.map_err(|e| classify(e, key))?;
        result.bytes().await.map_err(|e| classify(e, key))
    }

    async fn download_to_file(&self, key: &str, path: &Path) -> Result<u64, BlobError> {
        let object_path = self.object_path(key)?;
        debug!("GET {}/{} -> {}", self.name, key, path.display());

        let result = self
            .store
            .get(&object_path)
            .await
            .map_err(|e| classify(e, key))?;

        let mut partial = PartialFile::create(path).await?;
        let mut written = 0u64;
        let mut stream = result.into_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| classify(e, key))?;
            partial.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        partial.commit().await?;

        debug!("downloaded {}/{} ({} bytes)", self.name, key, written);
        Ok(written)
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        let path = self.object_path(key)?;
        debug!("DELETE {}/{}", self.name, key);

        self.store.delete(&path).await.map_err(|e| classify(e, key))
    }
}

/// Map an SDK error onto the blob error taxonomy
fn classify(err: object_store::Error, key: &str) -> BlobError {
    match err {
        object_store::Error::NotFound { .. } => BlobError::NotFound(key.to_string()),
        object_store::Error::PermissionDenied { source, .. }
        | object_store::Error::Unauthenticated { source, .. } => {
            BlobError::AccessDenied(error_chain(source.as_ref()))
        }
        other => {
            let status = response_status(&other);
            if status == Some(403) {
                return BlobError::AccessDenied(error_chain(&other));
            }
            BlobError::Backend {
                status,
                message: error_chain(&other),
            }
        }
    }
}

/// HTTP status of a failed request, when the SDK reports one
fn response_status(err: &(dyn std::error::Error + 'static)) -> Option<u16> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(status) = e
            .downcast_ref::<reqwest::Error>()
            .and_then(reqwest::Error::status)
        {
            return Some(status.as_u16());
        }
        current = e.source();
    }
    // The SDK's own retry error only exposes the status in its message
    status_in_message(&error_chain(err))
}

fn status_in_message(message: &str) -> Option<u16> {
    message.match_indices("status ").find_map(|(start, word)| {
        let rest = &message[start + word.len()..];
        let rest = rest.strip_prefix("code: ").unwrap_or(rest);
        let digits = rest.get(..3)?;
        if rest[3..].starts_with(|c: char| c.is_ascii_digit()) {
            return None;
        }
        digits
            .parse::<u16>()
            .ok()
            .filter(|status| (100..600).contains(status))
    })
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> StorageCredentials {
        StorageCredentials {
            account_name: "myaccount".to_string(),
            account_key: "c2VjcmV0LWtleQ==".to_string(),
        }
    }

    #[test]
    fn test_default_endpoint() {
        let client = AzureClient::new(&credentials(), RetryOptions::default(), None).unwrap();
        assert_eq!(client.endpoint(), "https://myaccount.blob.core.windows.net");
        assert_eq!(client.account(), "myaccount");

        let container = client.container("renders").unwrap();
        assert_eq!(container.container(), "renders");
    }

    #[test]
    fn test_key_validation() {
        let client = AzureClient::new(&credentials(), RetryOptions::default(), None).unwrap();
        let container = client.container("templates").unwrap();

        assert!(container.object_path("invoice.odt").is_ok());
        assert!(container.object_path("").is_err());
        assert!(container.object_path("/starts-with-slash").is_err());
        assert!(container.object_path("ends-with-slash/").is_err());
        assert!(container.object_path(&"x".repeat(1025)).is_err());
    }

    #[test]
    fn test_from_config_without_credentials() {
        let config = StoreConfig::default();
        assert!(AzureClient::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn test_empty_account_is_rejected() {
        let credentials = StorageCredentials {
            account_name: String::new(),
            account_key: "c2VjcmV0LWtleQ==".to_string(),
        };
        let result = AzureClient::new(&credentials, RetryOptions::default(), None);
        assert!(matches!(result, Err(BlobError::Configuration(_))));
    }

    #[test]
    fn test_invalid_account_key_fails_on_open() {
        let credentials = StorageCredentials {
            account_name: "myaccount".to_string(),
            account_key: "%%% not base64 %%%".to_string(),
        };
        let client = AzureClient::new(&credentials, RetryOptions::default(), None).unwrap();
        assert!(matches!(
            client.container("templates"),
            Err(BlobError::Configuration(_))
        ));
    }

    #[test]
    fn test_debug_hides_account_key() {
        let client = AzureClient::new(&credentials(), RetryOptions::default(), None).unwrap();
        assert!(!format!("{:?}", client).contains("c2VjcmV0LWtleQ=="));
    }

    #[test]
    fn test_classify_not_found() {
        let err = object_store::Error::NotFound {
            path: "templates/invoice.odt".to_string(),
            source: "BlobNotFound".into(),
        };
        assert!(matches!(classify(err, "invoice.odt"), BlobError::NotFound(key) if key == "invoice.odt"));
    }

    #[test]
    fn test_classify_permission_denied() {
        let err = object_store::Error::PermissionDenied {
            path: "templates/invoice.odt".to_string(),
            source: "AuthorizationPermissionMismatch".into(),
        };
        match classify(err, "invoice.odt") {
            BlobError::AccessDenied(message) => {
                assert!(message.contains("AuthorizationPermissionMismatch"))
            }
            other => panic!("expected AccessDenied, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_generic_with_status() {
        let err = object_store::Error::Generic {
            store: "MicrosoftAzure",
            source: "Server error, body contains Error, with status 503 Service Unavailable: ServerBusy"
                .into(),
        };
        match classify(err, "report.pdf") {
            BlobError::Backend { status, message } => {
                assert_eq!(status, Some(503));
                assert!(message.contains("ServerBusy"));
            }
            other => panic!("expected Backend, got {:?}", other),
        }
    }

    #[test]
    fn test_status_in_message() {
        assert_eq!(status_in_message("Client error with status 409 Conflict"), Some(409));
        assert_eq!(
            status_in_message("Server returned non-2xx status code: 502 Bad Gateway"),
            Some(502)
        );
        assert_eq!(status_in_message("status 5000"), None);
        assert_eq!(status_in_message("status unknown"), None);
        assert_eq!(status_in_message("status 999"), None);
        assert_eq!(status_in_message("connection refused"), None);
    }

    #[test]
    fn test_classify_generic_is_backend() {
        let err = object_store::Error::Generic {
            store: "MicrosoftAzure",
            source: "connection refused".into(),
        };
        match classify(err, "invoice.odt") {
            BlobError::Backend { status, message } => {
                assert_eq!(status, None);
                assert!(message.contains("connection refused"));
            }
            other => panic!("expected Backend, got {:?}", other),
        }
    }
}
