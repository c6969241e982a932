//! The artifact store: local cache first, remote container as backup
//!
//! Every operation follows the same shape. When no container is configured
//! for an artifact class the local path is authoritative and nothing leaves
//! the machine. When one is configured the container is the source of truth,
//! consulted when the local copy is missing (templates) or always (renders,
//! which are removed remotely once served).

use bytes::Bytes;
use reqwest::header::HeaderMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::cache::{LocalCache, Lookup, validate_id};
use crate::config::StoreConfig;
use crate::error::{RenderFailure, Result, StoreError};
use crate::storage::{AzureClient, BlobStorage};

/// Request header carrying the uploaded template's content type
pub const TEMPLATE_MIMETYPE_HEADER: &str = "carbone-template-mimetype";

/// Content type used when none is given
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Two-tier store for templates and renders
///
/// Share it behind an `Arc`; operations take `&self` and hold no locks.
pub struct ArtifactStore {
    templates: LocalCache,
    renders: LocalCache,
    template_storage: Option<Arc<dyn BlobStorage>>,
    render_storage: Option<Arc<dyn BlobStorage>>,
}

impl ArtifactStore {
    /// Local-only store over two directories
    pub fn new(template_dir: impl Into<PathBuf>, render_dir: impl Into<PathBuf>) -> Self {
        Self {
            templates: LocalCache::new(template_dir),
            renders: LocalCache::new(render_dir),
            template_storage: None,
            render_storage: None,
        }
    }

    /// Back templates with a remote container
    pub fn with_template_storage(mut self, storage: Arc<dyn BlobStorage>) -> Self {
        self.template_storage = Some(storage);
        self
    }

    /// Back renders with a remote container
    pub fn with_render_storage(mut self, storage: Arc<dyn BlobStorage>) -> Self {
        self.render_storage = Some(storage);
        self
    }

    /// Build the store from configuration.
    ///
    /// Without `storageCredentials` no remote client is created and every
    /// operation resolves local paths only, even when containers are named.
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        let mut store = Self::new(config.template_dir(), config.render_dir());

        let client = AzureClient::from_config(config)?;
        let containers = [
            config.templates_container.as_deref(),
            config.renders_container.as_deref(),
        ];

        match client {
            Some(client) => {
                info!(
                    "blob storage at {} (templates: {:?}, renders: {:?})",
                    client.endpoint(),
                    containers[0],
                    containers[1]
                );
                if let Some(name) = containers[0] {
                    store = store.with_template_storage(Arc::new(client.container(name)?));
                }
                if let Some(name) = containers[1] {
                    store = store.with_render_storage(Arc::new(client.container(name)?));
                }
            }
            None if containers.iter().any(Option::is_some) => {
                warn!(
                    "containers configured (templates: {:?}, renders: {:?}) but no storage \
                     credentials, serving artifacts from local disk only",
                    containers[0], containers[1]
                );
            }
            None => info!("no storage credentials, serving artifacts from local disk only"),
        }

        Ok(store)
    }

    pub fn template_dir(&self) -> &Path {
        self.templates.root()
    }

    pub fn render_dir(&self) -> &Path {
        self.renders.root()
    }

    pub fn has_template_storage(&self) -> bool {
        self.template_storage.is_some()
    }

    pub fn has_render_storage(&self) -> bool {
        self.render_storage.is_some()
    }

    /// Persist an uploaded template.
    ///
    /// Uploads `source` under `template_id` when a templates container is
    /// configured; the content type comes from the
    /// [`TEMPLATE_MIMETYPE_HEADER`] request header.
    pub async fn write_template(
        &self,
        headers: &HeaderMap,
        template_id: &str,
        source: &Path,
    ) -> Result<String> {
        let Some(storage) = &self.template_storage else {
            debug!("no templates container, keeping template {} local", template_id);
            return Ok(template_id.to_string());
        };
        validate_id(template_id)?;

        let content_type = headers
            .get(TEMPLATE_MIMETYPE_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE);

        let data = fs::read(source).await?;
        let size = data.len();
        storage
            .put(template_id, Bytes::from(data), content_type)
            .await
            .map_err(StoreError::from_upload)?;

        info!(
            "uploaded template {} to {} ({} bytes, {})",
            template_id,
            storage.container(),
            size,
            content_type
        );
        Ok(template_id.to_string())
    }

    /// Local path of a template, fetching it from the container on a miss
    pub async fn read_template(&self, template_id: &str) -> Result<PathBuf> {
        let Some(storage) = &self.template_storage else {
            return self.templates.path_for(template_id);
        };

        match self.templates.lookup(template_id).await? {
            Lookup::Hit(path) => {
                debug!("template {} served from local cache", template_id);
                Ok(path)
            }
            Lookup::Miss(path) => {
                let size = storage.download_to_file(template_id, &path).await?;
                debug!(
                    "template {} fetched from {} ({} bytes)",
                    template_id,
                    storage.container(),
                    size
                );
                Ok(path)
            }
        }
    }

    /// Delete a template from the container.
    ///
    /// The local file is left in place; only its path is returned.
    pub async fn delete_template(&self, template_id: &str) -> Result<PathBuf> {
        let path = self.templates.path_for(template_id)?;
        let Some(storage) = &self.template_storage else {
            return Ok(path);
        };

        storage.delete(template_id).await?;
        info!("deleted template {} from {}", template_id, storage.container());
        Ok(path)
    }

    /// Local path of a render. The remote copy is purged once served,
    /// whether or not the file was already local.
    pub async fn read_render(&self, render_id: &str) -> Result<PathBuf> {
        let Some(storage) = &self.render_storage else {
            return self.renders.path_for(render_id);
        };

        let path = match self.renders.lookup(render_id).await? {
            Lookup::Hit(path) => {
                debug!("render {} served from local cache", render_id);
                path
            }
            Lookup::Miss(path) => {
                let size = storage.download_to_file(render_id, &path).await?;
                debug!(
                    "render {} fetched from {} ({} bytes)",
                    render_id,
                    storage.container(),
                    size
                );
                path
            }
        };

        storage.delete(render_id).await?;
        debug!("render {} purged from {}", render_id, storage.container());
        Ok(path)
    }

    /// Persist a finished render.
    ///
    /// A failed render is handed back untouched. Otherwise the file at
    /// `report_path` is uploaded under `report_name`, or under the file name
    /// of `report_path` when the name is empty.
    pub async fn after_render<E>(
        &self,
        outcome: std::result::Result<(), E>,
        report_path: &Path,
        report_name: Option<&str>,
    ) -> Result<()>
    where
        E: Into<RenderFailure>,
    {
        if let Err(e) = outcome {
            return Err(StoreError::Render(e.into()));
        }
        let Some(storage) = &self.render_storage else {
            return Ok(());
        };

        let name = match report_name.filter(|name| !name.is_empty()) {
            Some(name) => name.to_string(),
            None => report_path
                .file_name()
                .and_then(|name| name.to_str())
                .map(str::to_string)
                .ok_or_else(|| StoreError::InvalidId(report_path.display().to_string()))?,
        };
        validate_id(&name)?;

        let data = fs::read(report_path).await?;
        let size = data.len();
        storage
            .put(&name, Bytes::from(data), DEFAULT_CONTENT_TYPE)
            .await
            .map_err(StoreError::from_upload)?;

        info!("uploaded render {} to {} ({} bytes)", name, storage.container(), size);
        Ok(())
    }
}

impl std::fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStore")
            .field("template_dir", &self.templates.root())
            .field("render_dir", &self.renders.root())
            .field(
                "templates_container",
                &self.template_storage.as_ref().map(|s| s.container().to_string()),
            )
            .field(
                "renders_container",
                &self.render_storage.as_ref().map(|s| s.container().to_string()),
            )
            .finish()
    }
}
