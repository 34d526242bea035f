//! Image references and local image availability.

use std::fmt;
use std::sync::Arc;

use futures::StreamExt;

use crate::ledger::error::{LedgerError, Result};
use crate::ledger::runtime::ContainerRuntime;

/// A fully qualified image reference (`name:tag` or `name@digest`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    name: String,
    version: String,
}

impl ImageRef {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Whether the version is a content digest rather than a tag.
    pub fn is_digest(&self) -> bool {
        self.version.starts_with("sha256:")
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_digest() {
            write!(f, "{}@{}", self.name, self.version)
        } else {
            write!(f, "{}:{}", self.name, self.version)
        }
    }
}

/// Makes sure an image is present locally, pulling it when absent.
#[derive(Clone)]
pub struct ImageResolver {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ImageResolver {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Ensure `image` exists locally. Idempotent; pull failures are not retried.
    pub async fn ensure_image(&self, image: &ImageRef) -> Result<()> {
        let reference = image.to_string();

        let present = self
            .runtime
            .image_exists(&reference)
            .await
            .map_err(|e| LedgerError::ImagePull {
                image: reference.clone(),
                reason: e.to_string(),
            })?;
        if present {
            tracing::debug!("Image '{}' exists locally", reference);
            return Ok(());
        }

        tracing::info!("Pulling image: {}", reference);

        let mut progress = self.runtime.pull_image(&reference);
        while let Some(event) = progress.next().await {
            match event {
                Ok(p) => tracing::trace!(image = %reference, "Pull status: {}", p),
                Err(e) => {
                    return Err(LedgerError::ImagePull {
                        image: reference,
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!("Pulled image: {}", reference);
        Ok(())
    }
}
