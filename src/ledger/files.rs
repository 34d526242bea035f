//! Copying files out of a running container.

use std::io::Read;
use std::sync::Arc;

use futures::StreamExt;
use tar::{Archive, EntryType};

use crate::ledger::controller::ContainerHandle;
use crate::ledger::error::{FileAccessError, RuntimeError};
use crate::ledger::runtime::ContainerRuntime;

/// Largest archive accepted from the runtime (64 MiB).
pub const MAX_ARCHIVE_BYTES: usize = 64 * 1024 * 1024;

/// Reads single files from a container through the runtime's archive API.
#[derive(Clone)]
pub struct ContainerFileAccessor {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ContainerFileAccessor {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Contents of the file at `path` inside the container.
    ///
    /// The archive is buffered until the stream completes; if the transport
    /// fails midway the partial buffer is dropped and an error returned.
    pub async fn read_file(
        &self,
        handle: &ContainerHandle,
        path: &str,
    ) -> Result<Vec<u8>, FileAccessError> {
        self.read_file_by_id(handle.id(), path).await
    }

    /// Same as [`read_file`](Self::read_file), for a container not owned by
    /// a controller in this process.
    pub async fn read_file_by_id(
        &self,
        container_id: &str,
        path: &str,
    ) -> Result<Vec<u8>, FileAccessError> {
        let stream_error = |reason: String| FileAccessError::Stream {
            container_id: container_id.to_string(),
            path: path.to_string(),
            reason,
        };

        let mut archive = Vec::new();
        let mut chunks = self.runtime.get_archive(container_id, path);
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) => {
                    if archive.len() + bytes.len() > MAX_ARCHIVE_BYTES {
                        return Err(stream_error(format!(
                            "archive exceeds {MAX_ARCHIVE_BYTES} bytes"
                        )));
                    }
                    archive.extend_from_slice(&bytes);
                }
                Err(RuntimeError::NotFound(_)) => {
                    return Err(FileAccessError::FileNotFound {
                        container_id: container_id.to_string(),
                        path: path.to_string(),
                    });
                }
                Err(e) => return Err(stream_error(e.to_string())),
            }
        }

        tracing::debug!(
            container = %container_id,
            "Fetched {} archive bytes for {}",
            archive.len(),
            path
        );

        match first_file(&archive) {
            Ok(Some(contents)) => Ok(contents),
            Ok(None) => Err(FileAccessError::FileNotFound {
                container_id: container_id.to_string(),
                path: path.to_string(),
            }),
            Err(e) => Err(stream_error(format!("invalid archive: {e}"))),
        }
    }

    /// Contents of the file at `path`, decoded as UTF-8.
    pub async fn read_to_string(
        &self,
        handle: &ContainerHandle,
        path: &str,
    ) -> Result<String, FileAccessError> {
        let bytes = self.read_file(handle, path).await?;
        String::from_utf8(bytes).map_err(|_| FileAccessError::NotUtf8 {
            container_id: handle.id().to_string(),
            path: path.to_string(),
        })
    }
}

/// Contents of the first regular file in a tar archive, if any.
///
/// The declared entry size is checked against the buffered archive before
/// anything is read.
fn first_file(archive: &[u8]) -> std::io::Result<Option<Vec<u8>>> {
    let limit = archive.len().min(MAX_ARCHIVE_BYTES) as u64;
    let mut archive = Archive::new(archive);
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !matches!(entry.header().entry_type(), EntryType::Regular | EntryType::Continuous) {
            continue;
        }
        if entry.size() > limit {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("entry declares {} bytes, archive holds {limit}", entry.size()),
            ));
        }
        let mut contents = Vec::new();
        entry.by_ref().take(limit).read_to_end(&mut contents)?;
        return Ok(Some(contents));
    }
    Ok(None)
}
