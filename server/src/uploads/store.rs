use std::path::PathBuf;
use uuid::Uuid;

use crate::error::ChatError;

/// Maximum length of the extension kept from the client's file name.
const MAX_EXTENSION_LEN: usize = 8;

/// Extension used when the hint is unusable.
const FALLBACK_EXTENSION: &str = "bin";

/// Opaque blob storage keyed by generated reference names.
pub trait BlobStore: Send + Sync {
    /// Store `data` and return the reference name it can be fetched under.
    fn save(&self, data: &[u8], extension_hint: &str) -> Result<String, ChatError>;

    /// Delete a blob that nothing references any more.
    fn remove(&self, reference: &str) -> Result<(), ChatError>;
}

/// Blob store writing one file per attachment into a directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

/// Reduce a client-supplied extension to something safe for a file name.
fn sanitize_extension(hint: &str) -> String {
    let ext = hint.trim().to_ascii_lowercase();
    let valid = !ext.is_empty()
        && ext.len() <= MAX_EXTENSION_LEN
        && ext.chars().all(|c| c.is_ascii_alphanumeric());
    if valid {
        ext
    } else {
        FALLBACK_EXTENSION.to_string()
    }
}

impl BlobStore for FsBlobStore {
    fn save(&self, data: &[u8], extension_hint: &str) -> Result<String, ChatError> {
        std::fs::create_dir_all(&self.root)
            .map_err(|e| ChatError::Storage(format!("Failed to create uploads directory: {}", e)))?;

        let name = format!("{}.{}", Uuid::now_v7(), sanitize_extension(extension_hint));
        let path = self.root.join(&name);
        std::fs::write(&path, data)
            .map_err(|e| ChatError::Storage(format!("Failed to write {}: {}", path.display(), e)))?;

        tracing::debug!("Stored attachment {} ({} bytes)", name, data.len());
        Ok(name)
    }

    fn remove(&self, reference: &str) -> Result<(), ChatError> {
        // Only names produced by save() live directly under the root
        if reference.is_empty() || reference.contains(['/', '\\']) || reference.contains("..") {
            return Err(ChatError::Storage(format!("Invalid blob reference: {}", reference)));
        }
        let path = self.root.join(reference);
        std::fs::remove_file(&path)
            .map_err(|e| ChatError::Storage(format!("Failed to remove {}: {}", path.display(), e)))
    }
}
