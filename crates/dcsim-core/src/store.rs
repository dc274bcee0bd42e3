//! Result persistence
//!
//! One JSON document per phase under the output directory. Writes go to a
//! sibling `.tmp` file first and are renamed into place, so readers see
//! either the previous complete document or the new one.

use crate::error::StoreError;
use crate::types::{CanonicalResultDocument, PhaseId};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Directory of persisted phase documents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultStore {
    dir: PathBuf,
}

impl ResultStore {
    /// Create a store rooted at `dir`
    #[inline]
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Output directory
    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Location of a phase's document
    #[must_use]
    pub fn path_for(&self, phase: PhaseId) -> PathBuf {
        self.dir.join(phase.artifact_file_name())
    }

    /// Whether a document exists for the phase
    pub async fn exists(&self, phase: PhaseId) -> bool {
        tokio::fs::try_exists(self.path_for(phase))
            .await
            .unwrap_or(false)
    }

    /// Atomically replace a phase's document
    ///
    /// # Errors
    /// Returns error if the directory cannot be created or the write fails;
    /// the previous document is left untouched in that case
    pub async fn write(
        &self,
        phase: PhaseId,
        document: &CanonicalResultDocument,
    ) -> Result<PathBuf, StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StoreError::CreateDir {
                path: self.dir.clone(),
                source,
            })?;

        let mut payload = serde_json::to_vec_pretty(document)?;
        payload.push(b'\n');

        let path = self.path_for(phase);
        let tmp = path.with_extension("json.tmp");

        if let Err(source) = write_synced(&tmp, &payload).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StoreError::Write { path: tmp, source });
        }
        if let Err(source) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StoreError::Write { path, source });
        }

        tracing::info!(%phase, path = %path.display(), bytes = payload.len(), "results written");
        Ok(path)
    }

    /// Read a phase's document back
    ///
    /// # Errors
    /// Returns error if the file is missing or not a result document
    pub async fn load(&self, phase: PhaseId) -> Result<CanonicalResultDocument, StoreError> {
        let path = self.path_for(phase);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| StoreError::Read {
                path: path.clone(),
                source,
            })?;
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Decode { path, source })
    }
}

/// Write and fsync so a rename never exposes an empty file
async fn write_synced(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(payload).await?;
    file.sync_all().await
}
