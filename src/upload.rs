//! Upload handling: validate, store, index, preview.
//!
//! An upload runs these steps in order:
//!
//! 1. reject names whose extension is not `txt`, `pdf`, or `zip`;
//! 2. sanitize the name into the storage key ([`secure_filename`]);
//! 3. write a transient copy under `upload_dir`;
//! 4. put the copy into the [`ObjectStore`];
//! 5. index it and extract the preview text (blocking pool);
//! 6. remove the transient copy, whatever the outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::extract::{self, ExtractError};
use crate::index::{IndexError, Indexer, IngestStats};
use crate::models::DocumentKind;
use crate::storage::{ObjectStore, StorageError};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("File not allowed")]
    NotAllowed,
    #[error("No file part in the request")]
    MissingFile,
    #[error("Invalid file name: '{0}'")]
    InvalidName(String),
    #[error("ZIP file is empty")]
    EmptyArchive,
    #[error("S3 upload failed for file '{name}': {source}")]
    Storage {
        name: String,
        #[source]
        source: StorageError,
    },
    #[error("Error uploading and indexing file '{name}': {message}")]
    Index { name: String, message: String },
}

impl UploadError {
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            UploadError::NotAllowed
                | UploadError::MissingFile
                | UploadError::InvalidName(_)
                | UploadError::EmptyArchive
        )
    }

    fn index(name: &str, message: impl std::fmt::Display) -> Self {
        UploadError::Index {
            name: name.to_string(),
            message: message.to_string(),
        }
    }
}

/// True when `name` has one of the accepted extensions (case-insensitive).
pub fn allowed_file(name: &str) -> bool {
    DocumentKind::from_name(name).is_some()
}

/// Reduces a client-supplied name to a flat, ASCII-only file name.
///
/// Path separators become spaces, runs of whitespace become `_`, anything
/// outside `[A-Za-z0-9_.-]` is dropped, and leading/trailing `.`/`_` are
/// stripped. May return an empty string.
pub fn secure_filename(name: &str) -> String {
    let ascii: String = name
        .chars()
        .filter(|c| c.is_ascii())
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    kept.trim_matches(|c| c == '.' || c == '_').to_string()
}

/// Result of a successful upload.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub key: String,
    pub preview: String,
    pub stats: IngestStats,
}

pub struct UploadService {
    store: Arc<dyn ObjectStore>,
    indexer: Arc<Indexer>,
    upload_dir: PathBuf,
}

impl UploadService {
    pub fn new(store: Arc<dyn ObjectStore>, indexer: Arc<Indexer>, upload_dir: PathBuf) -> Self {
        Self {
            store,
            indexer,
            upload_dir,
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub async fn upload(&self, filename: &str, bytes: &[u8]) -> Result<UploadOutcome, UploadError> {
        if filename.is_empty() {
            return Err(UploadError::MissingFile);
        }
        if !allowed_file(filename) {
            return Err(UploadError::NotAllowed);
        }
        let key = secure_filename(filename);
        if !allowed_file(&key) {
            return Err(UploadError::InvalidName(filename.to_string()));
        }

        // Per-request directory so concurrent uploads of one name don't collide.
        let staging = self.upload_dir.join(uuid::Uuid::new_v4().to_string());
        let result = self.stage_and_process(&staging, &key, bytes).await;
        if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %staging.display(), error = %e, "failed to remove upload copy");
            }
        }
        result
    }

    async fn stage_and_process(
        &self,
        staging: &Path,
        key: &str,
        bytes: &[u8],
    ) -> Result<UploadOutcome, UploadError> {
        tokio::fs::create_dir_all(staging)
            .await
            .map_err(|e| UploadError::index(key, e))?;
        let local_path = staging.join(key);
        tokio::fs::write(&local_path, bytes)
            .await
            .map_err(|e| UploadError::index(key, e))?;

        self.store
            .put(&local_path, key)
            .await
            .map_err(|source| UploadError::Storage {
                name: key.to_string(),
                source,
            })?;

        let indexer = self.indexer.clone();
        let path = local_path.clone();
        let owned_key = key.to_string();
        let indexed = tokio::task::spawn_blocking(move || -> Result<(IngestStats, String), IndexError> {
            let stats = indexer.ingest(std::slice::from_ref(&path))?;
            let bytes = std::fs::read(&path).map_err(|source| IndexError::Io {
                path: path.clone(),
                source,
            })?;
            let kind = DocumentKind::for_key(&owned_key);
            let preview = extract::extract_preview(&owned_key, kind, &bytes).map_err(|source| {
                IndexError::Extract {
                    name: owned_key.clone(),
                    source,
                }
            })?;
            Ok((stats, preview))
        })
        .await
        .map_err(|e| UploadError::index(key, e))?;

        match indexed {
            Ok((stats, preview)) => {
                tracing::info!(
                    key,
                    documents = stats.documents,
                    passages = stats.passages,
                    "uploaded and indexed file"
                );
                Ok(UploadOutcome {
                    key: key.to_string(),
                    preview,
                    stats,
                })
            }
            Err(IndexError::Extract {
                source: ExtractError::EmptyArchive,
                ..
            }) => {
                tracing::warn!(key, "stored empty archive; nothing indexed");
                Err(UploadError::EmptyArchive)
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "file stored but indexing failed");
                Err(UploadError::index(key, e))
            }
        }
    }
}
