use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};

use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::debug;

use crate::{
    blob::{BlobAccess, BlobAttributes},
    validate_key,
    Blob,
    BlobError,
    BlobResult,
};

/// Blobs stored as plain files below `<root>/<directory_key>`.
pub(crate) struct LocalBackend {
    root: PathBuf,
    directory_key: String,
}

impl LocalBackend {
    pub fn new(local_root: PathBuf, directory_key: &str) -> BlobResult<Self> {
        validate_key(directory_key)?;
        let root = local_root.join(directory_key);
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            directory_key: directory_key.to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> BlobResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    pub async fn blob(&self, key: &str) -> BlobResult<Option<Blob>> {
        let path = self.path_for(key)?;
        let metadata = match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Ok(None),
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let modified = metadata.modified().ok();
        let mtime_secs = modified
            .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let attributes = BlobAttributes {
            etag: Some(format!("\"{:x}-{:x}\"", mtime_secs, metadata.len())),
            last_modified: modified.map(DateTime::<Utc>::from),
            content_length: Some(metadata.len()),
            created_at: metadata.created().ok().map(DateTime::<Utc>::from),
        };

        Ok(Some(Blob {
            key: key.to_string(),
            attributes,
            access: BlobAccess::Local {
                path,
                internal_path: format!("/{}/{}", self.directory_key, key),
            },
        }))
    }

    pub async fn copy_in(&self, source: &Path, key: &str) -> BlobResult<()> {
        let destination = self.path_for(key)?;
        debug!(key, source = %source.display(), "copying file into local blob store");
        write_atomically(source, &destination).await
    }

    pub async fn copy_between_keys(&self, source_key: &str, destination_key: &str) -> BlobResult<()> {
        let source = self.path_for(source_key)?;
        let destination = self.path_for(destination_key)?;
        if !fs::try_exists(&source).await? {
            return Err(BlobError::NotFound {
                key: source_key.to_string(),
            });
        }
        write_atomically(&source, &destination).await
    }

    pub async fn delete(&self, key: &str) -> BlobResult<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        }
        self.prune_empty_parents(&path).await;
        Ok(())
    }

    pub async fn delete_prefix(&self, prefix: &str) -> BlobResult<()> {
        let prefix = prefix.trim_end_matches('/');
        if prefix.is_empty() {
            let mut entries = fs::read_dir(&self.root).await?;
            while let Some(entry) = entries.next_entry().await? {
                remove_entry(&entry.path()).await?;
            }
            return Ok(());
        }

        let path = self.path_for(prefix)?;
        match remove_entry(&path).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        }
        self.prune_empty_parents(&path).await;
        Ok(())
    }

    pub async fn download(&self, key: &str, destination: &Path) -> BlobResult<()> {
        let path = self.path_for(key)?;
        match fs::copy(&path, destination).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(BlobError::NotFound {
                key: key.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Removes directories left empty by a deletion, up to the store root.
    async fn prune_empty_parents(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            if fs::remove_dir(dir).await.is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

async fn remove_entry(path: &Path) -> std::io::Result<()> {
    let metadata = fs::symlink_metadata(path).await?;
    if metadata.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    }
}

/// Copies `source` next to `destination` and renames it into place, so
/// readers never observe a partially written blob.
async fn write_atomically(source: &Path, destination: &Path) -> BlobResult<()> {
    let parent = destination.parent().ok_or_else(|| BlobError::InvalidKey {
        key: destination.display().to_string(),
        reason: "no parent directory".to_string(),
    })?;
    fs::create_dir_all(parent).await?;

    let file_name = destination
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp = parent.join(format!(".{}.{}.tmp", file_name, nanoid::nanoid!()));

    let result = async {
        fs::copy(source, &temp).await?;
        fs::rename(&temp, destination).await
    }
    .await;
    if let Err(err) = result {
        let _ = fs::remove_file(&temp).await;
        return Err(err.into());
    }
    Ok(())
}
