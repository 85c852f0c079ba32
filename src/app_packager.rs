//! Safety checks and repackaging for uploaded application bits.
//!
//! Archives are inspected in-process with the `zip` crate; extraction and
//! re-zipping go through the `unzip` and `zip` tools so that file modes and
//! symlinks survive unchanged.

use std::{
    fs::File,
    io::{self, Read},
    path::{Component, Path, PathBuf},
    process::{Output, Stdio},
};

use bits_utils::for_each_chunk;
use tokio::process::Command;
use tracing::debug;
use zip::ZipArchive;

/// Upper bound on the entries passed to a single `zip -d` invocation.
pub const DIRECTORY_DELETE_BATCH_SIZE: usize = 100;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

#[derive(Debug, thiserror::Error)]
pub enum PackagerError {
    /// The upload itself is unacceptable.
    #[error("{0}")]
    InvalidInput(String),

    /// The archive tool rejected the package.
    #[error("{0}")]
    PackageInvalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("archive inspection failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

fn invalid_zip() -> PackagerError {
    PackagerError::InvalidInput("Invalid zip archive.".to_string())
}

#[derive(Debug, Clone)]
pub struct AppPackager {
    path: PathBuf,
}

impl AppPackager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Extracts the archive into `destination`, refusing archives whose
    /// symlinks escape it. Nothing is written when the check fails.
    pub async fn extract(&self, destination: &Path) -> Result<(), PackagerError> {
        if !tokio::fs::metadata(destination)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(PackagerError::InvalidInput(
                "Destination does not exist".to_string(),
            ));
        }
        let root = tokio::fs::canonicalize(destination).await?;

        let archive = self.path.clone();
        let check_root = root.clone();
        let escapes =
            tokio::task::spawn_blocking(move || any_outside_symlinks(&archive, &check_root))
                .await??;
        if escapes {
            return Err(PackagerError::InvalidInput(
                "Symlink(s) point outside of root folder".to_string(),
            ));
        }

        debug!(archive = %self.path.display(), destination = %root.display(), "extracting archive");
        let output = Command::new("unzip")
            .arg("-qq")
            .arg("-n")
            .arg(&self.path)
            .arg("-d")
            .arg(&root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        check_tool_output(&output, "Unzipping had errors")
    }

    /// Adds the contents of `source_dir` to the archive, creating it if it
    /// does not exist yet. Empty directories add nothing.
    pub async fn append_tree(&self, source_dir: &Path) -> Result<(), PackagerError> {
        let mut entries = tokio::fs::read_dir(source_dir).await?;
        if entries.next_entry().await?.is_none() {
            return Ok(());
        }

        let archive = std::path::absolute(&self.path)?;
        let output = Command::new("zip")
            .arg("-q")
            .arg("-r")
            .arg("--symlinks")
            .arg(&archive)
            .arg(".")
            .current_dir(source_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        check_tool_output(&output, "Could not zip the package")
    }

    /// Removes explicit directory entries from the archive.
    pub async fn strip_directory_entries(&self) -> Result<(), PackagerError> {
        let archive = self.path.clone();
        let directories = tokio::task::spawn_blocking(move || directory_entries(&archive)).await??;

        for_each_chunk(&directories, DIRECTORY_DELETE_BATCH_SIZE, |batch| async move {
            let output = Command::new("zip")
                .arg("-d")
                .arg(&self.path)
                .args(batch)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()
                .await?;
            check_tool_output(&output, "Could not remove the directories")
        })
        .await
    }

    /// Total uncompressed size of all entries.
    pub async fn size(&self) -> Result<u64, PackagerError> {
        let archive = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut zip = open_archive(&archive)?;
            let mut sizes = Vec::with_capacity(zip.len());
            for i in 0..zip.len() {
                sizes.push(zip.by_index(i).map_err(|_| invalid_zip())?.size());
            }
            total_size(sizes)
        })
        .await?
    }
}

/// Declared sizes that do not fit in a `u64` together mark a forged archive.
fn total_size(sizes: impl IntoIterator<Item = u64>) -> Result<u64, PackagerError> {
    sizes
        .into_iter()
        .try_fold(0u64, |total, size| total.checked_add(size))
        .ok_or_else(invalid_zip)
}

fn open_archive(path: &Path) -> Result<ZipArchive<File>, PackagerError> {
    let file = File::open(path)?;
    ZipArchive::new(file).map_err(|_| invalid_zip())
}

fn any_outside_symlinks(archive: &Path, root: &Path) -> Result<bool, PackagerError> {
    let mut zip = open_archive(archive)?;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|_| invalid_zip())?;
        let is_symlink = entry
            .unix_mode()
            .is_some_and(|mode| mode & S_IFMT == S_IFLNK);
        if !is_symlink {
            continue;
        }
        let mut target = String::new();
        entry
            .read_to_string(&mut target)
            .map_err(|_| invalid_zip())?;
        if !is_within(root, &target) {
            debug!(entry = entry.name(), link = %target, "symlink escapes destination");
            return Ok(true);
        }
    }
    Ok(false)
}

fn directory_entries(archive: &Path) -> Result<Vec<String>, PackagerError> {
    let mut zip = open_archive(archive)?;
    let mut directories = Vec::new();
    for i in 0..zip.len() {
        let entry = zip.by_index(i).map_err(|_| invalid_zip())?;
        if entry.is_dir() {
            directories.push(entry.name().to_string());
        }
    }
    Ok(directories)
}

/// Resolves `target` against `root` lexically and checks the result stays
/// below `root`.
fn is_within(root: &Path, target: &str) -> bool {
    let mut resolved = PathBuf::new();
    for component in root.join(target).components() {
        match component {
            Component::ParentDir => {
                resolved.pop();
            }
            Component::CurDir => {}
            other => resolved.push(other),
        }
    }
    resolved.starts_with(root)
}

fn check_tool_output(output: &Output, context: &str) -> Result<(), PackagerError> {
    if output.status.success() {
        return Ok(());
    }
    Err(PackagerError::PackageInvalid(format!(
        "{}\n STDOUT: \"{}\"\n STDERR: \"{}\"",
        context,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )))
}
