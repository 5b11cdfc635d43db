//! Tar ingestion for uploaded archives.
//!
//! Used by the SCP sink for the tar stream that follows a `C` control line
//! and by the SFTP bridge for `.tar` files left in the working directory.
//! Entries are extracted relative to a destination root: parent directories
//! are created owner-only, directory entries are skipped, and regular files
//! are written with the permission bits stored in the archive.

use std::fs::{self, DirBuilder, File, OpenOptions, Permissions};
use std::io::{self, Read};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};

use tar::Archive;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Mode used for directories created while extracting.
const PARENT_DIR_MODE: u32 = 0o700;

/// Errors that can occur while unpacking an archive.
#[derive(Debug, Error)]
pub enum UnpackError {
    /// The entry path would land outside the destination.
    #[error("refusing to extract {0:?}: path escapes the destination")]
    UnsafePath(PathBuf),

    /// Reading the archive or writing an entry failed.
    #[error("extracting {path:?}: {source}")]
    Entry {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// One extracted regular file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub path: PathBuf,
    pub mode: u32,
    pub size: u64,
}

fn relative_entry_path(raw: &Path) -> Result<PathBuf, UnpackError> {
    let mut clean = PathBuf::new();
    for component in raw.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return Err(UnpackError::UnsafePath(raw.to_path_buf())),
        }
    }
    Ok(clean)
}

/// Extract every entry of the tar stream in `reader` below `dest`.
///
/// Returns the regular files written, in archive order.
pub fn unpack<R: Read>(reader: R, dest: &Path) -> Result<Vec<Extracted>, UnpackError> {
    let mut archive = Archive::new(reader);
    let mut written = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let raw = entry.path()?.into_owned();
        let relative = relative_entry_path(&raw)?;
        info!(entry = %raw.display(), "extracting");

        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = dest.join(&relative);
        if let Some(parent) = target.parent() {
            DirBuilder::new()
                .recursive(true)
                .mode(PARENT_DIR_MODE)
                .create(parent)
                .map_err(|source| UnpackError::Entry {
                    path: raw.clone(),
                    source,
                })?;
        }

        let header = entry.header();
        let kind = header.entry_type();
        if kind.is_dir() {
            continue;
        }
        if !kind.is_file() {
            warn!(entry = %raw.display(), kind = ?kind, "skipping non-regular tar entry");
            continue;
        }

        let mode = header.mode()? & 0o7777;
        let size = write_entry(&mut entry, &target, mode).map_err(|source| UnpackError::Entry {
            path: raw.clone(),
            source,
        })?;
        written.push(Extracted {
            path: target,
            mode,
            size,
        });
    }

    Ok(written)
}

fn write_entry<R: Read>(entry: &mut R, target: &Path, mode: u32) -> io::Result<u64> {
    let mut out = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .mode(mode)
        .open(target)?;
    let size = io::copy(entry, &mut out)?;
    out.sync_all()?;
    // The mode passed to open is filtered by the umask and ignored for
    // existing files.
    fs::set_permissions(target, Permissions::from_mode(mode))?;
    Ok(size)
}

/// Extract the archive at `archive` below `dest`.
pub fn unpack_file(archive: &Path, dest: &Path) -> Result<Vec<Extracted>, UnpackError> {
    let file = File::open(archive)?;
    unpack(io::BufReader::new(file), dest)
}

/// Regular `.tar` files at the top level of `dir`, sorted by name.
pub fn find_tarballs(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_tar = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("tar"));
        if is_tar && entry.file_type()?.is_file() {
            found.push(path);
        }
    }
    found.sort();
    debug!(dir = %dir.display(), count = found.len(), "scanned for tarballs");
    Ok(found)
}
