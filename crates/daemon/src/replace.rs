//! Atomic placement of a copied file at its destination.
//!
//! Bytes are written to a `.partial` sibling of the destination and renamed
//! over it only once the copy has completed, so a reader (or a crash) never
//! observes a truncated file at the destination path.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while placing a file.
#[derive(Debug, Error)]
pub enum ReplaceError {
    /// Copying the source into the partial file failed.
    #[error("Failed to copy {} to {}: {source}", .from.display(), .to.display())]
    CopyFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Renaming the partial file over the destination failed.
    #[error("Failed to move partial file into {}: {source}", .to.display())]
    RenameFailed {
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Generates the staging path for a destination.
///
/// The staging path follows the format `<name>.partial` in the destination's
/// own directory, so the final rename never crosses filesystems.
///
/// # Example
///
/// ```
/// use std::path::Path;
/// use cinedrop::replace::partial_path;
///
/// let dest = Path::new("/media/movies/film.2002.mkv");
/// assert_eq!(partial_path(dest), Path::new("/media/movies/film.2002.mkv.partial"));
/// ```
pub fn partial_path(destination: &Path) -> PathBuf {
    let mut partial = destination.as_os_str().to_owned();
    partial.push(".partial");
    PathBuf::from(partial)
}

/// Copies `source` to `destination` through a partial file.
///
/// Steps:
/// 1. Copy `source` to `<destination>.partial`
/// 2. Rename the partial file over `destination`
///
/// On failure the partial file is removed and `destination` is left as it
/// was before the call. `source` is only ever read.
///
/// # Returns
///
/// * `Ok(bytes)` - number of bytes copied
/// * `Err(ReplaceError)` - which step failed
pub fn atomic_copy(source: &Path, destination: &Path) -> Result<u64, ReplaceError> {
    let partial = partial_path(destination);

    let bytes = match fs::copy(source, &partial) {
        Ok(bytes) => bytes,
        Err(source_err) => {
            discard_partial(&partial);
            return Err(ReplaceError::CopyFailed {
                from: source.to_path_buf(),
                to: partial,
                source: source_err,
            });
        }
    };

    if let Err(e) = fs::rename(&partial, destination) {
        discard_partial(&partial);
        return Err(ReplaceError::RenameFailed {
            to: destination.to_path_buf(),
            source: e,
        });
    }

    debug!("Copied {} bytes to {}", bytes, destination.display());
    Ok(bytes)
}

/// Removes a leftover partial file, if any.
pub fn discard_partial(partial: &Path) {
    match fs::remove_file(partial) {
        Ok(()) => debug!("Removed partial file {}", partial.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => debug!("Could not remove partial file {}: {}", partial.display(), e),
    }
}
