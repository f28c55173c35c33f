//! Copying host files into a chroot.

use std::path::Path;

use rootsmith_common::error::{Result, RootsmithError};

/// Copies `src` to `dst`, creating `dst`'s parent directories.
///
/// `dst` is a file path, not a directory. Permissions are preserved.
///
/// # Errors
///
/// Returns [`RootsmithError::CopyFailed`] if the parents cannot be created
/// or the copy fails.
pub fn copy(src: &Path, dst: &Path) -> Result<()> {
    tracing::debug!(src = %src.display(), dst = %dst.display(), "copying file");

    let copy_failed = |e: std::io::Error| RootsmithError::CopyFailed {
        src: src.to_path_buf(),
        dst: dst.to_path_buf(),
        source: e,
    };

    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent).map_err(copy_failed)?;
    }
    let _ = std::fs::copy(src, dst).map_err(copy_failed)?;
    Ok(())
}
