//! Root filesystem archive extraction.
//!
//! A chroot can be seeded from a tarball holding a minimal root filesystem
//! (a "worker" skeleton with a shell, a package manager and build tools).
//! Both plain `.tar` and gzip-compressed archives are accepted; the format
//! is detected from the file's magic bytes, not its name.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use rootsmith_common::error::{Result, RootsmithError};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Summary of an extracted archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedArchive {
    /// Hex-encoded SHA-256 of the archive file.
    pub digest: String,
    /// Size of the archive file in bytes.
    pub size_bytes: u64,
}

/// Extracts `archive_path` into the existing directory `target`.
///
/// File permissions from the archive are preserved.
///
/// # Errors
///
/// Returns [`RootsmithError::ArchiveExtractFailed`] if the archive cannot be
/// opened or unpacked, or an I/O error if it cannot be hashed afterwards.
pub fn extract_archive(archive_path: &Path, target: &Path) -> Result<ExtractedArchive> {
    tracing::info!(
        archive = %archive_path.display(),
        target = %target.display(),
        "extracting root filesystem archive"
    );

    let extract_failed = |e: io::Error| RootsmithError::ArchiveExtractFailed {
        archive: archive_path.to_path_buf(),
        target: target.to_path_buf(),
        source: e,
    };

    let mut file = File::open(archive_path).map_err(extract_failed)?;
    let size_bytes = file.metadata().map_err(extract_failed)?.len();

    if is_gzip(&mut file).map_err(extract_failed)? {
        unpack(flate2::read::GzDecoder::new(file), target).map_err(extract_failed)?;
    } else {
        unpack(file, target).map_err(extract_failed)?;
    }

    let digest = crate::hash::hash_file(archive_path)?;
    tracing::info!(digest = %digest, size = size_bytes, "archive extracted");

    Ok(ExtractedArchive { digest, size_bytes })
}

fn unpack<R: Read>(reader: R, target: &Path) -> io::Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);
    archive.unpack(target)
}

/// Peeks at the first two bytes, then rewinds.
fn is_gzip(file: &mut File) -> io::Result<bool> {
    let mut magic = [0_u8; 2];
    let is_gzip = match file.read_exact(&mut magic) {
        Ok(()) => magic == GZIP_MAGIC,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => false,
        Err(e) => return Err(e),
    };
    let _ = file.seek(SeekFrom::Start(0))?;
    Ok(is_gzip)
}
