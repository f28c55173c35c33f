//! Parsers for mount and copy arguments given on the command line.

use std::path::{Path, PathBuf};

use rootsmith_common::types::FileToCopy;
use rootsmith_core::filesystem::mount::MountSpec;
use rootsmith_core::filesystem::overlayfs::new_overlay_mount;

/// `--bind SRC:DST`: a host path bound into the chroot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindArg {
    /// Host path.
    pub source: PathBuf,
    /// Target inside the chroot.
    pub target: PathBuf,
}

impl BindArg {
    /// Mount spec for this bind.
    pub fn to_mount(&self) -> MountSpec {
        MountSpec::bind(&self.source, &self.target)
    }
}

/// `--overlay LOWER:UPPER:WORK:TARGET`.
///
/// `LOWER` is a host path; `UPPER`, `WORK` and `TARGET` live inside the
/// chroot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayArg {
    /// Read-only lower directory on the host.
    pub lower: PathBuf,
    /// Writable upper directory inside the chroot.
    pub upper: PathBuf,
    /// Overlay scratch directory inside the chroot.
    pub work: PathBuf,
    /// Mount target inside the chroot.
    pub target: PathBuf,
}

impl OverlayArg {
    /// Mount spec for this overlay, plus the directories that must exist
    /// under `root` before it is mounted.
    pub fn to_mount(&self, root: &Path) -> (MountSpec, Vec<PathBuf>) {
        new_overlay_mount(
            root,
            "overlay",
            &self.target,
            &self.lower,
            &self.upper,
            &self.work,
        )
    }
}

fn split_fields<const N: usize>(value: &str, shape: &str) -> Result<[PathBuf; N], String> {
    let fields: Vec<&str> = value.split(':').collect();
    if fields.len() != N || fields.iter().any(|f| f.is_empty()) {
        return Err(format!("expected {shape}, got `{value}`"));
    }
    Ok(std::array::from_fn(|i| PathBuf::from(fields[i])))
}

/// Parses `SRC:DST` into a [`BindArg`].
///
/// # Errors
///
/// Returns a message if the value is not two non-empty fields.
pub fn parse_bind(value: &str) -> Result<BindArg, String> {
    let [source, target] = split_fields(value, "SRC:DST")?;
    Ok(BindArg { source, target })
}

/// Parses `LOWER:UPPER:WORK:TARGET` into an [`OverlayArg`].
///
/// # Errors
///
/// Returns a message if the value is not four non-empty fields.
pub fn parse_overlay(value: &str) -> Result<OverlayArg, String> {
    let [lower, upper, work, target] = split_fields(value, "LOWER:UPPER:WORK:TARGET")?;
    Ok(OverlayArg {
        lower,
        upper,
        work,
        target,
    })
}

/// Parses `SRC:DST` into a [`FileToCopy`].
///
/// # Errors
///
/// Returns a message if the value is not two non-empty fields.
pub fn parse_copy(value: &str) -> Result<FileToCopy, String> {
    let [src, dest] = split_fields(value, "SRC:DST")?;
    Ok(FileToCopy::new(src, dest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_parses_source_and_target() {
        let bind = parse_bind("/srv/repo:/repo").unwrap();
        assert_eq!(bind.source, PathBuf::from("/srv/repo"));
        assert_eq!(bind.target, PathBuf::from("/repo"));
        assert_eq!(bind.to_mount().source(), Some(Path::new("/srv/repo")));
    }

    #[test]
    fn bind_rejects_missing_target() {
        assert!(parse_bind("/srv/repo").is_err());
        assert!(parse_bind("/srv/repo:").is_err());
        assert!(parse_bind("a:b:c").is_err());
    }

    #[test]
    fn overlay_parses_four_fields() {
        let overlay = parse_overlay("/lower:/upper:/work:/merged").unwrap();
        let (spec, needed) = overlay.to_mount(Path::new("/build/root"));
        assert_eq!(spec.target(), Path::new("/merged"));
        assert_eq!(spec.fstype(), Some("overlay"));
        assert_eq!(needed, vec![PathBuf::from("/upper"), PathBuf::from("/work")]);
    }

    #[test]
    fn overlay_rejects_wrong_arity() {
        let err = parse_overlay("/lower:/upper:/merged").unwrap_err();
        assert!(err.contains("LOWER:UPPER:WORK:TARGET"));
    }

    #[test]
    fn copy_parses_into_file_to_copy() {
        assert_eq!(
            parse_copy("./repo.conf:/etc/yum.repos.d/repo.conf").unwrap(),
            FileToCopy::new("./repo.conf", "/etc/yum.repos.d/repo.conf")
        );
    }
}
