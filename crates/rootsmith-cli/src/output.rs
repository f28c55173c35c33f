//! Formatted output helpers for CLI commands.

use std::fmt::Write as _;
use std::path::Path;

use rootsmith_core::filesystem::mount::MountSpec;

/// A horizontal rule of `width` box-drawing characters.
#[must_use]
pub fn rule(width: usize) -> String {
    "\u{2550}".repeat(width)
}

/// One-line description of a mount: target, then where it comes from.
#[must_use]
pub fn describe_mount(spec: &MountSpec) -> String {
    let mut line = spec.target().display().to_string();
    match (spec.fstype(), spec.source()) {
        (Some(fstype), None) => {
            let _ = write!(line, "  ({fstype})");
        }
        (Some(fstype), Some(source)) => {
            let _ = write!(line, "  <- {} ({fstype})", source.display());
        }
        (None, Some(source)) => {
            let _ = write!(line, "  <- {} (bind)", source.display());
        }
        (None, None) => {}
    }
    if let Some(options) = spec.options() {
        let _ = write!(line, "  [{options}]");
    }
    line
}

/// Numbered list of mounts, one per line, indented for plan output.
#[must_use]
pub fn numbered_mounts(mounts: &[MountSpec], root: &Path) -> Vec<String> {
    mounts
        .iter()
        .enumerate()
        .map(|(i, spec)| {
            format!(
                "    {:>2}. {}  {}",
                i + 1,
                describe_mount(spec),
                spec.full_path(root).display()
            )
        })
        .collect()
}
