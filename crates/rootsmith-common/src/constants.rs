//! System-wide constants and default paths.

use std::time::Duration;

/// Default base directory for rootsmith build roots.
pub const DEFAULT_WORK_DIR: &str = "/var/lib/rootsmith";

/// `PATH` exported to work running inside a chroot.
pub const CHROOT_PATH_ENV: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// `USER` exported to work running inside a chroot.
pub const CHROOT_USER: &str = "root";

/// `HOME` exported to work running inside a chroot.
pub const CHROOT_HOME: &str = "/root";

/// Host variables whose values are carried into the chroot environment.
pub const CHROOT_INHERITED_VARS: [&str; 2] = ["SHELL", "TERM"];

/// Number of `umount(2)` attempts before a mount point is declared stuck.
pub const DEFAULT_UNMOUNT_ATTEMPTS: u32 = 3;

/// Delay between two `umount(2)` attempts.
pub const DEFAULT_UNMOUNT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Mount options for the `devpts` instance inside a chroot.
pub const DEVPTS_OPTIONS: &str = "gid=5,mode=620";

/// Filesystem type string for overlay mounts.
pub const OVERLAY_FSTYPE: &str = "overlay";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "rsmith";
