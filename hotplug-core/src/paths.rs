//! Fixed filesystem roots used by substitutions and node bookkeeping.

/// Directory under which device nodes and their symlinks live.
pub const DEV_ROOT: &str = "/dev";

/// Mount point of sysfs.
pub const SYS_ROOT: &str = "/sys";

/// Strips the node-directory prefix (`/dev/`) from a node or link path.
///
/// Paths outside the node directory are returned unchanged.
pub fn strip_dev_root(path: &str) -> &str {
    path.strip_prefix(DEV_ROOT)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(path)
}
