/// Store of exported rootfs trees: one directory per identifier
///
/// The store root's directory listing is the index; no database or lock
/// file is kept. Concurrent pulls write distinct identifiers and never
/// conflict. Concurrent execs against the same identifier are the
/// caller's responsibility.
use crate::types::{PolytheneError, Result, RootfsHandle};
use std::fs;
use std::path::{Path, PathBuf};

/// Pure path join: where a given identifier lives under the store root.
pub fn path_for(identifier: &str, store_root: &Path) -> PathBuf {
    store_root.join(identifier)
}

/// Create the store root if missing.
pub fn ensure_store(store_root: &Path) -> Result<()> {
    fs::create_dir_all(store_root)?;
    Ok(())
}

/// Create minimal subdirectories needed for later bind-mounts and tmpfs
/// convenience. Idempotent.
pub fn ensure_scaffold(root_path: &Path) -> Result<()> {
    for sub in ["dev", "tmp"] {
        fs::create_dir_all(root_path.join(sub))?;
    }
    Ok(())
}

/// Look up an existing rootfs for `exec`.
///
/// Fails with `NotFound` before any backend is touched when the directory
/// does not exist.
pub fn load_handle(identifier: &str, store_root: &Path) -> Result<RootfsHandle> {
    let handle = RootfsHandle::new(identifier, store_root);
    if !handle.root_path.is_dir() {
        return Err(PolytheneError::NotFound {
            identifier: identifier.to_string(),
            path: handle.root_path,
        });
    }
    Ok(handle)
}
