/// Image export: materialize a container image's filesystem via the
/// external engine (podman pull + create + export | tar)
///
/// The engine is only needed here; `exec` never touches it.
use crate::runner;
use crate::types::{EngineConfig, PolytheneError, Result};
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// Removes the ephemeral export container on every exit path, so the
/// engine never accumulates orphaned stopped containers. Removal failures
/// are ignored.
struct ContainerGuard {
    podman: PathBuf,
    engine: EngineConfig,
    cid: String,
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        let mut cmd = engine_command(&self.podman, &self.engine);
        cmd.args(["rm", &self.cid]);
        if let Err(e) = runner::run_quiet(cmd, None) {
            debug!("failed to remove container {}: {}", self.cid, e);
        }
    }
}

fn engine_command(podman: &Path, engine: &EngineConfig) -> Command {
    let mut cmd = Command::new(podman);
    engine.apply(&mut cmd);
    cmd
}

/// Create the destination with fail-if-exists semantics, surfacing a
/// distinct collision signal instead of silently overwriting.
fn create_destination(dest: &Path) -> Result<()> {
    match fs::create_dir(dest) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(PolytheneError::StoreCollision(dest.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Best-effort sidecar recording where the tree came from. Never allowed
/// to mask errors from the export path.
fn write_metadata(image: &str, dest: &Path) {
    let created = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    let meta = format!("image={image}\ncreated={created}\n");
    if let Err(e) = fs::write(dest.join(".polythene-meta"), meta) {
        debug!("failed to write metadata sidecar: {}", e);
    }
}

/// Pull `image` and stream its rootfs into `dest` (which must not exist).
pub fn export(
    image: &str,
    dest: &Path,
    engine: &EngineConfig,
    timeout: Option<Duration>,
) -> Result<()> {
    let podman =
        which::which("podman").map_err(|_| PolytheneError::MissingBinary("podman".to_string()))?;
    let tar = which::which("tar").map_err(|_| PolytheneError::MissingBinary("tar".to_string()))?;

    // Pull explicitly so exec stays fully offline later.
    debug!("pulling {image}");
    let mut pull = engine_command(&podman, engine);
    pull.args(["pull", image]);
    let pulled = runner::run_foreground(pull, timeout)?;
    if pulled.timed_out {
        return Err(PolytheneError::Timeout {
            context: format!("pull {image}"),
            secs: timeout.map(|t| t.as_secs()).unwrap_or(0),
        });
    }
    if pulled.exit_code != 0 {
        return Err(PolytheneError::Engine {
            context: format!("pull {image}"),
            code: pulled.exit_code,
        });
    }

    create_destination(dest)?;

    // A stopped container whose rootfs we can export.
    let mut create = engine_command(&podman, engine);
    create.args(["create", "--pull=never", image, "true"]);
    let cid = runner::run_capture(create, timeout, "create container")?;
    let _guard = ContainerGuard {
        podman: podman.clone(),
        engine: engine.clone(),
        cid: cid.clone(),
    };

    debug!("exporting rootfs of {} -> {}", cid, dest.display());
    let mut producer = engine_command(&podman, engine);
    producer.args(["export", &cid]);
    let mut consumer = Command::new(&tar);
    consumer.args(["-C"]).arg(dest).args(["-x"]);
    runner::run_pipeline(producer, consumer, timeout, "export rootfs")?;

    write_metadata(image, dest);
    Ok(())
}
