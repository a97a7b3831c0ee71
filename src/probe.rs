/// Incremental capability negotiation for the bubblewrap backend
///
/// Two independent, ordered probes, each a trivial no-op run under
/// candidate flags. Failure of either probe shrinks the flag set instead
/// of failing the backend; whatever subset succeeded is what the real
/// command uses.
use crate::runner;
use crate::types::ProbeOutcome;
use log::debug;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

/// Flags resolved for a bubblewrap invocation against one rootfs.
#[derive(Clone, Debug, Default)]
pub struct BwrapFlags {
    /// User-namespace remap (if permitted) plus unconditional PID/IPC/UTS
    /// unsharing
    pub base: Vec<String>,
    /// Private /proc mount, when the host allows it
    pub proc: Vec<String>,
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

fn run_probe(cmd: Command, timeout: Option<Duration>, what: &str, flags: &[&str]) -> ProbeOutcome {
    match runner::run_quiet(cmd, timeout) {
        Ok(result) if result.exit_code == 0 && !result.timed_out => {
            ProbeOutcome::Viable(strings(flags))
        }
        Ok(result) => {
            debug!("{what} probe failed with code {}", result.exit_code);
            ProbeOutcome::Unviable
        }
        Err(e) => {
            debug!("{what} probe failed: {e}");
            ProbeOutcome::Unviable
        }
    }
}

/// Can we unshare the user namespace and remap to uid/gid 0 inside it?
/// (Also passes where a setuid bwrap does the work for us.)
pub fn probe_userns(bwrap: &Path, timeout: Option<Duration>) -> ProbeOutcome {
    let flags = ["--unshare-user", "--uid", "0", "--gid", "0"];
    let mut cmd = Command::new(bwrap);
    cmd.args(flags).args(["--bind", "/", "/", "true"]);
    run_probe(cmd, timeout, "user namespace", &flags)
}

/// With the base flags already resolved, can we additionally mount a
/// private /proc inside the rootfs?
pub fn probe_proc(
    bwrap: &Path,
    base: &[String],
    root: &Path,
    timeout: Option<Duration>,
) -> ProbeOutcome {
    let flags = ["--proc", "/proc"];
    let mut cmd = Command::new(bwrap);
    cmd.args(base)
        .arg("--bind")
        .arg(root)
        .arg("/")
        .args(flags)
        .arg("true");
    run_probe(cmd, timeout, "proc mount", &flags)
}

/// Resolve the full bubblewrap flag set for this host/rootfs pair.
pub fn resolve_flags(bwrap: &Path, root: &Path, timeout: Option<Duration>) -> BwrapFlags {
    let mut base = probe_userns(bwrap, timeout).into_flags();
    base.extend(strings(&["--unshare-pid", "--unshare-ipc", "--unshare-uts"]));
    let proc = probe_proc(bwrap, &base, root, timeout).into_flags();
    BwrapFlags { base, proc }
}
