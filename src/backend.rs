/// Isolation backend chain: bubblewrap -> proot -> chroot
///
/// Each backend goes through a two-phase probe/commit protocol. The
/// viability probe runs a no-op under the backend's full wrapping; only a
/// probe failure causes fallback to the next backend. Once a probe
/// succeeds the backend is committed and the real command's exit code is
/// the chain's final result, nonzero included. Real commands may have
/// side effects that must not run twice or under a backend proven broken,
/// so nothing speculative ever executes.
use crate::probe::{self, BwrapFlags};
use crate::runner;
use crate::store;
use crate::types::{ExecutionResult, PolytheneError, Result, RootfsHandle};
use log::debug;
use nix::unistd::Uid;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BackendKind {
    Bubblewrap,
    Proot,
    Chroot,
}

/// Static description of one isolation mechanism. Argument lists are pure
/// functions of the descriptor, the rootfs path, and the resolved flags;
/// no state is captured.
#[derive(Clone, Copy, Debug)]
pub struct Backend {
    pub name: &'static str,
    pub binary: &'static str,
    kind: BackendKind,
    /// Whether the rootfs needs dev/ and tmp/ before wrapping
    needs_scaffold: bool,
    /// Direct root-change only works for privileged callers
    requires_root: bool,
}

/// Priority order: strongest isolation first.
pub static CHAIN: [Backend; 3] = [
    Backend {
        name: "bubblewrap",
        binary: "bwrap",
        kind: BackendKind::Bubblewrap,
        needs_scaffold: true,
        requires_root: false,
    },
    Backend {
        name: "proot",
        binary: "proot",
        kind: BackendKind::Proot,
        needs_scaffold: true,
        requires_root: false,
    },
    Backend {
        name: "chroot",
        binary: "chroot",
        kind: BackendKind::Chroot,
        needs_scaffold: false,
        requires_root: true,
    },
];

impl Backend {
    /// Full invocation wrapping `/bin/sh <shell_flag> <script>` in this
    /// backend's sandbox for the given rootfs.
    fn wrap_args(
        &self,
        root: &Path,
        flags: &BwrapFlags,
        shell_flag: &str,
        script: &str,
    ) -> Vec<String> {
        let root = root.display().to_string();
        let mut args: Vec<String> = match self.kind {
            BackendKind::Bubblewrap => {
                let mut args = flags.base.clone();
                args.extend([
                    "--bind".to_string(),
                    root,
                    "/".to_string(),
                    "--dev-bind".to_string(),
                    "/dev".to_string(),
                    "/dev".to_string(),
                ]);
                args.extend(flags.proc.clone());
                args.extend([
                    "--tmpfs".to_string(),
                    "/tmp".to_string(),
                    "--chdir".to_string(),
                    "/".to_string(),
                ]);
                args
            }
            BackendKind::Proot => vec!["-R".to_string(), root, "-0".to_string()],
            BackendKind::Chroot => vec![root],
        };
        args.extend([
            "/bin/sh".to_string(),
            shell_flag.to_string(),
            script.to_string(),
        ]);
        args
    }

    /// Side-effect-free viability probe invocation.
    pub fn probe_args(&self, root: &Path, flags: &BwrapFlags) -> Vec<String> {
        self.wrap_args(root, flags, "-c", "true")
    }

    /// Real invocation: identical wrapping around the caller's command.
    pub fn exec_args(&self, root: &Path, flags: &BwrapFlags, inner_cmd: &str) -> Vec<String> {
        let script = match self.kind {
            // A bare chroot starts with no usable PATH.
            BackendKind::Chroot => {
                format!("export PATH=/bin:/sbin:/usr/bin:/usr/sbin; {inner_cmd}")
            }
            _ => inner_cmd.to_string(),
        };
        self.wrap_args(root, flags, "-lc", &script)
    }
}

/// Backends allowed for this caller, in priority order.
fn allowed_backends(is_root: bool) -> impl Iterator<Item = &'static Backend> {
    CHAIN
        .iter()
        .filter(move |b| is_root || !b.requires_root)
}

/// Run `inner_cmd` inside the rootfs through the first viable backend.
pub fn run_chain(
    handle: &RootfsHandle,
    inner_cmd: &str,
    timeout: Option<Duration>,
) -> Result<ExecutionResult> {
    let is_root = Uid::effective().is_root();
    let root = handle.root_path.as_path();
    let mut attempted: Vec<&str> = Vec::new();

    for backend in allowed_backends(is_root) {
        attempted.push(backend.name);

        let bin = match which::which(backend.binary) {
            Ok(bin) => bin,
            Err(_) => {
                debug!("{} not on PATH, skipping", backend.binary);
                continue;
            }
        };

        let flags = match backend.kind {
            BackendKind::Bubblewrap => probe::resolve_flags(&bin, root, timeout),
            _ => BwrapFlags::default(),
        };

        if backend.needs_scaffold {
            store::ensure_scaffold(root)?;
        }

        let mut probe_cmd = Command::new(&bin);
        probe_cmd.args(backend.probe_args(root, &flags));
        let viable = matches!(
            runner::run_quiet(probe_cmd, timeout),
            Ok(result) if result.exit_code == 0 && !result.timed_out
        );
        if !viable {
            debug!("{} viability probe failed, trying next backend", backend.name);
            continue;
        }

        debug!("executing via {}", backend.name);
        let mut exec_cmd = Command::new(&bin);
        exec_cmd.args(backend.exec_args(root, &flags, inner_cmd));
        return runner::run_foreground(exec_cmd, timeout);
    }

    Err(PolytheneError::NoBackend {
        attempted: attempted.join("/"),
    })
}
