/// Command line interface for polythene
use crate::types::{EngineConfig, PolytheneError, RootfsHandle};
use crate::{backend, export, ident, runner, store};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Reserved exit code: `exec` against an unknown identifier.
pub const EXIT_NOT_FOUND: i32 = 125;
/// Reserved exit code: no isolation backend was viable.
pub const EXIT_NO_BACKEND: i32 = 126;
/// Reserved exit code: a required engine binary is not on PATH.
pub const EXIT_MISSING_BINARY: i32 = 127;

#[derive(Parser)]
#[command(name = "polythene")]
#[command(about = "Export a container image's rootfs once, run commands in it later without a container runtime", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Pull an image and export its filesystem into a fresh rootfs;
    /// prints the identifier on stdout
    Pull {
        /// Image reference, e.g. docker.io/library/busybox:latest
        image: String,

        /// Directory to store rootfs trees
        #[arg(short, long)]
        store: Option<PathBuf>,

        /// Timeout in seconds for each engine step
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Execute a command inside a previously pulled rootfs, trying
    /// bubblewrap -> proot -> chroot
    Exec {
        /// Identifier printed by pull
        identifier: String,

        /// Directory where rootfs trees are stored
        #[arg(short, long)]
        store: Option<PathBuf>,

        /// Timeout in seconds for command execution
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Command and arguments to execute inside the rootfs
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

/// POLYTHENE_STORE env override, else a well-known temp-rooted default.
fn default_store() -> PathBuf {
    std::env::var_os("POLYTHENE_STORE")
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("polythene"))
}

/// POSIX single-quote an argument (shlex.quote semantics).
fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}

/// Join the caller's argv into one shell-quoted inner command string.
fn shell_join(args: &[String]) -> String {
    args.iter()
        .map(|a| shell_quote(a))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Map a fatal error onto its process exit code and terminate.
fn fail(err: PolytheneError) -> ! {
    let code = match &err {
        PolytheneError::Engine { code, .. } => *code,
        PolytheneError::MissingBinary(_) => EXIT_MISSING_BINARY,
        PolytheneError::NotFound { .. } => EXIT_NOT_FOUND,
        PolytheneError::NoBackend { .. } => EXIT_NO_BACKEND,
        PolytheneError::Timeout { .. } => runner::TIMEOUT_EXIT_CODE,
        PolytheneError::StoreCollision(_) | PolytheneError::Io(_) => 1,
    };
    eprintln!("polythene: {err}");
    std::process::exit(code);
}

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let engine = EngineConfig::from_env();

    match cli.command {
        Commands::Pull {
            image,
            store: store_flag,
            timeout,
        } => {
            let store_root = store_flag.unwrap_or_else(default_store);
            let timeout = timeout.map(Duration::from_secs);
            if let Err(e) = store::ensure_store(&store_root) {
                fail(e);
            }

            let mut handle = RootfsHandle::new(ident::generate(), &store_root);
            let exported = match export::export(&image, &handle.root_path, &engine, timeout) {
                Err(PolytheneError::StoreCollision(_)) => {
                    // Astronomically unlikely with UUIDv7: regenerate once,
                    // a second collision is fatal.
                    handle = RootfsHandle::new(ident::generate(), &store_root);
                    export::export(&image, &handle.root_path, &engine, timeout)
                }
                other => other,
            };
            if let Err(e) = exported {
                fail(e);
            }
            if let Err(e) = store::ensure_scaffold(&handle.root_path) {
                fail(e);
            }

            println!("{}", handle.identifier);
            Ok(())
        }

        Commands::Exec {
            identifier,
            store: store_flag,
            timeout,
            command,
        } => {
            let store_root = store_flag.unwrap_or_else(default_store);
            let timeout = timeout.map(Duration::from_secs);

            // Fails before any backend is touched.
            let handle = match store::load_handle(&identifier, &store_root) {
                Ok(handle) => handle,
                Err(e) => fail(e),
            };

            let inner_cmd = shell_join(&command);
            match backend::run_chain(&handle, &inner_cmd, timeout) {
                Ok(result) => {
                    if result.timed_out {
                        eprintln!("polythene: command timed out");
                    }
                    std::process::exit(result.exit_code);
                }
                Err(e) => fail(e),
            }
        }
    }
}
