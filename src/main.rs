/// polythene: ephemeral-rootfs sandbox tool
///
/// `pull` materializes a container image's filesystem into a per-UUID
/// directory via podman; `exec` runs commands inside that tree later
/// through a bubblewrap -> proot -> chroot fallback chain, with no
/// container runtime needed at exec time.
use anyhow::Result;

fn main() -> Result<()> {
    // POLYTHENE_VERBOSE enables timestamped diagnostics on stderr;
    // an explicit RUST_LOG still takes precedence.
    let default_filter = if std::env::var_os("POLYTHENE_VERBOSE").is_some() {
        "debug"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if !cfg!(unix) {
        eprintln!("Error: polythene requires a Unix-like system");
        std::process::exit(1);
    }

    polythene::cli::run()
}
