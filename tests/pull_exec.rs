/// End-to-end tests for the pull/exec CLI against stub engine and
/// backend binaries placed on a scratch PATH, so no podman, bubblewrap
/// or proot is needed on the test host.
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const EXIT_NOT_FOUND: i32 = 125;
const EXIT_NO_BACKEND: i32 = 126;
const EXIT_MISSING_BINARY: i32 = 127;
const EXIT_TIMEOUT: i32 = 124;

fn write_stub(dir: &Path, name: &str, body: &str) {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
}

/// Scratch PATH with the stub dir first, then the real /bin for sh,
/// sleep and tar. Stubs always win binary resolution.
fn stub_path(stub_dir: &Path) -> String {
    format!("{}:/usr/bin:/bin", stub_dir.display())
}

fn polythene() -> Command {
    Command::cargo_bin("polythene").unwrap()
}

/// A proot that strips its own flags (-R ROOT -0) and runs the wrapped
/// shell invocation on the host. Probes pass, real commands execute.
const PROOT_PASSTHROUGH: &str = r#"shift 3
exec "$@""#;

struct TestStore {
    _dir: TempDir,
    store: PathBuf,
    stubs: PathBuf,
}

impl TestStore {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("store");
        let stubs = dir.path().join("bin");
        fs::create_dir_all(&store).unwrap();
        fs::create_dir_all(&stubs).unwrap();
        Self {
            _dir: dir,
            store,
            stubs,
        }
    }

    /// Register a rootfs directory directly, as if pulled earlier.
    fn seed_rootfs(&self, identifier: &str) -> PathBuf {
        let root = self.store.join(identifier);
        fs::create_dir_all(&root).unwrap();
        root
    }
}

#[test]
fn pull_prints_the_identifier_that_names_the_store_directory() {
    let env = TestStore::new();
    let rootfs_src = env._dir.path().join("fake-image");
    fs::create_dir_all(rootfs_src.join("etc")).unwrap();
    fs::write(rootfs_src.join("etc/hostname"), "busybox\n").unwrap();

    write_stub(
        &env.stubs,
        "podman",
        r#"case "$1" in
  pull) exit 0 ;;
  create) echo deadbeefcafe ;;
  export) exec tar -cf - -C "$POLYTHENE_TEST_ROOTFS" . ;;
  rm) exit 0 ;;
  *) exit 64 ;;
esac"#,
    );

    let assert = polythene()
        .env("PATH", stub_path(&env.stubs))
        .env("POLYTHENE_TEST_ROOTFS", &rootfs_src)
        .args(["pull", "docker.io/library/busybox:latest"])
        .arg("--store")
        .arg(&env.store)
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let id = stdout.trim();
    assert_eq!(stdout.lines().count(), 1, "identifier is the sole stdout line");

    // Round-trip: printed identifier is exactly the directory name.
    let root = env.store.join(id);
    assert!(root.is_dir());
    assert_eq!(
        fs::read_to_string(root.join("etc/hostname")).unwrap(),
        "busybox\n"
    );
    // Scaffold and best-effort sidecar.
    assert!(root.join("dev").is_dir());
    assert!(root.join("tmp").is_dir());
    let meta = fs::read_to_string(root.join(".polythene-meta")).unwrap();
    assert!(meta.contains("image=docker.io/library/busybox:latest"));
    assert!(meta.contains("created="));
}

#[test]
fn repeated_pulls_produce_distinct_identifiers() {
    let env = TestStore::new();
    write_stub(
        &env.stubs,
        "podman",
        r#"case "$1" in
  pull) exit 0 ;;
  create) echo c1 ;;
  export) exec tar -cf - -C "$POLYTHENE_TEST_ROOTFS" . ;;
  rm) exit 0 ;;
esac"#,
    );
    let rootfs_src = env._dir.path().join("img");
    fs::create_dir_all(&rootfs_src).unwrap();

    let mut ids = Vec::new();
    for _ in 0..3 {
        let assert = polythene()
            .env("PATH", stub_path(&env.stubs))
            .env("POLYTHENE_TEST_ROOTFS", &rootfs_src)
            .args(["pull", "img"])
            .arg("--store")
            .arg(&env.store)
            .assert()
            .success();
        ids.push(
            String::from_utf8(assert.get_output().stdout.clone())
                .unwrap()
                .trim()
                .to_string(),
        );
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3);
}

#[test]
fn pull_propagates_the_engine_exit_code() {
    let env = TestStore::new();
    write_stub(&env.stubs, "podman", "exit 42");

    polythene()
        .env("PATH", stub_path(&env.stubs))
        .args(["pull", "no.such/image"])
        .arg("--store")
        .arg(&env.store)
        .assert()
        .code(42)
        .stderr(predicate::str::contains("pull no.such/image"));
}

#[test]
fn pull_without_an_engine_is_127() {
    let env = TestStore::new();
    // Empty stub dir only: no podman anywhere on PATH.
    polythene()
        .env("PATH", env.stubs.display().to_string())
        .args(["pull", "img"])
        .arg("--store")
        .arg(&env.store)
        .assert()
        .code(EXIT_MISSING_BINARY)
        .stderr(predicate::str::contains("podman"));
}

#[test]
fn exec_unknown_identifier_fails_before_any_backend_runs() {
    let env = TestStore::new();
    let log = env._dir.path().join("invocations");
    let record = format!("echo \"$0 $*\" >> {}\nexit 0", log.display());
    write_stub(&env.stubs, "bwrap", &record);
    write_stub(&env.stubs, "proot", &record);

    polythene()
        .env("PATH", stub_path(&env.stubs))
        .env("POLYTHENE_STORE", &env.store)
        .args(["exec", "not-a-real-id", "--", "true"])
        .assert()
        .code(EXIT_NOT_FOUND)
        .stderr(predicate::str::contains("no such rootfs"));

    assert!(!log.exists(), "no backend may be invoked for an unknown id");
}

#[test]
fn exec_falls_back_past_a_backend_whose_probe_fails() {
    let env = TestStore::new();
    env.seed_rootfs("id-1");
    // bwrap fails every probe; proot passes and executes on the host.
    write_stub(&env.stubs, "bwrap", "exit 1");
    write_stub(&env.stubs, "proot", PROOT_PASSTHROUGH);

    polythene()
        .env("PATH", stub_path(&env.stubs))
        .env("POLYTHENE_STORE", &env.store)
        .args(["exec", "id-1", "--", "echo", "hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello"));
}

#[test]
fn committed_backend_propagates_nonzero_exit_without_fallback() {
    let env = TestStore::new();
    env.seed_rootfs("id-2");
    let log = env._dir.path().join("chroot-invocations");
    write_stub(&env.stubs, "proot", PROOT_PASSTHROUGH);
    // If the chain wrongly fell through after a real nonzero exit, this
    // stub would record an invocation.
    write_stub(
        &env.stubs,
        "chroot",
        &format!("echo x >> {}\nexit 0", log.display()),
    );

    polythene()
        .env("PATH", stub_path(&env.stubs))
        .env("POLYTHENE_STORE", &env.store)
        .args(["exec", "id-2", "--", "/bin/sh", "-c", "exit 7"])
        .assert()
        .code(7);

    assert!(!log.exists(), "nonzero real exit must not trigger fallback");
}

#[test]
fn exec_with_no_viable_backend_is_126() {
    let env = TestStore::new();
    env.seed_rootfs("id-3");
    // Both present, both unviable.
    write_stub(&env.stubs, "bwrap", "exit 1");
    write_stub(&env.stubs, "proot", "exit 1");

    polythene()
        .env("PATH", stub_path(&env.stubs))
        .env("POLYTHENE_STORE", &env.store)
        .args(["exec", "id-3", "--", "true"])
        .assert()
        .code(EXIT_NO_BACKEND)
        .stderr(predicate::str::contains("all isolation modes unavailable"));
}

#[test]
fn exec_with_no_backend_binaries_is_126() {
    let env = TestStore::new();
    env.seed_rootfs("id-4");

    polythene()
        .env("PATH", env.stubs.display().to_string())
        .env("POLYTHENE_STORE", &env.store)
        .args(["exec", "id-4", "--", "true"])
        .assert()
        .code(EXIT_NO_BACKEND);
}

#[test]
fn exec_timeout_kills_the_command_and_exits_124() {
    let env = TestStore::new();
    env.seed_rootfs("id-5");
    write_stub(&env.stubs, "bwrap", "exit 1");
    write_stub(&env.stubs, "proot", PROOT_PASSTHROUGH);

    polythene()
        .env("PATH", stub_path(&env.stubs))
        .env("POLYTHENE_STORE", &env.store)
        .args(["exec", "id-5", "--timeout", "1", "--", "/bin/sh", "-c", "sleep 10"])
        .assert()
        .code(EXIT_TIMEOUT)
        .stderr(predicate::str::contains("timed out"));
}

#[test]
fn exec_without_a_command_is_a_usage_error() {
    let env = TestStore::new();
    polythene()
        .env("POLYTHENE_STORE", &env.store)
        .args(["exec", "some-id"])
        .assert()
        .code(2);
}

#[test]
fn inner_command_arguments_survive_shell_quoting() {
    let env = TestStore::new();
    env.seed_rootfs("id-6");
    write_stub(&env.stubs, "bwrap", "exit 1");
    write_stub(&env.stubs, "proot", PROOT_PASSTHROUGH);

    polythene()
        .env("PATH", stub_path(&env.stubs))
        .env("POLYTHENE_STORE", &env.store)
        .args(["exec", "id-6", "--", "echo", "two words", "it's"])
        .assert()
        .success()
        .stdout(predicate::str::contains("two words it's"));
}
