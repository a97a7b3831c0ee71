/// Blocking subprocess execution with timeout enforcement
///
/// Every external operation is a foreground subprocess call. Children are
/// spawned into their own process group so a timeout can kill the whole
/// tree; the kill is SIGKILL, there is no grace period. Retry and
/// fallback policy lives in the backend chain, never here.
use crate::types::{ExecutionResult, PolytheneError, Result};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io::Read;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Exit code reported when the caller-supplied timeout expired.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

fn deadline_for(timeout: Option<Duration>) -> Option<Instant> {
    timeout.map(|t| Instant::now() + t)
}

fn kill_group(child: &Child) {
    let _ = signal::killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL);
}

/// Exit code of a finished process, folding a terminating signal into the
/// shell convention 128+N.
fn exit_code_of(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(1))
}

/// Poll `try_wait` until the child exits or the deadline passes.
///
/// Returns `None` after killing the child's process group on expiry; the
/// child is reaped either way.
fn wait_with_deadline(child: &mut Child, deadline: Option<Instant>) -> Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if let Some(d) = deadline {
            if Instant::now() >= d {
                kill_group(child);
                let _ = child.wait();
                return Ok(None);
            }
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Run a command in the foreground with inherited stdio.
pub fn run_foreground(mut cmd: Command, timeout: Option<Duration>) -> Result<ExecutionResult> {
    cmd.process_group(0);
    let mut child = cmd.spawn()?;
    match wait_with_deadline(&mut child, deadline_for(timeout))? {
        Some(status) => Ok(ExecutionResult {
            exit_code: exit_code_of(status),
            timed_out: false,
        }),
        None => Ok(ExecutionResult {
            exit_code: TIMEOUT_EXIT_CODE,
            timed_out: true,
        }),
    }
}

/// Run a command with all stdio suppressed. Used for viability and
/// capability probes, whose output is never interesting.
pub fn run_quiet(mut cmd: Command, timeout: Option<Duration>) -> Result<ExecutionResult> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    run_foreground(cmd, timeout)
}

/// Run a command and return its trimmed stdout.
///
/// A nonzero exit or timeout is an engine failure; the context string
/// names the step for diagnostics.
pub fn run_capture(mut cmd: Command, timeout: Option<Duration>, context: &str) -> Result<String> {
    cmd.process_group(0)
        .stdin(Stdio::null())
        .stdout(Stdio::piped());
    let mut child = cmd.spawn()?;
    let status = match wait_with_deadline(&mut child, deadline_for(timeout))? {
        Some(status) => status,
        None => {
            return Err(PolytheneError::Timeout {
                context: context.to_string(),
                secs: timeout.map(|t| t.as_secs()).unwrap_or(0),
            })
        }
    };
    let mut out = String::new();
    if let Some(mut stdout) = child.stdout.take() {
        stdout.read_to_string(&mut out)?;
    }
    if !status.success() {
        return Err(PolytheneError::Engine {
            context: context.to_string(),
            code: exit_code_of(status),
        });
    }
    Ok(out.trim().to_string())
}

/// Run `producer | consumer` streaming, without buffering the producer's
/// output, under a single shared deadline.
pub fn run_pipeline(
    mut producer: Command,
    mut consumer: Command,
    timeout: Option<Duration>,
    context: &str,
) -> Result<()> {
    let secs = timeout.map(|t| t.as_secs()).unwrap_or(0);
    producer
        .process_group(0)
        .stdin(Stdio::null())
        .stdout(Stdio::piped());
    let mut prod = producer.spawn()?;
    let prod_stdout = prod.stdout.take().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::BrokenPipe, "producer stdout unavailable")
    })?;

    consumer.process_group(0).stdin(Stdio::from(prod_stdout));
    let mut cons = match consumer.spawn() {
        Ok(cons) => cons,
        Err(e) => {
            kill_group(&prod);
            let _ = prod.wait();
            return Err(e.into());
        }
    };

    let deadline = deadline_for(timeout);
    let prod_status = match wait_with_deadline(&mut prod, deadline)? {
        Some(status) => status,
        None => {
            kill_group(&cons);
            let _ = cons.wait();
            return Err(PolytheneError::Timeout {
                context: context.to_string(),
                secs,
            });
        }
    };
    let cons_status = match wait_with_deadline(&mut cons, deadline)? {
        Some(status) => status,
        None => {
            return Err(PolytheneError::Timeout {
                context: context.to_string(),
                secs,
            })
        }
    };

    // The producer failing usually drags the consumer down via SIGPIPE;
    // report the producer's code first so the engine error wins.
    if !prod_status.success() {
        return Err(PolytheneError::Engine {
            context: context.to_string(),
            code: exit_code_of(prod_status),
        });
    }
    if !cons_status.success() {
        return Err(PolytheneError::Engine {
            context: context.to_string(),
            code: exit_code_of(cons_status),
        });
    }
    Ok(())
}
