//! ## hotplug-spawn::spawner
//! **Bounded-time helper execution**
//!
//! One call, one child. The child is started with a clean signal state, the
//! device properties as its whole environment and a parent-death signal. The
//! caller then waits on the child's exit, both output pipes, the warn
//! deadline and the kill deadline in one `select!` loop. Firing the kill
//! deadline only signals the child; the loop keeps running until the exit is
//! reaped.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hotplug_core::{Device, Event};
use hotplug_telemetry::MetricsRecorder;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time;
use tracing::{debug, error, instrument, warn, Level};

use crate::capture::CaptureBuffer;
use crate::command::{resolve_program, split_command};
use crate::error::SpawnError;
use crate::exit::{signal_name, ExitKind, SpawnOutcome};

pub const DEFAULT_HELPER_DIR: &str = "/usr/lib/udev";

const READ_CHUNK: usize = 4096;
/// How long output is still collected after the exit was reaped. A helper
/// that leaked its stdout to a background process would otherwise hold the
/// pipe open forever.
const DRAIN_GRACE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct Spawner {
    helper_dir: PathBuf,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl Default for Spawner {
    fn default() -> Self {
        Self::new(DEFAULT_HELPER_DIR)
    }
}

impl Spawner {
    pub fn new(helper_dir: impl Into<PathBuf>) -> Self {
        Self {
            helper_dir: helper_dir.into(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn helper_dir(&self) -> &Path {
        &self.helper_dir
    }

    /// Runs `command` for `event` and reaps it.
    ///
    /// Both budgets are measured from the event's birth, so commands queued
    /// late in a transition get what is left of it. A zero `timeout` disables
    /// both deadlines, and a budget too large to represent as an instant
    /// arms no deadline. If the kill deadline has already passed when the
    /// child starts, the child is killed right away; udevd's `spawn_wait`
    /// arms no timer in that case and lets the child run unbounded.
    /// Captured stdout goes into `capture`, bounded by its capacity.
    #[instrument(name = "spawn", skip_all, fields(command = %command))]
    pub async fn run<D: Device>(
        &self,
        event: &Event<'_, D>,
        command: &str,
        timeout: Duration,
        warn_after: Duration,
        accept_failure: bool,
        capture: Option<&mut CaptureBuffer>,
    ) -> Result<SpawnOutcome, SpawnError> {
        let argv = split_command(command);
        let (program, args) = argv.split_first().ok_or(SpawnError::EmptyCommand)?;
        let path = resolve_program(&self.helper_dir, program);

        let log_output = tracing::enabled!(Level::DEBUG);
        let stdout = if capture.is_some() || log_output {
            Stdio::piped()
        } else {
            Stdio::null()
        };
        let stderr = if log_output {
            Stdio::piped()
        } else {
            Stdio::null()
        };

        let mut cmd = Command::new(&path);
        cmd.args(args)
            .env_clear()
            .envs(event.device().properties())
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true);
        let parent = std::process::id();
        // SAFETY: the closure only calls async-signal-safe libc functions.
        unsafe {
            cmd.pre_exec(move || reset_child(parent));
        }

        debug!("Starting '{}'", command);
        let started = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                if let Some(m) = &self.metrics {
                    m.spawn_failures.inc();
                }
                return Err(SpawnError::Exec {
                    command: command.to_string(),
                    source,
                });
            }
        };
        let pid = child.id().unwrap_or(0);
        if let Some(m) = &self.metrics {
            m.spawned_commands.inc();
        }

        let deadlines = Deadlines::compute(event.birth(), timeout, warn_after, Instant::now());
        let mut kill_pending = deadlines.kill.is_some();
        let mut warn_pending = deadlines.warn.is_some();
        let kill_sleep = time::sleep_until(to_tokio(deadlines.kill));
        let warn_sleep = time::sleep_until(to_tokio(deadlines.warn));
        tokio::pin!(kill_sleep);
        tokio::pin!(warn_sleep);

        let mut out_pipe = child.stdout.take();
        let mut err_pipe = child.stderr.take();
        let mut out_buf = [0u8; READ_CHUNK];
        let mut err_buf = [0u8; READ_CHUNK];
        let mut sink = OutputSink {
            command,
            log_output,
            capture,
        };
        let mut timed_out = false;

        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                read = read_pipe(&mut out_pipe, &mut out_buf) => {
                    if !sink.consume(Stream::Stdout, read, &out_buf) {
                        out_pipe = None;
                    }
                }
                read = read_pipe(&mut err_pipe, &mut err_buf) => {
                    if !sink.consume(Stream::Stderr, read, &err_buf) {
                        err_pipe = None;
                    }
                }
                _ = &mut warn_sleep, if warn_pending => {
                    warn_pending = false;
                    warn!(
                        "Spawned process '{}' [{}] is taking longer than {:?} to complete",
                        command, pid, warn_after
                    );
                }
                _ = &mut kill_sleep, if kill_pending => {
                    kill_pending = false;
                    warn_pending = false;
                    timed_out = true;
                    error!(
                        "Spawned process '{}' [{}] timed out after {:?}, killing",
                        command, pid, timeout
                    );
                    if let Some(m) = &self.metrics {
                        m.spawn_timeouts.inc();
                    }
                    if let Err(e) = kill_with_continue(pid, libc::SIGKILL) {
                        error!("Failed to kill process '{}' [{}]: {}", command, pid, e);
                    }
                }
            }
        };

        let status = match status {
            Ok(status) => status,
            Err(source) => {
                if let Some(m) = &self.metrics {
                    m.spawn_failures.inc();
                }
                return Err(SpawnError::Wait {
                    command: command.to_string(),
                    source,
                });
            }
        };

        let drain = async {
            loop {
                tokio::select! {
                    read = read_pipe(&mut out_pipe, &mut out_buf), if out_pipe.is_some() => {
                        if !sink.consume(Stream::Stdout, read, &out_buf) {
                            out_pipe = None;
                        }
                    }
                    read = read_pipe(&mut err_pipe, &mut err_buf), if err_pipe.is_some() => {
                        if !sink.consume(Stream::Stderr, read, &err_buf) {
                            err_pipe = None;
                        }
                    }
                    else => break,
                }
            }
        };
        if time::timeout(DRAIN_GRACE, drain).await.is_err() {
            debug!("Output of '{}' still open after exit, closing", command);
        }

        let elapsed = started.elapsed();
        let exit = ExitKind::from_status(status);
        log_exit(command, exit, accept_failure);
        if let Some(m) = &self.metrics {
            m.command_duration.observe(elapsed.as_secs_f64());
            if !exit.success() {
                m.failed_exits.inc();
            }
        }

        Ok(SpawnOutcome {
            pid,
            exit,
            timed_out,
            elapsed,
        })
    }
}

/// Absolute deadlines for one run, derived from the event's birth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Deadlines {
    pub(crate) kill: Option<Instant>,
    pub(crate) warn: Option<Instant>,
}

impl Deadlines {
    pub(crate) fn compute(birth: Instant, timeout: Duration, warn: Duration, now: Instant) -> Self {
        if timeout.is_zero() {
            return Self {
                kill: None,
                warn: None,
            };
        }
        let warn = (!warn.is_zero() && warn < timeout)
            .then(|| birth.checked_add(warn))
            .flatten()
            .filter(|at| *at > now);
        Self {
            kill: birth.checked_add(timeout),
            warn,
        }
    }
}

fn to_tokio(deadline: Option<Instant>) -> time::Instant {
    deadline.map_or_else(time::Instant::now, time::Instant::from_std)
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn as_str(self) -> &'static str {
        match self {
            Stream::Stdout => "out",
            Stream::Stderr => "err",
        }
    }
}

struct OutputSink<'a> {
    command: &'a str,
    log_output: bool,
    capture: Option<&'a mut CaptureBuffer>,
}

impl OutputSink<'_> {
    /// Handles one read from `stream`; returns false once the pipe is done.
    fn consume(&mut self, stream: Stream, read: io::Result<usize>, buf: &[u8]) -> bool {
        let n = match read {
            Ok(0) => return false,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return true,
            Err(e) => {
                error!(
                    "Failed to read {} of '{}': {}",
                    stream.as_str(),
                    self.command,
                    e
                );
                return false;
            }
        };
        let data = &buf[..n];

        if let (Stream::Stdout, Some(capture)) = (stream, self.capture.as_deref_mut()) {
            let taken = capture.append(data);
            if taken < n {
                debug!(
                    "Output of '{}' exceeds capture buffer, dropping {} bytes",
                    self.command,
                    n - taken
                );
            }
        }

        if self.log_output {
            for line in String::from_utf8_lossy(data).split('\n') {
                if !line.is_empty() {
                    debug!("'{}'({}) '{}'", self.command, stream.as_str(), line);
                }
            }
        }
        true
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: &mut Option<R>, buf: &mut [u8]) -> io::Result<usize> {
    match pipe.as_mut() {
        Some(pipe) => pipe.read(buf).await,
        None => std::future::pending().await,
    }
}

fn log_exit(command: &str, exit: ExitKind, accept_failure: bool) {
    match exit {
        ExitKind::Exited(0) => debug!("Process '{}' succeeded.", command),
        ExitKind::Exited(code) if accept_failure => {
            debug!("Process '{}' failed with exit code {}.", command, code)
        }
        ExitKind::Exited(code) => warn!("Process '{}' failed with exit code {}.", command, code),
        ExitKind::Signaled {
            signal,
            core_dumped,
        } => warn!(
            "Process '{}' terminated by signal {}{}.",
            command,
            signal_name(signal),
            if core_dumped { " (core dumped)" } else { "" }
        ),
        ExitKind::Unknown => error!("Process '{}' failed due to unknown reason.", command),
    }
}

/// Sends `signal`, then SIGCONT so a stopped child can act on it.
fn kill_with_continue(pid: u32, signal: libc::c_int) -> io::Result<()> {
    // pid 0 would address our own process group.
    if pid == 0 {
        return Ok(());
    }
    let pid = libc::pid_t::try_from(pid).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    if unsafe { libc::kill(pid, signal) } != 0 {
        return Err(io::Error::last_os_error());
    }
    if signal != libc::SIGCONT && signal != libc::SIGKILL {
        unsafe {
            libc::kill(pid, libc::SIGCONT);
        }
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn max_signal() -> libc::c_int {
    libc::SIGRTMAX()
}

#[cfg(not(target_os = "linux"))]
fn max_signal() -> libc::c_int {
    31
}

/// Runs in the forked child before exec.
fn reset_child(parent: u32) -> io::Result<()> {
    unsafe {
        let mut set = std::mem::MaybeUninit::<libc::sigset_t>::uninit();
        libc::sigemptyset(set.as_mut_ptr());
        if libc::sigprocmask(libc::SIG_SETMASK, set.as_ptr(), std::ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
        // Real-time signals included; the ones reserved by libc just fail.
        for sig in 1..=max_signal() {
            if sig != libc::SIGKILL && sig != libc::SIGSTOP {
                libc::signal(sig, libc::SIG_DFL);
            }
        }

        #[cfg(target_os = "linux")]
        {
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM as libc::c_ulong) != 0 {
                return Err(io::Error::last_os_error());
            }
        }

        // The parent may have died before the death signal was armed.
        if libc::getppid() as u32 != parent {
            libc::_exit(0);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotplug_core::device::MemoryDevice;
    use std::os::unix::fs::PermissionsExt;
    use tracing_test::traced_test;

    fn device() -> MemoryDevice {
        MemoryDevice::new("/devices/virtual/misc/probe")
            .with_subsystem("misc")
            .with_property("ID_VENDOR", "acme")
    }

    #[tokio::test]
    async fn success_captures_stdout() {
        let mut dev = device();
        let event = Event::new(&mut dev);
        let mut capture = CaptureBuffer::new(64);
        let outcome = Spawner::default()
            .run(
                &event,
                "/bin/sh -c 'printf hello'",
                Duration::from_secs(30),
                Duration::from_secs(10),
                false,
                Some(&mut capture),
            )
            .await
            .unwrap();
        assert!(outcome.success());
        assert!(!outcome.timed_out);
        assert_eq!(capture.as_bytes(), b"hello");
        assert_eq!(capture.as_bytes_with_nul(), b"hello\0");
    }

    #[tokio::test]
    async fn capture_is_bounded() {
        let mut dev = device();
        let event = Event::new(&mut dev);
        let mut capture = CaptureBuffer::new(4);
        let outcome = Spawner::default()
            .run(
                &event,
                "/bin/sh -c 'printf abcdefgh'",
                Duration::from_secs(30),
                Duration::ZERO,
                false,
                Some(&mut capture),
            )
            .await
            .unwrap();
        assert!(outcome.success());
        assert_eq!(capture.as_bytes(), b"abc");
    }

    #[tokio::test]
    async fn environment_is_the_property_set() {
        let mut dev = device();
        let event = Event::new(&mut dev);
        let mut capture = CaptureBuffer::new(256);
        Spawner::default()
            .run(
                &event,
                r#"/bin/sh -c 'printf %s "$DEVPATH|$SUBSYSTEM|$ID_VENDOR|$HOME"'"#,
                Duration::from_secs(30),
                Duration::ZERO,
                false,
                Some(&mut capture),
            )
            .await
            .unwrap();
        assert_eq!(
            capture.to_string_lossy(),
            "/devices/virtual/misc/probe|misc|acme|"
        );
    }

    #[tokio::test]
    async fn relative_program_resolves_in_helper_dir() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("probe_id");
        std::fs::write(&script, "#!/bin/sh\nprintf 'ID_PROBE=%s' \"$1\"\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut dev = device();
        let event = Event::new(&mut dev);
        let mut capture = CaptureBuffer::new(64);
        let outcome = Spawner::new(dir.path())
            .run(
                &event,
                "probe_id sda",
                Duration::from_secs(30),
                Duration::ZERO,
                false,
                Some(&mut capture),
            )
            .await
            .unwrap();
        assert!(outcome.success());
        assert_eq!(capture.to_string_lossy(), "ID_PROBE=sda");
    }

    #[tokio::test]
    async fn overdue_child_is_killed_and_reaped() {
        let mut dev = device();
        let event = Event::new(&mut dev);
        let metrics = Arc::new(MetricsRecorder::new().unwrap());
        let outcome = Spawner::default()
            .with_metrics(metrics.clone())
            .run(
                &event,
                "/bin/sleep 30",
                Duration::from_secs(1),
                Duration::ZERO,
                false,
                None,
            )
            .await
            .unwrap();
        assert!(outcome.timed_out);
        assert!(!outcome.success());
        assert_eq!(
            outcome.exit,
            ExitKind::Signaled {
                signal: libc::SIGKILL,
                core_dumped: false
            }
        );
        assert!(outcome.elapsed < Duration::from_secs(10));
        // Reaped: the pid no longer names a process.
        assert_eq!(unsafe { libc::kill(outcome.pid as libc::pid_t, 0) }, -1);
        assert_eq!(metrics.spawn_timeouts.get() as u64, 1);
        assert_eq!(metrics.failed_exits.get() as u64, 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn nonzero_exit_is_reported() {
        let mut dev = device();
        let event = Event::new(&mut dev);
        let outcome = Spawner::default()
            .run(
                &event,
                "/bin/sh -c 'exit 3'",
                Duration::from_secs(30),
                Duration::ZERO,
                false,
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome.exit, ExitKind::Exited(3));
        assert!(logs_contain("failed with exit code 3"));
    }

    #[tokio::test]
    async fn missing_program_is_a_setup_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut dev = device();
        let event = Event::new(&mut dev);
        let err = Spawner::new(dir.path())
            .run(&event, "no_such_helper", Duration::from_secs(5), Duration::ZERO, false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SpawnError::Exec { .. }));
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let mut dev = device();
        let event = Event::new(&mut dev);
        let err = Spawner::default()
            .run(&event, "   ", Duration::from_secs(5), Duration::ZERO, false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SpawnError::EmptyCommand));
    }

    #[test]
    fn zero_timeout_arms_nothing() {
        let now = Instant::now();
        let d = Deadlines::compute(now, Duration::ZERO, Duration::from_secs(1), now);
        assert_eq!(d.kill, None);
        assert_eq!(d.warn, None);
    }

    #[test]
    fn budget_is_shared_from_birth() {
        let birth = Instant::now();
        let now = birth + Duration::from_secs(70);
        let d = Deadlines::compute(birth, Duration::from_secs(180), Duration::from_secs(60), now);
        assert_eq!(d.kill, Some(birth + Duration::from_secs(180)));
        // Warn point already passed.
        assert_eq!(d.warn, None);

        let d = Deadlines::compute(birth, Duration::from_secs(180), Duration::from_secs(60), birth);
        assert_eq!(d.warn, Some(birth + Duration::from_secs(60)));
    }

    #[test]
    fn oversized_budgets_arm_no_deadline() {
        let birth = Instant::now();
        let d = Deadlines::compute(birth, Duration::from_secs(5), Duration::MAX, birth);
        assert_eq!(d.kill, Some(birth + Duration::from_secs(5)));
        assert_eq!(d.warn, None);

        let d = Deadlines::compute(birth, Duration::MAX, Duration::from_secs(1), birth);
        assert_eq!(d.kill, None);
        assert_eq!(d.warn, Some(birth + Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn huge_timeout_runs_to_completion() {
        let mut dev = device();
        let event = Event::new(&mut dev);
        let outcome = Spawner::default()
            .run(
                &event,
                "/bin/true",
                Duration::from_secs(u64::MAX),
                Duration::from_secs(u64::MAX),
                false,
                None,
            )
            .await
            .unwrap();
        assert!(outcome.success());
        assert!(!outcome.timed_out);
    }

    #[tokio::test]
    #[traced_test]
    async fn warn_deadline_logs_without_killing() {
        let mut dev = device();
        let event = Event::new(&mut dev);
        let outcome = Spawner::default()
            .run(
                &event,
                "/bin/sleep 2",
                Duration::from_secs(10),
                Duration::from_secs(1),
                false,
                None,
            )
            .await
            .unwrap();
        assert!(outcome.success());
        assert!(!outcome.timed_out);
        assert!(logs_contain("is taking longer than 1s to complete"));
    }

    #[tokio::test]
    #[traced_test]
    async fn child_output_is_logged_at_debug() {
        let mut dev = device();
        let event = Event::new(&mut dev);
        let outcome = Spawner::default()
            .run(
                &event,
                "/bin/sh -c 'echo first; echo second >&2'",
                Duration::from_secs(30),
                Duration::ZERO,
                false,
                None,
            )
            .await
            .unwrap();
        assert!(outcome.success());
        assert!(logs_contain("(out) 'first'"));
        assert!(logs_contain("(err) 'second'"));
    }

    #[test]
    fn signal_reset_covers_realtime_signals() {
        #[cfg(target_os = "linux")]
        assert!(max_signal() > 32);
        assert!(max_signal() >= libc::SIGTERM);
    }

    #[test]
    fn warn_not_below_timeout_is_ignored() {
        let birth = Instant::now();
        let d = Deadlines::compute(birth, Duration::from_secs(5), Duration::from_secs(5), birth);
        assert_eq!(d.warn, None);
        assert!(d.kill.is_some());
    }
}
