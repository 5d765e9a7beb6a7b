//! ## hotplug-spawn::exit
//! **Classification of a reaped helper**

use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Normal exit with the given status code.
    Exited(i32),
    /// Terminated (or dumped core) because of a signal.
    Signaled { signal: i32, core_dumped: bool },
    Unknown,
}

impl ExitKind {
    pub fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            ExitKind::Exited(code)
        } else if let Some(signal) = status.signal() {
            ExitKind::Signaled {
                signal,
                core_dumped: status.core_dumped(),
            }
        } else {
            ExitKind::Unknown
        }
    }

    pub fn success(self) -> bool {
        self == ExitKind::Exited(0)
    }
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitKind::Exited(code) => write!(f, "exit code {code}"),
            ExitKind::Signaled { signal, .. } => write!(f, "signal {}", signal_name(*signal)),
            ExitKind::Unknown => f.write_str("unknown status"),
        }
    }
}

/// Result of one supervised run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnOutcome {
    pub pid: u32,
    pub exit: ExitKind,
    /// The kill deadline fired before the helper exited.
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl SpawnOutcome {
    pub fn success(&self) -> bool {
        self.exit.success()
    }
}

pub fn signal_name(signal: i32) -> &'static str {
    match signal {
        libc::SIGHUP => "HUP",
        libc::SIGINT => "INT",
        libc::SIGQUIT => "QUIT",
        libc::SIGILL => "ILL",
        libc::SIGTRAP => "TRAP",
        libc::SIGABRT => "ABRT",
        libc::SIGBUS => "BUS",
        libc::SIGFPE => "FPE",
        libc::SIGKILL => "KILL",
        libc::SIGUSR1 => "USR1",
        libc::SIGSEGV => "SEGV",
        libc::SIGUSR2 => "USR2",
        libc::SIGPIPE => "PIPE",
        libc::SIGALRM => "ALRM",
        libc::SIGTERM => "TERM",
        libc::SIGCHLD => "CHLD",
        libc::SIGCONT => "CONT",
        libc::SIGSTOP => "STOP",
        libc::SIGTSTP => "TSTP",
        libc::SIGTTIN => "TTIN",
        libc::SIGTTOU => "TTOU",
        libc::SIGURG => "URG",
        libc::SIGXCPU => "XCPU",
        libc::SIGXFSZ => "XFSZ",
        libc::SIGVTALRM => "VTALRM",
        libc::SIGPROF => "PROF",
        libc::SIGWINCH => "WINCH",
        libc::SIGIO => "IO",
        libc::SIGSYS => "SYS",
        _ => "unknown",
    }
}
