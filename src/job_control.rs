//! Low-level POSIX job-control primitives: process-group placement,
//! controlling-terminal handoff, and signal delivery to a process group.
//! Retries on `EINTR` and tolerates the `setpgid` race between parent and
//! child throughout.

use std::io;

pub fn set_process_group(pid: libc::pid_t, pgid: libc::pid_t) -> io::Result<()> {
    loop {
        let rc = unsafe { libc::setpgid(pid, pgid) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == libc::EINTR => continue,
            // Whichever of parent/child loses the race sees this; the
            // other side's call already established the right group.
            Some(code) if code == libc::EACCES || code == libc::ESRCH => return Ok(()),
            _ => return Err(err),
        }
    }
}

/// Send `signal` to every process in group `pgid` (`kill(-pgid, signal)`).
pub fn signal_pgid(pgid: u32, signal: libc::c_int) -> io::Result<()> {
    if pgid == 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "invalid process group id"));
    }
    loop {
        let rc = unsafe { libc::kill(-(pgid as libc::pid_t), signal) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == libc::EINTR => continue,
            // The group may already be gone by the time we signal it.
            Some(code) if code == libc::ESRCH => return Ok(()),
            _ => return Err(err),
        }
    }
}

pub struct ForegroundTerminalGuard {
    tty_fd: Option<libc::c_int>,
    shell_pgid: libc::pid_t,
}

impl ForegroundTerminalGuard {
    /// Transfers the controlling terminal to `target_pgid` if stdin is a
    /// tty; otherwise a no-op guard. Restoration to the shell's own pgid
    /// happens unconditionally on drop.
    pub fn new(target_pgid: libc::pid_t) -> io::Result<Self> {
        let tty_fd = if unsafe { libc::isatty(libc::STDIN_FILENO) } == 1 {
            Some(libc::STDIN_FILENO)
        } else {
            None
        };

        let shell_pgid = unsafe { libc::getpgrp() };
        let guard = Self { tty_fd, shell_pgid };

        if let Some(fd) = guard.tty_fd {
            set_terminal_foreground(fd, target_pgid)?;
        }

        Ok(guard)
    }
}

impl Drop for ForegroundTerminalGuard {
    fn drop(&mut self) {
        if let Some(fd) = self.tty_fd {
            let _ = set_terminal_foreground(fd, self.shell_pgid);
        }
    }
}

/// Waits for any state change (exit, signal death, stop, continue) in
/// process group `pgid`, feeding each one to `jobs.update_proc`, until the
/// owning job's aggregated state is no longer `Running`, or there is
/// nothing left to wait for (`ECHILD`).
pub fn wait_for_job(pgid: libc::pid_t, job_id: u32, jobs: &mut crate::jobs::JobTable) -> io::Result<()> {
    loop {
        jobs.update_jobs();
        match jobs.get_job(job_id as i64) {
            Some(job) if job.state != crate::jobs::JobState::Running => return Ok(()),
            None => return Ok(()),
            _ => {}
        }

        let mut raw_status: libc::c_int = 0;
        let rc = unsafe { libc::waitpid(-pgid, &mut raw_status, libc::WUNTRACED) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(code) if code == libc::EINTR => continue,
                Some(code) if code == libc::ECHILD => return Ok(()),
                _ => return Err(err),
            }
        }
        jobs.update_proc(rc as u32, raw_status);
    }
}

struct SignalIgnoreGuard {
    signal: libc::c_int,
    previous: libc::sighandler_t,
}

impl SignalIgnoreGuard {
    fn ignore(signal: libc::c_int) -> io::Result<Self> {
        let previous = unsafe { libc::signal(signal, libc::SIG_IGN) };
        if previous == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { signal, previous })
    }
}

impl Drop for SignalIgnoreGuard {
    fn drop(&mut self) {
        unsafe {
            libc::signal(self.signal, self.previous);
        }
    }
}

fn set_terminal_foreground(fd: libc::c_int, pgid: libc::pid_t) -> io::Result<()> {
    if pgid <= 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "invalid process group id"));
    }

    // tcsetpgrp from a background process would otherwise raise SIGTTOU.
    let _sigttou = SignalIgnoreGuard::ignore(libc::SIGTTOU)?;
    loop {
        let rc = unsafe { libc::tcsetpgrp(fd, pgid) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}

/// Installs the shell's startup signal disposition: terminal-generated
/// and job-control signals are ignored at the prompt; `SIGCHLD` gets an
/// empty handler whose only purpose is to interrupt blocking syscalls so
/// the main loop notices children have changed state.
pub fn install_shell_signal_handlers() -> io::Result<()> {
    for sig in [libc::SIGINT, libc::SIGTSTP, libc::SIGTTOU, libc::SIGTTIN] {
        if unsafe { libc::signal(sig, libc::SIG_IGN) } == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
    }
    unsafe {
        // No SA_RESTART: the handler exists purely so a blocking read() on
        // the prompt is interrupted (EINTR) when a child changes state,
        // letting the main loop reap it instead of waiting for more input.
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = empty_sigchld_handler as usize;
        libc::sigemptyset(&mut action.sa_mask);
        action.sa_flags = 0;
        if libc::sigaction(libc::SIGCHLD, &action, std::ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

extern "C" fn empty_sigchld_handler(_signal: libc::c_int) {}

/// Restores default dispositions for a forked child just before `exec`.
pub fn reset_child_signals() {
    unsafe {
        libc::signal(libc::SIGINT, libc::SIG_DFL);
        libc::signal(libc::SIGTSTP, libc::SIG_DFL);
        libc::signal(libc::SIGTTOU, libc::SIG_DFL);
        libc::signal(libc::SIGTTIN, libc::SIG_DFL);
        libc::signal(libc::SIGCHLD, libc::SIG_DFL);
        libc::signal(libc::SIGQUIT, libc::SIG_DFL);
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }
}
