//! Translates raw `waitpid` status words into the process-state changes
//! the job table cares about. Deriving the shell-visible exit code
//! (`128 + signal` for signal deaths) from a finished job is
//! `JobTable::reported_status`'s job, not this module's — it reads the
//! recorded exit code/signal off the job's last process rather than a
//! `ProcChange`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcChange {
    Exited(i32),
    Signaled(i32),
    Stopped,
    Continued,
}

pub fn classify(raw_status: libc::c_int) -> Option<ProcChange> {
    unsafe {
        if libc::WIFEXITED(raw_status) {
            Some(ProcChange::Exited(libc::WEXITSTATUS(raw_status)))
        } else if libc::WIFSIGNALED(raw_status) {
            Some(ProcChange::Signaled(libc::WTERMSIG(raw_status)))
        } else if libc::WIFSTOPPED(raw_status) {
            Some(ProcChange::Stopped)
        } else if libc::WIFCONTINUED(raw_status) {
            Some(ProcChange::Continued)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_decodes_exited_status() {
        let raw: libc::c_int = 42 << 8; // WIFEXITED encoding: exit code in bits 8-15
        assert_eq!(classify(raw), Some(ProcChange::Exited(42)));
    }

    #[test]
    fn classify_decodes_signaled_status() {
        let raw = libc::SIGINT; // WIFSIGNALED encoding: low 7 bits hold the signal
        assert_eq!(classify(raw), Some(ProcChange::Signaled(libc::SIGINT)));
    }
}
