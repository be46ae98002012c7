//! Redirection engine: open files and rewire descriptors, either
//! permanently (for a child about to `exec`) or temporarily with a
//! backup/undo stack (for a built-in running in the shell process
//! itself).

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::error::RedirError;
use crate::parser::{Redir, RedirKind};

fn flags_and_mode(kind: RedirKind) -> (libc::c_int, libc::mode_t) {
    match kind {
        RedirKind::In => (libc::O_RDONLY, 0),
        RedirKind::Out => (libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC, 0o644),
        RedirKind::Append => (libc::O_WRONLY | libc::O_CREAT | libc::O_APPEND, 0o644),
        RedirKind::Dup(_) | RedirKind::HereString => unreachable!("handled by source_fd"),
    }
}

fn open_target(path: &str, kind: RedirKind) -> Result<libc::c_int, RedirError> {
    let (flags, mode) = flags_and_mode(kind);
    let cpath = CString::new(Path::new(path).as_os_str().as_bytes())
        .map_err(|_| RedirError::Open {
            path: path.to_string(),
            source: std::io::Error::from(std::io::ErrorKind::InvalidInput),
        })?;
    let fd = unsafe { libc::open(cpath.as_ptr(), flags, mode as libc::c_uint) };
    if fd < 0 {
        return Err(RedirError::Open {
            path: path.to_string(),
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(fd)
}

/// Writes `text` plus a trailing newline into a pipe and returns the read
/// end, so a `<<<word` redirection can be wired up exactly like a real fd.
/// Here-string text comes from a single lexed word, so it always fits the
/// pipe buffer in one, non-blocking-in-practice write.
fn here_string_fd(text: &str) -> Result<libc::c_int, RedirError> {
    let mut fds = [0i32; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(RedirError::HereString(std::io::Error::last_os_error()));
    }
    let (read_fd, write_fd) = (fds[0], fds[1]);
    let mut payload = text.as_bytes().to_vec();
    payload.push(b'\n');
    let mut written = 0usize;
    while written < payload.len() {
        let n = unsafe {
            libc::write(
                write_fd,
                payload[written..].as_ptr() as *const libc::c_void,
                payload.len() - written,
            )
        };
        if n < 0 {
            close_fd(read_fd);
            close_fd(write_fd);
            return Err(RedirError::HereString(std::io::Error::last_os_error()));
        }
        written += n as usize;
    }
    close_fd(write_fd);
    Ok(read_fd)
}

/// Resolves a redirection's source descriptor. File-backed and here-string
/// redirections open a fresh descriptor the caller must close after
/// `dup2`; `Dup` hands back an already-live descriptor that must not be
/// closed (it isn't ours).
fn source_fd(r: &Redir) -> Result<(libc::c_int, bool), RedirError> {
    match r.kind {
        RedirKind::In | RedirKind::Out | RedirKind::Append => {
            Ok((open_target(&r.path, r.kind)?, true))
        }
        RedirKind::HereString => Ok((here_string_fd(&r.path)?, true)),
        RedirKind::Dup(target_fd) => Ok((target_fd, false)),
    }
}

fn dup2_checked(from: libc::c_int, to: libc::c_int) -> Result<(), RedirError> {
    if unsafe { libc::dup2(from, to) } < 0 {
        return Err(RedirError::Dup(std::io::Error::last_os_error()));
    }
    Ok(())
}

fn close_fd(fd: libc::c_int) {
    unsafe {
        libc::close(fd);
    }
}

/// Open and `dup2` every redirection permanently, with no rollback. Meant
/// to run in a forked child just before `execvp`, where failure is fatal
/// to that child anyway.
pub fn apply_permanent(redirs: &[Redir]) -> Result<(), RedirError> {
    for r in redirs {
        let (src_fd, owned) = source_fd(r)?;
        let outcome = dup2_checked(src_fd, r.fd);
        if owned && src_fd != r.fd {
            close_fd(src_fd);
        }
        outcome?;
    }
    Ok(())
}

struct BackupEntry {
    fd: libc::c_int,
    /// `Some(saved)` when `fd` was open and its meaning was preserved by
    /// duplicating it; `None` when `fd` was not open, so undo just closes it.
    saved: Option<libc::c_int>,
}

/// Scoped backup stack for temporary redirections applied to the shell's
/// own descriptors while a built-in runs. Singleton per the redirection
/// engine's documented precondition: only one can be outstanding.
#[derive(Default)]
pub struct Backup {
    entries: Vec<BackupEntry>,
}

impl Backup {
    pub fn new() -> Self {
        Backup { entries: Vec::new() }
    }

    pub fn is_outstanding(&self) -> bool {
        !self.entries.is_empty()
    }
}

/// Duplicate `fd`'s current meaning into a close-on-exec descriptor, or
/// `None` if `fd` was not open (`EBADF`).
fn save_fd(fd: libc::c_int) -> Result<Option<libc::c_int>, RedirError> {
    let saved = unsafe { libc::dup(fd) };
    if saved < 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EBADF) {
            return Ok(None);
        }
        return Err(RedirError::Dup(err));
    }
    if unsafe { libc::fcntl(saved, libc::F_SETFD, libc::FD_CLOEXEC) } < 0 {
        let err = std::io::Error::last_os_error();
        close_fd(saved);
        return Err(RedirError::Dup(err));
    }
    Ok(Some(saved))
}

pub fn apply_temporary(redirs: &[Redir], backup: &mut Backup) -> Result<(), RedirError> {
    if backup.is_outstanding() {
        return Err(RedirError::AlreadyOutstanding);
    }
    for r in redirs {
        let saved = match save_fd(r.fd) {
            Ok(saved) => saved,
            Err(e) => {
                undo(backup);
                return Err(e);
            }
        };
        backup.entries.push(BackupEntry { fd: r.fd, saved });

        let (src_fd, owned) = match source_fd(r) {
            Ok(fd) => fd,
            Err(e) => {
                undo(backup);
                return Err(e);
            }
        };
        let rewired = dup2_checked(src_fd, r.fd);
        if owned && src_fd != r.fd {
            close_fd(src_fd);
        }
        if let Err(e) = rewired {
            undo(backup);
            return Err(e);
        }
    }
    Ok(())
}

pub fn undo(backup: &mut Backup) {
    while let Some(entry) = backup.entries.pop() {
        match entry.saved {
            Some(saved) => {
                unsafe {
                    libc::dup2(saved, entry.fd);
                }
                close_fd(saved);
            }
            None => close_fd(entry.fd),
        }
    }
}
