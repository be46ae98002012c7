//! AST evaluator: fork/exec, pipeline wiring, process-group placement, and
//! controlling-terminal handoff. The `ForegroundTerminalGuard` RAII pattern
//! guarantees the terminal returns to the shell on every exit path, however
//! the foreground job finished.
//!
//! Every external stage (single command or pipeline member) goes through a
//! raw `fork`, not `std::process::Command`: a pipeline stage may itself be a
//! built-in, and a built-in has no executable to `exec` — it has to run the
//! in-process dispatcher inside the forked child before that child exits.

use std::ffi::CString;
use std::io;

use crate::builtins;
use crate::error::SpawnError;
use crate::job_control;
use crate::jobs::{Job, JobState, JobTable, Process};
use crate::parser::{Ast, Redir};
use crate::redirect;

/// Outcome of evaluating one AST node. `Error` is the internal-error
/// channel — distinct from a non-zero exit status — and aborts the
/// enclosing `Seq` rather than merely reporting a failing code.
enum ExecOutcome {
    Status(i32),
    Error,
}

/// Parses and runs one input line's AST, returning the shell-visible exit
/// status (an internal `Error` outcome is reported as status 1 and the line
/// is otherwise dropped, matching the "log a diagnostic, reprompt" rule).
pub fn execute_line(ast: &Ast, jobs: &mut JobTable) -> i32 {
    match execute_node(ast, jobs) {
        ExecOutcome::Status(status) => status,
        ExecOutcome::Error => 1,
    }
}

fn execute_node(node: &Ast, jobs: &mut JobTable) -> ExecOutcome {
    match node {
        Ast::Seq(children) => {
            let mut status = 0;
            for child in children {
                match execute_node(child, jobs) {
                    ExecOutcome::Status(s) => status = s,
                    ExecOutcome::Error => return ExecOutcome::Error,
                }
            }
            ExecOutcome::Status(status)
        }
        Ast::And(left, right) => match execute_node(left, jobs) {
            ExecOutcome::Status(0) => execute_node(right, jobs),
            other @ ExecOutcome::Status(_) => other,
            ExecOutcome::Error => ExecOutcome::Error,
        },
        Ast::Or(left, right) => match execute_node(left, jobs) {
            ExecOutcome::Status(s) if s != 0 => execute_node(right, jobs),
            other @ ExecOutcome::Status(_) => other,
            ExecOutcome::Error => ExecOutcome::Error,
        },
        Ast::Bg(child) => {
            execute_bg(child, jobs);
            ExecOutcome::Status(0)
        }
        Ast::Pipe(stages) => execute_pipe(stages, jobs, false),
        Ast::Cmd { argv, redirs } => execute_cmd(argv, redirs, jobs, false),
    }
}

/// A `Bg` node's child is always `Cmd` or `Pipe` per the parser's invariant
/// (`wrap_bg` in `parser.rs` rejects anything else at parse time).
fn execute_bg(child: &Ast, jobs: &mut JobTable) {
    match child {
        Ast::Pipe(stages) => {
            execute_pipe(stages, jobs, true);
        }
        Ast::Cmd { argv, redirs } => {
            execute_cmd(argv, redirs, jobs, true);
        }
        _ => unreachable!("parser guarantees Bg wraps only Cmd or Pipe"),
    }
}

fn execute_cmd(argv: &[String], redirs: &[Redir], jobs: &mut JobTable, is_bg: bool) -> ExecOutcome {
    if argv.is_empty() {
        return ExecOutcome::Status(0);
    }

    if builtins::is_builtin(&argv[0]) {
        // Built-ins never fork; background has no meaning for them, so the
        // flag is simply not threaded through here.
        let mut backup = redirect::Backup::new();
        if let Err(e) = redirect::apply_temporary(redirs, &mut backup) {
            eprintln!("jsh: {e}");
            return ExecOutcome::Error;
        }
        let status = builtins::execute(argv, jobs, builtins::Context::TopLevel);
        redirect::undo(&mut backup);
        return ExecOutcome::Status(status);
    }

    match spawn_single(argv, redirs) {
        Ok(pid) => run_or_background(jobs, pid as u32, vec![Process::new(pid as u32)], is_bg),
        Err(e) => {
            eprintln!("jsh: {e}");
            ExecOutcome::Error
        }
    }
}

/// Registers a freshly spawned job (single command or pipeline) and either
/// hands it straight to the job table for a background job, or waits for it
/// in the foreground under the controlling terminal.
fn run_or_background(jobs: &mut JobTable, pgid: u32, procs: Vec<Process>, is_bg: bool) -> ExecOutcome {
    let job_id = match jobs.new_id() {
        Ok(id) => id,
        Err(e) => {
            eprintln!("jsh: {e}");
            let _ = job_control::signal_pgid(pgid, libc::SIGKILL);
            for proc in &procs {
                unsafe {
                    libc::waitpid(proc.pid as libc::pid_t, std::ptr::null_mut(), 0);
                }
            }
            return ExecOutcome::Error;
        }
    };
    jobs.add_job(Job::new(job_id, pgid, procs, is_bg));

    if is_bg {
        println!("[{job_id}] {pgid}");
        return ExecOutcome::Status(0);
    }

    let guard = match job_control::ForegroundTerminalGuard::new(pgid as libc::pid_t) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("jsh: failed to hand terminal to job {job_id}: {e}");
            None
        }
    };
    if let Err(e) = job_control::wait_for_job(pgid as libc::pid_t, job_id, jobs) {
        eprintln!("jsh: {e}");
    }
    drop(guard);

    jobs.update_jobs();
    let status = match jobs.get_job(job_id as i64) {
        Some(job) if job.state == JobState::Done => JobTable::reported_status(job),
        // Stopped (Ctrl-Z) or otherwise still around: the line reports success,
        // the job itself stays in the table for a later `fg`/`bg`.
        _ => 0,
    };
    // A finished foreground job has nothing left for `jobs`/`fg`/`bg` to act
    // on; prune it immediately rather than leaving it for the next prompt's
    // drain (`remove_zombies` only removes jobs already `Done`, so a job
    // still `Stopped` here is untouched and stays available for `fg`/`bg`).
    jobs.remove_zombies();
    ExecOutcome::Status(status)
}

/// Forks a single external command, applying redirections permanently in the
/// child. The parent also calls `setpgid` on the child, tolerating the race
/// against the child's own `setpgid(0,0)`.
fn spawn_single(argv: &[String], redirs: &[Redir]) -> Result<libc::pid_t, SpawnError> {
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(SpawnError::Fork(io::Error::last_os_error()));
    }
    if pid == 0 {
        job_control::reset_child_signals();
        unsafe {
            libc::setpgid(0, 0);
        }
        if let Err(e) = redirect::apply_permanent(redirs) {
            eprintln!("jsh: {e}");
            std::process::exit(127);
        }
        exec_argv(argv);
    }

    let _ = job_control::set_process_group(pid, pid);
    Ok(pid)
}

/// `execvp` the given argv in the current (forked) process. Never returns on
/// success; on failure prints a diagnostic and exits 127.
fn exec_argv(argv: &[String]) -> ! {
    let Ok(program) = CString::new(argv[0].as_bytes()) else {
        eprintln!("jsh: {}: invalid executable name", argv[0]);
        std::process::exit(127);
    };
    let cargs: Vec<CString> = argv
        .iter()
        .map(|a| CString::new(a.as_bytes()).unwrap_or_default())
        .collect();
    let mut argv_ptrs: Vec<*const libc::c_char> = cargs.iter().map(|c| c.as_ptr()).collect();
    argv_ptrs.push(std::ptr::null());

    unsafe {
        libc::execvp(program.as_ptr(), argv_ptrs.as_ptr());
    }

    // execvp only returns on failure.
    let err = io::Error::last_os_error();
    let spawn_err = if err.raw_os_error() == Some(libc::ENOENT) {
        SpawnError::NotFound { program: argv[0].clone() }
    } else {
        SpawnError::Exec { program: argv[0].clone(), source: err }
    };
    eprintln!("jsh: {spawn_err}");
    std::process::exit(127);
}

/// Runs an N-stage pipeline: N-1 pipes, N forked children, the first child
/// is the process-group leader and every later stage joins that group.
/// A pipeline stage that is a built-in still runs inside its own forked
/// child (see module docs) so `exit` used mid-pipeline terminates only
/// that child.
fn execute_pipe(stages: &[Ast], jobs: &mut JobTable, is_bg: bool) -> ExecOutcome {
    let cmds: Vec<(&[String], &[Redir])> = stages
        .iter()
        .map(|stage| match stage {
            Ast::Cmd { argv, redirs } => (argv.as_slice(), redirs.as_slice()),
            _ => unreachable!("parser guarantees pipeline stages are Cmd"),
        })
        .collect();
    let n = cmds.len();

    let mut pipe_fds: Vec<(libc::c_int, libc::c_int)> = Vec::with_capacity(n - 1);
    for _ in 0..n - 1 {
        let mut fds = [0i32; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            eprintln!("jsh: {}", SpawnError::Pipe(io::Error::last_os_error()));
            close_all(&pipe_fds);
            return ExecOutcome::Error;
        }
        pipe_fds.push((fds[0], fds[1]));
    }

    let mut pids: Vec<libc::pid_t> = Vec::with_capacity(n);
    let mut leader: Option<libc::pid_t> = None;

    for (i, (argv, redirs)) in cmds.iter().enumerate() {
        let pid = unsafe { libc::fork() };
        if pid < 0 {
            eprintln!("jsh: fork: {}", io::Error::last_os_error());
            close_all(&pipe_fds);
            for &p in &pids {
                unsafe {
                    libc::waitpid(p, std::ptr::null_mut(), 0);
                }
            }
            return ExecOutcome::Error;
        }

        if pid == 0 {
            unsafe {
                libc::setpgid(0, leader.unwrap_or(0));
            }
            job_control::reset_child_signals();

            if i > 0 {
                unsafe {
                    libc::dup2(pipe_fds[i - 1].0, 0);
                }
            }
            if i < n - 1 {
                unsafe {
                    libc::dup2(pipe_fds[i].1, 1);
                }
            }
            close_all(&pipe_fds);

            if let Err(e) = redirect::apply_permanent(redirs) {
                eprintln!("jsh: {e}");
                std::process::exit(127);
            }

            if argv.is_empty() {
                std::process::exit(0);
            }
            if builtins::is_builtin(&argv[0]) {
                let mut local_jobs = JobTable::new();
                let status = builtins::execute(argv, &mut local_jobs, builtins::Context::ForkedChild);
                std::process::exit(status);
            }
            exec_argv(argv);
        }

        if i == 0 {
            let _ = job_control::set_process_group(pid, pid);
            leader = Some(pid);
        } else {
            let _ = job_control::set_process_group(pid, leader.expect("leader set on first iteration"));
        }
        pids.push(pid);
    }

    close_all(&pipe_fds);

    let pgid = leader.expect("at least one stage forked") as u32;
    let procs = pids.iter().map(|&p| Process::new(p as u32)).collect();
    run_or_background(jobs, pgid, procs, is_bg)
}

fn close_all(pipe_fds: &[(libc::c_int, libc::c_int)]) {
    for (r, w) in pipe_fds {
        unsafe {
            libc::close(*r);
            libc::close(*w);
        }
    }
}
