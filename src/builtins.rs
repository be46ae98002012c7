//! In-process commands that share the shell's state directly: the job
//! table (`jobs`/`fg`/`bg`/`wait`), the controlling terminal (`fg`), and
//! the current working directory (`cd`). `pwd`/`echo`/`export`/`unset`/
//! `type` are supplemental built-ins that need no such coupling but are
//! cheap enough, and common enough in practice, to keep in-process rather
//! than push out to `/bin`.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::job_control;
use crate::jobs::{self, JobState, JobTable, ProcState};

const BUILTINS: &[&str] = &[
    "cd", "exit", "jobs", "fg", "bg", "pwd", "echo", "export", "unset", "type", "wait",
];

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// Whether this invocation is running in the real shell process (so
/// `exit` must run `kill_jobs` before terminating) or in a forked
/// pipeline child (a disposable process with its own copy of the job
/// table, where `exit` just terminates that child).
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Context {
    TopLevel,
    ForkedChild,
}

fn terminate(jobs: &mut JobTable, ctx: Context, code: i32) -> ! {
    if ctx == Context::TopLevel {
        jobs.kill_jobs();
    }
    std::process::exit(code);
}

pub fn execute(argv: &[String], jobs: &mut JobTable, ctx: Context) -> i32 {
    let args = &argv[1..];
    match argv[0].as_str() {
        "cd" => builtin_cd(args),
        "exit" => builtin_exit(args, jobs, ctx),
        "jobs" => builtin_jobs(jobs),
        "fg" => builtin_fg(args, jobs),
        "bg" => builtin_bg(args, jobs),
        "wait" => builtin_wait(args, jobs),
        "pwd" => builtin_pwd(),
        "echo" => builtin_echo(args),
        "export" => builtin_export(args),
        "unset" => builtin_unset(args),
        "type" => builtin_type(args),
        other => {
            eprintln!("jsh: {other}: not a builtin");
            1
        }
    }
}

fn builtin_cd(args: &[String]) -> i32 {
    if args.len() > 1 {
        eprintln!("jsh: cd: too many arguments");
        return 1;
    }

    let target = match args.first().map(String::as_str) {
        None | Some("~") => match std::env::var("HOME") {
            Ok(home) => home,
            Err(_) => {
                eprintln!("jsh: cd: HOME not set");
                return 1;
            }
        },
        Some("-") => match std::env::var("OLDPWD") {
            Ok(prev) => prev,
            Err(_) => {
                eprintln!("jsh: cd: OLDPWD not set");
                return 1;
            }
        },
        Some(dir) => dir.to_string(),
    };

    let Ok(previous_cwd) = std::env::current_dir() else {
        eprintln!("jsh: cd: cannot read current directory");
        return 1;
    };

    if let Err(e) = std::env::set_current_dir(&target) {
        eprintln!("jsh: cd: {target}: {e}");
        return 1;
    }

    let new_cwd = std::env::current_dir().unwrap_or_else(|_| target.into());
    unsafe {
        std::env::set_var("OLDPWD", &previous_cwd);
        std::env::set_var("PWD", &new_cwd);
    }
    0
}

/// `exit [N]`: a bad argument (too many, or non-numeric) is a usage error
/// that reports status 1 and lets the shell continue, distinct from the
/// terminating path a well-formed `exit` always takes.
fn builtin_exit(args: &[String], jobs: &mut JobTable, ctx: Context) -> i32 {
    if args.len() > 1 {
        eprintln!("jsh: exit: too many arguments");
        return 1;
    }
    let code = match args.first() {
        None => 0,
        Some(s) => match s.parse::<i64>() {
            Ok(n) => n.rem_euclid(256) as i32,
            Err(_) => {
                eprintln!("jsh: exit: {s}: numeric argument required");
                return 1;
            }
        },
    };
    terminate(jobs, ctx, code)
}

fn builtin_jobs(jobs: &JobTable) -> i32 {
    for job in jobs.jobs() {
        println!("{}", jobs::format_job(job));
    }
    0
}

/// Parses an optional `%N` job-id argument; `None` selects the most
/// recent job (table head).
fn parse_job_arg(args: &[String]) -> Result<i64, String> {
    match args.first() {
        None => Ok(-1),
        Some(arg) => {
            let digits = arg.strip_prefix('%').ok_or_else(|| format!("jsh: {arg}: bad job spec"))?;
            digits
                .parse::<i64>()
                .map_err(|_| format!("jsh: {arg}: bad job spec"))
        }
    }
}

fn builtin_fg(args: &[String], jobs: &mut JobTable) -> i32 {
    let id = match parse_job_arg(args) {
        Ok(id) => id,
        Err(msg) => {
            eprintln!("{msg}");
            return 1;
        }
    };
    let Some(job) = jobs.get_job(id) else {
        eprintln!("jsh: fg: no such job");
        return 1;
    };
    let pgid = job.pgid;
    let job_id = job.id;

    if let Err(e) = job_control::signal_pgid(pgid, libc::SIGCONT) {
        eprintln!("jsh: fg: {e}");
        return 1;
    }
    if let Some(job) = jobs.get_job_mut(job_id as i64) {
        for proc in job.procs.iter_mut() {
            if proc.state != ProcState::Done {
                proc.state = ProcState::Run;
            }
        }
        job.is_dirty = true;
        job.is_bg = false;
    }

    let guard = match job_control::ForegroundTerminalGuard::new(pgid as libc::pid_t) {
        Ok(g) => Some(g),
        Err(_) => None,
    };
    if let Err(e) = job_control::wait_for_job(pgid as libc::pid_t, job_id, jobs) {
        eprintln!("jsh: fg: {e}");
    }
    drop(guard);

    jobs.update_jobs();
    match jobs.get_job(job_id as i64) {
        Some(job) if job.state == JobState::Done => JobTable::reported_status(job),
        _ => 0,
    }
}

fn builtin_bg(args: &[String], jobs: &mut JobTable) -> i32 {
    let id = match parse_job_arg(args) {
        Ok(id) => id,
        Err(msg) => {
            eprintln!("{msg}");
            return 1;
        }
    };
    let Some(job) = jobs.get_job(id) else {
        eprintln!("jsh: bg: no such job");
        return 1;
    };
    let pgid = job.pgid;
    let job_id = job.id;

    if let Err(e) = job_control::signal_pgid(pgid, libc::SIGCONT) {
        eprintln!("jsh: bg: {e}");
        return 1;
    }
    if let Some(job) = jobs.get_job_mut(job_id as i64) {
        for proc in job.procs.iter_mut() {
            if proc.state != ProcState::Done {
                proc.state = ProcState::Run;
            }
        }
        job.is_dirty = true;
        job.is_bg = true;
    }
    0
}

/// Blocks until the selected job (most recent, by default) is `Done`,
/// then reports its last process's exit status as this builtin's own
/// status — observable directly via `&&`/`||` without needing `$?`.
fn builtin_wait(args: &[String], jobs: &mut JobTable) -> i32 {
    let id = match parse_job_arg(args) {
        Ok(id) => id,
        Err(msg) => {
            eprintln!("{msg}");
            return 1;
        }
    };
    let Some(job) = jobs.get_job(id) else {
        eprintln!("jsh: wait: no such job");
        return 1;
    };
    let pgid = job.pgid;
    let job_id = job.id;

    if let Err(e) = job_control::wait_for_job(pgid as libc::pid_t, job_id, jobs) {
        eprintln!("jsh: wait: {e}");
        return 1;
    }
    jobs.update_jobs();
    let status = match jobs.get_job(job_id as i64) {
        Some(job) if job.state == JobState::Done => JobTable::reported_status(job),
        Some(_) => 0,
        None => 0,
    };
    println!("jsh: wait: job {job_id} exited with status {status}");
    jobs.remove_zombies();
    status
}

fn builtin_pwd() -> i32 {
    match std::env::current_dir() {
        Ok(path) => {
            println!("{}", path.display());
            0
        }
        Err(e) => {
            eprintln!("jsh: pwd: {e}");
            1
        }
    }
}

fn builtin_echo(args: &[String]) -> i32 {
    let mut stdout = std::io::stdout();
    let _ = writeln!(stdout, "{}", args.join(" "));
    0
}

fn builtin_export(args: &[String]) -> i32 {
    for arg in args {
        match arg.split_once('=') {
            Some((key, value)) => unsafe { std::env::set_var(key, value) },
            None => eprintln!("jsh: export: usage: export VAR=value"),
        }
    }
    0
}

fn builtin_unset(args: &[String]) -> i32 {
    for arg in args {
        unsafe { std::env::remove_var(arg) };
    }
    0
}

fn builtin_type(args: &[String]) -> i32 {
    let mut status = 0;
    for arg in args {
        if is_builtin(arg) {
            println!("{arg} is a shell builtin");
        } else if let Some(path) = find_in_path(arg) {
            println!("{arg} is {}", path.display());
        } else {
            eprintln!("jsh: type: {arg}: not found");
            status = 1;
        }
    }
    status
}

fn is_executable(path: &Path) -> bool {
    let Ok(meta) = path.metadata() else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

fn find_in_path(cmd: &str) -> Option<PathBuf> {
    let path_var = std::env::var("PATH").ok()?;
    for dir in path_var.split(':') {
        let full_path = Path::new(dir).join(cmd);
        if is_executable(&full_path) {
            return Some(full_path);
        }
    }
    None
}
