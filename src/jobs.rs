//! Job table: the process-group registry. A job owns one or more
//! `Process` records sharing a process group; state is aggregated lazily
//! from per-process updates delivered by `waitpid`. Jobs live in a
//! `VecDeque` (head = most recently added) alongside a flat id pool
//! bounded by `MAX_JOBS`.

use std::collections::VecDeque;
use std::time::Duration;

use crate::error::JobError;
use crate::job_control;
use crate::status::{self, ProcChange};

pub const MAX_JOBS: usize = 1 << 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Run,
    Stop,
    Done,
}

#[derive(Debug, Clone)]
pub struct Process {
    pub pid: u32,
    pub state: ProcState,
    pub exit_code: Option<i32>,
    pub term_sig: Option<i32>,
}

impl Process {
    pub fn new(pid: u32) -> Self {
        Process {
            pid,
            state: ProcState::Run,
            exit_code: None,
            term_sig: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Stopped,
    Done,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: u32,
    pub pgid: u32,
    pub procs: Vec<Process>,
    pub nproc: usize,
    pub state: JobState,
    pub is_bg: bool,
    pub is_dirty: bool,
}

impl Job {
    pub fn new(id: u32, pgid: u32, procs: Vec<Process>, is_bg: bool) -> Self {
        let nproc = procs.len();
        Job {
            id,
            pgid,
            procs,
            nproc,
            state: JobState::Running,
            is_bg,
            is_dirty: false,
        }
    }
}

/// Aggregation rule: all done -> Done; any stopped -> Stopped; else Running.
fn aggregate(procs: &[Process]) -> JobState {
    if procs.iter().all(|p| p.state == ProcState::Done) {
        JobState::Done
    } else if procs.iter().any(|p| p.state == ProcState::Stop) {
        JobState::Stopped
    } else {
        JobState::Running
    }
}

pub struct JobTable {
    jobs: VecDeque<Job>,
    pool: Vec<bool>,
}

impl JobTable {
    pub fn new() -> Self {
        JobTable {
            jobs: VecDeque::new(),
            pool: vec![false; MAX_JOBS],
        }
    }

    pub fn new_id(&mut self) -> Result<u32, JobError> {
        for (i, taken) in self.pool.iter_mut().enumerate() {
            if !*taken {
                *taken = true;
                return Ok(i as u32);
            }
        }
        Err(JobError::Full)
    }

    pub fn add_job(&mut self, job: Job) {
        self.jobs.push_front(job);
    }

    /// Finds the job owning `pid`, applies the status change, and marks
    /// the job dirty. Returns whether a matching process was found.
    pub fn update_proc(&mut self, pid: u32, raw_status: libc::c_int) -> bool {
        let Some(change) = status::classify(raw_status) else {
            return false;
        };
        for job in self.jobs.iter_mut() {
            if let Some(proc) = job.procs.iter_mut().find(|p| p.pid == pid) {
                match change {
                    ProcChange::Exited(code) => {
                        proc.state = ProcState::Done;
                        proc.exit_code = Some(code);
                    }
                    ProcChange::Signaled(sig) => {
                        proc.state = ProcState::Done;
                        proc.term_sig = Some(sig);
                    }
                    ProcChange::Stopped => proc.state = ProcState::Stop,
                    ProcChange::Continued => proc.state = ProcState::Run,
                }
                job.is_dirty = true;
                return true;
            }
        }
        false
    }

    pub fn update_job(job: &mut Job) {
        if !job.is_dirty {
            return;
        }
        job.state = aggregate(&job.procs);
        job.is_dirty = false;
    }

    pub fn update_jobs(&mut self) {
        for job in self.jobs.iter_mut() {
            Self::update_job(job);
        }
    }

    /// Reported status of a job's last process (pipeline convention: the
    /// rightmost stage's exit code/signal wins).
    pub fn reported_status(job: &Job) -> i32 {
        let Some(last) = job.procs.last() else {
            return 0;
        };
        if let Some(code) = last.exit_code {
            code
        } else if let Some(sig) = last.term_sig {
            128 + sig
        } else {
            0
        }
    }

    /// Removes every job whose aggregated state is `Done`, printing a
    /// completion notice for backgrounded ones.
    pub fn remove_zombies(&mut self) {
        let mut freed = Vec::new();
        self.jobs.retain(|job| {
            if job.state == JobState::Done {
                if job.is_bg {
                    println!("[{}] Done! {}", job.id, job.pgid);
                }
                freed.push(job.id);
                false
            } else {
                true
            }
        });
        for id in freed {
            if let Some(taken) = self.pool.get_mut(id as usize) {
                *taken = false;
            }
        }
    }

    pub fn get_job(&self, id: i64) -> Option<&Job> {
        if id == -1 {
            self.jobs.front()
        } else {
            self.jobs.iter().find(|j| j.id as i64 == id)
        }
    }

    pub fn get_job_mut(&mut self, id: i64) -> Option<&mut Job> {
        if id == -1 {
            self.jobs.front_mut()
        } else {
            self.jobs.iter_mut().find(|j| j.id as i64 == id)
        }
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Shutdown: SIGTERM every job's process group, give them ~500ms to
    /// die while reaping non-blockingly, then SIGKILL and reap to
    /// completion.
    pub fn kill_jobs(&mut self) {
        for job in self.jobs.iter() {
            let _ = job_control::signal_pgid(job.pgid, libc::SIGTERM);
        }

        for _ in 0..50 {
            if self.jobs.is_empty() {
                break;
            }
            self.reap_nonblocking();
            self.update_jobs();
            self.remove_zombies();
            std::thread::sleep(Duration::from_millis(10));
        }

        for job in self.jobs.iter() {
            let _ = job_control::signal_pgid(job.pgid, libc::SIGKILL);
        }
        self.reap_blocking_all();
        self.update_jobs();
        self.remove_zombies();
    }

    /// Drains every pending, already-exited/stopped/continued child
    /// without blocking. Called between prompts.
    pub fn reap_nonblocking(&mut self) {
        loop {
            let mut raw_status: libc::c_int = 0;
            let pid = unsafe {
                libc::waitpid(
                    -1,
                    &mut raw_status,
                    libc::WNOHANG | libc::WUNTRACED | libc::WCONTINUED,
                )
            };
            if pid <= 0 {
                break;
            }
            self.update_proc(pid as u32, raw_status);
        }
    }

    fn reap_blocking_all(&mut self) {
        loop {
            let mut raw_status: libc::c_int = 0;
            let pid = unsafe { libc::waitpid(-1, &mut raw_status, 0) };
            if pid <= 0 {
                break;
            }
            self.update_proc(pid as u32, raw_status);
        }
    }
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new()
    }
}

pub fn format_job(job: &Job) -> String {
    let job_state = match job.state {
        JobState::Running => "JOB_RUNNING",
        JobState::Stopped => "JOB_STOPPED",
        JobState::Done => "JOB_DONE",
    };
    let mut line = format!("[{}] {{{}, {}}} :", job.id, job.pgid, job_state);
    for proc in &job.procs {
        let proc_state = match proc.state {
            ProcState::Run => "PROC_RUN",
            ProcState::Stop => "PROC_STOP",
            ProcState::Done => "PROC_DONE",
        };
        line.push_str(&format!(" ({}, {})", proc.pid, proc_state));
    }
    line
}
