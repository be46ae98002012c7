//! Interactive read-eval loop: read a line, lex+parse it into an AST,
//! execute it, drain process-state changes, reprompt. Startup installs the
//! job-control signal dispositions; shutdown always runs `kill_jobs`
//! regardless of how the loop exited.

mod builtins;
mod editor;
mod error;
mod executor;
mod job_control;
mod jobs;
mod lexer;
mod parser;
mod redirect;
mod status;

use std::io::Write;
use std::sync::atomic::Ordering;

use editor::LineEditor;
use jobs::JobTable;

fn main() {
    if let Err(e) = job_control::install_shell_signal_handlers() {
        eprintln!("jsh: failed to install signal handlers: {e}");
        std::process::exit(1);
    }

    // Fallback for platforms/configurations where SIGINT still reaches the
    // shell despite raw mode (primarily Windows): print a newline so the
    // next prompt doesn't run into the interrupted line, but only when the
    // line editor isn't already handling the keystroke itself.
    let _ = ctrlc::set_handler(|| {
        if !editor::EDITOR_ACTIVE.load(Ordering::Relaxed) {
            println!();
            let _ = std::io::stdout().flush();
        }
    });

    let mut jobs = JobTable::new();
    let mut editor = LineEditor::new();
    let mut last_status: i32 = 0;

    loop {
        jobs.reap_nonblocking();
        jobs.update_jobs();
        jobs.remove_zombies();

        let prompt = format!("{}> ", current_dir_display());

        match editor.read_line(&prompt) {
            Ok(None) => {
                println!();
                break;
            }
            Ok(Some(line)) => {
                editor.add_to_history(&line);
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match parser::parse_line(trimmed) {
                    Ok(ast) => last_status = executor::execute_line(&ast, &mut jobs),
                    Err(e) => {
                        eprintln!("jsh: parse: {e}");
                        last_status = 2;
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                eprintln!("jsh: {e}");
                break;
            }
        }
    }

    jobs.kill_jobs();
    std::process::exit(last_status);
}

fn current_dir_display() -> String {
    std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "?".to_string())
}
