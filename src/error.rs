//! Structured error types for the shell's internal-error channel (as
//! opposed to command exit status, which is a plain `i32` and never
//! represented here): one `thiserror` enum per fallible subsystem —
//! lexing, parsing, spawning, redirection, and the job table. Each
//! fallible function returns its own specific enum rather than a
//! blanket error type; call sites print the `Display` impl directly and
//! either drop the current line (parse/redirect/job failures) or abort
//! the process (startup failures), per the shell's two-channel error
//! model. Built-in usage errors (bad `cd`/`exit`/`fg`/`bg` arguments)
//! are diagnostics only — reported via `eprintln!` and a status code,
//! never a `Result`, so they have no type here.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("unterminated single quote")]
    UnterminatedSingleQuote,
    #[error("unterminated double quote")]
    UnterminatedDoubleQuote,
    #[error("unterminated escape sequence")]
    UnterminatedEscape,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("syntax error: empty command between separators")]
    EmptySegment,
    #[error("syntax error: pipeline is missing a command")]
    MissingPipelineOperand,
    #[error("syntax error: redirection is missing a filename")]
    MissingRedirectTarget,
    #[error("syntax error: `&' cannot background a compound command")]
    BackgroundControlNode,
    #[error("syntax error: unexpected token")]
    UnexpectedToken,
    #[error(transparent)]
    Lex(#[from] LexError),
}

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("fork failed: {0}")]
    Fork(#[source] std::io::Error),
    #[error("{program}: command not found")]
    NotFound { program: String },
    #[error("{program}: {source}")]
    Exec {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("pipe creation failed: {0}")]
    Pipe(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum RedirError {
    #[error("{path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("dup2 failed: {0}")]
    Dup(#[source] std::io::Error),
    #[error("here-string setup failed: {0}")]
    HereString(#[source] std::io::Error),
    #[error("a temporary redirection is already outstanding")]
    AlreadyOutstanding,
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job table is full")]
    Full,
}
