// crates/core/src/error.rs
use thiserror::Error;

/// Errors that can occur while launching or supervising an external command.
///
/// These never escape [`crate::runner::CommandRunner::run`]; the runner folds
/// them into a failed [`crate::runner::CommandOutput`] so callers only ever
/// see exit codes.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Empty command line")]
    EmptyArgv,

    #[error("Failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Permission denied executing `{program}`")]
    PermissionDenied { program: String },

    #[error("Executable not found: `{program}`")]
    NotFound { program: String },

    #[error("Failed to capture {0} of child process")]
    MissingPipe(&'static str),

    #[error("Failed to wait for `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl CommandError {
    pub fn spawn(program: impl Into<String>, source: std::io::Error) -> Self {
        let program = program.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound { program },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { program },
            _ => Self::Spawn { program, source },
        }
    }
}
