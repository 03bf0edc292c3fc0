/// A child process finished with a non-success status.
#[derive(Debug, thiserror::Error)]
#[error("command {command:?} failed: {status}")]
pub struct CommandFailure {
    pub command: Vec<String>,
    pub status: ExitStatus,
}

/// Exit status as reported either by a local child or by a worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitStatus {
    Code(i32),
    /// Terminated by a signal, no exit code
    Signaled,
}

impl ExitStatus {
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Code(code) => Some(*code),
            Self::Signaled => None,
        }
    }

    #[must_use]
    pub fn success(&self) -> bool {
        *self == Self::Code(0)
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        status.code().map_or(Self::Signaled, Self::Code)
    }
}

impl From<Option<i32>> for ExitStatus {
    fn from(code: Option<i32>) -> Self {
        code.map_or(Self::Signaled, Self::Code)
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit status {code}"),
            Self::Signaled => write!(f, "terminated by signal"),
        }
    }
}

/// The remote channel to a host could not be established or broke down.
#[derive(Debug, thiserror::Error)]
#[error("connection to {host} failed: {reason}")]
pub struct ConnectionError {
    pub host: String,
    pub reason: String,
}

impl ConnectionError {
    pub fn new(host: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self {
            host: host.into(),
            reason: reason.to_string(),
        }
    }
}
