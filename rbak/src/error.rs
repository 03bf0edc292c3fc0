/// The script is inconsistent: unknown master, duplicate server names, missing method...
#[derive(Debug, thiserror::Error)]
#[error("configuration error: {0}")]
pub struct ConfigurationError(pub String);

impl ConfigurationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A backup directory was given as an absolute path.
#[derive(Debug, thiserror::Error)]
#[error("directory {0:?} must be relative to the server root")]
pub struct AbsolutePathError(pub String);

/// A backup method could not do its job for one directory.
///
/// Usually attached as context to the underlying [`remote::CommandFailure`].
#[derive(Debug, thiserror::Error)]
#[error("{method}: {message}")]
pub struct BackupMethodError {
    pub method: &'static str,
    pub message: String,
}

impl BackupMethodError {
    pub fn new(method: &'static str, message: impl Into<String>) -> Self {
        Self {
            method,
            message: message.into(),
        }
    }
}
