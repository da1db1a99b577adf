use std::fmt;
use std::io;
use std::path::PathBuf;

/// Result alias for single file and directory operations.
pub type RewriteFileResult<T> = Result<T, RewriteError>;

/// Errors surfaced while rewriting or moving one file or directory.
#[derive(Debug)]
pub enum RewriteError {
    Io { path: PathBuf, source: io::Error },
    /// The file is not valid UTF-8 and would need a substitution.
    Decode { path: PathBuf },
    Move { from: PathBuf, to: PathBuf, source: io::Error },
}

impl RewriteError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        RewriteError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn moving(from: impl Into<PathBuf>, to: impl Into<PathBuf>, source: io::Error) -> Self {
        RewriteError::Move {
            from: from.into(),
            to: to.into(),
            source,
        }
    }

    /// The description without the path, for embedding in a [`crate::types::FailureReason`].
    pub fn message(&self) -> String {
        match self {
            RewriteError::Io { source, .. } => source.to_string(),
            RewriteError::Decode { .. } => "contents are not valid UTF-8 text".to_string(),
            RewriteError::Move { source, .. } => source.to_string(),
        }
    }
}

impl fmt::Display for RewriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RewriteError::Io { path, source } => write!(f, "I/O error on {}: {source}", path.display()),
            RewriteError::Decode { path } => {
                write!(f, "{} is not valid UTF-8 text", path.display())
            }
            RewriteError::Move { from, to, source } => write!(
                f,
                "unable to move {} to {}: {source}",
                from.display(),
                to.display()
            ),
        }
    }
}

impl std::error::Error for RewriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RewriteError::Io { source, .. } | RewriteError::Move { source, .. } => Some(source),
            RewriteError::Decode { .. } => None,
        }
    }
}

impl From<walkdir::Error> for RewriteError {
    fn from(value: walkdir::Error) -> Self {
        let path = value.path().map(PathBuf::from).unwrap_or_default();
        let source = value
            .into_io_error()
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "filesystem loop detected"));
        RewriteError::Io { path, source }
    }
}
