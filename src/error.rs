use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for stream output operations
pub type SoutResult<T> = Result<T, SoutError>;

/// Broad classification of a [`SoutError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Allocation or descriptor exhaustion, module construction failure
    Resource,
    /// OS-level read/write/seek/open failure
    Io,
    /// Caller bug: bad syntax, bad handle, operation not allowed in this state
    Usage,
    /// The operator refused a user-mediated conflict
    Declined,
}

/// Error types for the stream output pipeline
#[derive(Error, Debug)]
pub enum SoutError {
    /// IO error without further context
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Access output could not open its target
    #[error("cannot create {path} ({access}): {source}")]
    AccessOpen {
        /// Access output name (file, stream, fd...)
        access: String,
        /// Target path as given by the caller
        path: String,
        /// Underlying OS error
        source: io::Error,
    },

    /// Write failed after `written` bytes went out
    #[error("cannot write after {written} bytes: {source}")]
    Write {
        /// Bytes successfully written before the failure
        written: usize,
        /// Underlying OS error
        source: io::Error,
    },

    /// Seek failed or is not supported by the target
    #[error("cannot seek to {offset}: {source}")]
    Seek {
        /// Requested absolute offset
        offset: u64,
        /// Underlying OS error
        source: io::Error,
    },

    /// No module of this kind is registered under the name
    #[error("no {kind} module matching \"{name}\"")]
    UnknownModule {
        /// Module kind (stream, mux, access)
        kind: &'static str,
        /// Requested module name
        name: String,
    },

    /// A module was found but refused to open
    #[error("{module}: {reason}")]
    ModuleOpen {
        /// Module name
        module: String,
        /// Why it refused
        reason: String,
    },

    /// The `fd` access was given something that is not a descriptor number
    #[error("invalid file descriptor: {0}")]
    InvalidDescriptor(String),

    /// Chain description could not be parsed
    #[error("chain syntax error: {0}")]
    ChainSyntax(String),

    /// Configuration value is invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// Muxer refuses to take a new stream in its current state
    #[error("cannot add stream: {0}")]
    CannotAddStream(String),

    /// Elementary stream format not accepted by a module
    #[error("invalid stream format: {0}")]
    InvalidFormat(String),

    /// Per-stage track handle is not known to the stage
    #[error("unknown stream id {0}")]
    UnknownStream(u32),

    /// Muxer input handle is not known to the muxer
    #[error("unknown mux input {0}")]
    UnknownInput(u32),

    /// A filtering stage has nothing after it
    #[error("stage {0} has no downstream stage")]
    NoDownstream(String),

    /// Control query or operation not supported by this module
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// Destination exists and the operator declined to overwrite it
    #[error("not overwriting existing file {}", .0.display())]
    OverwriteDeclined(PathBuf),
}

impl SoutError {
    /// Classify the error per the pipeline error taxonomy
    pub fn category(&self) -> ErrorCategory {
        match self {
            SoutError::Io(_)
            | SoutError::AccessOpen { .. }
            | SoutError::Write { .. }
            | SoutError::Seek { .. } => ErrorCategory::Io,
            SoutError::UnknownModule { .. } | SoutError::ModuleOpen { .. } => {
                ErrorCategory::Resource
            }
            SoutError::OverwriteDeclined(_) => ErrorCategory::Declined,
            SoutError::InvalidDescriptor(_)
            | SoutError::ChainSyntax(_)
            | SoutError::Config(_)
            | SoutError::CannotAddStream(_)
            | SoutError::InvalidFormat(_)
            | SoutError::UnknownStream(_)
            | SoutError::UnknownInput(_)
            | SoutError::NoDownstream(_)
            | SoutError::Unsupported(_) => ErrorCategory::Usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category() {
        let e = SoutError::CannotAddStream("muxing".into());
        assert_eq!(e.category(), ErrorCategory::Usage);

        let e = SoutError::Write {
            written: 3,
            source: io::Error::from(io::ErrorKind::BrokenPipe),
        };
        assert_eq!(e.category(), ErrorCategory::Io);

        let e = SoutError::OverwriteDeclined(PathBuf::from("/tmp/x"));
        assert_eq!(e.category(), ErrorCategory::Declined);
    }
}
