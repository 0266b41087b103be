//! Error classification shared by every layer.

/// ErrorKind tells a caller what to do with a failure.
///
/// - Transient: the backend is unreachable or busy; retry later.
/// - Permanent: the input itself is unusable (malformed envelope, unknown tag);
///   log it and move on, retrying cannot help.
/// - Misuse: the caller broke the contract (bad channel name, double settle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Misuse,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient)
    }
}

/// Implemented by errors that can be sorted into an `ErrorKind`.
pub trait Classify {
    fn kind(&self) -> ErrorKind;

    fn is_transient(&self) -> bool {
        self.kind().is_retryable()
    }
}
