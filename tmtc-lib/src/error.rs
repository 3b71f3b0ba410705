#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Not enough bytes")]
    NotEnoughData { actual: usize, minimum: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The length resolved from a packet header exceeds the configured maximum.
    #[error("packet too long: {length} > {maximum}")]
    PacketTooLong { length: usize, maximum: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid or missing configuration; raised before a component starts.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("Invalid timecode: {0}")]
    Timecode(String),

    #[error("action already registered: {0}")]
    DuplicateAction(String),

    /// Unexpected failure while processing data; puts a link into the failed state.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for errors that indicate the transport should be closed and re-opened rather
    /// than the link being failed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::PacketTooLong { .. } | Error::NotEnoughData { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_transient() {
        let err = Error::from(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert!(err.is_transient());
        assert!(!Error::Internal("boom".into()).is_transient());
        assert!(!Error::Config("missing".into()).is_transient());
    }
}
