//! Error types for the BnB node

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Node error types
///
/// Worker threads never propagate these across thread boundaries; they log
/// locally and signal failure through message content (empty payloads,
/// sentinel values). The variants surface at the synchronous call sites:
/// supervisors, the transceiver client and the shell dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Thread or mailbox allocation failed
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Operation requires a worker that is not running
    #[error("{0} not running")]
    NotRunning(&'static str),

    /// Transceiver owner reported a sentinel failure value
    #[error("Transceiver failure: {0}")]
    TransceiverFailure(String),

    /// A content request returned zero bytes
    #[error("Empty result for {0}")]
    EmptyResult(String),

    /// Socket bind/send/receive failure
    #[error("Socket error: {context}: {source}")]
    Socket {
        /// What the socket was doing
        context: String,
        /// Underlying OS error
        source: std::io::Error,
    },

    /// Blocking send or reply wait exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Peer mailbox closed or reply slot dropped without an answer
    #[error("Disconnected: {0}")]
    Disconnected(String),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Configuration file could not be parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Installing the shutdown signal handler failed
    #[error("Signal handler error: {0}")]
    Signal(String),
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl Error {
    /// Wrap an I/O error raised by a socket operation
    pub fn socket(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Socket {
            context: context.into(),
            source,
        }
    }
}
