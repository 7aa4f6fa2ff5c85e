/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, OscError>;

/// Errors surfaced by the codec, the pattern registry and the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum OscError {
    /// The packet could not be decoded: truncated buffer, missing string
    /// terminator, a length prefix past the end of the input, or a leading
    /// token that is neither an address nor `#bundle`.
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    /// A typespec contained a tag outside of `i`, `f`, `s` and `b`.
    #[error("invalid typespec '{0}'")]
    InvalidTypespec(String),

    /// A method was registered without a callback, or with more than one.
    #[error("invalid binding: {0}")]
    InvalidBinding(String),

    /// An argument could not be coerced to the declared type tag.
    #[error("cannot coerce {found} argument to '{tag}'")]
    TypeCoercionMismatch { tag: char, found: &'static str },

    /// One or more callbacks failed while a message was being routed. Every
    /// other matching binding still ran.
    #[error("{} callback(s) failed for {address}: {}", failures.len(), failures.join("; "))]
    DispatchPanic {
        address: String,
        failures: Vec<String>,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl OscError {
    pub(crate) fn malformed<T: Into<String>>(reason: T) -> Self {
        Self::MalformedPacket(reason.into())
    }
}

/// Errors coming from a [`crate::transport::Transport`]. The core never
/// interprets them, it only hands them back to the caller.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The other side of an in-memory transport went away.
    #[error("transport disconnected")]
    Disconnected,

    /// A reply was requested for a packet that carries no source.
    #[error("packet has no source to reply to")]
    NoDestination,

    #[error("packet of {size} bytes exceeds the {max} byte limit")]
    PacketTooLarge { size: usize, max: usize },
}
