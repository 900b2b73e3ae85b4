use std::fmt;

/// Core error type for the downloader.
///
/// Adapter crates map their library errors into this type at the boundary so
/// the pipeline can decide between "tell the user", "count and move on" and
/// "retry".
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed link, mismatched range, missing argument.
    #[error("{0}")]
    Input(String),

    #[error("{0}")]
    Service(ServiceError),

    /// Someone other than the initiator tried to control a job.
    #[error("{0}")]
    Ownership(String),

    /// Starting while running, duplicate paused name, resuming a finished job.
    #[error("{0}")]
    Conflict(String),

    #[error("unknown {what}. Available: {available}")]
    NotFound { what: String, available: String },

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn service(kind: ServiceErrorKind, message: impl Into<String>) -> Self {
        Self::Service(ServiceError {
            kind,
            message: message.into(),
        })
    }

    /// Error-kind tag when this came from the remote service.
    pub fn service_kind(&self) -> Option<ServiceErrorKind> {
        match self {
            Self::Service(e) => Some(e.kind),
            _ => None,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.service_kind().is_some_and(|k| k.is_transient())
    }
}

/// Failure reported by the message/media service, tagged where it was raised.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceError {
    pub kind: ServiceErrorKind,
    pub message: String,
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ServiceErrorKind {
    /// The chat id form is not known to the session (try the next candidate).
    UnknownPeer,
    NotFound,
    FileReferenceExpired,
    MediaEmpty,
    EntityBounds,
    FloodWait,
    Other,
}

impl ServiceErrorKind {
    /// Failures that are skipped rather than counted as failed once retries
    /// run out. Known approximation: only the markers observed in practice.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::FileReferenceExpired | Self::MediaEmpty | Self::EntityBounds
        )
    }

    /// Tag an RPC failure from its error name / rendered text.
    pub fn from_rpc_text(text: &str) -> Self {
        let upper = text.to_ascii_uppercase();
        if upper.contains("FILE_REFERENCE_") {
            Self::FileReferenceExpired
        } else if upper.contains("MEDIA_EMPTY") {
            Self::MediaEmpty
        } else if upper.contains("ENTITY_BOUNDS") {
            Self::EntityBounds
        } else if upper.contains("PEER_ID_INVALID")
            || upper.contains("CHANNEL_INVALID")
            || upper.contains("CHANNEL_PRIVATE")
            || upper.contains("USERNAME_NOT_OCCUPIED")
            || upper.contains("USERNAME_INVALID")
        {
            Self::UnknownPeer
        } else if upper.contains("FLOOD_WAIT") {
            Self::FloodWait
        } else if upper.contains("MESSAGE_ID_INVALID") {
            Self::NotFound
        } else {
            Self::Other
        }
    }
}
