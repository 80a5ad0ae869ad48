use cueproto::ReplyError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] ReplyError),

    /// Another cue already owns the number. Callers may skip the assignment
    /// or retry with forced numbering.
    #[error("cue number conflict: '{number}' is already assigned to cue {existing_id}")]
    NumberConflict {
        number: String,
        existing_id: String,
        new_id: String,
    },

    #[error("cannot update cue {0}: no existing ID provided")]
    MissingRemoteId(String),

    #[error("workspace ID is required for {0} but not available")]
    NotConnected(&'static str),

    #[error("QLab authentication failed - incorrect passcode. Check the passcode in your config or --passcode flag")]
    AuthenticationFailed,

    #[error("{0}")]
    ConnectionRejected(String),

    #[error("invalid cue tree: {0}")]
    InvalidTree(String),

    #[error("conflict resolution failed: {0}")]
    Resolution(String),

    #[error("snapshot store error: {0:#}")]
    Snapshot(anyhow::Error),

    #[error("failed to resolve file path '{path}': {reason}")]
    FilePath { path: String, reason: String },

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<SyncError>,
    },
}

impl SyncError {
    pub fn is_number_conflict(&self) -> bool {
        match self {
            SyncError::NumberConflict { .. } => true,
            SyncError::Context { source, .. } => source.is_number_conflict(),
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            SyncError::Remote(e) => e.is_timeout(),
            SyncError::Context { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Wrap with the operation that failed, keeping the kind inspectable.
    pub fn context(self, context: impl Into<String>) -> Self {
        SyncError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

/// `.with_context()` for results carrying a [`SyncError`].
pub trait SyncResultExt<T> {
    fn with_context<F, S>(self, f: F) -> SyncResult<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E: Into<SyncError>> SyncResultExt<T> for Result<T, E> {
    fn with_context<F, S>(self, f: F) -> SyncResult<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.into().context(f()))
    }
}
