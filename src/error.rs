use core::fmt;

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The remote call that produced an [`Error::Remote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Precreate,
    UploadBlock(u32),
    Create,
    AddAlbumFile,
    CopyAlbumFile,
    DeleteAlbumFile,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Precreate => f.write_str("precreate"),
            Self::UploadBlock(partseq) => write!(f, "upload of block {partseq}"),
            Self::Create => f.write_str("create"),
            Self::AddAlbumFile => f.write_str("adding file to album"),
            Self::CopyAlbumFile => f.write_str("copying album file"),
            Self::DeleteAlbumFile => f.write_str("deleting album file"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// The request was rejected before touching the network.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The local temporary copy could not be written or read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stopped by the caller, or by a failed sibling block transfer.
    #[error("upload cancelled")]
    Cancelled,

    #[error("{stage} failed: {source}")]
    Remote {
        stage: Stage,
        #[source]
        source: BoxError,
    },

    /// `precreate` answered with a `return_type` we do not understand.
    #[error("unsupported precreate return type {0}")]
    UnsupportedOutcome(i64),

    #[error("operation not supported")]
    NotSupported,
}

impl Error {
    pub fn remote(stage: Stage, source: impl Into<BoxError>) -> Self {
        Self::Remote {
            stage,
            source: source.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Remote { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
