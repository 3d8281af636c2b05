//! Error taxonomy for archive ingestion.
//!
//! Every failure while decoding or segmenting a period's archive is an
//! [`IngestError`]. All of them abort ingestion of the affected period only;
//! [`IngestError::kind`] separates archives whose *shape* is wrong from
//! archives that could not be read.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestError>;

/// Coarse classification of an [`IngestError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The archive content violates the expected document/entry shape.
    StructuralMismatch,
    /// The archive could not be opened, read, or decoded.
    Io,
}

/// Errors that can occur while ingesting one period.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The archive container could not be opened.
    #[error("cannot open archive {}: {source}", path.display())]
    ArchiveOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An entry after the first could not be read.
    #[error("cannot read archive entry: {0}")]
    ArchiveRead(#[source] std::io::Error),

    /// The first entry was not `raw.json`.
    #[error("metadata mismatch: expected raw.json as first entry, found {}", found.as_deref().unwrap_or("nothing"))]
    MetadataMismatch { found: Option<String> },

    /// `raw.json` was present but is not valid metadata JSON.
    #[error("malformed raw.json: {0}")]
    MetadataDecode(#[from] serde_json::Error),

    /// An entry name has no dot, or ends in one.
    #[error("entry name {0:?} does not match <user>.<...>.<extension>")]
    FilenameFormat(String),

    /// The user's header blob has no `<head>` marker.
    #[error("no <head> marker in header of user {user}")]
    HeaderMarkerMissing { user: String },

    /// The element after a section carries no machine name.
    #[error("no machine name for the section following {after:?} (user {user})")]
    MachineNameMissing { user: String, after: String },

    /// A CSS selector failed to compile.
    #[error("html selector error: {0}")]
    Html(String),

    /// An archive path does not map to a period id.
    #[error("archive name {0:?} does not map to a period id")]
    InvalidArchiveName(String),
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MetadataMismatch { .. }
            | Self::FilenameFormat(_)
            | Self::HeaderMarkerMissing { .. }
            | Self::MachineNameMissing { .. } => ErrorKind::StructuralMismatch,
            Self::ArchiveOpen { .. }
            | Self::ArchiveRead(_)
            | Self::MetadataDecode(_)
            | Self::Html(_)
            | Self::InvalidArchiveName(_) => ErrorKind::Io,
        }
    }

    pub fn is_structural(&self) -> bool {
        self.kind() == ErrorKind::StructuralMismatch
    }
}
