//! The archive source abstraction.
//!
//! A period's archive is read as a flat, ordered sequence of named entries.
//! Two layouts produce that sequence:
//!
//! ```text
//! ┌──────────────────┐   ┌──────────────────┐
//! │  TarballSource   │   │ DirectorySource  │
//! │  <id>.tar.gz     │   │  <id>/           │
//! └────────┬─────────┘   └────────┬─────────┘
//!          └──────────┬───────────┘
//!                     ▼
//!        for_each_entry() → Reconstructor
//! ```
//!
//! Consumers must not depend on which one they were given.

use std::io::Read;
use std::path::Path;

use crate::error::{IngestError, Result};

/// One named entry of an archive, with its payload still unread.
pub struct ArchiveEntry<'a> {
    pub name: String,
    pub payload: &'a mut dyn Read,
}

impl ArchiveEntry<'_> {
    /// Reads the whole payload.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.payload
            .read_to_end(&mut buf)
            .map_err(IngestError::ArchiveRead)?;
        Ok(buf)
    }
}

/// A source of archive entries for one period.
///
/// Entries are handed to `visit` one at a time, in archive order; the payload
/// reader is only valid for the duration of the call. An error returned by
/// `visit` stops the iteration and is returned unchanged.
pub trait ArchiveSource {
    /// Short label for logs (`"tarball"`, `"directory"`).
    fn kind(&self) -> &'static str;

    /// Path of the underlying archive.
    fn location(&self) -> &Path;

    fn for_each_entry(
        &mut self,
        visit: &mut dyn FnMut(ArchiveEntry<'_>) -> Result<()>,
    ) -> Result<()>;
}
