//! Gzip-compressed tar archive source.
//!
//! Entries are yielded in the order they were written to the archive, which
//! is the order the report generator added the files.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;

use crate::error::{IngestError, Result};
use crate::traits::{ArchiveEntry, ArchiveSource};

pub struct TarballSource {
    path: PathBuf,
    archive: Archive<GzDecoder<BufReader<File>>>,
}

impl TarballSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| IngestError::ArchiveOpen {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            archive: Archive::new(GzDecoder::new(BufReader::new(file))),
        })
    }
}

impl ArchiveSource for TarballSource {
    fn kind(&self) -> &'static str {
        "tarball"
    }

    fn location(&self) -> &Path {
        &self.path
    }

    fn for_each_entry(
        &mut self,
        visit: &mut dyn FnMut(ArchiveEntry<'_>) -> Result<()>,
    ) -> Result<()> {
        let entries = self
            .archive
            .entries()
            .map_err(|source| IngestError::ArchiveOpen {
                path: self.path.clone(),
                source,
            })?;

        for entry in entries {
            let mut entry = entry.map_err(IngestError::ArchiveRead)?;
            if entry.header().entry_type().is_dir() {
                continue;
            }
            let name = {
                let path = entry.path().map_err(IngestError::ArchiveRead)?;
                let name = path.to_string_lossy();
                name.strip_prefix("./").unwrap_or(&*name).to_string()
            };
            visit(ArchiveEntry {
                name,
                payload: &mut entry,
            })?;
        }

        Ok(())
    }
}
