//! Unpacked-directory archive source.
//!
//! The directory is listed once at open time (depth 1, files only) and the
//! listing is sorted so both archive layouts feed the reconstructor the same
//! entry sequence.

use std::cmp::Ordering;
use std::fs::File;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{IngestError, Result};
use crate::reconstruct::METADATA_ENTRY;
use crate::traits::{ArchiveEntry, ArchiveSource};

/// A period stored as a flat directory, one file per archive entry.
///
/// Subdirectories are skipped. Files are emitted in the order a tarball of
/// the same period would contain them: `raw.json` first, then grouped by user
/// prefix with each user's `header` ahead of its `mail` and `empty` entries.
pub struct DirectorySource {
    dir: PathBuf,
    files: Vec<(String, PathBuf)>,
}

impl DirectorySource {
    pub fn open(dir: &Path) -> Result<Self> {
        let open_error = |source: std::io::Error| IngestError::ArchiveOpen {
            path: dir.to_path_buf(),
            source,
        };

        if !dir.is_dir() {
            return Err(open_error(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "not a directory",
            )));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| open_error(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            files.push((name, entry.path().to_path_buf()));
        }
        files.sort_by(|(a, _), (b, _)| entry_order(a, b));

        Ok(Self {
            dir: dir.to_path_buf(),
            files,
        })
    }
}

fn extension_rank(name: &str) -> u8 {
    match name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("header") => 0,
        Some("mail") => 1,
        Some("empty") => 2,
        _ => 3,
    }
}

fn entry_order(a: &str, b: &str) -> Ordering {
    let is_meta = |n: &str| n == METADATA_ENTRY;
    let prefix = |n: &str| n.split_once('.').map_or(n, |(p, _)| p).to_string();

    is_meta(b)
        .cmp(&is_meta(a))
        .then_with(|| prefix(a).cmp(&prefix(b)))
        .then_with(|| extension_rank(a).cmp(&extension_rank(b)))
        .then_with(|| a.cmp(b))
}

impl ArchiveSource for DirectorySource {
    fn kind(&self) -> &'static str {
        "directory"
    }

    fn location(&self) -> &Path {
        &self.dir
    }

    fn for_each_entry(
        &mut self,
        visit: &mut dyn FnMut(ArchiveEntry<'_>) -> Result<()>,
    ) -> Result<()> {
        for (name, path) in &self.files {
            let mut file = File::open(path).map_err(IngestError::ArchiveRead)?;
            visit(ArchiveEntry {
                name: name.clone(),
                payload: &mut file,
            })?;
        }
        Ok(())
    }
}
