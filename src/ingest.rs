//! Ingestion pipeline orchestration.
//!
//! Coordinates the full flow for one period: archive source → record
//! reconstruction → segmentation → dedup/period store. A period is built
//! aside and only installed into the store once every user in it has been
//! processed, so a failed ingestion never replaces a good one.
//!
//! [`Pipeline::load_all`] performs the startup bulk load;
//! [`Pipeline::handle_trigger`] performs one incremental reload in response
//! to a `<archive>.renew` artifact (see [`crate::watch`]).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::{ArchiveConfig, ArchiveLayout};
use crate::error::{IngestError, Result};
use crate::models::{PeriodId, PeriodResult, RawMetadata, ResultSet, Section};
use crate::reconstruct::{read_metadata, Reconstructor, UserRecord};
use crate::segment::segment;
use crate::source_dir::DirectorySource;
use crate::source_tar::TarballSource;
use crate::store::{Phase, Store};
use crate::traits::ArchiveSource;

/// Suffix of the artifact that requests a period reload.
pub const TRIGGER_SUFFIX: &str = ".renew";

/// Opens the archive at `path` with the source matching `layout`.
pub fn open_source(layout: ArchiveLayout, path: &Path) -> Result<Box<dyn ArchiveSource>> {
    let source: Box<dyn ArchiveSource> = match layout {
        ArchiveLayout::Tarball => Box::new(TarballSource::open(path)?),
        ArchiveLayout::Directory => Box::new(DirectorySource::open(path)?),
    };
    debug!(
        kind = source.kind(),
        location = %source.location().display(),
        "archive opened"
    );
    Ok(source)
}

/// Builds the result of one period from its archive.
///
/// Every user is segmented first; only once the whole archive has been read
/// without error are the sections merged into the dedup table and name
/// mapping of `results`. Any error aborts the whole period and leaves
/// `results` untouched. The returned [`PeriodResult`] is not installed
/// anywhere.
pub fn ingest_period(
    source: &mut dyn ArchiveSource,
    period: PeriodId,
    results: &mut ResultSet,
) -> Result<PeriodResult> {
    let mut raw: Option<RawMetadata> = None;
    let mut records = Reconstructor::new();
    let mut segmented: Vec<(String, Vec<Section>)> = Vec::new();

    source.for_each_entry(&mut |entry| {
        if raw.is_none() {
            raw = Some(read_metadata(&entry.name, entry.payload)?);
            return Ok(());
        }
        if let Some(record) = records.accept(&entry.name, entry.payload)? {
            segmented.push(segment_record(period, record)?);
        }
        Ok(())
    })?;

    let raw = raw.ok_or(IngestError::MetadataMismatch { found: None })?;
    if let Some(record) = records.finish() {
        segmented.push(segment_record(period, record)?);
    }

    let mut built = PeriodResult::new(raw);
    for (user, sections) in segmented {
        results.commit_sections(&mut built, &user, sections);
        built.seen_users.insert(user);
    }
    Ok(built)
}

fn segment_record(period: PeriodId, record: UserRecord) -> Result<(String, Vec<Section>)> {
    let header = String::from_utf8_lossy(&record.header);
    let body = String::from_utf8_lossy(&record.body);
    let sections = segment(&header, &body, period, &record.user)?;
    debug!(
        period,
        user = %record.user,
        sections = sections.len(),
        "segmented bulletin"
    );
    Ok((record.user, sections))
}

/// Counts from a bulk load.
#[derive(Debug, Clone, Default)]
pub struct LoadSummary {
    pub loaded: Vec<PeriodId>,
    pub failed: Vec<PeriodId>,
}

/// The single writer of the store.
#[derive(Clone)]
pub struct Pipeline {
    root: PathBuf,
    layout: ArchiveLayout,
    store: Arc<Store>,
}

impl Pipeline {
    pub fn new(config: &ArchiveConfig, store: Arc<Store>) -> Self {
        Self {
            root: config.root.clone(),
            layout: config.layout,
            store,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Lists `(period, archive path)` for every archive under the root,
    /// ordered by period id.
    pub fn discover(&self) -> anyhow::Result<Vec<(PeriodId, PathBuf)>> {
        let mut found = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            let entry = entry
                .with_context(|| format!("Failed to list archive root: {}", self.root.display()))?;
            let matches_layout = match self.layout {
                ArchiveLayout::Tarball => entry.file_type().is_file(),
                ArchiveLayout::Directory => entry.file_type().is_dir(),
            };
            if !matches_layout {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if name.ends_with(TRIGGER_SUFFIX) {
                continue;
            }
            match self.layout.period_of(&name) {
                Some(period) => found.push((period, entry.path().to_path_buf())),
                None => debug!(name = %name, "not a period archive, skipped"),
            }
        }
        found.sort();
        Ok(found)
    }

    /// Ingests every archive under the root, holding the write lock
    /// throughout. Failed periods are logged and skipped.
    ///
    /// Fails only if the root itself cannot be listed.
    pub fn load_all(&self) -> anyhow::Result<LoadSummary> {
        if !self.root.is_dir() {
            anyhow::bail!("Archive root does not exist: {}", self.root.display());
        }
        let archives = self.discover()?;
        let mut summary = LoadSummary::default();

        let mut state = self.store.write();
        for (period, path) in archives {
            let built = open_source(self.layout, &path)
                .and_then(|mut source| ingest_period(source.as_mut(), period, &mut state.results));
            match built {
                Ok(result) => {
                    info!(
                        period,
                        users = result.seen_users.len(),
                        "period loaded"
                    );
                    state.install(period, result);
                    summary.loaded.push(period);
                }
                Err(e) => {
                    error!(
                        period,
                        path = %path.display(),
                        kind = ?e.kind(),
                        error = %e,
                        "period ingestion failed"
                    );
                    summary.failed.push(period);
                }
            }
        }
        self.store.set_phase(Phase::Warm);
        info!(
            loaded = summary.loaded.len(),
            failed = summary.failed.len(),
            content_entries = state.results.dedup.len(),
            "bulk load complete"
        );

        Ok(summary)
    }

    /// Re-ingests one period, replacing its entry on success.
    ///
    /// On failure the previous entry and availability flag are left as they
    /// were.
    pub fn reload(&self, period: PeriodId) -> Result<()> {
        let path = self.layout.archive_path(&self.root, period);
        let mut source = open_source(self.layout, &path)?;

        let mut state = self.store.write();
        let result = ingest_period(source.as_mut(), period, &mut state.results)?;
        info!(
            period,
            users = result.seen_users.len(),
            "period reloaded"
        );
        state.install(period, result);
        Ok(())
    }

    /// Handles a freshly created file. Returns the period that was
    /// re-ingested, or `None` if the path is not a trigger artifact of
    /// this root.
    ///
    /// The trigger is deleted once its archive was found, whether or not the
    /// reload succeeded; a trigger whose archive is missing is left in place.
    pub fn handle_trigger(&self, trigger: &Path) -> Result<Option<PeriodId>> {
        let Some(file_name) = trigger.file_name().map(|n| n.to_string_lossy()) else {
            return Ok(None);
        };
        let Some(archive_name) = file_name.strip_suffix(TRIGGER_SUFFIX) else {
            return Ok(None);
        };
        if !self.is_under_root(trigger) {
            return Ok(None);
        }

        let period = self
            .layout
            .period_of(archive_name)
            .ok_or_else(|| IngestError::InvalidArchiveName(archive_name.to_string()))?;

        let archive = self.layout.archive_path(&self.root, period);
        std::fs::metadata(&archive).map_err(|source| IngestError::ArchiveOpen {
            path: archive.clone(),
            source,
        })?;

        if let Err(e) = self.reload(period) {
            error!(period, kind = ?e.kind(), error = %e, "period reload failed");
        }
        if let Err(e) = std::fs::remove_file(trigger) {
            warn!(path = %trigger.display(), error = %e, "could not remove trigger");
        }
        Ok(Some(period))
    }

    fn is_under_root(&self, path: &Path) -> bool {
        let Some(parent) = path.parent() else {
            return false;
        };
        match (parent.canonicalize(), self.root.canonicalize()) {
            (Ok(parent), Ok(root)) => parent == root,
            _ => parent == self.root,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const HEADER: &str = "Subject: s\n\n<head></head><body>";

    fn user_body(user: &str) -> String {
        format!(
            "<p>Hi {user}</p><h2><a name=\"news\"></a>News</h2><p>Breaking</p>\
             <h2><a name=\"jobs\"></a>Jobs</h2><p>{user} ran 3 jobs</p>\
             <p><a name=\"footer\"></a>Bye</p></body>"
        )
    }

    fn write_period(root: &Path, period: PeriodId, files: &[(&str, String)]) -> PathBuf {
        let dir = root.join(period.to_string());
        fs::create_dir_all(&dir).unwrap();
        for (name, body) in files {
            fs::write(dir.join(name), body).unwrap();
        }
        dir
    }

    fn raw_json() -> String {
        r#"{"started":1,"updated":2,"data":{"alice":[1],"bob":[2]}}"#.to_string()
    }

    fn directory_pipeline(root: &Path) -> Pipeline {
        let config = ArchiveConfig {
            root: root.to_path_buf(),
            layout: ArchiveLayout::Directory,
            watch: false,
        };
        Pipeline::new(&config, Arc::new(Store::new()))
    }

    #[test]
    fn test_ingest_period_from_directory() {
        let tmp = TempDir::new().unwrap();
        let dir = write_period(
            tmp.path(),
            5,
            &[
                ("raw.json", raw_json()),
                ("alice.mail.header", HEADER.to_string()),
                ("alice.mail", user_body("alice")),
                ("bob.mail.header", HEADER.to_string()),
                ("bob.mail", user_body("bob")),
            ],
        );

        let mut results = ResultSet::default();
        let mut source = DirectorySource::open(&dir).unwrap();
        let period = ingest_period(&mut source, 5, &mut results).unwrap();

        assert_eq!(period.seen_users.len(), 2);
        assert_eq!(period.raw.started, 1);
        assert_eq!(period.user_content["jobs"].len(), 2);
        // greeting differs per user, news and footer are shared
        assert_eq!(results.dedup.len(), 4);
        assert_eq!(results.name_mapping["jobs"], "Jobs");
        assert!(results.results.is_empty());
    }

    #[test]
    fn test_empty_archive_is_metadata_mismatch() {
        let tmp = TempDir::new().unwrap();
        let dir = write_period(tmp.path(), 6, &[]);
        let mut results = ResultSet::default();
        let mut source = DirectorySource::open(&dir).unwrap();
        let err = ingest_period(&mut source, 6, &mut results).unwrap_err();
        assert!(matches!(err, IngestError::MetadataMismatch { found: None }));
    }

    #[test]
    fn test_user_failure_aborts_period() {
        let tmp = TempDir::new().unwrap();
        let dir = write_period(
            tmp.path(),
            7,
            &[
                ("raw.json", raw_json()),
                ("alice.mail.header", "no marker".to_string()),
                ("alice.mail", user_body("alice")),
            ],
        );
        let mut results = ResultSet::default();
        let mut source = DirectorySource::open(&dir).unwrap();
        let err = ingest_period(&mut source, 7, &mut results).unwrap_err();
        assert!(matches!(err, IngestError::HeaderMarkerMissing { .. }));
    }

    #[test]
    fn test_load_all_skips_failed_periods() {
        let tmp = TempDir::new().unwrap();
        write_period(
            tmp.path(),
            1,
            &[
                ("raw.json", raw_json()),
                ("alice.mail.header", HEADER.to_string()),
                ("alice.mail", user_body("alice")),
            ],
        );
        write_period(tmp.path(), 2, &[("zzz.json", "{}".to_string())]);
        fs::create_dir(tmp.path().join("scratch")).unwrap();

        let pipeline = directory_pipeline(tmp.path());
        let summary = pipeline.load_all().unwrap();
        assert_eq!(summary.loaded, vec![1]);
        assert_eq!(summary.failed, vec![2]);

        let state = pipeline.store().read();
        assert_eq!(pipeline.store().phase(), Phase::Warm);
        assert!(state.is_available(1));
        assert!(!state.is_available(2));
    }

    #[test]
    fn test_failed_reload_keeps_previous_entry() {
        let tmp = TempDir::new().unwrap();
        let dir = write_period(
            tmp.path(),
            3,
            &[
                ("raw.json", raw_json()),
                ("alice.mail.header", HEADER.to_string()),
                ("alice.mail", user_body("alice")),
            ],
        );
        let pipeline = directory_pipeline(tmp.path());
        pipeline.load_all().unwrap();
        let dedup_before = pipeline.store().read().results.dedup.len();

        // alice segments fine with a renamed section, bob fails afterwards
        fs::write(
            dir.join("alice.mail"),
            user_body("alice").replace(">News<", ">Hijacked<").replace("Breaking", "Rewritten"),
        )
        .unwrap();
        fs::write(dir.join("bob.mail.header"), "broken").unwrap();
        assert!(pipeline.reload(3).is_err());

        let state = pipeline.store().read();
        assert!(state.is_available(3));
        assert!(state.results.results[&3].has_seen("alice"));
        assert_eq!(state.results.name_mapping["news"], "News");
        assert_eq!(state.results.dedup.len(), dedup_before);
        assert_eq!(state.results.dedup.id_of("<h2><a name=\"news\"></a>Hijacked</h2><p>Rewritten</p>"), None);
    }

    #[test]
    fn test_handle_trigger_ignores_unrelated_paths() {
        let tmp = TempDir::new().unwrap();
        let pipeline = directory_pipeline(tmp.path());
        assert_eq!(
            pipeline.handle_trigger(&tmp.path().join("notes.txt")).unwrap(),
            None
        );
        let elsewhere = TempDir::new().unwrap();
        let foreign = elsewhere.path().join("3.renew");
        fs::write(&foreign, "").unwrap();
        assert_eq!(pipeline.handle_trigger(&foreign).unwrap(), None);
        assert!(foreign.exists());
    }

    #[test]
    fn test_trigger_for_missing_archive_is_kept() {
        let tmp = TempDir::new().unwrap();
        let pipeline = directory_pipeline(tmp.path());
        let trigger = tmp.path().join("12.renew");
        fs::write(&trigger, "").unwrap();

        let err = pipeline.handle_trigger(&trigger).unwrap_err();
        assert!(matches!(err, IngestError::ArchiveOpen { .. }));
        assert!(trigger.exists());
    }
}
