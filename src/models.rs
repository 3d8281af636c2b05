//! Core data models for ingested report periods.
//!
//! These types hold what the ingestion pipeline produces and what the query
//! layer reads: the per-period results, the global dedup table for common
//! sections, and the machine-name → display-title mapping.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;

/// Identifier of one ingestion period.
pub type PeriodId = i64;

/// Key into [`DedupStore`]. Issued starting at 1.
pub type ContentId = u64;

/// Contents of a period's `raw.json`.
///
/// The per-user values in `data` are never interpreted; they are kept as raw
/// JSON text and written back out unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMetadata {
    #[serde(default)]
    pub started: i64,
    #[serde(default)]
    pub updated: i64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub data: BTreeMap<String, Box<RawValue>>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<BTreeMap<String, Box<RawValue>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<BTreeMap<String, Box<RawValue>>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Whether a section is shared by all users or particular to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Common,
    UserSpecific,
}

/// One named section cut out of a user's bulletin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub machine_name: String,
    pub title: String,
    pub html: String,
    pub classification: Classification,
}

/// Content-addressable table of common section HTML.
///
/// Append-only: ids are handed out in first-seen order and never reused.
#[derive(Debug, Default, Serialize)]
pub struct DedupStore {
    #[serde(skip)]
    content_id: HashMap<String, ContentId>,
    content_data: BTreeMap<ContentId, String>,
}

impl DedupStore {
    /// Returns the id for `html`, assigning the next one if it is new.
    pub fn intern(&mut self, html: &str) -> ContentId {
        if let Some(&id) = self.content_id.get(html) {
            return id;
        }
        let id = self.content_data.len() as ContentId + 1;
        self.content_id.insert(html.to_string(), id);
        self.content_data.insert(id, html.to_string());
        id
    }

    pub fn id_of(&self, html: &str) -> Option<ContentId> {
        self.content_id.get(html).copied()
    }

    pub fn get(&self, id: ContentId) -> Option<&str> {
        self.content_data.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.content_data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content_data.is_empty()
    }
}

/// Aggregated results of one period.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PeriodResult {
    /// machine name → content id
    pub common_content: BTreeMap<String, ContentId>,
    /// machine name → username → section HTML
    pub user_content: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(skip)]
    pub raw: RawMetadata,
    #[serde(skip)]
    pub seen_users: BTreeSet<String>,
}

impl PeriodResult {
    pub fn new(raw: RawMetadata) -> Self {
        Self {
            raw,
            ..Self::default()
        }
    }

    pub fn has_seen(&self, user: &str) -> bool {
        self.seen_users.contains(user)
    }
}

/// Root aggregate: every period plus the tables shared between them.
#[derive(Debug, Default, Serialize)]
pub struct ResultSet {
    pub dedup: DedupStore,
    pub results: BTreeMap<PeriodId, PeriodResult>,
    pub name_mapping: BTreeMap<String, String>,
}

impl ResultSet {
    /// Merges one user's sections into `period`.
    ///
    /// `period` is the entry under construction, not yet installed in
    /// `results`. Common sections go through the dedup table and overwrite
    /// the period's id for that machine name; the display title mapping is
    /// overwritten for every section.
    pub fn commit_sections(&mut self, period: &mut PeriodResult, user: &str, sections: Vec<Section>) {
        for section in sections {
            match section.classification {
                Classification::Common => {
                    let id = self.dedup.intern(&section.html);
                    period
                        .common_content
                        .insert(section.machine_name.clone(), id);
                }
                Classification::UserSpecific => {
                    period
                        .user_content
                        .entry(section.machine_name.clone())
                        .or_default()
                        .insert(user.to_string(), section.html);
                }
            }
            self.name_mapping
                .insert(section.machine_name, section.title);
        }
    }
}
