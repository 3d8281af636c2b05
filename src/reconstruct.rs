//! Per-user record reconstruction.
//!
//! After the leading `raw.json`, an archive is a flat list of entries named
//! `<user>.<...>.<extension>`. [`Reconstructor`] turns that list into one
//! [`UserRecord`] per user, holding at most one record back:
//!
//! ```text
//! alice.mail.header  → pending = alice
//! alice.mail         → pending body
//! bob.mail.header    → flush alice, pending = bob
//! bob.mail           → pending body
//! bob.mail.empty     → pending cleared (bob contributes nothing)
//! <end>              → flush pending, if any
//! ```

use std::io::Read;

use tracing::debug;

use crate::error::{IngestError, Result};
use crate::models::RawMetadata;

/// Name of the metadata entry that must open every archive.
pub const METADATA_ENTRY: &str = "raw.json";

/// The meaning of an entry, from its extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Header,
    Mail,
    Empty,
    Other(String),
}

/// A parsed entry name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryName {
    pub user: String,
    pub kind: EntryKind,
}

/// Splits an entry name into user prefix (before the first dot) and
/// extension (after the last dot).
///
/// A username that itself contains a dot is cut at that dot.
pub fn parse_entry_name(name: &str) -> Result<EntryName> {
    let Some((user, rest)) = name.split_once('.') else {
        return Err(IngestError::FilenameFormat(name.to_string()));
    };
    if rest.is_empty() || name.ends_with('.') {
        return Err(IngestError::FilenameFormat(name.to_string()));
    }
    let extension = rest.rsplit_once('.').map_or(rest, |(_, ext)| ext);
    let kind = match extension {
        "header" => EntryKind::Header,
        "mail" => EntryKind::Mail,
        "empty" => EntryKind::Empty,
        other => EntryKind::Other(other.to_string()),
    };
    Ok(EntryName {
        user: user.to_string(),
        kind,
    })
}

/// Decodes the metadata entry, which must be named `raw.json`.
pub fn read_metadata(name: &str, payload: &mut dyn Read) -> Result<RawMetadata> {
    if name != METADATA_ENTRY {
        return Err(IngestError::MetadataMismatch {
            found: Some(name.to_string()),
        });
    }
    let buf = read_payload(payload)?;
    Ok(serde_json::from_slice(&buf)?)
}

/// One user's header and body blobs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserRecord {
    pub user: String,
    pub header: Vec<u8>,
    pub body: Vec<u8>,
}

/// One-record lookahead state machine over archive entries.
#[derive(Debug, Default)]
pub struct Reconstructor {
    pending: Option<UserRecord>,
}

impl Reconstructor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one entry. Returns the previously pending record when this
    /// entry starts a new user.
    ///
    /// A header with an empty user prefix (`.m.header`) ends the pending
    /// record but never becomes pending itself, so it is never emitted.
    ///
    /// The payload is only read for `header` and `mail` entries.
    pub fn accept(&mut self, name: &str, payload: &mut dyn Read) -> Result<Option<UserRecord>> {
        let parsed = parse_entry_name(name)?;
        match parsed.kind {
            EntryKind::Header => {
                let header = read_payload(payload)?;
                let same_user = self
                    .pending
                    .as_ref()
                    .is_some_and(|p| p.user == parsed.user);
                if same_user {
                    if let Some(pending) = self.pending.as_mut() {
                        pending.header = header;
                    }
                    return Ok(None);
                }
                let flushed = self.pending.take();
                if parsed.user.is_empty() {
                    debug!(entry = name, "header without a user prefix, nothing pending");
                } else {
                    self.pending = Some(UserRecord {
                        user: parsed.user,
                        header,
                        body: Vec::new(),
                    });
                }
                Ok(flushed)
            }
            EntryKind::Mail => {
                let body = read_payload(payload)?;
                match self.pending.as_mut() {
                    Some(pending) => pending.body = body,
                    None => debug!(entry = name, "mail entry without a pending header, ignored"),
                }
                Ok(None)
            }
            EntryKind::Empty => {
                self.pending = None;
                Ok(None)
            }
            EntryKind::Other(ext) => {
                debug!(entry = name, extension = %ext, "unrecognized entry skipped");
                Ok(None)
            }
        }
    }

    /// Ends the input, returning the pending record if there is one.
    pub fn finish(self) -> Option<UserRecord> {
        self.pending
    }
}

fn read_payload(payload: &mut dyn Read) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    payload
        .read_to_end(&mut buf)
        .map_err(IngestError::ArchiveRead)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(r: &mut Reconstructor, name: &str, payload: &str) -> Option<UserRecord> {
        r.accept(name, &mut payload.as_bytes()).unwrap()
    }

    #[test]
    fn test_parse_entry_name() {
        let parsed = parse_entry_name("alice.mail.header").unwrap();
        assert_eq!(parsed.user, "alice");
        assert_eq!(parsed.kind, EntryKind::Header);

        assert_eq!(parse_entry_name("alice.mail").unwrap().kind, EntryKind::Mail);
        assert_eq!(
            parse_entry_name("alice.mail.empty").unwrap().kind,
            EntryKind::Empty
        );
        assert_eq!(
            parse_entry_name("alice.notes.txt").unwrap().kind,
            EntryKind::Other("txt".into())
        );
    }

    #[test]
    fn test_dotted_username_is_truncated() {
        let parsed = parse_entry_name("j.doe.mail.header").unwrap();
        assert_eq!(parsed.user, "j");
        assert_eq!(parsed.kind, EntryKind::Header);
    }

    #[test]
    fn test_malformed_entry_names() {
        for name in ["alice", "alice.", "alice.mail.", ""] {
            assert!(
                matches!(parse_entry_name(name), Err(IngestError::FilenameFormat(_))),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_read_metadata_requires_name() {
        let err = read_metadata("alice.mail", &mut "{}".as_bytes()).unwrap_err();
        assert!(matches!(err, IngestError::MetadataMismatch { found: Some(n) } if n == "alice.mail"));

        let err = read_metadata(METADATA_ENTRY, &mut "{not json".as_bytes()).unwrap_err();
        assert!(matches!(err, IngestError::MetadataDecode(_)));

        let raw = read_metadata(
            METADATA_ENTRY,
            &mut r#"{"started":1,"updated":2,"data":{}}"#.as_bytes(),
        )
        .unwrap();
        assert_eq!((raw.started, raw.updated), (1, 2));
    }

    #[test]
    fn test_flush_on_new_user_and_at_end() {
        let mut r = Reconstructor::new();
        assert_eq!(feed(&mut r, "alice.mail.header", "H1"), None);
        assert_eq!(feed(&mut r, "alice.mail", "B1"), None);

        let alice = feed(&mut r, "bob.mail.header", "H2").unwrap();
        assert_eq!(alice.user, "alice");
        assert_eq!(alice.header, b"H1");
        assert_eq!(alice.body, b"B1");

        assert_eq!(feed(&mut r, "bob.mail", "B2"), None);
        let bob = r.finish().unwrap();
        assert_eq!(bob.user, "bob");
        assert_eq!(bob.body, b"B2");
    }

    #[test]
    fn test_same_user_header_overwrites_without_flush() {
        let mut r = Reconstructor::new();
        feed(&mut r, "alice.mail.header", "old");
        feed(&mut r, "alice.mail", "body");
        assert_eq!(feed(&mut r, "alice.mail.header", "new"), None);
        let alice = r.finish().unwrap();
        assert_eq!(alice.header, b"new");
        assert_eq!(alice.body, b"body");
    }

    #[test]
    fn test_mail_not_adjacent_to_header() {
        let mut r = Reconstructor::new();
        feed(&mut r, "alice.mail.header", "H");
        feed(&mut r, "alice.attachment.txt", "ignored");
        feed(&mut r, "alice.mail", "late body");
        assert_eq!(r.finish().unwrap().body, b"late body");
    }

    #[test]
    fn test_empty_marker_drops_pending_user() {
        let mut r = Reconstructor::new();
        feed(&mut r, "alice.mail.header", "H");
        feed(&mut r, "alice.mail", "B");
        assert_eq!(feed(&mut r, "alice.mail.empty", ""), None);
        // nothing pending, so the next header flushes nothing
        assert_eq!(feed(&mut r, "bob.mail.header", "H2"), None);
        assert_eq!(r.finish().unwrap().user, "bob");
    }

    #[test]
    fn test_new_user_does_not_inherit_previous_body() {
        let mut r = Reconstructor::new();
        feed(&mut r, "alice.mail.header", "H");
        feed(&mut r, "alice.mail", "alice body");
        feed(&mut r, "bob.mail.header", "H2");
        assert!(r.finish().unwrap().body.is_empty());
    }

    #[test]
    fn test_empty_user_prefix_is_never_emitted() {
        let mut r = Reconstructor::new();
        feed(&mut r, "alice.m.header", "H");
        feed(&mut r, "alice.m.mail", "B");
        let alice = feed(&mut r, ".m.header", "anon header").unwrap();
        assert_eq!(alice.user, "alice");
        assert_eq!(feed(&mut r, ".m.mail", "secret"), None);
        assert_eq!(r.finish(), None);

        let mut r = Reconstructor::new();
        feed(&mut r, ".m.header", "anon header");
        feed(&mut r, ".m.mail", "secret");
        assert_eq!(feed(&mut r, "bob.m.header", "H"), None);
        let bob = r.finish().unwrap();
        assert_eq!(bob.user, "bob");
        assert!(bob.body.is_empty());
    }

    #[test]
    fn test_bad_name_is_reported() {
        let mut r = Reconstructor::new();
        let err = r.accept("noextension", &mut "".as_bytes()).unwrap_err();
        assert!(err.is_structural());
    }
}
