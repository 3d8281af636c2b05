//! Archive fixtures shared by the integration tests.

#![allow(dead_code)]

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;

pub const HEADER: &str = "From: reports@example.org\nSubject: Weekly usage\n\n<head><title>Weekly</title></head><body>";

/// A bulletin with greeting, news, optional jobs section and footer. The
/// news section references the reader, so it only matches across users
/// after token normalization.
pub fn bulletin(period: i64, user: &str, jobs: Option<&str>) -> String {
    let jobs = jobs
        .map(|j| format!("<h2><a name=\"jobs\"></a>Your jobs</h2><p>{}</p>", j))
        .unwrap_or_default();
    format!(
        "<p>Dear {user}</p>\
         <h2><a name=\"news\"></a>News</h2><p>Maintenance on Friday, details at {period}:{user}</p>\
         {jobs}\
         <p><a name=\"footer\"></a>Regards</p><sub>Analysis ID: {period}:{user}</sub>\
         </body>"
    )
}

pub fn raw_json(started: i64, updated: i64, users: &[&str]) -> String {
    let data = users
        .iter()
        .map(|u| format!(r#""{}":{{"user":"{}","cpu_hours":[1,2]}}"#, u, u))
        .collect::<Vec<_>>()
        .join(",");
    format!(r#"{{"started":{},"updated":{},"data":{{{}}}}}"#, started, updated, data)
}

/// Entries for one well-formed period: metadata, then header and body per
/// user in order.
pub fn period_entries(period: i64, users: &[(&str, Option<&str>)]) -> Vec<(String, String)> {
    let names: Vec<&str> = users.iter().map(|(u, _)| *u).collect();
    let mut entries = vec![("raw.json".to_string(), raw_json(period * 100, period * 100 + 50, &names))];
    for (user, jobs) in users {
        entries.push((format!("{}.m.header", user), HEADER.to_string()));
        entries.push((format!("{}.m.mail", user), bulletin(period, user, *jobs)));
    }
    entries
}

pub fn write_tarball(path: &Path, entries: &[(String, String)]) {
    let file = File::create(path).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    for (name, body) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, body.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

pub fn write_period_tarball(root: &Path, period: i64, entries: &[(String, String)]) -> PathBuf {
    let path = root.join(format!("{}.tar.gz", period));
    write_tarball(&path, entries);
    path
}

pub fn write_period_dir(root: &Path, period: i64, entries: &[(String, String)]) -> PathBuf {
    let dir = root.join(period.to_string());
    fs::create_dir_all(&dir).unwrap();
    for (name, body) in entries {
        fs::write(dir.join(name), body).unwrap();
    }
    dir
}
