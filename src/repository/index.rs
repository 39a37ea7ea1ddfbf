// src/repository/index.rs

//! Repository index client
//!
//! A pacman repository database is a compressed tar archive whose entries
//! are `<pkgname>-<version>/desc` files in `%KEY%`/value blocks. Scanning
//! resolves the repo's URL template, fetches the `.db` archive (HTTPS or
//! `file://`), and parses every desc into a `RepoRecord`. Results are cached
//! on the index for the lifetime of the run.

use crate::arch::Arch;
use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::time::Duration;
use tar::Archive;
use tracing::{debug, warn};
use xz2::read::XzDecoder;

/// Timeout for index and package fetches
pub(crate) const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// One package as advertised by a repository index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRecord {
    pub name: String,
    pub version: String,
    pub filename: String,
    /// Resolved base URL of the repo this record came from
    pub resolved_url: Option<String>,
}

/// Substitute `$repo` and `$arch` placeholders in a repo URL template
pub fn resolve_url(template: &str, repo_name: &str, arch: Arch) -> String {
    template
        .replace("$repo", repo_name)
        .replace("$arch", arch.name())
}

/// Parse one `desc` file: `%KEY%` header lines, value lines, blank separators
fn parse_desc(text: &str, resolved_url: Option<&str>) -> Result<RepoRecord> {
    let mut fields: HashMap<String, String> = HashMap::new();
    let mut key: Option<String> = None;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            key = None;
        } else if line.starts_with('%') && line.ends_with('%') && line.len() > 2 {
            key = Some(line[1..line.len() - 1].to_string());
        } else if let Some(key) = &key {
            // only the first value line matters for the fields we read
            fields.entry(key.clone()).or_insert_with(|| line.to_string());
        }
    }
    let take = |name: &str| -> Result<String> {
        fields
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ParseError(format!("desc block is missing %{}%", name)))
    };
    Ok(RepoRecord {
        name: take("NAME")?,
        version: take("VERSION")?,
        filename: take("FILENAME")?,
        resolved_url: resolved_url.map(str::to_string),
    })
}

/// Wrap raw index bytes in the right decompressor, sniffed by magic bytes
fn decompressed(bytes: Vec<u8>) -> Box<dyn Read> {
    if bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b {
        Box::new(GzDecoder::new(Cursor::new(bytes)))
    } else if bytes.len() >= 6 && bytes[..6] == [0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00] {
        Box::new(XzDecoder::new(Cursor::new(bytes)))
    } else {
        Box::new(Cursor::new(bytes))
    }
}

/// One repository's index for one architecture
#[derive(Debug)]
pub struct RepoIndex {
    pub name: String,
    pub arch: Arch,
    pub url_template: String,
    resolved_url: Option<String>,
    records: Option<HashMap<String, RepoRecord>>,
}

impl RepoIndex {
    pub fn new(name: impl Into<String>, arch: Arch, url_template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arch,
            url_template: url_template.into(),
            resolved_url: None,
            records: None,
        }
    }

    /// The repo's base URL with placeholders substituted
    pub fn resolved_url(&self) -> String {
        self.resolved_url
            .clone()
            .unwrap_or_else(|| resolve_url(&self.url_template, &self.name, self.arch))
    }

    pub fn is_remote(&self) -> bool {
        !self.resolved_url().starts_with("file://")
    }

    pub fn is_scanned(&self) -> bool {
        self.records.is_some()
    }

    /// Fetch and parse the repository database. Idempotent: the parsed map
    /// is cached and reused on subsequent calls.
    pub fn scan(&mut self) -> Result<&HashMap<String, RepoRecord>> {
        if self.records.is_none() {
            let resolved = self.resolved_url();
            let uri = format!("{}/{}.db", resolved, self.name);
            let bytes = if let Some(path) = uri.strip_prefix("file://") {
                debug!("Reading repo index at {}", path);
                std::fs::read(path).map_err(|e| {
                    Error::DownloadError(format!("Repo {} unavailable: {}: {}", self.name, path, e))
                })?
            } else {
                debug!("Downloading repo index from {}", uri);
                let client = reqwest::blocking::Client::builder()
                    .timeout(HTTP_TIMEOUT)
                    .build()
                    .map_err(|e| Error::DownloadError(format!("HTTP client setup failed: {}", e)))?;
                let response = client.get(&uri).send().map_err(|e| {
                    Error::DownloadError(format!("Repo {} unavailable: {}", self.name, e))
                })?;
                if !response.status().is_success() {
                    return Err(Error::DownloadError(format!(
                        "Repo {} unavailable: HTTP {} from {}",
                        self.name,
                        response.status(),
                        uri
                    )));
                }
                response
                    .bytes()
                    .map_err(|e| Error::DownloadError(format!("Failed to read {}: {}", uri, e)))?
                    .to_vec()
            };

            let mut archive = Archive::new(decompressed(bytes));
            let mut records = HashMap::new();
            for entry in archive
                .entries()
                .map_err(|e| Error::ParseError(format!("Bad index archive for {}: {}", self.name, e)))?
            {
                let mut entry = entry
                    .map_err(|e| Error::ParseError(format!("Bad index entry in {}: {}", self.name, e)))?;
                let is_desc = entry
                    .path()
                    .ok()
                    .and_then(|p| p.file_name().map(|f| f == "desc"))
                    .unwrap_or(false);
                if !is_desc {
                    continue;
                }
                let mut text = String::new();
                if entry.read_to_string(&mut text).is_err() {
                    warn!("Skipping unreadable desc entry in {}", self.name);
                    continue;
                }
                match parse_desc(&text, Some(&resolved)) {
                    Ok(record) => {
                        records.insert(record.name.clone(), record);
                    }
                    Err(e) => warn!("Skipping malformed desc in {}: {}", self.name, e),
                }
            }
            debug!("Scanned {}/{}: {} packages", self.arch, self.name, records.len());
            self.resolved_url = Some(resolved);
            self.records = Some(records);
        }
        Ok(self.records.as_ref().unwrap())
    }

    /// Look up a package, scanning on first use
    pub fn get(&mut self, name: &str) -> Result<Option<&RepoRecord>> {
        Ok(self.scan()?.get(name))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn test_resolve_url() {
        assert_eq!(
            resolve_url("https://mirror.example.org/$arch/$repo", "main", Arch::Aarch64),
            "https://mirror.example.org/aarch64/main"
        );
    }

    #[test]
    fn test_parse_desc() {
        let text = "%FILENAME%\nfoo-1.2-1-aarch64.pkg.tar.zst\n\n%NAME%\nfoo\n\n%VERSION%\n1.2-1\n\n%DESC%\nA thing\n";
        let record = parse_desc(text, Some("file:///srv/repo")).unwrap();
        assert_eq!(record.name, "foo");
        assert_eq!(record.version, "1.2-1");
        assert_eq!(record.filename, "foo-1.2-1-aarch64.pkg.tar.zst");
        assert_eq!(record.resolved_url.as_deref(), Some("file:///srv/repo"));
    }

    #[test]
    fn test_parse_desc_missing_field() {
        let err = parse_desc("%NAME%\nfoo\n", None).unwrap_err();
        assert!(matches!(err, Error::ParseError(_)));
    }

    /// Build a gzip-compressed index archive the way repo-add lays it out
    pub(crate) fn write_index(path: &std::path::Path, entries: &[(&str, &str, &str)]) {
        let file = File::create(path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, version, filename) in entries {
            let desc = format!(
                "%FILENAME%\n{}\n\n%NAME%\n{}\n\n%VERSION%\n{}\n",
                filename, name, version
            );
            let mut header = tar::Header::new_gnu();
            header.set_size(desc.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(
                    &mut header,
                    format!("{}-{}/desc", name, version),
                    desc.as_bytes(),
                )
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_scan_local_index() {
        let tmp = tempfile::tempdir().unwrap();
        write_index(
            &tmp.path().join("main.db"),
            &[
                ("foo", "1.0-1", "foo-1.0-1-aarch64.pkg.tar.zst"),
                ("bar", "2.0-1", "bar-2.0-1-any.pkg.tar.xz"),
            ],
        );

        let template = format!("file://{}", tmp.path().display());
        let mut index = RepoIndex::new("main", Arch::Aarch64, template);
        assert!(!index.is_remote());

        let records = index.scan().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records["foo"].version, "1.0-1");

        // cached: a second lookup does not re-read the file
        std::fs::remove_file(tmp.path().join("main.db")).unwrap();
        assert!(index.get("bar").unwrap().is_some());
    }

    #[test]
    fn test_scan_missing_index_is_unavailable() {
        let mut index = RepoIndex::new("main", Arch::Aarch64, "file:///nonexistent");
        let err = index.scan().unwrap_err();
        assert!(matches!(err, Error::DownloadError(_)));
    }
}
