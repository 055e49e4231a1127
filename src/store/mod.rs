//! Candidate endpoint list
//!
//! The backing file is newline-delimited `host:port`. Blank lines and lines
//! starting with `#` are ignored on read. Every mutation rewrites the file
//! atomically.

pub mod results;

pub use results::{DetailRow, ResultStore};

use crate::common::fs::write_lines_atomic;
use crate::common::Endpoint;
use crate::{Error, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Counts from one import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    pub duplicates: usize,
    /// Lines without the `host:port` shape
    pub skipped: usize,
}

/// Ordered, duplicate-free list of candidate endpoints
pub struct EndpointStore {
    path: PathBuf,
    endpoints: Vec<Endpoint>,
}

impl EndpointStore {
    /// Open the store and load whatever the backing file holds
    pub fn open<P: Into<PathBuf>>(path: P) -> Self {
        let mut store = EndpointStore {
            path: path.into(),
            endpoints: Vec::new(),
        };
        store.load();
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the backing file. Never fails: a missing or unreadable file
    /// yields an empty list.
    pub fn load(&mut self) -> &[Endpoint] {
        self.endpoints = match fs::read_to_string(&self.path) {
            Ok(content) => parse_list(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Endpoint list {} does not exist yet", self.path.display());
                Vec::new()
            }
            Err(e) => {
                warn!("Failed to read endpoint list {}: {}", self.path.display(), e);
                Vec::new()
            }
        };
        &self.endpoints
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.endpoints.contains(endpoint)
    }

    /// Append `endpoint` if absent; returns whether it was added
    pub fn add(&mut self, endpoint: Endpoint) -> Result<bool> {
        if self.contains(&endpoint) {
            return Ok(false);
        }
        let mut next = self.endpoints.clone();
        next.push(endpoint);
        self.commit(next)?;
        Ok(true)
    }

    /// Remove `endpoint` if present; returns whether it was removed
    pub fn remove(&mut self, endpoint: &Endpoint) -> Result<bool> {
        if !self.contains(endpoint) {
            return Ok(false);
        }
        let next = self.endpoints.iter().filter(|e| *e != endpoint).cloned().collect();
        self.commit(next)?;
        Ok(true)
    }

    /// Overwrite the list, keeping order and dropping repeats
    pub fn save(&mut self, endpoints: Vec<Endpoint>) -> Result<()> {
        self.commit(dedup(endpoints))
    }

    /// Edit `old` in place. Returns `false` when `old` is missing or `new`
    /// is already listed.
    pub fn replace(&mut self, old: &Endpoint, new: &str) -> Result<bool> {
        let new = Endpoint::parse(new)?;
        if new == *old {
            return Ok(self.contains(old));
        }
        if self.contains(&new) {
            return Ok(false);
        }
        let Some(index) = self.endpoints.iter().position(|e| e == old) else {
            return Ok(false);
        };
        let mut next = self.endpoints.clone();
        next[index] = new;
        self.commit(next)?;
        Ok(true)
    }

    /// Add every valid line of `content`
    pub fn import_str(&mut self, content: &str) -> Result<ImportReport> {
        let mut report = ImportReport::default();
        let mut next = self.endpoints.clone();

        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Ok(endpoint) = Endpoint::parse(line) else {
                debug!("Skipping malformed line: {}", line);
                report.skipped += 1;
                continue;
            };
            if next.contains(&endpoint) {
                report.duplicates += 1;
            } else {
                next.push(endpoint);
                report.imported += 1;
            }
        }

        if report.imported > 0 {
            self.commit(next)?;
        }
        info!(
            "Imported {} endpoints ({} duplicates, {} skipped)",
            report.imported, report.duplicates, report.skipped
        );
        Ok(report)
    }

    /// Import a list file
    pub fn import(&mut self, path: &Path) -> Result<ImportReport> {
        let content = fs::read_to_string(path)?;
        self.import_str(&content)
    }

    /// Download a plain-text list and import it
    pub async fn import_url(&mut self, url: &str, timeout: Duration) -> Result<ImportReport> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::network(e.to_string()))?;

        let resp = client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(Error::network(format!("{} answered {}", url, resp.status())));
        }
        let body = resp.text().await?;
        debug!("Fetched {} bytes from {}", body.len(), url);

        self.import_str(&body)
    }

    /// Write the current list to `path`; returns the number of endpoints written
    pub fn export(&self, path: &Path) -> Result<usize> {
        write_lines_atomic(path, self.endpoints.iter().map(Endpoint::address))?;
        info!("Exported {} endpoints to {}", self.endpoints.len(), path.display());
        Ok(self.endpoints.len())
    }

    /// Write `next` to the backing file, then swap it in
    fn commit(&mut self, next: Vec<Endpoint>) -> Result<()> {
        write_lines_atomic(&self.path, next.iter().map(Endpoint::address))?;
        self.endpoints = next;
        Ok(())
    }
}

/// Parse list content: trimmed, no blanks or comments, first occurrence wins
pub fn parse_list(content: &str) -> Vec<Endpoint> {
    dedup(
        content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(Endpoint::new)
            .collect(),
    )
}

fn dedup(endpoints: Vec<Endpoint>) -> Vec<Endpoint> {
    let mut seen = HashSet::with_capacity(endpoints.len());
    endpoints.into_iter().filter(|e| seen.insert(e.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(content: &str) -> (tempfile::TempDir, EndpointStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.txt");
        fs::write(&path, content).unwrap();
        let store = EndpointStore::open(&path);
        (dir, store)
    }

    fn addresses(store: &EndpointStore) -> Vec<&str> {
        store.endpoints().iter().map(Endpoint::address).collect()
    }

    #[test]
    fn test_load_skips_blank_and_comments() {
        let (_dir, store) = store_with("# list\n\n 10.0.0.1:3128 \n10.0.0.2:1080\n   \n");
        assert_eq!(addresses(&store), vec!["10.0.0.1:3128", "10.0.0.2:1080"]);
    }

    #[test]
    fn test_load_collapses_duplicates() {
        let (_dir, store) = store_with("a:1\nb:2\na:1\n");
        assert_eq!(addresses(&store), vec!["a:1", "b:2"]);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = EndpointStore::open(dir.path().join("absent.txt"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_non_utf8_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.txt");
        fs::write(&path, [0xff, 0xfe, 0x00, 0x41]).unwrap();
        assert!(EndpointStore::open(&path).is_empty());
    }

    #[test]
    fn test_add_twice_keeps_one() {
        let (_dir, mut store) = store_with("");
        assert!(store.add(Endpoint::new("1.2.3.4:8080")).unwrap());
        assert!(!store.add(Endpoint::new("1.2.3.4:8080")).unwrap());
        assert_eq!(store.len(), 1);

        let reread = EndpointStore::open(store.path());
        assert_eq!(addresses(&reread), vec!["1.2.3.4:8080"]);
    }

    #[test]
    fn test_remove() {
        let (_dir, mut store) = store_with("a:1\nb:2\n");
        assert!(store.remove(&Endpoint::new("a:1")).unwrap());
        assert!(!store.remove(&Endpoint::new("a:1")).unwrap());
        assert_eq!(fs::read_to_string(store.path()).unwrap(), "b:2\n");
    }

    #[test]
    fn test_save_preserves_order() {
        let (_dir, mut store) = store_with("");
        store
            .save(vec![Endpoint::new("c:3"), Endpoint::new("a:1"), Endpoint::new("c:3")])
            .unwrap();
        assert_eq!(fs::read_to_string(store.path()).unwrap(), "c:3\na:1\n");
    }

    #[test]
    fn test_replace_keeps_position() {
        let (_dir, mut store) = store_with("a:1\nb:2\nc:3\n");
        assert!(store.replace(&Endpoint::new("b:2"), "b:20").unwrap());
        assert_eq!(addresses(&store), vec!["a:1", "b:20", "c:3"]);

        // Target already present
        assert!(!store.replace(&Endpoint::new("a:1"), "c:3").unwrap());
        // Source missing
        assert!(!store.replace(&Endpoint::new("x:9"), "y:9").unwrap());
        // Malformed replacement
        assert!(matches!(
            store.replace(&Endpoint::new("a:1"), "no-port"),
            Err(Error::Address(_))
        ));
    }

    #[test]
    fn test_failed_write_leaves_list_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be replaced by the list file
        let path = dir.path().join("proxy.txt");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep"), "x").unwrap();
        let mut store = EndpointStore::open(&path);

        assert!(store.add(Endpoint::new("1.2.3.4:8080")).is_err());
        assert!(store.is_empty());
        assert!(store.add(Endpoint::new("1.2.3.4:8080")).is_err());
        assert!(store.import_str("10.0.0.1:3128\n").is_err());
        assert!(store.save(vec![Endpoint::new("a:1")]).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_failed_edit_keeps_old_entry() {
        let (dir, mut store) = store_with("a:1\nb:2\n");
        // Swap the file for a directory so the next write fails
        let path = dir.path().join("proxy.txt");
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep"), "x").unwrap();

        assert!(store.replace(&Endpoint::new("a:1"), "a:2").is_err());
        assert!(store.remove(&Endpoint::new("b:2")).is_err());
        assert_eq!(addresses(&store), vec!["a:1", "b:2"]);
    }

    #[test]
    fn test_import_counts() {
        let (_dir, mut store) = store_with("10.0.0.1:3128\n");
        let report = store
            .import_str("# free list\n10.0.0.1:3128\n10.0.0.2:1080\ngarbage\n\n[::1]:8080\n10.0.0.2:1080\n")
            .unwrap();

        assert_eq!(
            report,
            ImportReport {
                imported: 2,
                duplicates: 2,
                skipped: 1
            }
        );
        assert_eq!(addresses(&store), vec!["10.0.0.1:3128", "10.0.0.2:1080", "[::1]:8080"]);
    }

    #[tokio::test]
    async fn test_import_url_from_local_server() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/list.txt", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await.unwrap();
            let body = "10.1.1.1:80\nbad line\n10.1.1.2:8080\n";
            let reply = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(reply.as_bytes()).await.unwrap();
        });

        let (_dir, mut store) = store_with("");
        let report = store.import_url(&url, Duration::from_secs(5)).await.unwrap();

        assert_eq!(report.imported, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(addresses(&store), vec!["10.1.1.1:80", "10.1.1.2:8080"]);
    }

    #[test]
    fn test_import_and_export_files() {
        let (dir, mut store) = store_with("");
        let src = dir.path().join("in.txt");
        fs::write(&src, "a.example:80\nb.example:81\n").unwrap();

        let report = store.import(&src).unwrap();
        assert_eq!(report.imported, 2);

        let out = dir.path().join("out.txt");
        assert_eq!(store.export(&out).unwrap(), 2);
        assert_eq!(fs::read_to_string(&out).unwrap(), "a.example:80\nb.example:81\n");
    }
}
