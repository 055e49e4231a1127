//! Result persistence
//!
//! Writes a classification back to disk in a fixed order: back up the
//! current candidate list, write the details view, then overwrite the
//! candidate list with the fast subset. Each file is replaced atomically.

use crate::classify::EndpointVerdict;
use crate::common::fs::{write_atomic, write_lines_atomic};
use crate::common::Endpoint;
use crate::probe::Protocol;
use crate::Result;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One line of the details view
#[derive(Debug, Clone, PartialEq)]
pub struct DetailRow {
    pub endpoint: Endpoint,
    pub protocol: Protocol,
    pub latency: Duration,
}

impl DetailRow {
    fn from_verdict(v: &EndpointVerdict) -> Option<Self> {
        Some(DetailRow {
            endpoint: v.endpoint.clone(),
            protocol: v.best_protocol?,
            latency: v.best_latency?,
        })
    }

    /// `address | PROTOCOL | 0.80s`
    pub fn to_line(&self) -> String {
        format!(
            "{} | {} | {:.2}s",
            self.endpoint,
            self.protocol,
            self.latency.as_secs_f64()
        )
    }

    /// Parse a details line; the trailing `s` on the latency is optional
    pub fn parse_line(line: &str) -> Option<Self> {
        let mut parts = line.split('|').map(str::trim);
        let address = parts.next().filter(|a| !a.is_empty())?;
        let protocol: Protocol = parts.next()?.parse().ok()?;
        let latency = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        let secs: f64 = latency.strip_suffix('s').unwrap_or(latency).trim().parse().ok()?;
        let latency = Duration::try_from_secs_f64(secs).ok()?;

        Some(DetailRow {
            endpoint: Endpoint::new(address),
            protocol,
            latency,
        })
    }
}

pub struct ResultStore {
    primary: PathBuf,
    details: PathBuf,
    backup: PathBuf,
}

impl ResultStore {
    pub fn new(primary: PathBuf, details: PathBuf, backup: PathBuf) -> Self {
        ResultStore {
            primary,
            details,
            backup,
        }
    }

    /// Persist one classification.
    ///
    /// A failure while backing up leaves every file untouched; a later
    /// failure leaves the fresh backup in place.
    pub fn persist(&self, reachable: &[EndpointVerdict], fast: &[EndpointVerdict]) -> Result<()> {
        self.rotate_backup()?;

        let rows = reachable.iter().filter_map(DetailRow::from_verdict);
        write_lines_atomic(&self.details, rows.map(|r| r.to_line()))?;

        write_lines_atomic(&self.primary, fast.iter().map(|v| v.endpoint.address()))?;

        info!(
            "Saved {} reachable, {} fast endpoints to {}",
            reachable.len(),
            fast.len(),
            self.primary.display()
        );
        Ok(())
    }

    fn rotate_backup(&self) -> Result<()> {
        match fs::read(&self.primary) {
            Ok(bytes) => {
                write_atomic(&self.backup, &bytes)?;
                debug!("Backed up {} to {}", self.primary.display(), self.backup.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No candidate list to back up at {}", self.primary.display());
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read the details view back; malformed lines are skipped
    pub fn load_details(&self) -> Result<Vec<DetailRow>> {
        let content = match fs::read_to_string(&self.details) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut rows = Vec::new();
        for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match DetailRow::parse_line(line) {
                Some(row) => rows.push(row),
                None => warn!("Skipping malformed details line: {}", line),
            }
        }
        Ok(rows)
    }
}
