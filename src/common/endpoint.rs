//! Candidate proxy endpoint

use super::net::{split_host_port, Address};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A proxy server identified by its `host:port` string.
///
/// The raw string is the identity: two endpoints are equal only if their
/// addresses match exactly (case-sensitive). Construction through
/// [`Endpoint::new`] does not validate, so lists read back from disk keep
/// whatever the user wrote; [`Endpoint::parse`] checks the `host:port` shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoint(String);

impl Endpoint {
    pub fn new<S: Into<String>>(address: S) -> Self {
        Endpoint(address.into())
    }

    /// Validate the `host:port` shape and build an endpoint from the trimmed text
    pub fn parse(address: &str) -> Result<Self> {
        let trimmed = address.trim();
        split_host_port(trimmed)?;
        Ok(Endpoint(trimmed.to_string()))
    }

    pub fn address(&self) -> &str {
        &self.0
    }

    /// Resolve into host and port for dialing
    pub fn host_port(&self) -> Result<(Address, u16)> {
        split_host_port(&self.0)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Endpoint {
    fn from(s: &str) -> Self {
        Endpoint::new(s)
    }
}

impl AsRef<str> for Endpoint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
