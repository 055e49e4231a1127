//! Verification targets

use crate::common::net::Address;
use crate::{Error, Result};
use std::fmt;
use url::Url;

/// Built-in verification targets, tried in this order
pub const DEFAULT_TEST_URLS: &[&str] = &[
    "http://www.google.com",
    "http://www.youtube.com",
    "http://www.facebook.com",
    "http://www.amazon.com",
    "http://www.twitter.com",
];

/// An external URL expected to answer 200 OK when the path through a proxy works
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    url: Url,
    host: Address,
    port: u16,
}

impl Target {
    pub fn parse(s: &str) -> Result<Self> {
        let url = Url::parse(s.trim()).map_err(|e| Error::parse(format!("Invalid target URL '{}': {}", s, e)))?;
        Self::from_url(url)
    }

    fn from_url(url: Url) -> Result<Self> {
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(Error::unsupported(format!("Target scheme '{}' is not http(s)", other)));
            }
        }

        let host = match url.host() {
            Some(url::Host::Domain(d)) => Address::Domain(d.to_string()),
            Some(url::Host::Ipv4(ip)) => Address::Ipv4(ip),
            Some(url::Host::Ipv6(ip)) => Address::Ipv6(ip),
            None => return Err(Error::parse(format!("Target URL '{}' has no host", url))),
        };
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::parse(format!("Target URL '{}' has no port", url)))?;

        Ok(Target { url, host, port })
    }

    /// The default target list
    pub fn defaults() -> Vec<Target> {
        DEFAULT_TEST_URLS
            .iter()
            .filter_map(|u| Target::parse(u).ok())
            .collect()
    }

    /// Resolve a redirect `Location` against this target
    pub fn join(&self, location: &str) -> Result<Target> {
        let next = self
            .url
            .join(location)
            .map_err(|e| Error::parse(format!("Invalid redirect location '{}': {}", location, e)))?;
        Self::from_url(next)
    }

    pub fn is_tls(&self) -> bool {
        self.url.scheme() == "https"
    }

    pub fn host(&self) -> &Address {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Value for the `Host` header
    pub fn authority(&self) -> String {
        match self.url.port() {
            Some(p) => self.host.to_string_with_port(p),
            None => self.host.to_string(),
        }
    }

    /// Request target for a request sent straight to the origin (path + query)
    pub fn origin_form(&self) -> String {
        let mut s = self.url.path().to_string();
        if let Some(q) = self.url.query() {
            s.push('?');
            s.push_str(q);
        }
        s
    }

    /// Request target for a plain-HTTP request sent to a forward proxy
    pub fn absolute_form(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        url.to_string()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_parse() {
        let targets = Target::defaults();
        assert_eq!(targets.len(), DEFAULT_TEST_URLS.len());
        assert_eq!(targets[0].host(), &Address::Domain("www.google.com".into()));
        assert_eq!(targets[0].port(), 80);
        assert!(!targets[0].is_tls());
    }

    #[test]
    fn test_forms() {
        let t = Target::parse("http://example.com:8080/generate_204?x=1#frag").unwrap();
        assert_eq!(t.origin_form(), "/generate_204?x=1");
        assert_eq!(t.absolute_form(), "http://example.com:8080/generate_204?x=1");
        assert_eq!(t.authority(), "example.com:8080");

        let t = Target::parse("https://example.com").unwrap();
        assert_eq!(t.origin_form(), "/");
        assert_eq!(t.authority(), "example.com");
        assert_eq!(t.port(), 443);
        assert!(t.is_tls());
    }

    #[test]
    fn test_rejects_other_schemes() {
        assert!(Target::parse("ftp://example.com").is_err());
        assert!(Target::parse("not a url").is_err());
    }

    #[test]
    fn test_join_redirect() {
        let t = Target::parse("http://www.youtube.com").unwrap();
        let next = t.join("https://www.youtube.com/").unwrap();
        assert!(next.is_tls());

        let rel = t.join("/feed").unwrap();
        assert_eq!(rel.absolute_form(), "http://www.youtube.com/feed");
    }
}
