//! Network utilities

use crate::{Error, Result};
use socket2::SockRef;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

#[inline]
pub fn configure_tcp_stream(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
    let sock = SockRef::from(stream);
    let _ = sock.set_keepalive(true);
}

/// Open a TCP connection to `host:port` and apply socket options
pub async fn connect_tcp(host: &Address, port: u16) -> Result<TcpStream> {
    let stream = match host {
        Address::Ipv4(ip) => TcpStream::connect((*ip, port)).await,
        Address::Ipv6(ip) => TcpStream::connect((*ip, port)).await,
        Address::Domain(d) => TcpStream::connect((d.as_str(), port)).await,
    }
    .map_err(|e| Error::connection(format!("Failed to connect to {}: {}", host.to_string_with_port(port), e)))?;

    configure_tcp_stream(&stream);
    Ok(stream)
}

/// Host part of an endpoint or target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// IPv4 address
    Ipv4(Ipv4Addr),
    /// IPv6 address
    Ipv6(Ipv6Addr),
    /// Domain name
    Domain(String),
}

impl Address {
    /// Write in SOCKS5 format (ATYP + address + port)
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W, port: u16) -> Result<()> {
        let mut buf = Vec::with_capacity(self.len());
        match self {
            Address::Ipv4(ip) => {
                buf.push(0x01);
                buf.extend_from_slice(&ip.octets());
            }
            Address::Ipv6(ip) => {
                buf.push(0x04);
                buf.extend_from_slice(&ip.octets());
            }
            Address::Domain(domain) => {
                let bytes = domain.as_bytes();
                if bytes.len() > 255 {
                    return Err(Error::address("Domain name too long"));
                }
                buf.push(0x03);
                buf.push(bytes.len() as u8);
                buf.extend_from_slice(bytes);
            }
        }
        buf.extend_from_slice(&port.to_be_bytes());
        writer.write_all(&buf).await?;
        Ok(())
    }

    /// Get bytes length in SOCKS5 format
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        match self {
            Address::Ipv4(_) => 1 + 4 + 2,
            Address::Ipv6(_) => 1 + 16 + 2,
            Address::Domain(d) => 1 + 1 + d.len() + 2,
        }
    }

    /// Convert to string representation
    pub fn to_string_with_port(&self, port: u16) -> String {
        match self {
            Address::Ipv4(ip) => format!("{}:{}", ip, port),
            Address::Ipv6(ip) => format!("[{}]:{}", ip, port),
            Address::Domain(d) => format!("{}:{}", d, port),
        }
    }

    /// Get as host string (no brackets for IPv6)
    pub fn to_host(&self) -> String {
        match self {
            Address::Ipv4(ip) => ip.to_string(),
            Address::Ipv6(ip) => ip.to_string(),
            Address::Domain(d) => d.clone(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ipv4(ip) => write!(f, "{}", ip),
            Address::Ipv6(ip) => write!(f, "[{}]", ip),
            Address::Domain(d) => write!(f, "{}", d),
        }
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => Address::Ipv4(v4),
            IpAddr::V6(v6) => Address::Ipv6(v6),
        }
    }
}

impl From<String> for Address {
    fn from(domain: String) -> Self {
        if let Ok(ip) = domain.parse::<Ipv4Addr>() {
            return Address::Ipv4(ip);
        }
        if let Ok(ip) = domain.parse::<Ipv6Addr>() {
            return Address::Ipv6(ip);
        }
        Address::Domain(domain)
    }
}

/// Split a `host:port` string. IPv6 hosts must be bracketed (`[::1]:1080`).
pub fn split_host_port(s: &str) -> Result<(Address, u16)> {
    let s = s.trim();
    if s.is_empty() || s.chars().any(char::is_whitespace) {
        return Err(Error::address(format!("Malformed host:port '{}'", s)));
    }

    let (host, port) = if let Some(rest) = s.strip_prefix('[') {
        let (v6, tail) = rest
            .split_once(']')
            .ok_or_else(|| Error::address(format!("Unclosed IPv6 bracket in '{}'", s)))?;
        let port = tail
            .strip_prefix(':')
            .ok_or_else(|| Error::address(format!("Missing port in '{}'", s)))?;
        let ip: Ipv6Addr = v6
            .parse()
            .map_err(|_| Error::address(format!("Invalid IPv6 address '{}'", v6)))?;
        (Address::Ipv6(ip), port)
    } else {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::address(format!("Missing port in '{}'", s)))?;
        if host.is_empty() || host.contains(':') || host.contains('/') {
            return Err(Error::address(format!("Invalid host in '{}'", s)));
        }
        (Address::from(host.to_string()), port)
    };

    let port: u16 = port
        .parse()
        .map_err(|_| Error::address(format!("Invalid port in '{}'", s)))?;
    if port == 0 {
        return Err(Error::address(format!("Port must be non-zero in '{}'", s)));
    }

    Ok((host, port))
}
