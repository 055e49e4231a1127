//! SOCKS4a / SOCKS5 client handshakes

use super::net::Address;
use crate::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// SOCKS4 constants
pub const SOCKS4_VERSION: u8 = 0x04;
pub const SOCKS4_CMD_CONNECT: u8 = 0x01;
pub const SOCKS4_GRANTED: u8 = 0x5A;

// SOCKS5 version
pub const SOCKS5_VERSION: u8 = 0x05;

// SOCKS5 authentication methods
pub const AUTH_NO_AUTH: u8 = 0x00;
pub const AUTH_NO_ACCEPTABLE: u8 = 0xFF;

// SOCKS5 commands
pub const CMD_CONNECT: u8 = 0x01;

// SOCKS5 address types
pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

// SOCKS5 reply codes
pub const REP_SUCCEEDED: u8 = 0x00;
pub const REP_GENERAL_FAILURE: u8 = 0x01;
pub const REP_CONNECTION_NOT_ALLOWED: u8 = 0x02;
pub const REP_NETWORK_UNREACHABLE: u8 = 0x03;
pub const REP_HOST_UNREACHABLE: u8 = 0x04;
pub const REP_CONNECTION_REFUSED: u8 = 0x05;
pub const REP_TTL_EXPIRED: u8 = 0x06;
pub const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const REP_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// SOCKS4a CONNECT. Domains are forwarded for the proxy to resolve.
pub async fn socks4_connect<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    host: &Address,
    port: u16,
) -> Result<()> {
    let mut request = vec![SOCKS4_VERSION, SOCKS4_CMD_CONNECT];
    request.extend_from_slice(&port.to_be_bytes());

    match host {
        Address::Ipv4(ip) => {
            request.extend_from_slice(&ip.octets());
            request.push(0x00); // empty user id
        }
        Address::Domain(domain) => {
            // 0.0.0.x with x != 0 marks a SOCKS4a request
            request.extend_from_slice(&[0, 0, 0, 1]);
            request.push(0x00);
            request.extend_from_slice(domain.as_bytes());
            request.push(0x00);
        }
        Address::Ipv6(_) => {
            return Err(Error::unsupported("SOCKS4 cannot address IPv6 targets"));
        }
    }

    stream.write_all(&request).await.map_err(|e| {
        Error::connection(format!("Failed to send SOCKS4 request: {}", e))
    })?;
    stream.flush().await?;

    let mut reply = [0u8; 8];
    stream.read_exact(&mut reply).await.map_err(|e| {
        Error::connection(format!("Failed to read SOCKS4 reply: {}", e))
    })?;

    // Some servers echo version 4 instead of 0 in the reply
    if reply[0] != 0x00 && reply[0] != SOCKS4_VERSION {
        return Err(Error::protocol(format!("Invalid SOCKS4 reply version: {}", reply[0])));
    }
    if reply[1] != SOCKS4_GRANTED {
        return Err(Error::connection(format!("SOCKS4 request rejected (code 0x{:02x})", reply[1])));
    }

    Ok(())
}

/// SOCKS5 CONNECT without authentication
pub async fn socks5_connect<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    host: &Address,
    port: u16,
) -> Result<()> {
    stream
        .write_all(&[SOCKS5_VERSION, 1, AUTH_NO_AUTH])
        .await
        .map_err(|e| Error::connection(format!("Failed to send SOCKS5 greeting: {}", e)))?;

    let mut response = [0u8; 2];
    stream.read_exact(&mut response).await.map_err(|e| {
        Error::connection(format!("Failed to read SOCKS5 response: {}", e))
    })?;

    if response[0] != SOCKS5_VERSION {
        return Err(Error::protocol("Invalid SOCKS5 version"));
    }
    match response[1] {
        AUTH_NO_AUTH => {}
        AUTH_NO_ACCEPTABLE => {
            return Err(Error::connection("SOCKS5 server requires authentication"));
        }
        other => {
            return Err(Error::protocol(format!(
                "Unsupported authentication method: {}",
                other
            )));
        }
    }

    stream.write_all(&[SOCKS5_VERSION, CMD_CONNECT, 0x00]).await?;
    host.write_to(stream, port).await?;
    stream.flush().await?;

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await.map_err(|e| {
        Error::connection(format!("Failed to read SOCKS5 reply: {}", e))
    })?;

    if reply[0] != SOCKS5_VERSION {
        return Err(Error::protocol("Invalid SOCKS5 version in reply"));
    }
    if reply[1] != REP_SUCCEEDED {
        return Err(Error::connection(reply_error_message(reply[1])));
    }

    // Skip bound address
    match reply[3] {
        ATYP_IPV4 => {
            let mut buf = [0u8; 4 + 2];
            stream.read_exact(&mut buf).await?;
        }
        ATYP_IPV6 => {
            let mut buf = [0u8; 16 + 2];
            stream.read_exact(&mut buf).await?;
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut buf = vec![0u8; len[0] as usize + 2];
            stream.read_exact(&mut buf).await?;
        }
        _ => {
            return Err(Error::protocol("Invalid address type in reply"));
        }
    }

    Ok(())
}

/// Convert reply code to error message
pub fn reply_error_message(code: u8) -> String {
    match code {
        REP_GENERAL_FAILURE => "General SOCKS server failure".to_string(),
        REP_CONNECTION_NOT_ALLOWED => "Connection not allowed by ruleset".to_string(),
        REP_NETWORK_UNREACHABLE => "Network unreachable".to_string(),
        REP_HOST_UNREACHABLE => "Host unreachable".to_string(),
        REP_CONNECTION_REFUSED => "Connection refused".to_string(),
        REP_TTL_EXPIRED => "TTL expired".to_string(),
        REP_COMMAND_NOT_SUPPORTED => "Command not supported".to_string(),
        REP_ADDRESS_TYPE_NOT_SUPPORTED => "Address type not supported".to_string(),
        _ => format!("Unknown error: {}", code),
    }
}
