//! Stream destination parsing.
//!
//! Supported formats:
//! - `udp://host:port` (RTP over UDP)
//! - `udp://[ipv6]:port`
//! - anything else is handed to the RTSP client sink as its location
//!   (`rtsp://`, `rtsps://`, `rtspt://` ...)

use anyhow::{anyhow, bail, Context, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamAddress {
    Udp { host: String, port: u16 },
    Rtsp { location: String },
}

impl StreamAddress {
    pub fn parse(addr: &str) -> Result<Self> {
        let addr = addr.trim();
        if addr.is_empty() {
            bail!("stream address is empty");
        }

        if let Some(rest) = addr.strip_prefix("udp://") {
            let (host, port) = split_host_port(rest.trim_end_matches('/'))
                .with_context(|| format!("invalid UDP stream address '{}'", addr))?;
            if host.is_empty() {
                bail!("UDP stream address '{}' has no host", addr);
            }
            if port == 0 {
                bail!("UDP stream address '{}' has port 0", addr);
            }
            return Ok(Self::Udp { host, port });
        }

        let location = url::Url::parse(addr)
            .map_err(|e| anyhow!("invalid RTSP location '{}': {}", addr, e))?;
        if location.host_str().map_or(true, str::is_empty) {
            bail!("RTSP location '{}' has no host", addr);
        }
        Ok(Self::Rtsp {
            location: addr.to_string(),
        })
    }

    pub fn is_udp(&self) -> bool {
        matches!(self, Self::Udp { .. })
    }
}

impl std::fmt::Display for StreamAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Udp { host, port } if host.contains(':') => write!(f, "udp://[{}]:{}", host, port),
            Self::Udp { host, port } => write!(f, "udp://{}:{}", host, port),
            Self::Rtsp { location } => write!(f, "{}", location),
        }
    }
}

/// Split `host:port` or `[ipv6]:port`.
pub(crate) fn split_host_port(addr: &str) -> Result<(String, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid address: {}", addr))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| anyhow!("missing port in {}", addr))?;
        let port: u16 = port
            .parse()
            .with_context(|| format!("invalid port in {}", addr))?;
        return Ok((host.to_string(), port));
    }

    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("missing port in {}", addr))?;
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid port in {}", addr))?;
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_udp_address() {
        let addr = StreamAddress::parse("udp://192.168.1.20:5600").unwrap();
        assert_eq!(
            addr,
            StreamAddress::Udp {
                host: "192.168.1.20".to_string(),
                port: 5600
            }
        );
        assert!(addr.is_udp());
    }

    #[test]
    fn parses_udp_ipv6_address() {
        let addr = StreamAddress::parse("udp://[::1]:5600").unwrap();
        assert_eq!(addr.to_string(), "udp://[::1]:5600");
    }

    #[test]
    fn other_schemes_are_rtsp() {
        let addr = StreamAddress::parse("rtsp://10.10.2.1:8554/cam").unwrap();
        assert_eq!(
            addr,
            StreamAddress::Rtsp {
                location: "rtsp://10.10.2.1:8554/cam".to_string()
            }
        );
        assert!(StreamAddress::parse("rtsps://relay.example.com/video").is_ok());
    }

    #[test]
    fn rejects_empty_and_malformed() {
        assert!(StreamAddress::parse("").is_err());
        assert!(StreamAddress::parse("   ").is_err());
        assert!(StreamAddress::parse("udp://host-without-port").is_err());
        assert!(StreamAddress::parse("udp://:5600").is_err());
        assert!(StreamAddress::parse("udp://host:0").is_err());
        assert!(StreamAddress::parse("not an address").is_err());
    }

    #[test]
    fn split_host_port_handles_ipv6() {
        assert_eq!(
            split_host_port("[fe80::1]:8554").unwrap(),
            ("fe80::1".to_string(), 8554)
        );
        assert!(split_host_port("[fe80::1]").is_err());
    }
}
