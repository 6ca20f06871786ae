//! Broker endpoint and TLS settings for the MQTT transport.
//!
//! - CA verification: custom CA path or the bundled webpki roots
//! - Client certificates: mutual TLS when both cert and key are given
//! - Insecure mode is not offered

use anyhow::{anyhow, Context, Result};
use rumqttc::Transport;
use std::path::PathBuf;

use crate::address::split_host_port;

/// TLS certificate materials for the broker connection.
#[derive(Clone, Debug, Default)]
pub struct TlsMaterials {
    /// PEM-encoded CA certificate. `None` uses the default roots.
    pub ca: Option<Vec<u8>>,
    /// Client certificate and key (PEM), always provided together.
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

impl TlsMaterials {
    pub fn load(
        ca_path: Option<&PathBuf>,
        client_cert_path: Option<&PathBuf>,
        client_key_path: Option<&PathBuf>,
    ) -> Result<Self> {
        let ca = match ca_path {
            Some(path) => Some(
                std::fs::read(path)
                    .with_context(|| format!("failed to read MQTT TLS CA '{}'", path.display()))?,
            ),
            None => None,
        };

        let client_auth = match (client_cert_path, client_key_path) {
            (Some(cert_path), Some(key_path)) => {
                let cert = std::fs::read(cert_path).with_context(|| {
                    format!(
                        "failed to read MQTT TLS client cert '{}'",
                        cert_path.display()
                    )
                })?;
                let key = std::fs::read(key_path).with_context(|| {
                    format!("failed to read MQTT TLS client key '{}'", key_path.display())
                })?;
                Some((cert, key))
            }
            (None, None) => None,
            (Some(_), None) => {
                return Err(anyhow!("MQTT TLS client certificate provided without key"))
            }
            (None, Some(_)) => {
                return Err(anyhow!("MQTT TLS client key provided without certificate"))
            }
        };

        Ok(Self { ca, client_auth })
    }

    pub fn is_configured(&self) -> bool {
        self.ca.is_some() || self.client_auth.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl MqttEndpoint {
    /// Build the rumqttc transport for this endpoint.
    pub fn transport(&self, materials: &TlsMaterials) -> Result<Transport> {
        if !self.use_tls {
            if materials.is_configured() {
                return Err(anyhow!(
                    "MQTT TLS materials provided but TLS is disabled.\n\
                     Use --mqtt-use-tls or the mqtts:// scheme to enable TLS."
                ));
            }
            return Ok(Transport::tcp());
        }

        if !materials.is_configured() {
            return Ok(Transport::tls_with_default_config());
        }
        let ca = materials.ca.clone().ok_or_else(|| {
            anyhow!(
                "MQTT TLS CA certificate is required when providing client certificates.\n\
                 Specify --mqtt-tls-ca-path or remove the client cert configuration."
            )
        })?;
        Ok(Transport::tls(ca, materials.client_auth.clone(), None))
    }
}

/// Parse a broker address.
///
/// Supports `host:port`, `[ipv6]:port`, and the `mqtt://`, `tcp://`
/// (plain) and `mqtts://`, `ssl://` (TLS) schemes.
pub fn parse_mqtt_endpoint(addr: &str, tls_override: bool) -> Result<MqttEndpoint> {
    let mut use_tls = tls_override;
    let mut remainder = addr.trim();

    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" => use_tls = true,
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest;
    }

    let (host, port) = split_host_port(remainder)
        .with_context(|| format!("invalid MQTT address '{}'", addr))?;
    Ok(MqttEndpoint {
        host,
        port,
        use_tls,
    })
}

/// Reject brokers that are not on the loopback interface.
pub fn validate_loopback_addr(endpoint: &MqttEndpoint, original: &str) -> Result<()> {
    let host = endpoint.host.as_str();
    if host == "localhost" {
        return Ok(());
    }
    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        if ip.is_loopback() {
            return Ok(());
        }
    }
    Err(anyhow!(
        "MQTT broker must be loopback: {} (use --allow-remote-mqtt to override)",
        original
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_endpoint_plain() {
        let ep = parse_mqtt_endpoint("127.0.0.1:1883", false).unwrap();
        assert_eq!(ep.host, "127.0.0.1");
        assert_eq!(ep.port, 1883);
        assert!(!ep.use_tls);
    }

    #[test]
    fn parse_endpoint_schemes() {
        assert!(parse_mqtt_endpoint("mqtts://broker.local:8883", false).unwrap().use_tls);
        assert!(parse_mqtt_endpoint("ssl://broker.local:8883", false).unwrap().use_tls);
        assert!(!parse_mqtt_endpoint("tcp://broker.local:1883", false).unwrap().use_tls);
        assert!(parse_mqtt_endpoint("ws://broker.local:80", false).is_err());
        assert!(parse_mqtt_endpoint("broker.local", false).is_err());
    }

    #[test]
    fn parse_endpoint_ipv6() {
        let ep = parse_mqtt_endpoint("[::1]:1883", true).unwrap();
        assert_eq!(ep.host, "::1");
        assert!(ep.use_tls);
    }

    #[test]
    fn loopback_check() {
        let local = parse_mqtt_endpoint("localhost:1883", false).unwrap();
        assert!(validate_loopback_addr(&local, "localhost:1883").is_ok());
        let v6 = parse_mqtt_endpoint("[::1]:1883", false).unwrap();
        assert!(validate_loopback_addr(&v6, "[::1]:1883").is_ok());
        let remote = parse_mqtt_endpoint("192.168.1.10:1883", false).unwrap();
        assert!(validate_loopback_addr(&remote, "192.168.1.10:1883").is_err());
    }

    #[test]
    fn materials_on_plain_transport_are_rejected() {
        let ep = parse_mqtt_endpoint("127.0.0.1:1883", false).unwrap();
        let materials = TlsMaterials {
            ca: Some(b"-----BEGIN CERTIFICATE-----".to_vec()),
            client_auth: None,
        };
        assert!(ep.transport(&materials).is_err());
        assert!(ep.transport(&TlsMaterials::default()).is_ok());
    }

    #[test]
    fn client_cert_requires_key() {
        let cert_only =
            TlsMaterials::load(None, Some(&PathBuf::from("/nonexistent/cert.pem")), None);
        assert!(cert_only.unwrap_err().to_string().contains("without key"));
    }
}
