//! MQTT broker endpoint and TLS materials.
//!
//! Address forms accepted by `parse_mqtt_endpoint`:
//! - `host:port` (plain TCP unless TLS is forced)
//! - `mqtt://host:port`, `tcp://host:port` (plain TCP)
//! - `mqtts://host:port`, `ssl://host:port` (TLS)
//! - `[ipv6]:port`
//!
//! Brokers must be loopback unless remote access is explicitly allowed.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rumqttc::Transport;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl MqttEndpoint {
    pub fn is_loopback(&self) -> bool {
        let host = self.host.as_str();
        if host == "localhost" {
            return true;
        }
        host.parse::<std::net::IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false)
    }
}

/// PEM-encoded certificate material. When `ca` is None the default root
/// store is used.
#[derive(Clone, Debug, Default)]
pub struct TlsMaterials {
    pub ca: Option<Vec<u8>>,
    /// (certificate, key)
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

impl TlsMaterials {
    pub fn load(
        ca_path: Option<&Path>,
        client_cert_path: Option<&Path>,
        client_key_path: Option<&Path>,
    ) -> Result<Self> {
        let ca = ca_path
            .map(|path| {
                std::fs::read(path)
                    .with_context(|| format!("failed to read MQTT TLS CA '{}'", path.display()))
            })
            .transpose()?;

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

    let (host, port) = split_host_port(remainder)?;
    if host.is_empty() {
        return Err(anyhow!("missing MQTT host in {}", addr));
    }
    Ok(MqttEndpoint {
        host,
        port,
        use_tls,
    })
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
        let port: u16 = port
            .parse()
            .with_context(|| format!("invalid MQTT port in {}", addr))?;
        return Ok((host.to_string(), port));
    }

    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid MQTT port in {}", addr))?;
    Ok((host.to_string(), port))
}

pub fn validate_loopback_addr(endpoint: &MqttEndpoint, original: &str) -> Result<()> {
    if endpoint.is_loopback() {
        return Ok(());
    }
    Err(anyhow!(
        "MQTT broker must be loopback: {} (set mqtt.allow_remote to override)",
        original
    ))
}

/// Build the rumqttc transport for an endpoint.
pub fn build_transport(endpoint: &MqttEndpoint, tls: &TlsMaterials) -> Result<Transport> {
    if !endpoint.use_tls {
        if tls.is_configured() {
            return Err(anyhow!(
                "MQTT TLS materials provided but TLS is disabled (use mqtts:// or mqtt.use_tls)"
            ));
        }
        return Ok(Transport::tcp());
    }

    if !tls.is_configured() {
        return Ok(Transport::tls_with_default_config());
    }

    let ca = tls.ca.clone().ok_or_else(|| {
        anyhow!("MQTT TLS CA certificate is required when providing client certificates")
    })?;
    Ok(Transport::tls(ca, tls.client_auth.clone(), None))
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
        let ep = parse_mqtt_endpoint("mqtts://broker.local:8883", false).unwrap();
        assert_eq!(ep.host, "broker.local");
        assert!(ep.use_tls);
        assert!(!parse_mqtt_endpoint("mqtt://localhost:1883", false)
            .unwrap()
            .use_tls);
        assert!(parse_mqtt_endpoint("http://localhost:1883", false).is_err());
    }

    #[test]
    fn parse_endpoint_ipv6_and_errors() {
        let ep = parse_mqtt_endpoint("[::1]:1883", false).unwrap();
        assert_eq!(ep.host, "::1");
        assert!(ep.is_loopback());
        assert!(parse_mqtt_endpoint("localhost", false).is_err());
        assert!(parse_mqtt_endpoint(":1883", false).is_err());
        assert!(parse_mqtt_endpoint("localhost:99999", false).is_err());
    }

    #[test]
    fn loopback_policy() {
        let local = parse_mqtt_endpoint("localhost:1883", false).unwrap();
        assert!(validate_loopback_addr(&local, "localhost:1883").is_ok());
        let remote = parse_mqtt_endpoint("192.168.1.10:1883", false).unwrap();
        let err = validate_loopback_addr(&remote, "192.168.1.10:1883").unwrap_err();
        assert!(err.to_string().contains("loopback"));
    }

    #[test]
    fn tls_materials_require_cert_and_key_together() {
        let err = TlsMaterials::load(None, Some(Path::new("/nonexistent/cert.pem")), None)
            .unwrap_err();
        assert!(err.to_string().contains("without key"));
        assert!(!TlsMaterials::load(None, None, None).unwrap().is_configured());
    }

    #[test]
    fn materials_without_tls_are_rejected() {
        let ep = parse_mqtt_endpoint("localhost:1883", false).unwrap();
        let tls = TlsMaterials {
            ca: Some(b"pem".to_vec()),
            client_auth: None,
        };
        assert!(build_transport(&ep, &tls).is_err());
        assert!(build_transport(&ep, &TlsMaterials::default()).is_ok());
    }
}
