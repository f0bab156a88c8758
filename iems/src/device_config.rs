use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use serde::Deserialize;

use crate::sources::backoff::BackoffConfig;

fn default_port() -> u16 {
    12345
}

fn default_timeout_ms() -> u64 {
    5_000
}

/// Where the controller lives and how patient we are with it.
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// A telemetry session with no data for this long is considered dead.
    #[serde(default = "default_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Upper bound for connecting and writing one relay command.
    #[serde(default = "default_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl DeviceConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout_ms: default_timeout_ms(),
            read_timeout_ms: default_timeout_ms(),
            command_timeout_ms: default_timeout_ms(),
            backoff: BackoffConfig::default(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Every address the host resolves to, in resolver order.
    pub fn socket_addrs(&self) -> io::Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port).to_socket_addrs()?.collect();
        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} resolved to no addresses", self.host),
            ));
        }
        Ok(addrs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

#[cfg(test)]
mod test {
    use super::DeviceConfig;
    use crate::sources::backoff::BackoffConfig;
    use std::time::Duration;

    #[test]
    fn test_deserialize_defaults() {
        let conf: DeviceConfig = toml::from_str(r#"host = "192.168.137.72""#).unwrap();

        assert_eq!(conf.host, "192.168.137.72");
        assert_eq!(conf.port, 12345);
        assert_eq!(conf.connect_timeout(), Duration::from_secs(5));
        assert_eq!(conf.read_timeout(), Duration::from_secs(5));
        assert_eq!(conf.command_timeout(), Duration::from_secs(5));
        assert_eq!(conf.backoff, BackoffConfig::Constant { delay_ms: 3_000 });
        assert_eq!(conf.endpoint(), "192.168.137.72:12345");
    }

    #[test]
    fn test_deserialize() {
        let conf_str = include_str!("../test/configs/test_device_conf.toml");
        let conf: DeviceConfig = toml::from_str(conf_str).unwrap();

        assert_eq!(conf.host, "esp32.local");
        assert_eq!(conf.port, 4242);
        assert_eq!(conf.connect_timeout_ms, 1_500);
        assert_eq!(conf.read_timeout_ms, 10_000);
        assert_eq!(conf.command_timeout_ms, 2_000);
        assert_eq!(
            conf.backoff,
            BackoffConfig::Exponential {
                base_ms: 250,
                max_ms: 8_000
            }
        );
    }
}
