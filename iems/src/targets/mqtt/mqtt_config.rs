use rand::{distr::Alphanumeric, Rng};
use serde::Deserialize;

fn default_topic() -> String {
    "iems".into()
}

fn default_client_id() -> String {
    format!(
        "iems-monitor-{}",
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(5)
            .map(char::from)
            .collect::<String>()
    )
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MqttConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: Option<bool>,
    #[serde(default = "default_topic")]
    pub base_topic: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

impl MqttConfig {
    pub fn uses_tls(&self) -> bool {
        self.tls.unwrap_or(false)
    }

    /// The configured port, or the protocol default (8883 with TLS, 1883 without).
    pub fn broker_port(&self) -> u16 {
        self.port
            .unwrap_or(if self.uses_tls() { 8883 } else { 1883 })
    }

    /// A password without a username is ignored; a username without a
    /// password logs in with an empty one.
    pub fn credentials(&self) -> Option<(String, String)> {
        let username = self.username.clone()?;
        Some((username, self.password.clone().unwrap_or_default()))
    }

    /// Retained, last-will backed availability of the monitor itself.
    pub fn status_topic(&self) -> String {
        format!("{}/status", self.base_topic)
    }

    pub fn device_connected_topic(&self) -> String {
        format!("{}/device/connected", self.base_topic)
    }

    /// Where relay requests are accepted from.
    pub fn relay_topic(&self) -> String {
        format!("{}/relay/set", self.base_topic)
    }
}
