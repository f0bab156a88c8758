use std::collections::HashMap;
use std::fmt;

/// Where the link currently is in its connect/read cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

/// One decoded telemetry frame.
///
/// The device sends no timestamp, so the order in which samples arrive is the
/// only ordering there is.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TelemetrySample {
    pub voltage: f64,
    pub current: f64,
    pub temperature: f64,
    pub grid_power: f64,
    pub solar_power: f64,
    pub battery_level: f64,
}

impl TelemetrySample {
    /// Field name/value pairs in frame order.
    pub fn fields(&self) -> [(&'static str, f64); 6] {
        [
            ("voltage", self.voltage),
            ("current", self.current),
            ("temperature", self.temperature),
            ("grid_power", self.grid_power),
            ("solar_power", self.solar_power),
            ("battery_level", self.battery_level),
        ]
    }

    pub fn get_topics(&self, prefix: Option<&str>) -> HashMap<String, f64> {
        let base_topic = if let Some(prefix) = prefix {
            format!("{prefix}/telemetry")
        } else {
            "telemetry".to_string()
        };

        self.fields()
            .into_iter()
            .map(|(name, value)| (format!("{base_topic}/{name}"), value))
            .collect()
    }
}

impl fmt::Display for TelemetrySample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.2} V, {:.2} A, {:.1} °C, grid {:.1} W, solar {:.1} W, battery {:.1} %",
            self.voltage,
            self.current,
            self.temperature,
            self.grid_power,
            self.solar_power,
            self.battery_level
        )
    }
}

/// Everything a [`TelemetryLink`](crate::sources::link::TelemetryLink) hands to its consumer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LinkEvent {
    StatusChanged(bool),
    SampleReceived(TelemetrySample),
}
