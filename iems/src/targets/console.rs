use chrono::Local;
use log::{info, warn};

use crate::targets::event_publisher::EventPublisher;
use crate::telemetry::LinkEvent;

/// Writes every event to the log, samples stamped with their local arrival time.
#[derive(Default)]
pub struct ConsoleLog;

impl ConsoleLog {
    pub fn format_event(event: &LinkEvent) -> String {
        match event {
            LinkEvent::StatusChanged(true) => "Status: Connected".to_string(),
            LinkEvent::StatusChanged(false) => "Status: Disconnected".to_string(),
            LinkEvent::SampleReceived(sample) => {
                let now = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
                format!("[{now}] {sample}")
            }
        }
    }
}

impl EventPublisher for ConsoleLog {
    fn publish(&mut self, event: &LinkEvent) {
        let line = Self::format_event(event);
        match event {
            LinkEvent::StatusChanged(false) => warn!("{line}"),
            _ => info!("{line}"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::ConsoleLog;
    use crate::telemetry::{LinkEvent, TelemetrySample};

    #[test]
    fn test_format_event() {
        assert_eq!(
            ConsoleLog::format_event(&LinkEvent::StatusChanged(true)),
            "Status: Connected"
        );

        let line = ConsoleLog::format_event(&LinkEvent::SampleReceived(TelemetrySample {
            voltage: 230.5,
            ..Default::default()
        }));
        assert!(line.starts_with('['));
        assert!(line.ends_with("] 230.50 V, 0.00 A, 0.0 °C, grid 0.0 W, solar 0.0 W, battery 0.0 %"));
    }
}
