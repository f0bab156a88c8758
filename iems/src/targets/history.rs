use std::collections::VecDeque;

use crate::targets::event_publisher::EventPublisher;
use crate::telemetry::{LinkEvent, TelemetrySample};

pub const DEFAULT_HISTORY_SIZE: usize = 100;

/// The most recent samples, numbered in arrival order.
#[derive(Debug)]
pub struct SampleHistory {
    capacity: usize,
    samples: VecDeque<(u64, TelemetrySample)>,
    next_sequence: u64,
    connected: bool,
}

impl Default for SampleHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}

impl SampleHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
            next_sequence: 0,
            connected: false,
        }
    }

    pub fn push(&mut self, sample: TelemetrySample) -> u64 {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.samples.push_back((sequence, sample));
        sequence
    }

    pub fn latest(&self) -> Option<&TelemetrySample> {
        self.samples.back().map(|(_, sample)| sample)
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &(u64, TelemetrySample)> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples seen since creation, including those already evicted.
    pub fn total(&self) -> u64 {
        self.next_sequence
    }

    /// Field-wise mean of the retained samples.
    pub fn average(&self) -> Option<TelemetrySample> {
        if self.samples.is_empty() {
            return None;
        }
        let n = self.samples.len() as f64;
        let sum = self
            .samples
            .iter()
            .fold(TelemetrySample::default(), |acc, (_, s)| TelemetrySample {
                voltage: acc.voltage + s.voltage,
                current: acc.current + s.current,
                temperature: acc.temperature + s.temperature,
                grid_power: acc.grid_power + s.grid_power,
                solar_power: acc.solar_power + s.solar_power,
                battery_level: acc.battery_level + s.battery_level,
            });
        Some(TelemetrySample {
            voltage: sum.voltage / n,
            current: sum.current / n,
            temperature: sum.temperature / n,
            grid_power: sum.grid_power / n,
            solar_power: sum.solar_power / n,
            battery_level: sum.battery_level / n,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Connectivity as last reported by the link.
    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

impl EventPublisher for SampleHistory {
    fn publish(&mut self, event: &LinkEvent) {
        match *event {
            LinkEvent::StatusChanged(connected) => self.connected = connected,
            LinkEvent::SampleReceived(sample) => {
                self.push(sample);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample(voltage: f64) -> TelemetrySample {
        TelemetrySample {
            voltage,
            ..Default::default()
        }
    }

    #[test]
    fn test_bounded() {
        let mut history = SampleHistory::new(3);
        for v in 0..5 {
            history.publish(&LinkEvent::SampleReceived(sample(v as f64)));
        }

        assert_eq!(history.len(), 3);
        let sequences: Vec<u64> = history.iter().map(|(seq, _)| *seq).collect();
        assert_eq!(sequences, vec![2, 3, 4]);
        assert_eq!(history.latest().map(|s| s.voltage), Some(4.));
    }

    #[test]
    fn test_average() {
        let mut history = SampleHistory::new(2);
        assert_eq!(history.average(), None);

        history.push(sample(1.));
        history.push(sample(2.));
        history.push(sample(4.));

        assert_eq!(history.total(), 3);
        assert_eq!(history.average().map(|s| s.voltage), Some(3.));
    }

    #[test]
    fn test_tracks_status() {
        let mut history = SampleHistory::default();
        assert!(!history.is_connected());
        assert!(history.is_empty());
        assert_eq!(history.capacity(), DEFAULT_HISTORY_SIZE);

        history.publish(&LinkEvent::StatusChanged(true));
        assert!(history.is_connected());
        history.publish(&LinkEvent::StatusChanged(false));
        assert!(!history.is_connected());
    }

    #[test]
    fn test_zero_capacity_keeps_latest() {
        let mut history = SampleHistory::new(0);
        history.push(sample(1.));
        history.push(sample(2.));
        assert_eq!(history.len(), 1);
        assert_eq!(history.latest().map(|s| s.voltage), Some(2.));
    }
}
