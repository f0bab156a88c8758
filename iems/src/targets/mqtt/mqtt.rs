use crate::{
    commands::ActuatorCommand,
    targets::{
        event_publisher::EventPublisher,
        mqtt::{
            mqtt_config::MqttConfig,
            mqtt_wrapper::{MqttWrapper, PublishEvent, QoS},
        },
    },
    telemetry::LinkEvent,
};

use log::{debug, warn};
use std::sync::mpsc::Sender;

/// Mirrors link events onto an MQTT broker and accepts relay requests from it.
pub struct Mqtt<MQTT: MqttWrapper> {
    client: MQTT,
    config: MqttConfig,
}

impl<MQTT: MqttWrapper> Mqtt<MQTT> {
    /// Connects and subscribes to the relay topic. Requests arriving there
    /// show up on `pub_tx`, see [`relay_request`].
    pub fn new(config: &MqttConfig, pub_tx: Sender<PublishEvent>) -> Self {
        let mut client = MQTT::new(config, pub_tx);
        if let Err(e) = client.subscribe(&config.relay_topic(), QoS::AtLeastOnce) {
            warn!("could not subscribe to {}: {e:?}", config.relay_topic());
        }
        Self {
            client,
            config: config.clone(),
        }
    }
}

impl<MQTT: MqttWrapper> EventPublisher for Mqtt<MQTT> {
    fn publish(&mut self, event: &LinkEvent) {
        let topic_payload_pairs: Vec<(String, String)> = match event {
            LinkEvent::StatusChanged(connected) => {
                vec![(self.config.device_connected_topic(), connected.to_string())]
            }
            LinkEvent::SampleReceived(sample) => sample
                .get_topics(Some(&self.config.base_topic))
                .into_iter()
                .map(|(topic, value)| (topic, value.to_string()))
                .collect(),
        };

        topic_payload_pairs
            .into_iter()
            .for_each(|(topic, payload)| {
                debug!("Publishing to {} value: {}", topic, payload);
                if let Err(e) = self.client.publish(topic, QoS::AtMostOnce, true, payload) {
                    warn!("mqtt error: {e:?}")
                }
            });
    }
}

/// Turns a message received on the relay topic into a command. The payload is
/// `TARGET` or `TARGET,ACTION`; anything else is logged and ignored.
pub fn relay_request(config: &MqttConfig, event: &PublishEvent) -> Option<ActuatorCommand> {
    if event.topic != config.relay_topic() {
        return None;
    }
    let payload = String::from_utf8_lossy(&event.payload);
    match payload.parse::<ActuatorCommand>() {
        Ok(command) => Some(command),
        Err(e) => {
            warn!("ignoring relay request {:?}: {e}", payload.trim());
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::commands::RelayTarget;
    use crate::telemetry::TelemetrySample;
    use bytes::Bytes;
    use std::sync::mpsc::channel;

    struct RecordingClient {
        subscriptions: Vec<String>,
        published: Vec<(String, bool, String)>,
    }

    impl MqttWrapper for RecordingClient {
        fn subscribe(&mut self, topic: &str, _qos: QoS) -> anyhow::Result<()> {
            self.subscriptions.push(topic.to_string());
            Ok(())
        }

        fn publish<S, V>(&mut self, topic: S, _qos: QoS, retain: bool, payload: V) -> anyhow::Result<()>
        where
            S: Clone + Into<String>,
            V: Clone + Into<Vec<u8>>,
        {
            let payload = String::from_utf8(payload.into())?;
            self.published.push((topic.into(), retain, payload));
            Ok(())
        }

        fn new(_config: &MqttConfig, _pub_tx: Sender<PublishEvent>) -> Self {
            Self {
                subscriptions: Vec::new(),
                published: Vec::new(),
            }
        }
    }

    fn config() -> MqttConfig {
        MqttConfig {
            base_topic: "iems".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_subscribes_to_relay_topic() {
        let (tx, _rx) = channel();
        let mqtt = Mqtt::<RecordingClient>::new(&config(), tx);
        assert_eq!(mqtt.client.subscriptions, vec!["iems/relay/set"]);
    }

    #[test]
    fn test_publish_status() {
        let (tx, _rx) = channel();
        let mut mqtt = Mqtt::<RecordingClient>::new(&config(), tx);

        mqtt.publish(&LinkEvent::StatusChanged(false));
        assert_eq!(
            mqtt.client.published,
            vec![("iems/device/connected".to_string(), true, "false".to_string())]
        );
    }

    #[test]
    fn test_publish_sample() {
        let (tx, _rx) = channel();
        let mut mqtt = Mqtt::<RecordingClient>::new(&config(), tx);

        mqtt.publish(&LinkEvent::SampleReceived(TelemetrySample {
            voltage: 230.5,
            current: 1.2,
            temperature: 36.4,
            grid_power: 500.,
            solar_power: 120.,
            battery_level: 78.,
        }));

        let mut published = mqtt.client.published.clone();
        published.sort();
        assert_eq!(published.len(), 6);
        assert_eq!(
            published[5],
            ("iems/telemetry/voltage".to_string(), true, "230.5".to_string())
        );
        assert!(published.contains(&("iems/telemetry/grid_power".to_string(), true, "500".to_string())));
    }

    fn incoming(topic: &str, payload: &'static str) -> PublishEvent {
        PublishEvent {
            topic: topic.to_string(),
            qos: QoS::AtLeastOnce,
            retain: false,
            payload: Bytes::from_static(payload.as_bytes()),
        }
    }

    #[test]
    fn test_relay_request() {
        let config = config();

        assert_eq!(
            relay_request(&config, &incoming("iems/relay/set", "grid")),
            Some(ActuatorCommand::toggle(RelayTarget::Grid))
        );
        assert_eq!(
            relay_request(&config, &incoming("iems/relay/set", "AUTO,TOGGLE")),
            Some(ActuatorCommand::toggle(RelayTarget::Auto))
        );
        assert_eq!(relay_request(&config, &incoming("iems/relay/set", "kettle")), None);
        assert_eq!(relay_request(&config, &incoming("iems/other", "GRID")), None);
    }
}
