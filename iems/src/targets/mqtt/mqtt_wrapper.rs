use crate::targets::mqtt::mqtt_config::MqttConfig;
use bytes::Bytes;
use std::sync::mpsc::Sender;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// A message received on a subscribed topic.
#[derive(Clone, Debug)]
pub struct PublishEvent {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Bytes,
}

/// Decouples the library from a concrete MQTT client. The binary wraps its
/// client in a newtype implementing this trait.
pub trait MqttWrapper {
    fn subscribe(&mut self, topic: &str, qos: QoS) -> anyhow::Result<()>;

    fn publish<S, V>(&mut self, topic: S, qos: QoS, retain: bool, payload: V) -> anyhow::Result<()>
    where
        S: Clone + Into<String>,
        V: Clone + Into<Vec<u8>>;

    /// Connects to the broker. Incoming publishes on subscribed topics are
    /// forwarded to `pub_tx`.
    fn new(config: &MqttConfig, pub_tx: Sender<PublishEvent>) -> Self;
}
