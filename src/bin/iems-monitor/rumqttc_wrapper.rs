use std::{sync::mpsc::Sender, thread, time::Duration};

use iems::targets::mqtt::{
    mqtt_config::MqttConfig,
    mqtt_wrapper::{MqttWrapper, PublishEvent, QoS},
};
use log::{debug, warn};
use rumqttc::{
    tokio_rustls::rustls::{ClientConfig, RootCertStore},
    Client, Connection, Event, Incoming, LastWill, MqttOptions, Transport,
};

const KEEP_ALIVE: Duration = Duration::from_secs(5);
const REQUEST_CAPACITY: usize = 512;

/// Bridges the library's QoS to rumqttc's in both directions.
#[derive(Clone, Copy)]
struct Qos(rumqttc::QoS);

impl From<QoS> for Qos {
    fn from(qos: QoS) -> Self {
        Self(match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        })
    }
}

impl From<Qos> for QoS {
    fn from(qos: Qos) -> Self {
        match qos.0 {
            rumqttc::QoS::AtMostOnce => QoS::AtMostOnce,
            rumqttc::QoS::AtLeastOnce => QoS::AtLeastOnce,
            rumqttc::QoS::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

/// Root store filled from the platform. Certificates that fail to load are
/// logged and skipped.
fn platform_roots() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    let loaded = rustls_native_certs::load_native_certs();
    for e in &loaded.errors {
        warn!("could not load platform certs: {e}");
    }
    let (added, skipped) = roots.add_parsable_certificates(loaded.certs);
    debug!("loaded {added} platform certs, skipped {skipped}");
    roots
}

/// Broker connection settings, including the retained `offline` last will on
/// the status topic.
fn broker_options(config: &MqttConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.broker_port());
    options.set_keep_alive(KEEP_ALIVE);

    if config.uses_tls() {
        let tls = ClientConfig::builder()
            .with_root_certificates(platform_roots())
            .with_no_client_auth();
        options.set_transport(Transport::tls_with_config(tls.into()));
    }
    if let Some((username, password)) = config.credentials() {
        options.set_credentials(username, password);
    }
    options.set_last_will(LastWill::new(
        config.status_topic(),
        "offline",
        rumqttc::QoS::ExactlyOnce,
        true,
    ));
    options
}

/// Drives the event loop so queued publishes go out, handing incoming
/// publishes to `pub_tx`. Returns when the client is dropped or nobody
/// listens anymore.
fn forward_publishes(mut connection: Connection, pub_tx: Sender<PublishEvent>) {
    for event in connection.iter().flatten() {
        let Event::Incoming(Incoming::Publish(packet)) = event else {
            continue;
        };
        let event = PublishEvent {
            topic: packet.topic,
            qos: Qos(packet.qos).into(),
            retain: packet.retain,
            payload: packet.payload,
        };
        if pub_tx.send(event).is_err() {
            debug!("nobody listens for relay requests anymore");
            return;
        }
    }
}

pub struct RumqttcWrapper {
    client: Client,
}

impl MqttWrapper for RumqttcWrapper {
    fn subscribe(&mut self, topic: &str, qos: QoS) -> anyhow::Result<()> {
        self.client.subscribe(topic, Qos::from(qos).0)?;
        Ok(())
    }

    fn publish<S, V>(&mut self, topic: S, qos: QoS, retain: bool, payload: V) -> anyhow::Result<()>
    where
        S: Clone + Into<String>,
        V: Clone + Into<Vec<u8>>,
    {
        self.client
            .publish(topic, Qos::from(qos).0, retain, payload)?;
        Ok(())
    }

    fn new(config: &MqttConfig, pub_tx: Sender<PublishEvent>) -> Self {
        let (client, connection) = Client::new(broker_options(config), REQUEST_CAPACITY);

        if let Err(e) = client.publish(
            config.status_topic(),
            rumqttc::QoS::ExactlyOnce,
            true,
            "online",
        ) {
            warn!("could not queue the online status: {e}");
        }
        thread::spawn(move || forward_publishes(connection, pub_tx));

        Self { client }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn config() -> MqttConfig {
        MqttConfig {
            host: "broker.local".into(),
            base_topic: "home/iems".into(),
            client_id: "iems-monitor-test".into(),
            username: Some("user".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_qos_conversion() {
        for qos in [QoS::AtMostOnce, QoS::AtLeastOnce, QoS::ExactlyOnce] {
            assert_eq!(QoS::from(Qos::from(qos)), qos);
        }
    }

    #[test]
    fn test_broker_options() {
        let options = broker_options(&config());

        assert_eq!(options.broker_address(), ("broker.local".into(), 1883));
        assert_eq!(options.client_id(), "iems-monitor-test");
        assert_eq!(options.keep_alive(), KEEP_ALIVE);
        assert_eq!(options.credentials(), Some(("user".into(), String::new())));

        let will = options.last_will().unwrap();
        assert_eq!(will.topic, "home/iems/status");
        assert_eq!(&will.message[..], b"offline");
        assert!(will.retain);
    }
}
