mod logging;
mod rumqttc_wrapper;

use anyhow::Context;
use clap::{Parser, Subcommand};
use iems::commands::{CommandChannel, RelayAction, RelayTarget};
use iems::device_config::DeviceConfig;
use iems::sources::fake::FakeDevice;
use iems::sources::link::TelemetryLink;
use iems::targets::console::ConsoleLog;
use iems::targets::event_publisher::EventPublisher;
use iems::targets::history::{SampleHistory, DEFAULT_HISTORY_SIZE};
use iems::targets::mqtt::mqtt::{relay_request, Mqtt};
use iems::targets::mqtt::mqtt_config::MqttConfig;
use iems::targets::mqtt::mqtt_wrapper::PublishEvent;
use iems::telemetry::LinkEvent;
use rumqttc_wrapper::RumqttcWrapper;
use serde_derive::Deserialize;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;

use log::{error, info, warn};

const FAKE_FRAME_INTERVAL: Duration = Duration::from_secs(1);

fn default_history_size() -> usize {
    DEFAULT_HISTORY_SIZE
}

#[derive(Debug, Deserialize)]
struct Config {
    device: DeviceConfig,
    #[serde(default = "default_history_size")]
    history_size: usize,
    mqtt: Option<MqttConfig>,
}

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Talk to a built-in simulated controller instead of the configured one
    #[arg(short, long)]
    fake: bool,

    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Send a single relay command and exit
    Relay {
        /// HOME, BATTERY, GRID or AUTO
        target: RelayTarget,

        #[arg(short, long, default_value = "TOGGLE")]
        action: RelayAction,
    },
}

fn load_config(path: &Path, fake: bool) -> anyhow::Result<Config> {
    match fs::read_to_string(path) {
        Ok(contents) => toml::from_str(&contents)
            .with_context(|| format!("could not parse {}", path.display())),
        Err(e) if fake => {
            warn!("{}: {e}, using defaults for the fake device", path.display());
            Ok(Config {
                device: DeviceConfig::new("127.0.0.1", 0),
                history_size: default_history_size(),
                mqtt: None,
            })
        }
        Err(e) => Err(e).with_context(|| format!("could not read {}", path.display())),
    }
}

fn main() -> anyhow::Result<()> {
    logging::init_logger();
    let args = Cli::parse();
    info!("Running iems-monitor {}", env!("CARGO_PKG_VERSION"));

    let mut config = load_config(&args.config, args.fake)?;

    let _fake_device = if args.fake {
        let device = FakeDevice::spawn("127.0.0.1:0", FAKE_FRAME_INTERVAL)
            .context("could not start the fake device")?;
        config.device.host = device.local_addr().ip().to_string();
        config.device.port = device.local_addr().port();
        Some(device)
    } else {
        None
    };

    info!("device endpoint: {}", config.device.endpoint());
    let commands = CommandChannel::new(&config.device);

    match args.command {
        Some(Command::Relay { target, action }) => commands
            .send_command(target, action)
            .with_context(|| format!("could not send {action} to {target}")),
        None => run_monitor(config, commands),
    }
}

fn run_monitor(config: Config, commands: CommandChannel) -> anyhow::Result<()> {
    let mut output_channels: Vec<Box<dyn EventPublisher>> = vec![Box::new(ConsoleLog)];

    if let Some(mqtt_config) = config.mqtt {
        info!("Publishing to MQTT broker {}", mqtt_config.host);
        let (pub_tx, pub_rx) = mpsc::channel();
        output_channels.push(Box::new(Mqtt::<RumqttcWrapper>::new(&mqtt_config, pub_tx)));
        thread::Builder::new()
            .name("relay-dispatch".into())
            .spawn(move || dispatch_relay_requests(&mqtt_config, pub_rx, &commands))
            .context("could not start relay dispatcher")?;
    }

    let mut history = SampleHistory::new(config.history_size);
    let (tx, rx) = mpsc::channel();
    let _link =
        TelemetryLink::start(&config.device, tx).context("could not start telemetry link")?;

    for event in rx {
        output_channels.iter_mut().for_each(|channel| {
            channel.publish(&event);
        });
        history.publish(&event);

        let window_full = history.total() % history.capacity() as u64 == 0;
        if matches!(event, LinkEvent::SampleReceived(_)) && window_full {
            if let Some(average) = history.average() {
                info!("Average of the last {} samples: {average}", history.len());
            }
        }
    }

    Ok(())
}

fn dispatch_relay_requests(
    config: &MqttConfig,
    requests: Receiver<PublishEvent>,
    commands: &CommandChannel,
) {
    for event in requests {
        if let Some(command) = relay_request(config, &event) {
            if let Err(e) = commands.send(&command) {
                error!("{e}");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_example_config() {
        let config: Config = toml::from_str(include_str!("../../../config.example.toml")).unwrap();

        assert_eq!(config.device.host, "192.168.137.72");
        assert_eq!(config.device.port, 12345);
        assert_eq!(config.history_size, 100);
        assert!(config.mqtt.is_none());
    }

    #[test]
    fn test_mqtt_section() {
        let config: Config = toml::from_str(
            r#"
            [device]
            host = "esp32.local"

            [mqtt]
            host = "broker.local"
            "#,
        )
        .unwrap();

        assert_eq!(config.history_size, DEFAULT_HISTORY_SIZE);
        let mqtt = config.mqtt.unwrap();
        assert_eq!(mqtt.host, "broker.local");
        assert_eq!(mqtt.relay_topic(), "iems/relay/set");
    }

    #[test]
    fn test_relay_subcommand() {
        let cli = Cli::try_parse_from(["iems-monitor", "--fake", "relay", "grid"]).unwrap();
        assert!(cli.fake);
        match cli.command {
            Some(Command::Relay { target, action }) => {
                assert_eq!(target, RelayTarget::Grid);
                assert_eq!(action, RelayAction::Toggle);
            }
            None => panic!("expected relay subcommand"),
        }
    }
}
