use std::fmt;
use std::io::{self, Write};
use std::net::TcpStream;
use std::str::FromStr;
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::device_config::DeviceConfig;
use crate::error::{CommandError, ParseRelayError};

const COMMAND_VERB: &str = "RELAY";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RelayTarget {
    Home,
    Battery,
    Grid,
    Auto,
}

impl RelayTarget {
    pub const ALL: [RelayTarget; 4] = [
        RelayTarget::Home,
        RelayTarget::Battery,
        RelayTarget::Grid,
        RelayTarget::Auto,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RelayTarget::Home => "HOME",
            RelayTarget::Battery => "BATTERY",
            RelayTarget::Grid => "GRID",
            RelayTarget::Auto => "AUTO",
        }
    }
}

impl fmt::Display for RelayTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelayTarget {
    type Err = ParseRelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RelayTarget::ALL
            .into_iter()
            .find(|target| target.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseRelayError::Target(s.to_string()))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RelayAction {
    #[default]
    Toggle,
}

impl RelayAction {
    pub fn as_str(self) -> &'static str {
        match self {
            RelayAction::Toggle => "TOGGLE",
        }
    }
}

impl fmt::Display for RelayAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelayAction {
    type Err = ParseRelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("TOGGLE") {
            Ok(RelayAction::Toggle)
        } else {
            Err(ParseRelayError::Action(s.to_string()))
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActuatorCommand {
    pub target: RelayTarget,
    pub action: RelayAction,
}

impl ActuatorCommand {
    pub fn new(target: RelayTarget, action: RelayAction) -> Self {
        Self { target, action }
    }

    pub fn toggle(target: RelayTarget) -> Self {
        Self::new(target, RelayAction::Toggle)
    }

    /// Wire form, newline terminated.
    pub fn encode(&self) -> String {
        format!("{COMMAND_VERB},{},{}\n", self.target, self.action)
    }
}

/// Accepts `TARGET` or `TARGET,ACTION`, with or without the leading `RELAY,`.
impl FromStr for ActuatorCommand {
    type Err = ParseRelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split(',').map(str::trim);
        let mut target = parts.next().unwrap_or_default();
        if target.eq_ignore_ascii_case(COMMAND_VERB) {
            target = parts.next().unwrap_or_default();
        }
        let target = target.parse()?;
        let action = match parts.next() {
            Some(action) => action.parse()?,
            None => RelayAction::default(),
        };
        if let Some(extra) = parts.next() {
            return Err(ParseRelayError::Action(extra.to_string()));
        }
        Ok(Self { target, action })
    }
}

/// Fire-and-forget delivery of relay commands.
///
/// Every command gets its own connection, so calls never touch the telemetry
/// socket and may run concurrently. Success only means the bytes left this
/// host; the device does not acknowledge anything.
#[derive(Clone, Debug)]
pub struct CommandChannel {
    config: DeviceConfig,
}

impl CommandChannel {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn send_command(
        &self,
        target: RelayTarget,
        action: RelayAction,
    ) -> Result<(), CommandError> {
        self.send(&ActuatorCommand::new(target, action))
    }

    /// Connects, writes the command and hangs up, all within the configured
    /// command timeout.
    pub fn send(&self, command: &ActuatorCommand) -> Result<(), CommandError> {
        let deadline = Deadline::after(self.config.command_timeout());

        let mut stream = self.connect(&deadline)?;
        stream
            .set_write_timeout(Some(deadline.remaining()?))
            .map_err(CommandError::Write)?;

        let payload = command.encode();
        stream
            .write_all(payload.as_bytes())
            .and_then(|_| stream.flush())
            .map_err(CommandError::Write)?;

        info!("Command sent: {}", payload.trim_end());
        Ok(())
    }

    fn connect(&self, deadline: &Deadline) -> Result<TcpStream, CommandError> {
        let addrs = self
            .config
            .socket_addrs()
            .map_err(|source| CommandError::Resolve {
                endpoint: self.config.endpoint(),
                source,
            })?;

        let mut last_error = None;
        for addr in addrs {
            let left = deadline.remaining()?;
            match TcpStream::connect_timeout(&addr, left) {
                Ok(stream) => return Ok(stream),
                Err(source) if source.kind() == io::ErrorKind::TimedOut => {
                    debug!("connecting to {addr} timed out");
                    last_error = Some(CommandError::TimedOut(deadline.timeout));
                }
                Err(source) => {
                    debug!("could not connect to {addr}: {source}");
                    last_error = Some(CommandError::Connect { addr, source });
                }
            }
        }

        Err(last_error.unwrap_or(CommandError::TimedOut(deadline.timeout)))
    }
}

/// One time budget shared by every step of sending a command.
#[derive(Clone, Copy, Debug)]
struct Deadline {
    timeout: Duration,
    expires: Instant,
}

impl Deadline {
    fn after(timeout: Duration) -> Self {
        Self {
            timeout,
            expires: Instant::now() + timeout,
        }
    }

    /// Time left, or `TimedOut` once none is.
    fn remaining(&self) -> Result<Duration, CommandError> {
        self.expires
            .checked_duration_since(Instant::now())
            .filter(|left| !left.is_zero())
            .ok_or(CommandError::TimedOut(self.timeout))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    #[test]
    fn test_encode() {
        assert_eq!(
            ActuatorCommand::toggle(RelayTarget::Grid).encode(),
            "RELAY,GRID,TOGGLE\n"
        );
        assert_eq!(
            ActuatorCommand::toggle(RelayTarget::Home).encode(),
            "RELAY,HOME,TOGGLE\n"
        );
    }

    #[test]
    fn test_parse_target() {
        assert_eq!("battery".parse::<RelayTarget>(), Ok(RelayTarget::Battery));
        assert_eq!(" AUTO ".parse::<RelayTarget>(), Ok(RelayTarget::Auto));
        assert_eq!(
            "SOLAR".parse::<RelayTarget>(),
            Err(ParseRelayError::Target("SOLAR".into()))
        );
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(
            "grid".parse::<ActuatorCommand>(),
            Ok(ActuatorCommand::toggle(RelayTarget::Grid))
        );
        assert_eq!(
            "HOME,toggle".parse::<ActuatorCommand>(),
            Ok(ActuatorCommand::toggle(RelayTarget::Home))
        );
        assert_eq!(
            "RELAY,BATTERY,TOGGLE\n".parse::<ActuatorCommand>(),
            Ok(ActuatorCommand::toggle(RelayTarget::Battery))
        );
        assert_eq!(
            "HOME,ON".parse::<ActuatorCommand>(),
            Err(ParseRelayError::Action("ON".into()))
        );
        assert!("".parse::<ActuatorCommand>().is_err());
        assert!("HOME,TOGGLE,NOW".parse::<ActuatorCommand>().is_err());
    }

    #[test]
    fn test_send_command() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let channel = CommandChannel::new(&DeviceConfig::new(addr.ip().to_string(), addr.port()));

        channel
            .send_command(RelayTarget::Grid, RelayAction::Toggle)
            .unwrap();

        let (mut peer, _) = listener.accept().unwrap();
        let mut received = String::new();
        peer.read_to_string(&mut received).unwrap();
        assert_eq!(received, "RELAY,GRID,TOGGLE\n");
    }

    #[test]
    fn test_deadline_expires() {
        let deadline = Deadline::after(Duration::from_millis(50));
        let left = deadline.remaining().unwrap();
        assert!(left <= Duration::from_millis(50));

        std::thread::sleep(Duration::from_millis(60));
        assert!(matches!(
            deadline.remaining(),
            Err(CommandError::TimedOut(t)) if t == Duration::from_millis(50)
        ));
    }

    #[test]
    fn test_exhausted_budget_times_out_before_connecting() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        let mut config = DeviceConfig::new(addr.ip().to_string(), addr.port());
        config.command_timeout_ms = 0;

        let result =
            CommandChannel::new(&config).send(&ActuatorCommand::toggle(RelayTarget::Auto));

        assert!(matches!(result, Err(CommandError::TimedOut(t)) if t.is_zero()));
        assert!(listener.accept().is_err());
    }

    #[test]
    fn test_send_to_closed_port_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut config = DeviceConfig::new(addr.ip().to_string(), addr.port());
        config.command_timeout_ms = 1_000;
        let started = Instant::now();
        let result =
            CommandChannel::new(&config).send_command(RelayTarget::Grid, RelayAction::Toggle);

        assert!(matches!(result, Err(CommandError::Connect { .. })));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
