use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rand::Rng;

use crate::commands::{ActuatorCommand, RelayAction, RelayTarget};
use crate::telemetry::TelemetrySample;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How many received commands are remembered.
pub const COMMAND_LOG_SIZE: usize = 256;

/// Relay outputs as the fake controller sees them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelayStates {
    pub home: bool,
    pub battery: bool,
    pub grid: bool,
    pub auto: bool,
}

impl RelayStates {
    pub fn get(&self, target: RelayTarget) -> bool {
        match target {
            RelayTarget::Home => self.home,
            RelayTarget::Battery => self.battery,
            RelayTarget::Grid => self.grid,
            RelayTarget::Auto => self.auto,
        }
    }

    fn apply(&mut self, command: &ActuatorCommand) {
        let relay = match command.target {
            RelayTarget::Home => &mut self.home,
            RelayTarget::Battery => &mut self.battery,
            RelayTarget::Grid => &mut self.grid,
            RelayTarget::Auto => &mut self.auto,
        };
        match command.action {
            RelayAction::Toggle => *relay = !*relay,
        }
    }
}

#[derive(Default)]
struct DeviceState {
    stopped: AtomicBool,
    relays: Mutex<RelayStates>,
    commands: Mutex<VecDeque<ActuatorCommand>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Random walk around plausible readings of a small home installation.
struct Readings {
    sample: TelemetrySample,
}

impl Readings {
    fn new() -> Self {
        Self {
            sample: TelemetrySample {
                voltage: 230.,
                current: 1.5,
                temperature: 35.,
                grid_power: 400.,
                solar_power: 150.,
                battery_level: 80.,
            },
        }
    }

    fn step(&mut self, relays: RelayStates) -> TelemetrySample {
        let mut rng = rand::rng();
        let s = &mut self.sample;
        s.voltage = (s.voltage + rng.random_range(-1.0..1.0)).clamp(210., 250.);
        s.current = (s.current + rng.random_range(-0.1..0.1)).clamp(0., 16.);
        s.temperature = (s.temperature + rng.random_range(-0.2..0.2)).clamp(15., 80.);
        s.grid_power = (s.grid_power + rng.random_range(-10.0..10.0)).clamp(0., 3_000.);
        s.solar_power = (s.solar_power + rng.random_range(-5.0..5.0)).clamp(0., 1_500.);
        s.battery_level = (s.battery_level + rng.random_range(-0.5..0.5)).clamp(0., 100.);

        let mut sample = *s;
        if relays.grid {
            sample.grid_power = 0.;
        }
        sample
    }
}

fn encode_frame(sample: &TelemetrySample) -> String {
    format!(
        "{:.2}\n{:.2}\n0\n{:.1}\n{:.1}\n{:.1}\n{:.1}\n",
        sample.voltage,
        sample.current,
        sample.temperature,
        sample.grid_power,
        sample.solar_power,
        sample.battery_level
    )
}

/// A stand-in for the controller board, serving telemetry on a local port.
///
/// Every connection gets a frame per `interval`, and any `RELAY` lines read
/// from a connection are applied to the relay state.
pub struct FakeDevice {
    local_addr: SocketAddr,
    state: Arc<DeviceState>,
    acceptor: Option<JoinHandle<()>>,
}

impl FakeDevice {
    pub fn spawn(addr: impl ToSocketAddrs, interval: Duration) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let state = Arc::new(DeviceState::default());

        let acceptor_state = state.clone();
        let acceptor = thread::Builder::new()
            .name("fake-device".into())
            .spawn(move || accept_loop(listener, acceptor_state, interval))?;

        info!("Fake device listening on {local_addr}");
        Ok(Self {
            local_addr,
            state,
            acceptor: Some(acceptor),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn relay_states(&self) -> RelayStates {
        *self.state.relays.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The last [`COMMAND_LOG_SIZE`] commands received, oldest first.
    pub fn commands_received(&self) -> Vec<ActuatorCommand> {
        self.state
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    /// Connections currently being served.
    pub fn open_connections(&self) -> usize {
        prune_finished(&self.state)
    }

    /// Closes the listener and every open connection.
    pub fn stop(&mut self) {
        self.state.stopped.store(true, Ordering::SeqCst);
        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.join();
        }
        let workers = std::mem::take(
            &mut *self
                .state
                .workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for worker in workers {
            let _ = worker.join();
        }
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(listener: TcpListener, state: Arc<DeviceState>, interval: Duration) {
    while !state.stopped.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!("fake device accepted {peer}");
                let conn_state = state.clone();
                let spawned = thread::Builder::new()
                    .name("fake-device-conn".into())
                    .spawn(move || serve(stream, conn_state, interval));
                prune_finished(&state);
                match spawned {
                    Ok(handle) => state
                        .workers
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(handle),
                    Err(e) => warn!("could not spawn connection handler: {e}"),
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                warn!("fake device accept failed: {e}");
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

/// Drops the handles of connections that are done. Returns how many remain.
fn prune_finished(state: &DeviceState) -> usize {
    let mut workers = state.workers.lock().unwrap_or_else(PoisonError::into_inner);
    workers.retain(|worker| !worker.is_finished());
    workers.len()
}

fn serve(mut stream: TcpStream, state: Arc<DeviceState>, interval: Duration) {
    let tick = POLL_INTERVAL.min(interval).max(Duration::from_millis(1));
    if let Err(e) = stream
        .set_nonblocking(false)
        .and_then(|_| stream.set_read_timeout(Some(tick)))
    {
        warn!("could not configure fake device connection: {e}");
        return;
    }

    let mut readings = Readings::new();
    let mut pending = Vec::new();
    let mut buf = [0u8; 256];
    let mut last_frame = Instant::now();

    while !state.stopped.load(Ordering::SeqCst) {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&buf[..n]);
                apply_commands(&mut pending, &state);
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("fake device read failed: {e}");
                break;
            }
        }

        if last_frame.elapsed() >= interval {
            last_frame = Instant::now();
            let relays = *state.relays.lock().unwrap_or_else(PoisonError::into_inner);
            let frame = encode_frame(&readings.step(relays));
            if let Err(e) = stream.write_all(frame.as_bytes()) {
                debug!("fake device write failed: {e}");
                break;
            }
        }
    }
}

/// Applies every complete line in `pending`, leaving a trailing partial line.
fn apply_commands(pending: &mut Vec<u8>, state: &DeviceState) {
    while let Some(end) = pending.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = pending.drain(..=end).collect();
        let line = String::from_utf8_lossy(&line);
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<ActuatorCommand>() {
            Ok(command) => {
                info!("Fake device received {}", command.encode().trim_end());
                state
                    .relays
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .apply(&command);
                let mut commands = state.commands.lock().unwrap_or_else(PoisonError::into_inner);
                if commands.len() == COMMAND_LOG_SIZE {
                    commands.pop_front();
                }
                commands.push_back(command);
            }
            Err(e) => warn!("fake device ignored {:?}: {e}", line.trim_end()),
        }
    }
}
