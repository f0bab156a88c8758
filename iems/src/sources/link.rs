use std::io::{self, Read};
use std::net::{Shutdown, TcpStream};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::device_config::DeviceConfig;
use crate::error::LinkError;
use crate::sources::backoff::Backoff;
use crate::sources::frame::FrameDecoder;
use crate::telemetry::{ConnectionState, LinkEvent};

const READ_BUFFER_SIZE: usize = 1024;

/// Counters describing what the link has been through since it started.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub connect_attempts: u64,
    pub sessions: u64,
    pub frames_decoded: u64,
    /// Frames thrown away because a field did not parse.
    pub frames_dropped: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the handle and the worker thread.
#[derive(Default)]
struct Shared {
    stopped: Mutex<bool>,
    wake: Condvar,
    /// Clone of the live session socket, kept so `stop` can abort a read.
    socket: Mutex<Option<TcpStream>>,
    state: Mutex<ConnectionState>,
    stats: Mutex<LinkStats>,
}

impl Shared {
    fn is_stopped(&self) -> bool {
        *lock(&self.stopped)
    }

    /// Sleeps for `delay` unless stopped first. Returns whether the link was stopped.
    fn wait(&self, delay: Duration) -> bool {
        let guard = lock(&self.stopped);
        let (guard, _) = self
            .wake
            .wait_timeout_while(guard, delay, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }

    fn close_socket(&self) {
        if let Some(socket) = lock(&self.socket).take() {
            // the peer may already be gone, nothing to do about it here
            let _ = socket.shutdown(Shutdown::Both);
        }
    }
}

/// A persistent telemetry connection to one device.
///
/// A dedicated thread connects, reads and reconnects until [`stop`](Self::stop)
/// is called or the handle is dropped. Every status change and every decoded
/// sample is sent to the consumer in the order it happened.
pub struct TelemetryLink {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl TelemetryLink {
    /// Starts a link using the backoff policy from `config`.
    pub fn start(config: &DeviceConfig, events: Sender<LinkEvent>) -> io::Result<Self> {
        Self::with_backoff(config, config.backoff.build(), events)
    }

    pub fn with_backoff(
        config: &DeviceConfig,
        backoff: Box<dyn Backoff>,
        events: Sender<LinkEvent>,
    ) -> io::Result<Self> {
        let shared = Arc::new(Shared::default());
        let worker = Worker {
            config: config.clone(),
            backoff,
            decoder: FrameDecoder::new(),
            events,
            shared: shared.clone(),
            reported: None,
        };

        let handle = thread::Builder::new()
            .name("telemetry-link".into())
            .spawn(move || worker.run())?;

        Ok(Self {
            shared,
            worker: Some(handle),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.shared.state)
    }

    pub fn stats(&self) -> LinkStats {
        *lock(&self.shared.stats)
    }

    pub fn is_running(&self) -> bool {
        !self.shared.is_stopped()
    }

    /// Stops the worker and waits for it to exit. No event is emitted once
    /// this returns. Calling it again is a no-op.
    pub fn stop(&mut self) {
        {
            let mut stopped = lock(&self.shared.stopped);
            *stopped = true;
            self.shared.wake.notify_all();
        }
        self.shared.close_socket();

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("telemetry worker panicked");
            }
        }
    }
}

impl Drop for TelemetryLink {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    config: DeviceConfig,
    backoff: Box<dyn Backoff>,
    decoder: FrameDecoder,
    events: Sender<LinkEvent>,
    shared: Arc<Shared>,
    /// Connectivity last told to the consumer, `None` until the first attempt resolves.
    reported: Option<bool>,
}

impl Worker {
    fn run(mut self) {
        while !self.shared.is_stopped() {
            self.set_state(ConnectionState::Connecting);
            lock(&self.shared.stats).connect_attempts += 1;

            let stream = match self.connect() {
                Ok(stream) => stream,
                Err(e) => {
                    debug!("{e}");
                    self.set_state(ConnectionState::Disconnected);
                    if !self.report(false) {
                        break;
                    }
                    let delay = self.backoff.next_delay();
                    debug!("retrying in {delay:?}");
                    if self.shared.wait(delay) {
                        break;
                    }
                    continue;
                }
            };

            self.decoder.reset();
            let decoded_before = self.decoder.decoded();
            let end = self.session(stream);

            self.shared.close_socket();
            self.set_state(ConnectionState::Disconnected);
            match end {
                Some(e) => {
                    debug!("{e}");
                    if !self.report(false) {
                        break;
                    }
                }
                None => break,
            }

            // a device that accepts and hangs up straight away gets the same
            // delay as one that refuses
            if self.decoder.decoded() > decoded_before {
                self.backoff.reset();
            } else {
                let delay = self.backoff.next_delay();
                debug!("session ended without telemetry, retrying in {delay:?}");
                if self.shared.wait(delay) {
                    break;
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        debug!("telemetry worker stopped");
    }

    fn connect(&self) -> Result<TcpStream, LinkError> {
        let addrs = self.config.socket_addrs().map_err(|source| LinkError::Resolve {
            endpoint: self.config.endpoint(),
            source,
        })?;

        let timeout = self.config.connect_timeout();
        let mut last_error = None;
        for addr in addrs {
            let attempt = if timeout.is_zero() {
                TcpStream::connect(addr)
            } else {
                TcpStream::connect_timeout(&addr, timeout)
            };
            match attempt {
                Ok(stream) => return Ok(stream),
                Err(source) => last_error = Some(LinkError::Connect { addr, source }),
            }
        }

        Err(last_error.unwrap_or(LinkError::Closed))
    }

    /// Runs one connected session. Returns why it ended, or `None` when the
    /// link was stopped.
    fn session(&mut self, mut stream: TcpStream) -> Option<LinkError> {
        let read_timeout = Some(self.config.read_timeout()).filter(|t| !t.is_zero());
        if let Err(e) = stream.set_read_timeout(read_timeout) {
            warn!("could not set read timeout: {e}");
        }

        match stream.try_clone() {
            Ok(clone) => *lock(&self.shared.socket) = Some(clone),
            Err(e) => warn!("could not register socket for shutdown: {e}"),
        }
        // stop() may have run before the clone was registered
        if self.shared.is_stopped() {
            return None;
        }

        self.set_state(ConnectionState::Connected);
        lock(&self.shared.stats).sessions += 1;
        if !self.report(true) {
            return None;
        }

        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => return Some(LinkError::Closed),
                Ok(n) => {
                    let samples = self.decoder.push(&buf[..n]);
                    {
                        let mut stats = lock(&self.shared.stats);
                        stats.frames_decoded = self.decoder.decoded();
                        stats.frames_dropped = self.decoder.dropped();
                    }
                    for sample in samples {
                        if !self.emit(LinkEvent::SampleReceived(sample)) {
                            return None;
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    if self.shared.is_stopped() {
                        return None;
                    }
                    return Some(LinkError::Read(e));
                }
            }
        }
    }

    fn set_state(&self, new_state: ConnectionState) {
        *lock(&self.shared.state) = new_state;
    }

    /// Tells the consumer about connectivity, once per change.
    fn report(&mut self, connected: bool) -> bool {
        if self.reported == Some(connected) {
            return !self.shared.is_stopped();
        }
        if !self.emit(LinkEvent::StatusChanged(connected)) {
            return false;
        }
        self.reported = Some(connected);
        if connected {
            info!("Device {} is connected", self.config.endpoint());
        } else {
            info!("Device {} is disconnected", self.config.endpoint());
        }
        true
    }

    /// Delivers one event unless the link has been stopped. The stop flag is
    /// held while sending so nothing slips out after `stop` returns.
    fn emit(&self, event: LinkEvent) -> bool {
        let mut stopped = lock(&self.shared.stopped);
        if *stopped {
            return false;
        }
        if self.events.send(event).is_err() {
            warn!("telemetry consumer went away, stopping link");
            *stopped = true;
            return false;
        }
        true
    }
}
