//! Device lifecycle manager
//!
//! Owns the connection state machine: search for a device matching the
//! configured pattern, open it, watch it for stalls and errors, and
//! reconnect forever at a fixed interval. Every input (device data,
//! device errors, timers, shutdown) arrives as an [`Event`] on one queue
//! and is handled by [`DeviceManager::handle`] on a single task.

use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::device::{
    DeviceEvent, DeviceHandle, DeviceInfo, DeviceProvider, EventCallback, KeyboardReport,
    ReportParser,
};
use crate::engine::NoteEngine;
use crate::error::DeviceError;
use crate::midi::MidiSink;

/// Delay between search passes when no device matches
pub const SEARCH_INTERVAL: Duration = Duration::from_millis(2000);

/// Grace period after opening before a silent device counts as stalled
pub const STALL_CHECK_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Creating,
    /// Open, no data yet
    Idle,
    /// Open and data has flowed
    Playing,
    Searching,
    Closing,
    /// Terminal
    Exiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    Search,
    /// Stall check for the connection with this generation
    StallCheck { generation: u64 },
}

/// Everything the dispatch loop reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    DeviceData {
        generation: u64,
        report: KeyboardReport,
    },
    DeviceError {
        generation: u64,
        error: DeviceError,
    },
    TimerFired(Timer),
    ShutdownRequested,
    /// Final turn after shutdown; ends the loop
    Terminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Timer and deferral service for the dispatch loop
pub trait Scheduler {
    /// Post `Event::TimerFired(timer)` after `delay`
    fn schedule(&mut self, timer: Timer, delay: Duration);

    /// Post `event` on a later dispatch turn
    fn defer(&mut self, event: Event);
}

/// Scheduler backed by tokio timers posting into the event queue
pub struct TokioScheduler {
    events: mpsc::UnboundedSender<Event>,
}

impl TokioScheduler {
    pub fn new(events: mpsc::UnboundedSender<Event>) -> Self {
        Self { events }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, timer: Timer, delay: Duration) {
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(Event::TimerFired(timer));
        });
    }

    fn defer(&mut self, event: Event) {
        let _ = self.events.send(event);
    }
}

/// Why a connection was torn down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetReason {
    Stalled,
    Error(DeviceError),
}

/// Counters over the whole run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub search_passes: u64,
    pub connections: u64,
    pub stalls: u64,
    pub errors: u64,
}

/// An open device and what it has delivered so far
struct Connection<H> {
    handle: H,
    generation: u64,
    received: u64,
}

pub struct DeviceManager<P: DeviceProvider, M: MidiSink, S: Scheduler> {
    provider: P,
    sink: M,
    scheduler: S,
    events: mpsc::UnboundedSender<Event>,
    pattern: Regex,
    engine: NoteEngine,
    state: ConnectionState,
    connection: Option<Connection<P::Handle>>,
    generation: u64,
    stats: ConnectionStats,
}

impl<P: DeviceProvider, M: MidiSink, S: Scheduler> DeviceManager<P, M, S> {
    /// `events` is the sending half of the queue this manager is driven from
    pub fn new(
        provider: P,
        sink: M,
        scheduler: S,
        events: mpsc::UnboundedSender<Event>,
        pattern: Regex,
        engine: NoteEngine,
    ) -> Self {
        Self {
            provider,
            sink,
            scheduler,
            events,
            pattern,
            engine,
            state: ConnectionState::Searching,
            connection: None,
            generation: 0,
            stats: ConnectionStats::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn engine(&self) -> &NoteEngine {
        &self.engine
    }

    pub fn stats(&self) -> ConnectionStats {
        self.stats
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Events received on the current connection
    pub fn received(&self) -> Option<u64> {
        self.connection.as_ref().map(|c| c.received)
    }

    /// Begin the first search pass
    pub fn start(&mut self) {
        self.search();
    }

    /// Drive the manager until shutdown completes
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event>) {
        info!("Starting device loop...");
        self.start();

        while let Some(event) = events.recv().await {
            if self.handle(event) == Flow::Exit {
                break;
            }
        }
    }

    /// Apply one event to the state machine
    pub fn handle(&mut self, event: Event) -> Flow {
        if self.state == ConnectionState::Exiting && event != Event::Terminate {
            trace!("Ignoring {:?} while exiting", event);
            return Flow::Continue;
        }

        match event {
            Event::DeviceData { generation, report } => self.on_data(generation, report),
            Event::DeviceError { generation, error } => {
                if self.is_current(generation) {
                    self.reset(Some(error));
                } else {
                    debug!("Dropping error from closed device: {}", error);
                }
            }
            Event::TimerFired(Timer::Search) => {
                if self.state == ConnectionState::Searching {
                    self.search();
                }
            }
            Event::TimerFired(Timer::StallCheck { generation }) => {
                if self.is_current(generation) {
                    self.check();
                }
            }
            Event::ShutdownRequested => self.exit(),
            Event::Terminate => {
                info!("Exiting.");
                return Flow::Exit;
            }
        }

        Flow::Continue
    }

    fn is_current(&self, generation: u64) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|c| c.generation == generation)
    }

    /// Enumerate and open the first matching device, or try again later
    fn search(&mut self) {
        self.state = ConnectionState::Searching;
        self.stats.search_passes += 1;
        info!("Searching for device matching '{}'...", self.pattern);

        let devices = match self.provider.enumerate() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("{}", e);
                Vec::new()
            }
        };

        if let Some(device) = devices
            .into_iter()
            .find(|d| self.pattern.is_match(&d.product_name))
        {
            info!("Creating device...");
            match self.create(&device) {
                Ok(()) => return,
                Err(e) => {
                    self.stats.errors += 1;
                    error!("Device error: {}", e);
                    self.state = ConnectionState::Searching;
                }
            }
        }

        debug!("Next search in {:?}", SEARCH_INTERVAL);
        self.scheduler.schedule(Timer::Search, SEARCH_INTERVAL);
    }

    fn create(&mut self, device: &DeviceInfo) -> Result<(), DeviceError> {
        self.state = ConnectionState::Creating;
        self.generation += 1;
        let generation = self.generation;

        let events = self.events.clone();
        let on_event: EventCallback = Arc::new(move |event| {
            let event = match event {
                DeviceEvent::Data(report) => Event::DeviceData { generation, report },
                DeviceEvent::Error(error) => Event::DeviceError { generation, error },
            };
            let _ = events.send(event);
        });

        let handle = self
            .provider
            .open(device, ReportParser::Keyboard, on_event)?;
        debug!("Opened {} as generation {}", device, generation);

        self.connection = Some(Connection {
            handle,
            generation,
            received: 0,
        });
        self.initialize(generation);
        Ok(())
    }

    fn initialize(&mut self, generation: u64) {
        self.state = ConnectionState::Idle;
        self.stats.connections += 1;
        self.scheduler
            .schedule(Timer::StallCheck { generation }, STALL_CHECK_DELAY);
    }

    fn on_data(&mut self, generation: u64, report: KeyboardReport) {
        let Some(connection) = self
            .connection
            .as_mut()
            .filter(|c| c.generation == generation)
        else {
            trace!("Dropping report from closed device");
            return;
        };

        connection.received += 1;
        if self.state == ConnectionState::Idle {
            self.state = ConnectionState::Playing;
        }

        trace!("Report: {:?}", report);
        self.engine.process_report(&report, &mut self.sink);
    }

    fn check(&mut self) {
        match self.received() {
            Some(0) => self.reset(None),
            Some(_) => info!("Successfully connected. Ready to play!"),
            None => {}
        }
    }

    /// Close the current device and go back to searching
    fn reset(&mut self, error: Option<DeviceError>) {
        let received = self.close_device().unwrap_or(0);

        let reason = match error {
            Some(error) => Some(ResetReason::Error(error)),
            None if received == 0 => Some(ResetReason::Stalled),
            None => None,
        };
        match &reason {
            Some(ResetReason::Error(e)) => {
                self.stats.errors += 1;
                error!("Device error: {}", e);
            }
            Some(ResetReason::Stalled) => {
                self.stats.stalls += 1;
                warn!("No data received, retrying...");
            }
            None => {}
        }

        self.search();
    }

    /// Returns how many events the closed device had delivered
    fn close_device(&mut self) -> Option<u64> {
        let mut connection = self.connection.take()?;
        self.state = ConnectionState::Closing;
        connection.handle.close();
        Some(connection.received)
    }

    fn exit(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            info!("Closing device...");
            connection.handle.close();
        }
        self.scheduler.defer(Event::Terminate);
        self.state = ConnectionState::Exiting;
    }
}
