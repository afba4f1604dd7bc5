use crate::{flags::PingFlags, frame::Frame, types::*};
use enum_map::EnumMap;
use log::{debug, trace, warn};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::Instant as TokioInstant;

/// Effective minimum ping interval while no streams are open and pings
/// without calls are disallowed.
const PING_INTERVAL_WITHOUT_CALLS: Duration = Duration::from_secs(2 * 60 * 60);

const TOO_MANY_PINGS: &[u8] = b"too_many_pings";

/// Server-side connection policy knobs.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Close the connection gracefully once it has lived this long.
    pub max_age: Option<Duration>,
    /// Close the connection gracefully after this long with no open streams.
    pub idle_timeout: Option<Duration>,
    /// How long to wait for in-flight streams after the second GOAWAY
    /// before force-closing. `None` waits indefinitely.
    pub grace_timeout: Option<Duration>,
    /// Send a keep-alive PING after this long without an inbound read.
    pub keepalive_interval: Option<Duration>,
    /// How long to wait for the keep-alive PING ack.
    pub keepalive_timeout: Duration,
    /// Minimum interval between inbound pings while streams are open.
    pub min_ping_interval: Duration,
    /// Permit inbound pings at `min_ping_interval` even with no open
    /// streams; otherwise the effective interval defaults to two hours.
    pub allow_pings_without_calls: bool,
    /// Strikes tolerated before the connection is terminated.
    pub max_ping_strikes: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_age: None,
            idle_timeout: None,
            grace_timeout: None,
            keepalive_interval: None,
            keepalive_timeout: Duration::from_secs(20),
            min_ping_interval: Duration::from_secs(5 * 60),
            allow_pings_without_calls: false,
            max_ping_strikes: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, enum_map::Enum)]
pub enum TimerKind {
    Idle,
    MaxAge,
    KeepAliveSend,
    KeepAliveAck,
    Grace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    MaxAge,
    Idle,
    KeepAliveTimeout,
    Admin,
}

/// Outbound frame kinds the ping policer cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushKind {
    Headers,
    Data,
}

/// Input to the connection manager. Everything arrives on the connection's
/// serial executor; there is no shared state across connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnEvent {
    StreamOpened(NonZeroStreamId),
    StreamClosed(NonZeroStreamId),
    Ping { ack: bool, data: [u8; 8] },
    FrameFlushed(FlushKind),
    ReadCompleted,
    Shutdown(ShutdownReason),
    TimerFired(TimerKind),
}

/// What the manager wants done. The driver translates these into frames,
/// timers, and connection teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnEffect {
    SendGoAway {
        last_stream: StreamId,
        error: ErrorType,
        debug: Vec<u8>,
    },
    SendPing {
        ack: bool,
        data: [u8; 8],
    },
    ArmTimer {
        kind: TimerKind,
        delay: Duration,
    },
    CancelTimer(TimerKind),
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutdownPhase {
    None,
    /// First GOAWAY (max stream id) sent, waiting for our PING ack.
    AwaitingAck,
    /// Second GOAWAY sent; draining remaining streams.
    Draining,
}

/// Per-connection lifecycle state: graceful shutdown, idle/age timers,
/// keep-alive pings, and inbound ping policing.
///
/// Pure event-to-effect machine; `ConnectionDriver` owns one per
/// connection and supplies real time and timers.
#[derive(Debug)]
pub struct ConnectionManager {
    config: ConnectionConfig,
    shutdown_payload: [u8; 8],
    keepalive_payload: [u8; 8],
    open_streams: usize,
    highest_opened: StreamId,
    phase: ShutdownPhase,
    last_valid_ping: Option<Instant>,
    ping_strikes: u32,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(config: ConnectionConfig) -> Self {
        let shutdown_payload: [u8; 8] = rand::random();
        let mut keepalive_payload: [u8; 8] = rand::random();
        if keepalive_payload == shutdown_payload {
            keepalive_payload[0] ^= 0xff;
        }
        Self {
            config,
            shutdown_payload,
            keepalive_payload,
            open_streams: 0,
            highest_opened: 0,
            phase: ShutdownPhase::None,
            last_valid_ping: None,
            ping_strikes: 0,
        }
    }

    /// Arms the initial timers. Called once when the connection goes live.
    pub fn activate(&mut self, now: Instant) -> Vec<ConnEffect> {
        self.last_valid_ping = Some(now);
        let mut effects = Vec::new();
        if let Some(delay) = self.config.max_age {
            effects.push(ConnEffect::ArmTimer {
                kind: TimerKind::MaxAge,
                delay,
            });
        }
        if let Some(delay) = self.config.idle_timeout {
            effects.push(ConnEffect::ArmTimer {
                kind: TimerKind::Idle,
                delay,
            });
        }
        if let Some(delay) = self.config.keepalive_interval {
            effects.push(ConnEffect::ArmTimer {
                kind: TimerKind::KeepAliveSend,
                delay,
            });
        }
        effects
    }

    #[must_use]
    pub fn open_streams(&self) -> usize {
        self.open_streams
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.phase != ShutdownPhase::None
    }

    pub fn handle(&mut self, event: ConnEvent, now: Instant) -> Vec<ConnEffect> {
        match event {
            ConnEvent::StreamOpened(id) => {
                self.open_streams += 1;
                self.highest_opened = self.highest_opened.max(id.get());
                vec![ConnEffect::CancelTimer(TimerKind::Idle)]
            }
            ConnEvent::StreamClosed(_) => {
                self.open_streams = self.open_streams.saturating_sub(1);
                if self.open_streams > 0 {
                    return Vec::new();
                }
                match self.phase {
                    // Last in-flight stream finished after the second
                    // GOAWAY; nothing left to wait for.
                    ShutdownPhase::Draining => {
                        vec![ConnEffect::CancelTimer(TimerKind::Grace), ConnEffect::Close]
                    }
                    ShutdownPhase::None => self
                        .config
                        .idle_timeout
                        .map(|delay| {
                            vec![ConnEffect::ArmTimer {
                                kind: TimerKind::Idle,
                                delay,
                            }]
                        })
                        .unwrap_or_default(),
                    ShutdownPhase::AwaitingAck => Vec::new(),
                }
            }
            ConnEvent::Ping { ack: false, data } => self.on_inbound_ping(data, now),
            ConnEvent::Ping { ack: true, data } => self.on_ping_ack(data),
            ConnEvent::FrameFlushed(_) => {
                // Real traffic went out; the next inbound ping is welcome
                // whenever it arrives.
                self.last_valid_ping = None;
                self.ping_strikes = 0;
                Vec::new()
            }
            ConnEvent::ReadCompleted => {
                let mut effects = vec![ConnEffect::CancelTimer(TimerKind::KeepAliveAck)];
                if let Some(delay) = self.config.keepalive_interval {
                    effects.push(ConnEffect::ArmTimer {
                        kind: TimerKind::KeepAliveSend,
                        delay,
                    });
                }
                effects
            }
            ConnEvent::Shutdown(reason) => self.initiate_shutdown(reason),
            ConnEvent::TimerFired(kind) => self.on_timer(kind),
        }
    }

    /// Two-phase graceful shutdown: announce no new streams past the
    /// maximum representable id, then ping; the matching ack bounds the
    /// set of streams the client managed to open concurrently.
    fn initiate_shutdown(&mut self, reason: ShutdownReason) -> Vec<ConnEffect> {
        if self.phase != ShutdownPhase::None {
            return Vec::new();
        }
        debug!("initiating graceful shutdown: {reason:?}");
        self.phase = ShutdownPhase::AwaitingAck;
        vec![
            ConnEffect::CancelTimer(TimerKind::Idle),
            ConnEffect::CancelTimer(TimerKind::MaxAge),
            ConnEffect::SendGoAway {
                last_stream: U31_MAX.get(),
                error: ErrorType::NoError,
                debug: Vec::new(),
            },
            ConnEffect::SendPing {
                ack: false,
                data: self.shutdown_payload,
            },
        ]
    }

    fn on_ping_ack(&mut self, data: [u8; 8]) -> Vec<ConnEffect> {
        if data == self.keepalive_payload {
            return vec![ConnEffect::CancelTimer(TimerKind::KeepAliveAck)];
        }
        if self.phase != ShutdownPhase::AwaitingAck || data != self.shutdown_payload {
            trace!("ignoring unrelated ping ack");
            return Vec::new();
        }
        self.phase = ShutdownPhase::Draining;
        let mut effects = vec![ConnEffect::SendGoAway {
            last_stream: self.highest_opened,
            error: ErrorType::NoError,
            debug: Vec::new(),
        }];
        if self.open_streams == 0 {
            effects.push(ConnEffect::Close);
        } else if let Some(delay) = self.config.grace_timeout {
            effects.push(ConnEffect::ArmTimer {
                kind: TimerKind::Grace,
                delay,
            });
        }
        effects
    }

    fn on_inbound_ping(&mut self, data: [u8; 8], now: Instant) -> Vec<ConnEffect> {
        let effective = if self.open_streams == 0 && !self.config.allow_pings_without_calls {
            self.config.min_ping_interval.max(PING_INTERVAL_WITHOUT_CALLS)
        } else {
            self.config.min_ping_interval
        };
        let valid = match self.last_valid_ping {
            Some(last) => now.duration_since(last) >= effective,
            None => true,
        };
        if valid {
            self.last_valid_ping = Some(now);
            return vec![ConnEffect::SendPing { ack: true, data }];
        }

        self.ping_strikes += 1;
        if self.ping_strikes > self.config.max_ping_strikes {
            warn!(
                "terminating connection after {} ping strikes",
                self.ping_strikes
            );
            return vec![
                ConnEffect::SendGoAway {
                    last_stream: self.highest_opened,
                    error: ErrorType::EnhanceYourCalm,
                    debug: TOO_MANY_PINGS.to_vec(),
                },
                ConnEffect::Close,
            ];
        }
        trace!("ping strike {}/{}", self.ping_strikes, self.config.max_ping_strikes);
        vec![ConnEffect::SendPing { ack: true, data }]
    }

    fn on_timer(&mut self, kind: TimerKind) -> Vec<ConnEffect> {
        match kind {
            TimerKind::Idle => self.initiate_shutdown(ShutdownReason::Idle),
            TimerKind::MaxAge => self.initiate_shutdown(ShutdownReason::MaxAge),
            TimerKind::KeepAliveSend => vec![
                ConnEffect::SendPing {
                    ack: false,
                    data: self.keepalive_payload,
                },
                ConnEffect::ArmTimer {
                    kind: TimerKind::KeepAliveAck,
                    delay: self.config.keepalive_timeout,
                },
            ],
            TimerKind::KeepAliveAck => self.initiate_shutdown(ShutdownReason::KeepAliveTimeout),
            TimerKind::Grace => vec![ConnEffect::Close],
        }
    }
}

/// Clonable handle feeding the connection's serial executor. The outbound
/// pipeline calls the `*_written` notifiers synchronously on each flush.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    events: mpsc::UnboundedSender<ConnEvent>,
}

impl ConnectionHandle {
    pub fn stream_opened(&self, id: NonZeroStreamId) {
        self.send(ConnEvent::StreamOpened(id));
    }

    pub fn stream_closed(&self, id: NonZeroStreamId) {
        self.send(ConnEvent::StreamClosed(id));
    }

    pub fn ping(&self, ack: bool, data: [u8; 8]) {
        self.send(ConnEvent::Ping { ack, data });
    }

    pub fn read_completed(&self) {
        self.send(ConnEvent::ReadCompleted);
    }

    pub fn headers_written(&self) {
        self.send(ConnEvent::FrameFlushed(FlushKind::Headers));
    }

    pub fn data_written(&self) {
        self.send(ConnEvent::FrameFlushed(FlushKind::Data));
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        self.send(ConnEvent::Shutdown(reason));
    }

    fn send(&self, event: ConnEvent) {
        // The driver has exited; late notifications are fine to drop.
        self.events.send(event).ok();
    }
}

/// Owns a `ConnectionManager` and runs it on one task: the connection's
/// serial executor. Frames flow out through the engine-bound channel; the
/// engine owns this task's join handle, while this side holds only the
/// sender, which breaks the reference cycle between the two.
#[derive(Debug)]
pub struct ConnectionDriver {
    manager: ConnectionManager,
    events: mpsc::UnboundedReceiver<ConnEvent>,
    frames: mpsc::Sender<Frame>,
    deadlines: EnumMap<TimerKind, Option<TokioInstant>>,
}

impl ConnectionDriver {
    #[must_use]
    pub fn new(config: ConnectionConfig, frames: mpsc::Sender<Frame>) -> (ConnectionHandle, Self) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            ConnectionHandle { events: event_tx },
            Self {
                manager: ConnectionManager::new(config),
                events: event_rx,
                frames,
                deadlines: EnumMap::default(),
            },
        )
    }

    pub async fn run(mut self) {
        let effects = self.manager.activate(Instant::now());
        if self.apply(effects).await {
            return;
        }

        loop {
            let next = self
                .deadlines
                .iter()
                .filter_map(|(kind, at)| at.map(|at| (kind, at)))
                .min_by_key(|(_, at)| *at);
            let (next_kind, next_at) = next.unwrap_or((TimerKind::Idle, TokioInstant::now()));

            let effects = tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.manager.handle(event, Instant::now()),
                    // All handles dropped; the connection is gone.
                    None => return,
                },
                () = tokio::time::sleep_until(next_at), if next.is_some() => {
                    self.deadlines[next_kind] = None;
                    self.manager.handle(ConnEvent::TimerFired(next_kind), Instant::now())
                }
            };
            if self.apply(effects).await {
                return;
            }
        }
    }

    /// Returns true once the connection should close.
    async fn apply(&mut self, effects: Vec<ConnEffect>) -> bool {
        for effect in effects {
            match effect {
                ConnEffect::SendGoAway {
                    last_stream,
                    error,
                    debug,
                } => {
                    let frame = Frame::GoAway {
                        last_stream,
                        error,
                        debug,
                    };
                    if self.frames.send(frame).await.is_err() {
                        return true;
                    }
                }
                ConnEffect::SendPing { ack, data } => {
                    let flags = if ack { PingFlags::ACK } else { PingFlags::empty() };
                    if self.frames.send(Frame::Ping { flags, data }).await.is_err() {
                        return true;
                    }
                }
                ConnEffect::ArmTimer { kind, delay } => {
                    self.deadlines[kind] = Some(TokioInstant::now() + delay);
                }
                ConnEffect::CancelTimer(kind) => {
                    self.deadlines[kind] = None;
                }
                ConnEffect::Close => return true,
            }
        }
        false
    }
}
