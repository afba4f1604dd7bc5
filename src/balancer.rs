use crate::{endpoint::Endpoint, queue::RequestQueue, status::Status};
use enum_map::EnumMap;
use log::{debug, trace};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Observable state of a sub-channel or of the whole balancer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, enum_map::Enum, derive_more::Display,
)]
pub enum ConnectivityState {
    #[display(fmt = "idle")]
    Idle,
    #[display(fmt = "connecting")]
    Connecting,
    #[display(fmt = "ready")]
    Ready,
    #[display(fmt = "transient-failure")]
    TransientFailure,
    #[display(fmt = "shutdown")]
    Shutdown,
}

/// Handle to one endpoint's logical channel, as returned by a pick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subchannel {
    pub id: u64,
    pub endpoint: Endpoint,
}

#[derive(Debug)]
struct SubchannelEntry {
    id: u64,
    endpoint: Endpoint,
    state: ConnectivityState,
    active_streams: usize,
    draining: bool,
}

type PickReply = oneshot::Sender<Result<Subchannel, Status>>;

#[derive(Debug)]
enum Command {
    UpdateEndpoints(Vec<Endpoint>),
    SubchannelState { id: u64, state: ConnectivityState },
    Pick {
        id: u64,
        wait_for_ready: bool,
        reply: PickReply,
    },
    CancelPick(u64),
    StreamFinished(u64),
    Close,
}

/// Clonable front for the balancer task.
///
/// Every mutation of the sub-channel set and of the request queue happens
/// on the driver's executor; this handle only enqueues commands.
#[derive(Debug, Clone)]
pub struct Balancer {
    commands: mpsc::Sender<Command>,
    next_pick_id: Arc<AtomicU64>,
}

impl Balancer {
    #[must_use]
    pub fn new() -> (Self, BalancerDriver) {
        let (tx, rx) = mpsc::channel(64);
        (
            Self {
                commands: tx,
                next_pick_id: Arc::new(AtomicU64::new(1)),
            },
            BalancerDriver {
                commands: rx,
                state: RoundRobin::new(),
            },
        )
    }

    pub async fn update_endpoints(&self, endpoints: Vec<Endpoint>) {
        self.commands
            .send(Command::UpdateEndpoints(endpoints))
            .await
            .ok();
    }

    /// Reports a sub-channel connectivity transition from the transport.
    pub async fn subchannel_state(&self, id: u64, state: ConnectivityState) {
        self.commands
            .send(Command::SubchannelState { id, state })
            .await
            .ok();
    }

    /// Picks the next ready sub-channel, queueing until one becomes ready.
    /// A caller that did not opt into `wait_for_ready` fails fast with
    /// `unavailable` while the balancer is in transient failure.
    pub async fn pick(&self, wait_for_ready: bool) -> Result<Subchannel, Status> {
        let id = self.next_pick_id.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Pick {
                id,
                wait_for_ready,
                reply,
            })
            .await
            .is_err()
        {
            return Err(Status::unavailable("balancer is closed"));
        }
        match rx.await {
            Ok(result) => result,
            Err(_) => {
                // Queue dropped without answering; deregister to be safe.
                self.commands.send(Command::CancelPick(id)).await.ok();
                Err(Status::cancelled("pick abandoned"))
            }
        }
    }

    /// Releases the stream slot a successful pick accounted for.
    pub async fn stream_finished(&self, subchannel_id: u64) {
        self.commands
            .send(Command::StreamFinished(subchannel_id))
            .await
            .ok();
    }

    pub async fn close(&self) {
        self.commands.send(Command::Close).await.ok();
    }
}

/// Long-running driver task collecting sub-channel events, maintaining the
/// derived aggregate state, and waking queued waiters.
pub struct BalancerDriver {
    commands: mpsc::Receiver<Command>,
    state: RoundRobin,
}

impl BalancerDriver {
    /// Sub-channels the transport should start connecting, surfaced after
    /// each command batch.
    pub async fn run(mut self, connect_requests: mpsc::UnboundedSender<Subchannel>) {
        while let Some(command) = self.commands.recv().await {
            let closed = matches!(command, Command::Close);
            self.state.handle(command, &connect_requests);
            if closed {
                break;
            }
        }
        self.state.close();
    }
}

struct RoundRobin {
    subchannels: Vec<SubchannelEntry>,
    next_subchannel_id: u64,
    cursor: usize,
    queue: RequestQueue<PickReply>,
}

impl RoundRobin {
    fn new() -> Self {
        Self {
            subchannels: Vec::new(),
            next_subchannel_id: 1,
            cursor: 0,
            queue: RequestQueue::new(),
        }
    }

    fn handle(&mut self, command: Command, connect_requests: &mpsc::UnboundedSender<Subchannel>) {
        let before = self.aggregate();
        match command {
            Command::UpdateEndpoints(endpoints) => self.update_endpoints(endpoints),
            Command::SubchannelState { id, state } => self.on_subchannel_state(id, state),
            Command::Pick {
                id,
                wait_for_ready,
                reply,
            } => self.on_pick(id, wait_for_ready, reply, connect_requests),
            Command::CancelPick(id) => {
                self.queue.remove(id);
            }
            Command::StreamFinished(id) => self.on_stream_finished(id),
            Command::Close => self.close(),
        }
        let after = self.aggregate();
        if after != before {
            debug!("balancer connectivity {before} -> {after}");
            if after == ConnectivityState::TransientFailure {
                for reply in self.queue.remove_fast_failing() {
                    reply
                        .send(Err(Status::unavailable("no ready sub-channel")))
                        .ok();
                }
            }
        }
    }

    /// Aggregate connectivity state, derived on demand rather than cached.
    fn aggregate(&self) -> ConnectivityState {
        let mut counts: EnumMap<ConnectivityState, usize> = EnumMap::default();
        for entry in &self.subchannels {
            counts[entry.state] += 1;
        }
        if counts[ConnectivityState::Ready] > 0 {
            ConnectivityState::Ready
        } else if counts[ConnectivityState::Connecting] > 0 {
            ConnectivityState::Connecting
        } else if counts[ConnectivityState::TransientFailure] > 0 {
            ConnectivityState::TransientFailure
        } else if counts[ConnectivityState::Idle] > 0 {
            ConnectivityState::Idle
        } else {
            ConnectivityState::Shutdown
        }
    }

    fn update_endpoints(&mut self, endpoints: Vec<Endpoint>) {
        for entry in &mut self.subchannels {
            if !endpoints.contains(&entry.endpoint) {
                entry.draining = true;
                if entry.active_streams == 0 {
                    entry.state = ConnectivityState::Shutdown;
                }
            }
        }
        self.subchannels
            .retain(|e| !(e.draining && e.state == ConnectivityState::Shutdown));

        for endpoint in endpoints {
            let known = self
                .subchannels
                .iter()
                .any(|e| e.endpoint == endpoint && !e.draining);
            if !known {
                let id = self.next_subchannel_id;
                self.next_subchannel_id += 1;
                trace!("new sub-channel {id} for {:?}", endpoint.preferred());
                self.subchannels.push(SubchannelEntry {
                    id,
                    endpoint,
                    state: ConnectivityState::Idle,
                    active_streams: 0,
                    draining: false,
                });
            }
        }
    }

    fn on_subchannel_state(&mut self, id: u64, state: ConnectivityState) {
        let Some(entry) = self.subchannels.iter_mut().find(|e| e.id == id) else {
            return;
        };
        if entry.state == state {
            return;
        }
        trace!("sub-channel {id} {} -> {}", entry.state, state);
        entry.state = state;
        if state == ConnectivityState::Ready {
            self.wake_waiters();
        }
        self.subchannels
            .retain(|e| !(e.draining && e.state == ConnectivityState::Shutdown));
    }

    fn on_pick(
        &mut self,
        id: u64,
        wait_for_ready: bool,
        reply: PickReply,
        connect_requests: &mpsc::UnboundedSender<Subchannel>,
    ) {
        if let Some(subchannel) = self.pick_subchannel() {
            let subchannel_id = subchannel.id;
            if reply.send(Ok(subchannel)).is_err() {
                self.release_stream(subchannel_id);
            }
            return;
        }
        if !wait_for_ready && self.aggregate() == ConnectivityState::TransientFailure {
            reply
                .send(Err(Status::unavailable("no ready sub-channel")))
                .ok();
            return;
        }
        // Demand creates connections: kick an idle sub-channel while the
        // caller waits.
        if let Some(entry) = self
            .subchannels
            .iter_mut()
            .find(|e| e.state == ConnectivityState::Idle && !e.draining)
        {
            entry.state = ConnectivityState::Connecting;
            connect_requests
                .send(Subchannel {
                    id: entry.id,
                    endpoint: entry.endpoint.clone(),
                })
                .ok();
        }
        self.queue.append(id, reply, wait_for_ready);
    }

    /// Next ready sub-channel in round-robin order.
    fn pick_subchannel(&mut self) -> Option<Subchannel> {
        if self.subchannels.is_empty() {
            return None;
        }
        let len = self.subchannels.len();
        for offset in 0..len {
            let index = (self.cursor + offset) % len;
            let entry = &mut self.subchannels[index];
            if entry.state == ConnectivityState::Ready && !entry.draining {
                entry.active_streams += 1;
                self.cursor = index + 1;
                return Some(Subchannel {
                    id: entry.id,
                    endpoint: entry.endpoint.clone(),
                });
            }
        }
        None
    }

    fn wake_waiters(&mut self) {
        while !self.queue.is_empty() {
            let Some(subchannel) = self.pick_subchannel() else {
                break;
            };
            let subchannel_id = subchannel.id;
            match self.queue.pop_first() {
                Some(reply) => {
                    if reply.send(Ok(subchannel)).is_err() {
                        // Caller went away; give the slot back.
                        self.release_stream(subchannel_id);
                    }
                }
                None => {
                    self.release_stream(subchannel_id);
                    break;
                }
            }
        }
    }

    fn on_stream_finished(&mut self, id: u64) {
        self.release_stream(id);
    }

    fn release_stream(&mut self, id: u64) {
        if let Some(entry) = self.subchannels.iter_mut().find(|e| e.id == id) {
            entry.active_streams = entry.active_streams.saturating_sub(1);
            if entry.draining && entry.active_streams == 0 {
                entry.state = ConnectivityState::Shutdown;
            }
        }
        self.subchannels
            .retain(|e| !(e.draining && e.state == ConnectivityState::Shutdown));
    }

    fn close(&mut self) {
        for entry in &mut self.subchannels {
            entry.state = ConnectivityState::Shutdown;
        }
        for reply in self.queue.remove_all() {
            reply.send(Err(Status::cancelled("balancer closed"))).ok();
        }
    }
}
