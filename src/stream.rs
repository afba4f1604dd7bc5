use crate::types::StreamId;
use log::{trace, warn};

/// Per-RPC stream states, ordered. Transitions never move backward.
///
/// `Draining` is only reachable in the server role: the peer half-closed
/// the request stream while the local handler is still producing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StreamState {
    Idle,
    Handling,
    Draining,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamRole {
    Client,
    Server,
}

/// Abstract stream events. Receive events originate from the peer via the
/// engine; send events originate from local code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    ReceiveMetadata { end_stream: bool },
    ReceiveMessage,
    ReceiveEnd,
    SendMetadata,
    SendMessage,
    SendStatus,
    Cancel,
}

/// What the caller must do after feeding an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamAction {
    /// Dispatch the user-supplied service method.
    Invoke,
    /// Hand the decoded message to the interceptor/handler pipeline.
    Forward,
    /// Emit the outbound message, flushing response headers first if they
    /// have not reached the wire yet.
    Intercept { flush_headers: bool },
    /// Response metadata recorded for the lazy flush.
    Buffer,
    /// Emit the final status and trailers; a trailers-only response merges
    /// headers and trailers into a single block.
    Finish { trailers_only: bool },
    /// The peer delivered trailers; surface the final status to the caller.
    Complete,
    /// Tear down the stream and emit a `cancelled` status.
    Cancel,
    /// Silently discard; the local half is already finished.
    Drop,
    /// Legal event with no action required.
    Continue,
}

/// Finite state machine tracking both halves of one gRPC stream.
///
/// The same state space serves the client and server roles; only the set of
/// events each role originates differs. Peer protocol violations map to
/// `Cancel`; local misuse trips a debug assertion and degrades to `Cancel`
/// in release builds.
#[derive(Debug)]
pub struct StreamMachine {
    id: StreamId,
    role: StreamRole,
    state: StreamState,
    headers_flushed: bool,
    headers_buffered: bool,
    trailers_sent: bool,
    local_closed: bool,
    saw_response_headers: bool,
}

impl StreamMachine {
    #[must_use]
    pub fn new(role: StreamRole, id: StreamId) -> Self {
        Self {
            id,
            role,
            state: StreamState::Idle,
            headers_flushed: false,
            headers_buffered: false,
            trailers_sent: false,
            local_closed: false,
            saw_response_headers: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> StreamState {
        self.state
    }

    #[must_use]
    pub fn role(&self) -> StreamRole {
        self.role
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state == StreamState::Finished
    }

    pub fn on_event(&mut self, event: StreamEvent) -> StreamAction {
        let before = self.state;
        let action = match self.role {
            StreamRole::Server => self.on_server_event(event),
            StreamRole::Client => self.on_client_event(event),
        };
        if self.state != before {
            trace!("stream {} {:?} -> {:?}", self.id, before, self.state);
        }
        debug_assert!(self.state >= before, "stream state moved backward");
        action
    }

    fn on_server_event(&mut self, event: StreamEvent) -> StreamAction {
        use crate::stream::{StreamAction as A, StreamEvent as E, StreamState as S};
        match (self.state, event) {
            (S::Idle, E::ReceiveMetadata { end_stream }) => {
                self.state = if end_stream { S::Draining } else { S::Handling };
                A::Invoke
            }
            (S::Idle, E::ReceiveMessage | E::ReceiveEnd) => self.peer_violation("frame before headers"),
            (S::Idle, E::Cancel) => {
                self.state = S::Finished;
                A::Cancel
            }
            (S::Idle, E::SendMetadata | E::SendMessage | E::SendStatus) => {
                self.local_violation("send before stream is open")
            }

            (S::Handling, E::ReceiveMetadata { .. }) => {
                self.peer_violation("second HEADERS on request stream")
            }
            (S::Handling, E::ReceiveMessage) => A::Forward,
            (S::Handling, E::ReceiveEnd) => {
                self.state = S::Draining;
                A::Continue
            }
            (S::Draining, E::ReceiveMetadata { .. } | E::ReceiveMessage | E::ReceiveEnd) => {
                self.peer_violation("frame after request half-close")
            }

            (S::Handling | S::Draining, E::SendMetadata) => {
                if self.headers_buffered || self.headers_flushed {
                    return self.local_violation("response metadata already sent");
                }
                self.headers_buffered = true;
                A::Buffer
            }
            (S::Handling | S::Draining, E::SendMessage) => self.intercept(),
            (S::Handling | S::Draining, E::SendStatus) => {
                self.state = S::Finished;
                self.trailers_sent = true;
                A::Finish {
                    trailers_only: !self.headers_flushed,
                }
            }
            (S::Handling | S::Draining, E::Cancel) => {
                self.state = S::Finished;
                A::Cancel
            }

            (S::Finished, E::ReceiveMetadata { .. } | E::ReceiveMessage | E::ReceiveEnd) => {
                self.peer_violation("frame on finished stream")
            }
            (S::Finished, E::SendMetadata | E::SendMessage) => {
                debug_assert!(false, "send on finished stream");
                A::Drop
            }
            (S::Finished, E::SendStatus) => {
                debug_assert!(!self.trailers_sent, "trailers sent twice");
                A::Drop
            }
            (S::Finished, E::Cancel) => A::Continue,
        }
    }

    fn on_client_event(&mut self, event: StreamEvent) -> StreamAction {
        use crate::stream::{StreamAction as A, StreamEvent as E, StreamState as S};
        match (self.state, event) {
            // send_metadata opens the call; request headers go straight to
            // the wire, there is no lazy flush on this side.
            (S::Idle, E::SendMetadata) => {
                self.state = S::Handling;
                self.headers_flushed = true;
                A::Continue
            }
            (S::Idle, E::SendMessage | E::SendStatus) => {
                self.local_violation("send before call is open")
            }
            (S::Idle, E::ReceiveMetadata { .. } | E::ReceiveMessage | E::ReceiveEnd) => {
                self.peer_violation("response frame before request")
            }
            (S::Idle, E::Cancel) => {
                self.state = S::Finished;
                A::Cancel
            }

            (S::Handling, E::ReceiveMetadata { end_stream }) => {
                if end_stream {
                    // Trailers, or a trailers-only response.
                    self.state = S::Finished;
                    A::Complete
                } else if self.saw_response_headers {
                    self.peer_violation("second HEADERS before trailers")
                } else {
                    self.saw_response_headers = true;
                    A::Continue
                }
            }
            (S::Handling, E::ReceiveMessage) => A::Forward,
            (S::Handling, E::ReceiveEnd) => {
                self.peer_violation("response stream closed without trailers")
            }
            (S::Handling, E::SendMetadata) => self.local_violation("request metadata already sent"),
            (S::Handling, E::SendMessage) => {
                if self.local_closed {
                    return self.local_violation("send after request half-close");
                }
                A::Intercept {
                    flush_headers: false,
                }
            }
            // send_status on the client is the request half-close; no
            // trailers are produced on this side.
            (S::Handling, E::SendStatus) => {
                if self.local_closed {
                    return self.local_violation("request already half-closed");
                }
                self.local_closed = true;
                A::Continue
            }
            (S::Handling, E::Cancel) => {
                self.state = S::Finished;
                A::Cancel
            }

            (S::Draining, _) => unreachable!("client streams never drain"),

            (S::Finished, E::ReceiveMetadata { .. } | E::ReceiveMessage | E::ReceiveEnd) => {
                A::Drop
            }
            (S::Finished, E::SendMetadata | E::SendMessage | E::SendStatus) => {
                debug_assert!(false, "send on finished call");
                A::Drop
            }
            (S::Finished, E::Cancel) => A::Continue,
        }
    }

    fn intercept(&mut self) -> StreamAction {
        let flush_headers = !self.headers_flushed;
        self.headers_flushed = true;
        self.headers_buffered = false;
        StreamAction::Intercept { flush_headers }
    }

    fn peer_violation(&mut self, what: &str) -> StreamAction {
        warn!("stream {}: peer protocol violation: {what}", self.id);
        self.state = StreamState::Finished;
        StreamAction::Cancel
    }

    fn local_violation(&mut self, what: &str) -> StreamAction {
        debug_assert!(false, "stream {}: {what}", self.id);
        warn!("stream {}: local protocol violation: {what}", self.id);
        self.state = StreamState::Finished;
        StreamAction::Cancel
    }
}
